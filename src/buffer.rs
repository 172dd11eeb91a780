//! Bounded FIFO buffers, the unit of backpressure.
//!
//! A [`Buffer`] does no locking of its own; the owning port guards it.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::hook::{Hook, HookCtx, HookPos, Hookable, Hooks};

pub struct Buffer<T> {
    name: String,
    capacity: usize,
    elements: VecDeque<T>,
    hooks: Hooks,
}

impl<T: Any> Buffer<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Buffer {
            name: name.into(),
            capacity,
            elements: VecDeque::with_capacity(capacity),
            hooks: Hooks::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn can_push(&self) -> bool {
        self.elements.len() < self.capacity
    }

    /// Append `elem` at the tail.
    ///
    /// # Panics
    /// Panics if the buffer is full. Check [`Buffer::can_push`] first.
    pub fn push(&mut self, elem: T) {
        assert!(
            self.can_push(),
            "buffer {} overflow: capacity {}",
            self.name,
            self.capacity
        );
        if !self.hooks.is_empty() {
            self.hooks
                .invoke_hook(&HookCtx::new(&self.name, HookPos::BufferPush, &elem));
        }
        self.elements.push_back(elem);
    }

    pub fn pop(&mut self) -> Option<T> {
        let elem = self.elements.pop_front()?;
        if !self.hooks.is_empty() {
            self.hooks
                .invoke_hook(&HookCtx::new(&self.name, HookPos::BufferPop, &elem));
        }
        Some(elem)
    }

    pub fn peek(&self) -> Option<&T> {
        self.elements.front()
    }

    pub fn size(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every element without invoking hooks.
    pub fn clear(&mut self) {
        self.elements.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.elements.iter()
    }

    pub(crate) fn reset(&mut self, name: String, capacity: usize, elements: VecDeque<T>) {
        self.name = name;
        self.capacity = capacity;
        self.elements = elements;
    }
}

impl<T> Hookable for Buffer<T> {
    fn accept_hook(&self, hook: Arc<dyn Hook>) {
        self.hooks.accept_hook(hook);
    }

    fn num_hooks(&self) -> usize {
        self.hooks.num_hooks()
    }

    fn invoke_hook(&self, ctx: &HookCtx<'_>) {
        self.hooks.invoke_hook(ctx);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("elements", &self.elements)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    #[test]
    fn test_fifo_order() {
        let mut buf = Buffer::new("B", 3);
        buf.push(1);
        buf.push(2);
        buf.push(3);
        assert!(!buf.can_push());
        assert_eq!(buf.peek(), Some(&1));
        assert_eq!(buf.pop(), Some(1));
        assert_eq!(buf.pop(), Some(2));
        assert_eq!(buf.pop(), Some(3));
        assert_eq!(buf.pop(), None);
    }

    #[test]
    #[should_panic(expected = "buffer B overflow")]
    fn test_push_when_full_is_fatal() {
        let mut buf = Buffer::new("B", 1);
        buf.push('a');
        buf.push('b');
    }

    #[test]
    fn test_zero_capacity_never_accepts() {
        let buf: Buffer<u8> = Buffer::new("Z", 0);
        assert!(!buf.can_push());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut buf = Buffer::new("B", 2);
        buf.push("x");
        buf.push("y");
        buf.clear();
        assert_eq!(buf.size(), 0);
        assert!(buf.can_push());
    }

    #[test]
    fn test_push_and_pop_hooks() {
        let mut buf = Buffer::new("B", 2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            buf.accept_hook(Arc::new(move |ctx: &HookCtx<'_>| {
                let v = ctx.item.downcast_ref::<u32>().copied();
                seen.lock().push((ctx.pos, v));
            }));
        }
        buf.push(7u32);
        buf.pop();
        assert_eq!(
            *seen.lock(),
            vec![(HookPos::BufferPush, Some(7)), (HookPos::BufferPop, Some(7))]
        );
    }

    proptest! {
        #[test]
        fn prop_size_within_capacity(
            cap in 0usize..8,
            ops in proptest::collection::vec(any::<bool>(), 0..64)
        ) {
            let mut buf = Buffer::new("P", cap);
            let mut model = VecDeque::new();
            for (i, push) in ops.into_iter().enumerate() {
                if push {
                    if buf.can_push() {
                        buf.push(i);
                        model.push_back(i);
                    }
                } else {
                    prop_assert_eq!(buf.pop(), model.pop_front());
                }
                prop_assert!(buf.size() <= buf.capacity());
                prop_assert_eq!(buf.size(), model.len());
            }
        }
    }
}
