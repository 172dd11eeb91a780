//! Observation hooks.
//!
//! Kernel objects (engines, buffers, ports, connections) accept [`Hook`]s
//! and invoke them at fixed lifecycle positions. Observers such as
//! tracers and performance analyzers subscribe here instead of patching
//! kernel logic.

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::event::Event;
use crate::msg::Message;
use crate::time::VirtualTime;

/// Where in an object's lifecycle a hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPos {
    BeforeEvent,
    AfterEvent,
    BufferPush,
    BufferPop,
    PortMsgSend,
    PortMsgRecvd,
    PortMsgRetrieve,
    ConnDeliver,
}

/// Everything a hook sees when it fires.
pub struct HookCtx<'a> {
    /// Name of the object that invoked the hook.
    pub domain: &'a str,
    pub pos: HookPos,
    /// Simulation time, when the invoking object knows it.
    pub now: Option<VirtualTime>,
    pub item: &'a dyn Any,
}

impl<'a> HookCtx<'a> {
    pub fn new(domain: &'a str, pos: HookPos, item: &'a dyn Any) -> Self {
        HookCtx {
            domain,
            pos,
            now: None,
            item,
        }
    }

    pub fn at(mut self, now: VirtualTime) -> Self {
        self.now = Some(now);
        self
    }

    /// The item as an event, for `BeforeEvent`/`AfterEvent`.
    pub fn event(&self) -> Option<&Event> {
        self.item.downcast_ref::<Event>()
    }

    /// The item as a message, for port and connection positions.
    pub fn msg(&self) -> Option<&Message> {
        self.item.downcast_ref::<Message>()
    }
}

/// An observer.
pub trait Hook: Send + Sync {
    fn func(&self, ctx: &HookCtx<'_>);
}

impl<F> Hook for F
where
    F: Fn(&HookCtx<'_>) + Send + Sync,
{
    fn func(&self, ctx: &HookCtx<'_>) {
        (self)(ctx)
    }
}

/// An object that accepts hooks.
pub trait Hookable {
    /// Register a hook.
    ///
    /// # Panics
    /// Panics if the same hook instance is already registered.
    fn accept_hook(&self, hook: Arc<dyn Hook>);

    fn num_hooks(&self) -> usize;

    fn invoke_hook(&self, ctx: &HookCtx<'_>);
}

// ── Hooks ─────────────────────────────────────────────────────────────

/// Reusable hook list backing every `Hookable` in the crate.
#[derive(Default)]
pub struct Hooks {
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }
}

impl Hookable for Hooks {
    fn accept_hook(&self, hook: Arc<dyn Hook>) {
        let mut hooks = self.hooks.write();
        assert!(
            !hooks.iter().any(|h| Arc::ptr_eq(h, &hook)),
            "hook is already registered"
        );
        hooks.push(hook);
    }

    fn num_hooks(&self) -> usize {
        self.hooks.read().len()
    }

    fn invoke_hook(&self, ctx: &HookCtx<'_>) {
        for hook in self.hooks.read().iter() {
            hook.func(ctx);
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hooks({})", self.num_hooks())
    }
}

// ── TracingHook ───────────────────────────────────────────────────────

/// Emits every hook invocation as a `tracing` event at TRACE level.
///
/// Attach one instance to as many objects as needed; it carries no
/// state.
#[derive(Debug, Default)]
pub struct TracingHook;

impl Hook for TracingHook {
    fn func(&self, ctx: &HookCtx<'_>) {
        let now = ctx.now.map(|t| t.as_ps());
        if let Some(event) = ctx.event() {
            tracing::trace!(
                domain = ctx.domain,
                pos = ?ctx.pos,
                now_ps = now,
                event = %event.id(),
                payload = event.payload_type(),
                "hook"
            );
        } else if let Some(msg) = ctx.msg() {
            tracing::trace!(
                domain = ctx.domain,
                pos = ?ctx.pos,
                now_ps = now,
                msg = %msg,
                "hook"
            );
        } else {
            tracing::trace!(domain = ctx.domain, pos = ?ctx.pos, now_ps = now, "hook");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::MsgId;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    #[test]
    fn test_hooks_invoked_in_registration_order() {
        let hooks = Hooks::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            hooks.accept_hook(Arc::new(move |ctx: &HookCtx<'_>| {
                seen.lock().push((tag, ctx.pos));
            }));
        }

        hooks.invoke_hook(&HookCtx::new("obj", HookPos::BufferPush, &1u32));
        assert_eq!(
            *seen.lock(),
            vec![("first", HookPos::BufferPush), ("second", HookPos::BufferPush)]
        );
        assert_eq!(hooks.num_hooks(), 2);
    }

    #[test]
    #[should_panic(expected = "hook is already registered")]
    fn test_duplicate_hook_rejected() {
        let hooks = Hooks::new();
        let hook: Arc<dyn Hook> = Arc::new(TracingHook);
        hooks.accept_hook(hook.clone());
        hooks.accept_hook(hook);
    }

    #[test]
    fn test_ctx_downcasts() {
        let msg = Message::new(MsgId::new(9), "A".into(), "B".into(), ());
        let ctx = HookCtx::new("port", HookPos::PortMsgSend, &msg).at(VirtualTime::from_ns(2));
        assert_eq!(ctx.msg().map(|m| m.id()), Some(MsgId::new(9)));
        assert!(ctx.event().is_none());
        assert_eq!(ctx.now, Some(VirtualTime::from_ns(2)));
    }

    #[test]
    #[traced_test]
    fn test_tracing_hook_emits() {
        let hooks = Hooks::new();
        hooks.accept_hook(Arc::new(TracingHook));
        let msg = Message::new(MsgId::new(5), "A.Out".into(), "B.In".into(), ());
        hooks.invoke_hook(&HookCtx::new("A.Out", HookPos::PortMsgSend, &msg));
        assert!(logs_contain("PortMsgSend"));
        assert!(logs_contain("M#5"));
    }
}
