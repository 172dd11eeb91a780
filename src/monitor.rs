//! Buffer occupancy monitoring.
//!
//! Components register the ports and buffers they want observed; the
//! monitor never discovers them on its own. A [`Monitor::snapshot`]
//! reads every registered object's fill level at one instant.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::buffer::Buffer;
use crate::port::{BufferedPort, Port};
use crate::time::VirtualTime;

/// Fill level of one buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferLevel {
    pub name: String,
    pub size: usize,
    pub capacity: usize,
}

impl BufferLevel {
    pub fn is_full(&self) -> bool {
        self.size >= self.capacity
    }
}

/// Something that can report buffer levels.
pub trait Monitorable: Send + Sync {
    fn levels(&self) -> Vec<BufferLevel>;
}

impl Monitorable for BufferedPort {
    fn levels(&self) -> Vec<BufferLevel> {
        let (in_cap, out_cap) = self.capacities();
        vec![
            BufferLevel {
                name: format!("{}.In", self.name()),
                size: self.incoming_len(),
                capacity: in_cap,
            },
            BufferLevel {
                name: format!("{}.Out", self.name()),
                size: self.outgoing_len(),
                capacity: out_cap,
            },
        ]
    }
}

impl<T: Send + 'static> Monitorable for Mutex<Buffer<T>> {
    fn levels(&self) -> Vec<BufferLevel> {
        let buf = self.lock();
        vec![BufferLevel {
            name: buf.name().to_string(),
            size: buf.size(),
            capacity: buf.capacity(),
        }]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub time: VirtualTime,
    pub levels: Vec<BufferLevel>,
}

impl MonitorSnapshot {
    /// Levels of buffers that are completely full.
    pub fn full(&self) -> impl Iterator<Item = &BufferLevel> {
        self.levels.iter().filter(|l| l.is_full())
    }
}

/// Registry of observed objects. Holds them weakly, so a dropped
/// component simply disappears from later snapshots.
#[derive(Default)]
pub struct Monitor {
    objects: RwLock<Vec<Weak<dyn Monitorable>>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_port(&self, port: &Arc<BufferedPort>) {
        let weak: Weak<dyn Monitorable> = Arc::downgrade(port) as Weak<dyn Monitorable>;
        self.objects.write().push(weak);
    }

    pub fn register_buffer<T: Send + 'static>(&self, buffer: &Arc<Mutex<Buffer<T>>>) {
        let weak: Weak<dyn Monitorable> = Arc::downgrade(buffer) as Weak<dyn Monitorable>;
        self.objects.write().push(weak);
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn snapshot(&self, now: VirtualTime) -> MonitorSnapshot {
        let levels: Vec<_> = self
            .objects
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .flat_map(|obj| obj.levels())
            .collect();
        tracing::trace!(time_ps = now.as_ps(), buffers = levels.len(), "monitor snapshot");
        MonitorSnapshot { time: now, levels }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Monitor({})", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::TickingComponent;
    use crate::engine::SerialEngine;
    use crate::msg::{Message, MsgId};

    #[test]
    fn test_port_levels() {
        let engine = SerialEngine::shared();
        let comp = TickingComponent::builder().with_engine(engine).build("Core");
        let port = comp.add_new_port("Mem", 2);
        let monitor = Monitor::new();
        monitor.register_port(&port);

        port.deliver(Message::new(MsgId::new(0), "X".into(), "Core.Mem".into(), ()))
            .unwrap();
        let snap = monitor.snapshot(VirtualTime::from_ns(3));
        assert_eq!(
            snap.levels,
            vec![
                BufferLevel {
                    name: "Core.Mem.In".into(),
                    size: 1,
                    capacity: 2
                },
                BufferLevel {
                    name: "Core.Mem.Out".into(),
                    size: 0,
                    capacity: 2
                },
            ]
        );
        assert_eq!(snap.full().count(), 0);
    }

    #[test]
    fn test_standalone_buffer_and_drop() {
        let monitor = Monitor::new();
        let buf = Arc::new(Mutex::new(Buffer::new("Queue", 1)));
        monitor.register_buffer(&buf);
        buf.lock().push(5u8);

        let snap = monitor.snapshot(VirtualTime::ZERO);
        assert_eq!(snap.full().map(|l| l.name.as_str()).collect::<Vec<_>>(), vec!["Queue"]);

        drop(buf);
        assert!(monitor.snapshot(VirtualTime::ZERO).levels.is_empty());
        assert_eq!(monitor.len(), 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let monitor = Monitor::new();
        let buf = Arc::new(Mutex::new(Buffer::<u8>::new("Q", 4)));
        monitor.register_buffer(&buf);
        let json = serde_json::to_string(&monitor.snapshot(VirtualTime::from_ps(7))).unwrap();
        assert_eq!(json, r#"{"time":7,"levels":[{"name":"Q","size":0,"capacity":4}]}"#);
    }
}
