//! Checkpointing of kernel objects.
//!
//! Objects expose their state as a JSON map through [`Checkpoint`]. A
//! [`TypeRegistry`] maps type names to factories so a checkpoint can be
//! restored into fresh objects; [`CheckpointManager`] pairs a registry
//! with a [`CheckpointCodec`] that turns snapshots into bytes.
//!
//! The registry is an explicit object handed to the manager. Nothing is
//! registered globally.

use std::collections::{BTreeMap, VecDeque};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::buffer::Buffer;
use crate::error::{SimError, SimResult};
use crate::time::{Frequency, VirtualTime};

/// Serialized state of one object.
pub type StateMap = Map<String, Value>;

pub trait Checkpoint {
    /// Key under which the object's factory is registered.
    fn type_name(&self) -> &'static str;

    fn save_state(&self) -> SimResult<StateMap>;

    fn load_state(&mut self, state: &StateMap) -> SimResult<()>;
}

fn field<'a>(state: &'a StateMap, type_name: &str, key: &str) -> SimResult<&'a Value> {
    state.get(key).ok_or_else(|| SimError::MalformedCheckpoint {
        type_name: type_name.to_string(),
        reason: format!("missing field {key}"),
    })
}

fn decode_field<T: DeserializeOwned>(state: &StateMap, type_name: &str, key: &str) -> SimResult<T> {
    let value = field(state, type_name, key)?;
    serde_json::from_value(value.clone()).map_err(|e| SimError::MalformedCheckpoint {
        type_name: type_name.to_string(),
        reason: format!("field {key}: {e}"),
    })
}

// ── Built-in implementations ──────────────────────────────────────────

impl<T> Checkpoint for Buffer<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Buffer<T>>()
    }

    fn save_state(&self) -> SimResult<StateMap> {
        let mut state = StateMap::new();
        state.insert("name".into(), Value::from(self.name()));
        state.insert("capacity".into(), Value::from(self.capacity()));
        let elements = self
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        state.insert("elements".into(), Value::Array(elements));
        Ok(state)
    }

    fn load_state(&mut self, state: &StateMap) -> SimResult<()> {
        let type_name = self.type_name();
        let name: String = decode_field(state, type_name, "name")?;
        let capacity: usize = decode_field(state, type_name, "capacity")?;
        let elements: VecDeque<T> = decode_field(state, type_name, "elements")?;
        if elements.len() > capacity {
            return Err(SimError::MalformedCheckpoint {
                type_name: type_name.to_string(),
                reason: format!("{} elements exceed capacity {capacity}", elements.len()),
            });
        }
        self.reset(name, capacity, elements);
        Ok(())
    }
}

impl Checkpoint for Frequency {
    fn type_name(&self) -> &'static str {
        "Frequency"
    }

    fn save_state(&self) -> SimResult<StateMap> {
        let mut state = StateMap::new();
        state.insert("hz".into(), Value::from(self.cycles_per_second()));
        Ok(state)
    }

    fn load_state(&mut self, state: &StateMap) -> SimResult<()> {
        let hz: u64 = decode_field(state, "Frequency", "hz")?;
        if hz == 0 {
            return Err(SimError::MalformedCheckpoint {
                type_name: "Frequency".into(),
                reason: "zero frequency".into(),
            });
        }
        *self = Frequency::hz(hz);
        Ok(())
    }
}

// ── TypeRegistry ──────────────────────────────────────────────────────

type Factory = Box<dyn Fn() -> Box<dyn Checkpoint> + Send + Sync>;

/// Factories for every checkpointable type a restore may meet.
#[derive(Default)]
pub struct TypeRegistry {
    factories: BTreeMap<String, Factory>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that already knows [`Frequency`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("Frequency", || Box::new(Frequency::ghz(1)));
        registry
    }

    /// # Panics
    /// Panics if `type_name` is already registered.
    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Checkpoint> + Send + Sync + 'static,
    {
        assert!(
            !self.factories.contains_key(type_name),
            "checkpoint type {type_name} is already registered"
        );
        self.factories.insert(type_name.to_string(), Box::new(factory));
    }

    /// Register `Buffer<T>` under its type name.
    pub fn register_buffer<T>(&mut self)
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        self.register(std::any::type_name::<Buffer<T>>(), || {
            Box::new(Buffer::<T>::new("", 0))
        });
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn create(&self, type_name: &str) -> SimResult<Box<dyn Checkpoint>> {
        self.factories
            .get(type_name)
            .map(|factory| factory())
            .ok_or_else(|| SimError::UnknownCheckpointType(type_name.to_string()))
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

// ── Snapshots and codecs ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub name: String,
    pub type_name: String,
    pub state: StateMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationCheckpoint {
    pub time: VirtualTime,
    pub objects: Vec<ObjectSnapshot>,
}

/// Turns a [`SimulationCheckpoint`] into bytes and back.
pub trait CheckpointCodec {
    fn encode(&self, checkpoint: &SimulationCheckpoint) -> SimResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> SimResult<SimulationCheckpoint>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pub pretty: bool,
}

impl CheckpointCodec for JsonCodec {
    fn encode(&self, checkpoint: &SimulationCheckpoint) -> SimResult<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(checkpoint)?
        } else {
            serde_json::to_vec(checkpoint)?
        };
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> SimResult<SimulationCheckpoint> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ── CheckpointManager ─────────────────────────────────────────────────

/// Saves named objects and restores them, either into existing objects
/// or into fresh ones built from the registry.
#[derive(Debug)]
pub struct CheckpointManager<C = JsonCodec> {
    registry: TypeRegistry,
    codec: C,
}

impl<C: CheckpointCodec> CheckpointManager<C> {
    pub fn new(registry: TypeRegistry, codec: C) -> Self {
        CheckpointManager { registry, codec }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn snapshot(
        &self,
        now: VirtualTime,
        objects: &[(&str, &dyn Checkpoint)],
    ) -> SimResult<SimulationCheckpoint> {
        let objects = objects
            .iter()
            .map(|(name, obj)| {
                Ok(ObjectSnapshot {
                    name: name.to_string(),
                    type_name: obj.type_name().to_string(),
                    state: obj.save_state()?,
                })
            })
            .collect::<SimResult<Vec<_>>>()?;
        Ok(SimulationCheckpoint { time: now, objects })
    }

    pub fn save(&self, now: VirtualTime, objects: &[(&str, &dyn Checkpoint)]) -> SimResult<Vec<u8>> {
        let checkpoint = self.snapshot(now, objects)?;
        tracing::debug!(
            time_ps = now.as_ps(),
            objects = checkpoint.objects.len(),
            "checkpoint saved"
        );
        self.codec.encode(&checkpoint)
    }

    /// Rebuild every saved object from the registry.
    pub fn restore(&self, bytes: &[u8]) -> SimResult<(VirtualTime, Vec<(String, Box<dyn Checkpoint>)>)> {
        let checkpoint = self.codec.decode(bytes)?;
        let objects = checkpoint
            .objects
            .into_iter()
            .map(|snap| {
                let mut obj = self.registry.create(&snap.type_name)?;
                obj.load_state(&snap.state)?;
                Ok((snap.name, obj))
            })
            .collect::<SimResult<Vec<_>>>()?;
        Ok((checkpoint.time, objects))
    }

    /// Load saved state into existing objects, matched by name.
    ///
    /// Objects absent from the checkpoint are left untouched.
    pub fn restore_into(
        &self,
        bytes: &[u8],
        targets: &mut [(&str, &mut dyn Checkpoint)],
    ) -> SimResult<VirtualTime> {
        let checkpoint = self.codec.decode(bytes)?;
        for (name, target) in targets.iter_mut() {
            let Some(snap) = checkpoint.objects.iter().find(|s| s.name == *name) else {
                continue;
            };
            if snap.type_name != target.type_name() {
                return Err(SimError::MalformedCheckpoint {
                    type_name: target.type_name().to_string(),
                    reason: format!("{name} was saved as {}", snap.type_name),
                });
            }
            target.load_state(&snap.state)?;
        }
        Ok(checkpoint.time)
    }
}
