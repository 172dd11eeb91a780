//! Kernel configuration.
//!
//! A [`KernelConfig`] picks the engine variant and the default clock
//! rates and buffer sizes used when wiring a model. It is plain data:
//! load it from JSON, tweak it, validate it, then build from it.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::{Engine, ParallelEngine, SerialEngine};
use crate::error::{SimError, SimResult};
use crate::time::Frequency;

/// Which engine variant to run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Serial,
    Parallel,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Serial => write!(f, "serial"),
            EngineKind::Parallel => write!(f, "parallel"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    pub engine: EngineKind,
    /// Worker threads for the parallel engine. `None` uses rayon's
    /// global pool.
    pub threads: Option<usize>,
    /// Clock rate of ticking components, in Hz.
    pub component_freq_hz: u64,
    /// Clock rate of connections, in Hz.
    pub connection_freq_hz: u64,
    /// Capacity of each port buffer, in messages.
    pub port_capacity: usize,
}

impl KernelConfig {
    /// Serial engine, 1 GHz everywhere, 4-entry port buffers.
    pub fn serial() -> Self {
        KernelConfig {
            engine: EngineKind::Serial,
            threads: None,
            component_freq_hz: 1_000_000_000,
            connection_freq_hz: 1_000_000_000,
            port_capacity: 4,
        }
    }

    /// Parallel engine on a dedicated pool, otherwise as [`serial`](Self::serial).
    pub fn parallel(threads: usize) -> Self {
        KernelConfig {
            engine: EngineKind::Parallel,
            threads: Some(threads),
            ..Self::serial()
        }
    }

    /// Slow 1 Hz components on a 1 GHz connection, so cycle counts read
    /// directly as seconds.
    pub fn slow_components() -> Self {
        KernelConfig {
            component_freq_hz: 1,
            ..Self::serial()
        }
    }

    pub fn from_json_str(json: &str) -> SimResult<Self> {
        let config: KernelConfig = serde_json::from_str(json)
            .map_err(|e| SimError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.component_freq_hz == 0 {
            return Err(SimError::InvalidConfig("component_freq_hz must be non-zero".into()));
        }
        if self.connection_freq_hz == 0 {
            return Err(SimError::InvalidConfig("connection_freq_hz must be non-zero".into()));
        }
        if self.port_capacity == 0 {
            return Err(SimError::InvalidConfig("port_capacity must be non-zero".into()));
        }
        match (self.engine, self.threads) {
            (_, Some(0)) => Err(SimError::InvalidConfig("threads must be non-zero".into())),
            (EngineKind::Serial, Some(_)) => Err(SimError::InvalidConfig(
                "threads only applies to the parallel engine".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn component_freq(&self) -> Frequency {
        Frequency::hz(self.component_freq_hz)
    }

    pub fn connection_freq(&self) -> Frequency {
        Frequency::hz(self.connection_freq_hz)
    }

    /// Validate, then construct the configured engine.
    pub fn build_engine(&self) -> SimResult<Arc<dyn Engine>> {
        self.validate()?;
        let engine: Arc<dyn Engine> = match (self.engine, self.threads) {
            (EngineKind::Serial, _) => Arc::new(SerialEngine::new()),
            (EngineKind::Parallel, None) => Arc::new(ParallelEngine::new()),
            (EngineKind::Parallel, Some(n)) => Arc::new(ParallelEngine::with_threads(n)?),
        };
        tracing::debug!(engine = %self.engine, threads = ?self.threads, "engine built");
        Ok(engine)
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::serial()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = KernelConfig::from_json_str(r#"{"engine": "parallel", "threads": 2}"#)
            .unwrap();
        assert_eq!(config, KernelConfig::parallel(2));
        assert_eq!(config.connection_freq(), Frequency::ghz(1));
    }

    #[test]
    fn test_json_round_trip() {
        let config = KernelConfig::slow_components();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(KernelConfig::from_json_str(&json).unwrap(), config);
        assert!(json.contains(r#""engine":"serial""#));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            r#"{"component_freq_hz": 0}"#,
            r#"{"connection_freq_hz": 0}"#,
            r#"{"port_capacity": 0}"#,
            r#"{"engine": "parallel", "threads": 0}"#,
            r#"{"threads": 4}"#,
            r#"{"engine": "quantum"}"#,
            r#"{"port_cap": 3}"#,
        ];
        for json in cases {
            let err = KernelConfig::from_json_str(json).unwrap_err();
            assert!(matches!(err, SimError::InvalidConfig(_)), "{json}: {err}");
        }
    }

    #[test]
    fn test_build_engine() {
        let serial = KernelConfig::serial().build_engine().unwrap();
        assert_eq!(serial.pending(), 0);
        let parallel = KernelConfig::parallel(2).build_engine().unwrap();
        assert!(!parallel.is_paused());

        let mut broken = KernelConfig::serial();
        broken.port_capacity = 0;
        assert!(broken.build_engine().is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = KernelConfig::from_file("/nonexistent/chronowire.json").unwrap_err();
        assert!(matches!(err, SimError::Io(_)));
    }
}
