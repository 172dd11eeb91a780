//! Virtual time and frequency quantization.
//!
//! Time is a logical picosecond count with no dependency on `std::time`.
//! It advances only when the engine dispatches events. A [`Frequency`]
//! projects that clock onto a component's cycle grid using exact integer
//! arithmetic, so two runs always agree on every tick boundary.

use serde::{Deserialize, Serialize};

const PS_PER_SEC: u64 = 1_000_000_000_000;

// ── VirtualTime ───────────────────────────────────────────────────────

/// A point in simulated time, in picoseconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VirtualTime(u64);

impl VirtualTime {
    /// The zero-point of simulation time.
    pub const ZERO: VirtualTime = VirtualTime(0);

    #[inline]
    pub const fn from_ps(ps: u64) -> Self {
        VirtualTime(ps)
    }

    #[inline]
    pub const fn from_ns(ns: u64) -> Self {
        VirtualTime(ns * 1_000)
    }

    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        VirtualTime(secs * PS_PER_SEC)
    }

    /// Raw picosecond count.
    #[inline]
    pub fn as_ps(self) -> u64 {
        self.0
    }

    /// Time in seconds, for reporting only. Never feed this back into
    /// scheduling.
    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / PS_PER_SEC as f64
    }

    /// Advance time by `delta` picoseconds.
    /// Returns `None` on overflow.
    #[inline]
    pub fn advance(self, delta: u64) -> Option<VirtualTime> {
        self.0.checked_add(delta).map(VirtualTime)
    }

    /// Absolute time `delay` after `self`. Reads better than `advance`
    /// at call-sites that schedule future events.
    #[inline]
    pub fn plus(self, delay: VirtualTime) -> Option<VirtualTime> {
        self.advance(delay.0)
    }

    #[inline]
    pub fn is_before(self, other: VirtualTime) -> bool {
        self.0 < other.0
    }

    /// Duration between two points in time.
    /// Returns `None` if `earlier` is after `self`.
    #[inline]
    pub fn duration_since(self, earlier: VirtualTime) -> Option<VirtualTime> {
        self.0.checked_sub(earlier.0).map(VirtualTime)
    }
}

impl std::fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T={}ps", self.0)
    }
}

// ── Frequency ─────────────────────────────────────────────────────────

/// Cycles per second of a clocked component.
///
/// Cycle `n` starts at `ceil(n * 1e12 / hz)` picoseconds. Frequencies
/// whose period is not a whole number of picoseconds still land every
/// boundary on the same integer instant in every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frequency {
    hz: u64,
}

impl Frequency {
    /// # Panics
    /// Panics if `hz` is zero.
    pub fn hz(hz: u64) -> Self {
        assert!(hz > 0, "frequency must be non-zero");
        Frequency { hz }
    }

    pub fn khz(khz: u64) -> Self {
        Self::hz(khz * 1_000)
    }

    pub fn mhz(mhz: u64) -> Self {
        Self::hz(mhz * 1_000_000)
    }

    pub fn ghz(ghz: u64) -> Self {
        Self::hz(ghz * 1_000_000_000)
    }

    /// Cycles per second.
    pub fn cycles_per_second(self) -> u64 {
        self.hz
    }

    /// Length of one cycle, rounded up to a whole picosecond.
    pub fn period(self) -> VirtualTime {
        self.boundary(1)
    }

    /// Index of the cycle containing `t`.
    pub fn cycle(self, t: VirtualTime) -> u64 {
        ((t.0 as u128 * self.hz as u128) / PS_PER_SEC as u128) as u64
    }

    /// Earliest cycle boundary at or after `t`.
    pub fn this_tick(self, t: VirtualTime) -> VirtualTime {
        let n = self.cycle(t);
        let at = self.boundary(n);
        if at == t {
            at
        } else {
            self.boundary(n + 1)
        }
    }

    /// Earliest cycle boundary strictly after `t`.
    pub fn next_tick(self, t: VirtualTime) -> VirtualTime {
        self.boundary(self.cycle(t) + 1)
    }

    /// The boundary `n` cycles after the one returned by `this_tick(t)`.
    pub fn n_cycles_later(self, n: u64, t: VirtualTime) -> VirtualTime {
        let start = self.cycle(self.this_tick(t));
        self.boundary(start + n)
    }

    fn boundary(self, n: u64) -> VirtualTime {
        let ps = (n as u128 * PS_PER_SEC as u128).div_ceil(self.hz as u128);
        VirtualTime(u64::try_from(ps).unwrap_or(u64::MAX))
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Hz", self.hz)
    }
}
