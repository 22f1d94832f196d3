//! Virtual simulation clock
//!
//! The simulation is logically single-threaded: the world advances one
//! shared clock and every router reads it. Nothing here touches wall-clock
//! time.

use serde::{Deserialize, Serialize};

/// Simulated time in seconds since the start of the run
pub type SimTime = f64;

/// Time abstraction for the routing core
///
/// Routers only ever read the clock; the world owns and advances it.
pub trait Clock {
    /// Current simulated time in seconds
    fn now(&self) -> SimTime;

    /// Current simulated time truncated to whole seconds
    fn int_time(&self) -> u64 {
        self.now().max(0.0).floor() as u64
    }
}

/// The shared virtual clock
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimClock {
    time: SimTime,
}

impl SimClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock at an arbitrary time
    pub fn at(time: SimTime) -> Self {
        Self { time }
    }

    /// Advance the clock by `delta` seconds
    ///
    /// Negative deltas are ignored; simulated time never runs backwards.
    pub fn advance(&mut self, delta: SimTime) {
        if delta > 0.0 {
            self.time += delta;
        }
    }

    /// Move the clock to `time` if that is not in the past
    pub fn set_time(&mut self, time: SimTime) {
        if time > self.time {
            self.time = time;
        }
    }
}

impl Clock for SimClock {
    fn now(&self) -> SimTime {
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance() {
        let mut clock = SimClock::new();
        clock.advance(1.5);
        clock.advance(-3.0);
        assert_eq!(clock.now(), 1.5);
        assert_eq!(clock.int_time(), 1);
    }

    #[test]
    fn test_set_time_is_monotonic() {
        let mut clock = SimClock::at(10.0);
        clock.set_time(5.0);
        assert_eq!(clock.now(), 10.0);
        clock.set_time(12.25);
        assert_eq!(clock.now(), 12.25);
    }
}
