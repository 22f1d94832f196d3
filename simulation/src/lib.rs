//! # Ferry Simulation
//!
//! Trace-driven runner for the Ferry routing stack.
//!
//! ## Overview
//!
//! A run replays a contact trace against a network of routers that all run
//! the same forwarding strategy, then reports delivery statistics and the
//! final state of every router.
//!
//! - **Trace** (`trace.rs`): parser for timed `CONN` and `C` events
//! - **Simulation** (`simulation.rs`): fixed-step engine applying due events
//!   before each router update
//! - **Stats** (`stats.rs`): message listener collecting delivery statistics
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_routing::NetworkConfig;
//! use ferry_simulation::{SimConfig, Simulation, Trace};
//!
//! let trace = Trace::parse("
//!     0  CONN 0 1 up
//!     0  C    M1 0 2 100
//!     20 CONN 1 2 up
//! ")?;
//! let mut sim = Simulation::new(&NetworkConfig::default(), trace.host_count(), SimConfig::default());
//! sim.run(&trace)?;
//! assert_eq!(sim.stats().delivered, 1);
//! ```

pub mod simulation;
pub mod stats;
pub mod trace;

pub use simulation::{DEFAULT_RATE, SimConfig, SimReport, Simulation};
pub use stats::{SimStats, StatsCollector};
pub use trace::{Trace, TraceError, TraceEvent};
