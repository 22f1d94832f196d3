//! # Ferry Core
//!
//! Model types, settings, errors and events shared by the Ferry
//! opportunistic-network routing stack.
//!
//! ## Key Types
//!
//! - [`Message`]: A message relayed store-and-forward between hosts
//! - [`Connection`]: A contact between two hosts carrying one transfer at a time
//! - [`ReceiveOutcome`]: Answer of a router to a transfer offer
//! - [`MessageEvent`]: Lifecycle events delivered to [`MessageListener`]s
//! - [`Settings`]: Namespaced key/value configuration
//! - [`Clock`]: Virtual time abstraction

pub mod clock;
pub mod connection;
pub mod error;
pub mod event;
pub mod identity;
pub mod message;
pub mod routing;
pub mod settings;

// Re-export main types
pub use clock::*;
pub use connection::*;
pub use error::*;
pub use event::*;
pub use identity::*;
pub use message::*;
pub use routing::*;
pub use settings::*;
