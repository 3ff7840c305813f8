//! Node supervisor and public interface
//!
//! - `core`: the `Node` struct, lifecycle, and top-level operations
//! - `config`: node configuration
//! - `error`: the error taxonomy
//! - `events`: update broadcast channels

pub mod config;
pub mod core;
pub mod error;
pub mod events;

pub use config::{NodeConfig, DEFAULT_FLUSH_INTERVAL, MOBILE_FLUSH_INTERVAL};
pub use core::{Node, NodeState};
pub use error::NodeError;
pub use events::{
    Broadcaster, NodeChannels, ThreadUpdate, Update, UpdateType, CHANNEL_CAPACITY,
};
