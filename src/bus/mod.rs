//! File-based coordination buses.
//!
//! Status is an observable fact: one file per role, last writer wins,
//! readable by all. Messages are intents: per-role inbox directories with
//! exactly-once consumption. The two are kept distinct on purpose.

pub mod message;
pub mod status;

pub use message::{Message, MessageBus, MessagePriority};
pub use status::{AgentState, AgentStatus, StatusBus};
