//! MAC-command codec, registry, and per-CID processor (§3, §4.1, §4.3).

pub mod commands;
pub mod processor;
pub mod registry;

pub use commands::{Cid, MacCommand, MacCommandBlock};
pub use processor::{HandlerOutcome, MacNotification};
pub use registry::{InMemoryMacCommandStore, MacCommandStore};
