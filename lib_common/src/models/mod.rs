//! Core data model shared by every TickBridge component.

pub mod monitor;
pub mod records;
pub mod tick;

pub use monitor::*;
pub use records::*;
pub use tick::*;
