//! Storage implementations for settings, device rows and sample history
//!
//! - In-memory stores (simulation, tests, sample history)
//! - JSON-file stores for settings and device rows

pub mod json_file;
pub mod memory;

pub use json_file::{JsonDeviceStore, JsonSettingsStore};
pub use memory::{MemoryDeviceStore, MemorySampleStore, MemorySettingsStore};
