//! Storage for alarm service
//!
//! The engine reads devices and users through narrow traits and persists its
//! own configuration and derived records through [`AlarmRepository`].

pub mod memory_impl;
pub mod traits;

pub use memory_impl::MemoryStore;
pub use traits::{AlarmRepository, DeviceRegistry, Directory};
