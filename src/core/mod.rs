//! Core System Infrastructure
//!
//! Provides the serial side of the bridge that is not BLE-specific:
//! the wire codec, receive reassembly, the outbound request slot,
//! shared intent flags and tick arithmetic.

pub mod intents;
pub mod memory;
pub mod protocol;
pub mod time;
pub mod transport;
