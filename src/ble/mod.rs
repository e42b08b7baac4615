//! BLE Protocol Implementation
//!
//! The bridge's side of the GATT service: characteristic layout, the event
//! queue fed by SoftDevice callbacks, notification building and link
//! parameter control. The SoftDevice itself is reached only through the
//! [`notifications::Notifier`] and [`connection::LinkControl`] traits.

pub mod connection;
pub mod events;
pub mod notifications;
pub mod service;
pub mod throughput;
