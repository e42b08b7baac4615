#![cfg_attr(not(test), no_std)]

//! nRF52 UART ⇄ BLE Bridge Firmware Library
//!
//! This library provides the protocol engine that sits between a wired
//! serial host and a BLE central, organized into clear architectural layers:
//!
//! - `core`: Frame codec, reassembly buffers, request transport, pending intents
//! - `ble`: GATT service layout, event queue, notifications, throughput benchmark
//! - `commands`: Serial command dispatch and characteristic write handlers
//! - `board`: Button debouncing and status LED logic
//! - `bridge`: The owned context tying everything to one polling loop
//!
//! Radio bring-up, UART byte I/O and GPIO live in the firmware binary and
//! reach the library through the collaborator traits in each module.

// This must go first so the logging macros are visible to every module.
#[macro_use]
mod fmt;

pub mod ble;
pub mod board;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod core;
pub mod state;
