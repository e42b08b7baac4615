//! Bridge GATT Service Layout
//!
//! One primary service with three write + notify characteristics, all
//! derived from a vendor-specific 128-bit base UUID.

/// Vendor base UUID, `a7bbdefd-eef2-4a8e-80d4-13a83c8cf46f`
pub const BASE_UUID: u128 = 0xa7bbdefd_eef2_4a8e_80d4_13a83c8cf46f;

/// 16-bit aliases inside the base
pub const SERVICE_UUID16: u16 = 0x1500;
pub const APP_CHAR_UUID16: u16 = 0x1501;
pub const TEST_CHAR_UUID16: u16 = 0x1502;
pub const PARAMS_CHAR_UUID16: u16 = 0x1503;

/// Substitute a 16-bit alias into bytes 12..14 of the base UUID
pub const fn uuid128(alias: u16) -> u128 {
    (BASE_UUID & !(0xFFFF << 96)) | ((alias as u128) << 96)
}

/// Characteristics of the bridge service
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Characteristic {
    /// Relayed application data, id-prefixed
    App = 0,
    /// Throughput benchmark commands and telemetry
    Test = 1,
    /// Link parameter get/set
    Params = 2,
}

impl Characteristic {
    pub const ALL: [Characteristic; 3] = [Characteristic::App, Characteristic::Test, Characteristic::Params];

    pub fn uuid16(self) -> u16 {
        match self {
            Characteristic::App => APP_CHAR_UUID16,
            Characteristic::Test => TEST_CHAR_UUID16,
            Characteristic::Params => PARAMS_CHAR_UUID16,
        }
    }
}

/// Per-characteristic notification enable (CCCD) state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NotifyState {
    enabled: [bool; 3],
}

impl NotifyState {
    pub const fn new() -> Self {
        Self { enabled: [false; 3] }
    }

    pub fn set(&mut self, characteristic: Characteristic, enabled: bool) {
        self.enabled[characteristic as usize] = enabled;
    }

    pub fn is_enabled(&self, characteristic: Characteristic) -> bool {
        self.enabled[characteristic as usize]
    }

    /// All CCCDs reset when the peer goes away
    pub fn clear_all(&mut self) {
        self.enabled = [false; 3];
    }
}
