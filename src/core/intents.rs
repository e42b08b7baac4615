//! Pending Intents
//!
//! Independent "something needs doing" flags shared between interrupt
//! producers (button edges, BLE callbacks) and the polling loop that
//! consumes them. Backed by a single atomic bitmask so producers never need
//! a lock.

use core::sync::atomic::{AtomicU32, Ordering};

/// One pending piece of work
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Intent {
    ExecReset = 0,
    SendBootMode = 1,
    SendVersion = 2,
    SendConnStatus = 3,
    SendBleParams = 4,
    SendPaLna = 5,
    RelayBuffer = 6,
    RelayExtendedBuffer = 7,
    NotifyAppBuffer = 8,
    ApplyConnParams = 9,
    ApplyPhy = 10,
    ApplyDataLength = 11,
    ToggleLedStatus = 12,
}

impl Intent {
    /// Serial reports in the order they are serviced
    pub const SERIAL_PRIORITY: [Intent; 8] = [
        Intent::ExecReset,
        Intent::SendBootMode,
        Intent::SendVersion,
        Intent::SendConnStatus,
        Intent::SendBleParams,
        Intent::SendPaLna,
        Intent::RelayBuffer,
        Intent::RelayExtendedBuffer,
    ];

    /// Link parameter requests in the order they are applied
    pub const LINK_PRIORITY: [Intent; 3] = [
        Intent::ApplyConnParams,
        Intent::ApplyPhy,
        Intent::ApplyDataLength,
    ];

    const fn bit(self) -> u32 {
        1 << self as u8
    }
}

/// Atomic set of pending intents
pub struct PendingIntents {
    bits: AtomicU32,
}

impl PendingIntents {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    pub fn raise(&self, intent: Intent) {
        self.bits.fetch_or(intent.bit(), Ordering::AcqRel);
    }

    pub fn clear(&self, intent: Intent) {
        self.bits.fetch_and(!intent.bit(), Ordering::AcqRel);
    }

    pub fn is_pending(&self, intent: Intent) -> bool {
        self.bits.load(Ordering::Acquire) & intent.bit() != 0
    }

    /// Clear and report whether it was set
    pub fn take(&self, intent: Intent) -> bool {
        self.bits.fetch_and(!intent.bit(), Ordering::AcqRel) & intent.bit() != 0
    }

    /// Highest-priority pending intent from `order`
    pub fn first_of(&self, order: &[Intent]) -> Option<Intent> {
        let bits = self.bits.load(Ordering::Acquire);
        order.iter().copied().find(|intent| bits & intent.bit() != 0)
    }

    pub fn any(&self) -> bool {
        self.bits.load(Ordering::Acquire) != 0
    }
}

impl Default for PendingIntents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_priority_prefers_reset_then_boot() {
        let intents = PendingIntents::new();
        intents.raise(Intent::RelayBuffer);
        intents.raise(Intent::SendVersion);
        intents.raise(Intent::SendBootMode);
        assert_eq!(intents.first_of(&Intent::SERIAL_PRIORITY), Some(Intent::SendBootMode));

        intents.raise(Intent::ExecReset);
        assert_eq!(intents.first_of(&Intent::SERIAL_PRIORITY), Some(Intent::ExecReset));
    }

    #[test]
    fn take_clears_only_its_own_flag() {
        let intents = PendingIntents::new();
        intents.raise(Intent::ApplyPhy);
        intents.raise(Intent::NotifyAppBuffer);

        assert!(intents.take(Intent::ApplyPhy));
        assert!(!intents.take(Intent::ApplyPhy));
        assert!(intents.is_pending(Intent::NotifyAppBuffer));
        assert_eq!(intents.first_of(&Intent::SERIAL_PRIORITY), None);
    }
}
