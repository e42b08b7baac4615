//! Bridge Configuration
//!
//! Compile-time defaults for identity, preferred link parameters and the
//! timing constants of every state machine. Nothing here is persisted; the
//! host re-sends its preferences after each reset.

use embassy_time::Duration;

use crate::core::transport::TransportTiming;
use crate::state::{
    ConnectionParams, DataLengthParams, LinkSettings, PhyParams, L2CAP_HEADER_LEN, PHY_2M, VERSION_LEN,
};

/// Maximum ATT MTU negotiated by the GATT server
pub const MAX_ATT_MTU: u16 = 247;

/// Firmware version as reported to the host, NUL padded
pub const FIRMWARE_VERSION: [u8; VERSION_LEN] = version_bytes(env!("CARGO_PKG_VERSION"));

const fn version_bytes(version: &str) -> [u8; VERSION_LEN] {
    let bytes = version.as_bytes();
    let mut out = [0u8; VERSION_LEN];
    let mut i = 0;
    while i < VERSION_LEN && i < bytes.len() {
        out[i] = bytes[i];
        i += 1;
    }
    out
}

/// Timing of the serial line, throughput test, buttons and start-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Silence that closes a receive window
    pub rx_silence: Duration,
    /// Outbound request slot timing and retry policy
    pub transport: TransportTiming,
    /// Hard limit on a throughput run
    pub throughput_limit: Duration,
    /// Button confirmation delay
    pub debounce: Duration,
    /// Bridge runs this long before the radio is configured
    pub startup_window: Duration,
    /// BLE activity LED pulse
    pub ble_activity_pulse: Duration,
    /// Serial activity LED pulse
    pub uart_activity_pulse: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            rx_silence: Duration::from_micros(300),
            transport: TransportTiming::default(),
            throughput_limit: Duration::from_secs(60),
            debounce: Duration::from_micros(2500),
            startup_window: Duration::from_millis(500),
            ble_activity_pulse: Duration::from_millis(1),
            uart_activity_pulse: Duration::from_millis(20),
        }
    }
}

/// Everything the bridge needs at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    pub device_name: &'static [u8],
    pub firmware_version: [u8; VERSION_LEN],
    pub preferred: LinkSettings,
    pub adv_interval: u16, // 0.625ms units
    pub adv_timeout: u16,  // 10ms units
    pub pa_lna: bool,
    pub led_status: bool,
    pub timing: TimingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device_name: b"no name",
            firmware_version: FIRMWARE_VERSION,
            preferred: LinkSettings {
                conn: ConnectionParams {
                    min_conn_interval: 12, // 15ms (12 * 1.25ms)
                    max_conn_interval: 12, // 15ms
                    slave_latency: 0,
                    conn_sup_timeout: 400, // 4s (400 * 10ms)
                },
                phy: PhyParams {
                    tx_phys: PHY_2M,
                    rx_phys: PHY_2M,
                },
                data_length: DataLengthParams {
                    max_tx_octets: MAX_ATT_MTU + L2CAP_HEADER_LEN,
                    max_rx_octets: MAX_ATT_MTU + L2CAP_HEADER_LEN,
                },
            },
            adv_interval: 160,  // 100ms
            adv_timeout: 18000, // 180s
            pa_lna: false,
            led_status: true,
            timing: TimingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_padded_with_nul() {
        assert_eq!(version_bytes("1.2"), [b'1', b'.', b'2', 0, 0, 0, 0]);
        assert_eq!(&version_bytes("5.19.27-rc1"), b"5.19.27");
    }
}
