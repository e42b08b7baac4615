//! Device State
//!
//! Preferred and current link parameters, the device identity, and the
//! connection/advertising status. Owned by the bridge and only mutated from
//! the polling context.

use crate::ble::notifications::AppBuffer;
use crate::ble::service::NotifyState;
use crate::ble::throughput::ThroughputSession;
use crate::config::BridgeConfig;
use crate::core::protocol::{ExtendedAssembler, Frame, FRAME_TYPE_NORMAL, NO_MESSAGE};

/// Device name capacity including the NUL terminator
pub const MAX_DEVICE_NAME_LEN: usize = 20;

/// Version string length reported to the host
pub const VERSION_LEN: usize = 7;

/// Length of the parameter report body shared by serial and BLE
pub const BLE_PARAMS_LEN: usize = 13;

/// Invalid connection handle
pub const CONN_HANDLE_INVALID: u16 = 0xFFFF;

/// PHY bit values as used on the air interface
pub const PHY_AUTO: u8 = 0x00;
pub const PHY_1M: u8 = 0x01;
pub const PHY_2M: u8 = 0x02;

/// L2CAP header added to an ATT payload to get link-layer octets
pub const L2CAP_HEADER_LEN: u16 = 4;

/// Opcode + handle in front of every notification
pub const ATT_HEADER_LEN: u16 = 3;

/// Bounds of the LE data length extension
pub const MIN_DATA_LENGTH_OCTETS: u16 = 27;
pub const MAX_DATA_LENGTH_OCTETS: u16 = 251;

/// Connection parameters structure (matches SoftDevice ble_gap_conn_params_t)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(C)]
pub struct ConnectionParams {
    pub min_conn_interval: u16, // Connection interval minimum (1.25ms units)
    pub max_conn_interval: u16, // Connection interval maximum (1.25ms units)
    pub slave_latency: u16,     // Slave latency
    pub conn_sup_timeout: u16,  // Connection supervisory timeout (10ms units)
}

impl ConnectionParams {
    /// Parse four big-endian u16 values
    pub fn from_be_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..8)?;
        let word = |i: usize| u16::from_be_bytes([bytes[i], bytes[i + 1]]);
        Some(Self {
            min_conn_interval: word(0),
            max_conn_interval: word(2),
            slave_latency: word(4),
            conn_sup_timeout: word(6),
        })
    }

    pub fn to_be_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0..2].copy_from_slice(&self.min_conn_interval.to_be_bytes());
        out[2..4].copy_from_slice(&self.max_conn_interval.to_be_bytes());
        out[4..6].copy_from_slice(&self.slave_latency.to_be_bytes());
        out[6..8].copy_from_slice(&self.conn_sup_timeout.to_be_bytes());
        out
    }
}

/// PHY preference per direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhyParams {
    pub tx_phys: u8,
    pub rx_phys: u8,
}

/// Data length extension parameters
///
/// Preferred values are link-layer octets as requested from the peer.
/// Current values are what the link reported minus the L2CAP header, which
/// is the usable ATT MTU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataLengthParams {
    pub max_tx_octets: u16,
    pub max_rx_octets: u16,
}

impl DataLengthParams {
    /// Notification payload for a current (ATT MTU) value
    pub fn notification_payload(&self) -> u16 {
        self.max_tx_octets.saturating_sub(ATT_HEADER_LEN)
    }
}

/// Everything negotiated for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkSettings {
    pub conn: ConnectionParams,
    pub phy: PhyParams,
    pub data_length: DataLengthParams,
}

/// Connection and advertising status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStatus {
    pub conn_handle: u16,
    pub advertising: bool,
}

impl LinkStatus {
    pub const fn new() -> Self {
        Self {
            conn_handle: CONN_HANDLE_INVALID,
            advertising: false,
        }
    }

    /// Check if currently connected
    pub fn is_connected(&self) -> bool {
        self.conn_handle != CONN_HANDLE_INVALID
    }

    /// Connection status byte: bit 1 connected, bit 0 advertising
    pub fn status_byte(&self) -> u8 {
        (if self.is_connected() { 0x02 } else { 0x00 }) | (if self.advertising { 0x01 } else { 0x00 })
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-visible device parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParams {
    pub preferred: LinkSettings,
    pub current: LinkSettings,
    pub adv_interval: u16, // Advertising interval (0.625ms units)
    pub adv_timeout: u16,  // Advertising timeout (10ms units)
    pub pa_lna: bool,
    pub led_status: bool,
    device_name: [u8; MAX_DEVICE_NAME_LEN],
    device_name_len: u8,
    version: [u8; VERSION_LEN],
}

impl DeviceParams {
    pub fn new(config: &BridgeConfig) -> Self {
        let mut params = Self {
            preferred: config.preferred,
            current: LinkSettings::default(),
            adv_interval: config.adv_interval,
            adv_timeout: config.adv_timeout,
            pa_lna: config.pa_lna,
            led_status: config.led_status,
            device_name: [0; MAX_DEVICE_NAME_LEN],
            device_name_len: 0,
            version: config.firmware_version,
        };
        params.set_device_name(config.device_name);
        params
    }

    /// Set device name (truncated so a NUL terminator always fits)
    pub fn set_device_name(&mut self, name: &[u8]) {
        let len = name.len().min(MAX_DEVICE_NAME_LEN - 1);
        self.device_name[..len].copy_from_slice(&name[..len]);
        self.device_name[len..].fill(0);
        self.device_name_len = len as u8;
    }

    /// Get device name as slice
    pub fn device_name(&self) -> &[u8] {
        &self.device_name[..self.device_name_len as usize]
    }

    pub fn version(&self) -> &[u8; VERSION_LEN] {
        &self.version
    }

    /// Returns true if the preferred connection parameters changed
    pub fn set_preferred_conn_params(&mut self, params: ConnectionParams) -> bool {
        if self.preferred.conn == params {
            return false;
        }
        self.preferred.conn = params;
        true
    }

    /// Same PHY for both directions; returns true if it changed
    pub fn set_preferred_phy(&mut self, phy: u8) -> bool {
        let phy = PhyParams {
            tx_phys: phy,
            rx_phys: phy,
        };
        if self.preferred.phy == phy {
            return false;
        }
        self.preferred.phy = phy;
        true
    }

    /// Octets are clamped to the data length extension range
    pub fn set_preferred_data_length(&mut self, tx_octets: u16, rx_octets: u16) -> bool {
        let clamp = |v: u16| v.clamp(MIN_DATA_LENGTH_OCTETS, MAX_DATA_LENGTH_OCTETS);
        let data_length = DataLengthParams {
            max_tx_octets: clamp(tx_octets),
            max_rx_octets: clamp(rx_octets),
        };
        if self.preferred.data_length == data_length {
            return false;
        }
        self.preferred.data_length = data_length;
        true
    }

    /// Forget everything negotiated with the last peer
    pub fn reset_current(&mut self) {
        self.current = LinkSettings::default();
    }

    /// Connection params, tx PHY, data length, PA/LNA and LED flags
    pub fn ble_params_bytes(&self) -> [u8; BLE_PARAMS_LEN] {
        let mut out = [0u8; BLE_PARAMS_LEN];
        out[..8].copy_from_slice(&self.current.conn.to_be_bytes());
        out[8] = self.current.phy.tx_phys;
        out[9] = self.current.data_length.max_tx_octets.min(u8::MAX as u16) as u8;
        out[10] = self.current.data_length.max_rx_octets.min(u8::MAX as u16) as u8;
        out[11] = self.pa_lna as u8;
        out[12] = self.led_status as u8;
        out
    }
}

/// Everything the command handlers read and mutate
pub struct BridgeState {
    pub params: DeviceParams,
    pub link: LinkStatus,
    pub cccd: NotifyState,
    /// Serial host data waiting for the APP notification
    pub app_buffer: AppBuffer,
    /// APP write waiting to go out on the serial line
    pub relay: Frame,
    /// Extended APP writes being stitched together
    pub extended: ExtendedAssembler,
    pub throughput: ThroughputSession,
}

impl BridgeState {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            params: DeviceParams::new(config),
            link: LinkStatus::new(),
            cccd: NotifyState::new(),
            app_buffer: AppBuffer::new(),
            relay: Frame {
                id: NO_MESSAGE,
                kind: FRAME_TYPE_NORMAL,
                payload: heapless::Vec::new(),
            },
            extended: ExtendedAssembler::new(),
            throughput: ThroughputSession::new(config.timing.throughput_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_is_truncated_to_leave_room_for_nul() {
        let mut params = DeviceParams::new(&BridgeConfig::default());

        params.set_device_name(b"Bridge");
        assert_eq!(params.device_name(), b"Bridge");

        params.set_device_name(b"a name that is clearly too long");
        assert_eq!(params.device_name().len(), MAX_DEVICE_NAME_LEN - 1);
        assert_eq!(params.device_name[MAX_DEVICE_NAME_LEN - 1], 0);
    }

    #[test]
    fn preferred_setters_report_changes_only() {
        let mut params = DeviceParams::new(&BridgeConfig::default());
        let conn = params.preferred.conn;

        assert!(!params.set_preferred_conn_params(conn));
        assert!(params.set_preferred_conn_params(ConnectionParams {
            slave_latency: 4,
            ..conn
        }));
        assert!(params.set_preferred_phy(PHY_1M));
        assert!(!params.set_preferred_phy(PHY_1M));
        assert!(params.set_preferred_data_length(300, 10));
        assert_eq!(params.preferred.data_length.max_tx_octets, MAX_DATA_LENGTH_OCTETS);
        assert_eq!(params.preferred.data_length.max_rx_octets, MIN_DATA_LENGTH_OCTETS);
    }

    #[test]
    fn params_report_layout() {
        let mut params = DeviceParams::new(&BridgeConfig::default());
        params.current.conn = ConnectionParams {
            min_conn_interval: 0x0102,
            max_conn_interval: 0x0304,
            slave_latency: 0x0506,
            conn_sup_timeout: 0x0708,
        };
        params.current.phy.tx_phys = PHY_2M;
        params.current.data_length = DataLengthParams {
            max_tx_octets: 251,
            max_rx_octets: 27,
        };
        params.pa_lna = true;
        params.led_status = false;

        assert_eq!(
            params.ble_params_bytes(),
            [1, 2, 3, 4, 5, 6, 7, 8, PHY_2M, 251, 27, 1, 0]
        );
    }

    #[test]
    fn connection_status_byte() {
        let mut status = LinkStatus::new();
        assert_eq!(status.status_byte(), 0);
        status.advertising = true;
        assert_eq!(status.status_byte(), 1);
        status.conn_handle = 0;
        status.advertising = false;
        assert_eq!(status.status_byte(), 2);
    }
}
