//! Notification Service
//!
//! The [`Notifier`] seam to the SoftDevice plus builders for the two
//! bridge-originated notifications: the fixed PARAMS report and the APP
//! buffer relayed from the serial host.

use heapless::Vec;

use crate::ble::service::{Characteristic, NotifyState};
use crate::core::protocol::{MessageId, MAX_SHORT_PAYLOAD};
use crate::state::{DeviceParams, LinkStatus, BLE_PARAMS_LEN};

/// Length of the PARAMS notification: opcode, length, report body
pub const PARAMS_NOTIFICATION_LEN: usize = BLE_PARAMS_LEN + 2;

/// Largest APP notification: id, length, payload
pub const MAX_APP_NOTIFICATION: usize = MAX_SHORT_PAYLOAD + 2;

/// PARAMS report opcode
pub const PARAMS_REPORT_ID: u8 = 0x00;

/// Notification errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotifyError {
    /// The stack's notification queue is full; retry after a completion
    Resources,
    /// No connection to notify on
    Disconnected,
    /// Anything else the stack rejected
    Other,
}

/// Sends a notification on one of the bridge characteristics
pub trait Notifier {
    fn notify(&mut self, characteristic: Characteristic, data: &[u8]) -> Result<(), NotifyError>;
}

/// `[0x00][13][report]`
pub fn params_notification(params: &DeviceParams) -> [u8; PARAMS_NOTIFICATION_LEN] {
    let mut out = [0u8; PARAMS_NOTIFICATION_LEN];
    out[0] = PARAMS_REPORT_ID;
    out[1] = BLE_PARAMS_LEN as u8;
    out[2..].copy_from_slice(&params.ble_params_bytes());
    out
}

/// Send the PARAMS report if a peer is connected and listening
///
/// Returns `Ok(false)` when skipped.
pub fn send_params_notification<N: Notifier>(
    notifier: &mut N,
    link: &LinkStatus,
    cccd: &NotifyState,
    params: &DeviceParams,
) -> Result<bool, NotifyError> {
    if !link.is_connected() || !cccd.is_enabled(Characteristic::Params) {
        return Ok(false);
    }

    notifier.notify(Characteristic::Params, &params_notification(params))?;
    debug!("NOTIFY: params report sent");
    Ok(true)
}

/// Data the serial host asked to push to the APP characteristic
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppBuffer {
    data: Vec<u8, MAX_SHORT_PAYLOAD>,
}

impl AppBuffer {
    pub const fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Replace the buffered data; short frame payloads always fit
    pub fn set(&mut self, data: &[u8]) {
        self.data.clear();
        let len = data.len().min(MAX_SHORT_PAYLOAD);
        // Cannot fail after the clamp above
        let _ = self.data.extend_from_slice(&data[..len]);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// `[0x30][len][data]`
    pub fn notification(&self) -> Vec<u8, MAX_APP_NOTIFICATION> {
        let mut out = Vec::new();
        let _ = out.push(MessageId::CharBuffer.to_u8());
        let _ = out.push(self.data.len() as u8);
        let _ = out.extend_from_slice(&self.data);
        out
    }
}
