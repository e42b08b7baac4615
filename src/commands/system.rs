//! System Commands Implementation
//!
//! Handles system-level serial commands:
//! - GET_VERSION: report the firmware version string
//! - GET_CONN_STATUS / GET_BLE_PARAMS: re-send the matching report
//! - SOFTWARE_RESET: reset once the serial line has drained

use crate::commands::CommandError;
use crate::core::intents::{Intent, PendingIntents};
use crate::core::protocol::{RESET_ALL, RESET_BLE_MODULE};

/// Handle GET_VERSION (0x04)
pub fn handle_get_version(intents: &PendingIntents) -> Result<(), CommandError> {
    info!("System: GET_VERSION requested");
    intents.raise(Intent::SendVersion);
    Ok(())
}

/// Handle GET_CONN_STATUS (0x07)
pub fn handle_get_conn_status(intents: &PendingIntents) -> Result<(), CommandError> {
    intents.raise(Intent::SendConnStatus);
    Ok(())
}

/// Handle GET_BLE_PARAMS (0x08)
pub fn handle_get_ble_params(intents: &PendingIntents) -> Result<(), CommandError> {
    intents.raise(Intent::SendBleParams);
    Ok(())
}

/// True for a one-byte payload carrying a recognised reset sub-code
pub fn is_reset_request(payload: &[u8]) -> bool {
    matches!(payload, [RESET_BLE_MODULE] | [RESET_ALL])
}

/// Handle SOFTWARE_RESET (0xFF)
pub fn handle_software_reset(payload: &[u8], intents: &PendingIntents) -> Result<(), CommandError> {
    if !is_reset_request(payload) {
        warn!("System: SOFTWARE_RESET with bad sub-code ignored");
        return Err(CommandError::InvalidPayload);
    }

    warn!("System: SOFTWARE_RESET requested");
    intents.raise(Intent::ExecReset);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_needs_exactly_one_known_sub_code() {
        let intents = PendingIntents::new();
        assert_eq!(handle_software_reset(&[0x03], &intents), Err(CommandError::InvalidPayload));
        assert_eq!(handle_software_reset(&[0x01, 0x01], &intents), Err(CommandError::InvalidPayload));
        assert_eq!(handle_software_reset(&[], &intents), Err(CommandError::InvalidPayload));
        assert!(!intents.is_pending(Intent::ExecReset));

        assert_eq!(handle_software_reset(&[RESET_ALL], &intents), Ok(()));
        assert!(intents.is_pending(Intent::ExecReset));
    }
}
