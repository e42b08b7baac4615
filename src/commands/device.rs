//! Device Settings Commands
//!
//! Serial commands that change identity, advertising, radio front-end and
//! preferred link parameters. Link preferences only raise an "apply" intent
//! when the value actually changed.

use crate::ble::notifications::Notifier;
use crate::commands::{first_byte, notify_params, CommandError};
use crate::core::intents::{Intent, PendingIntents};
use crate::core::protocol::serialization::read_u16;
use crate::state::{BridgeState, ConnectionParams};

/// Handle PA_LNA (0x01)
pub fn handle_pa_lna(payload: &[u8], state: &mut BridgeState) -> Result<(), CommandError> {
    state.params.pa_lna = first_byte(payload)? & 0x01 != 0;
    info!("Device: PA/LNA {}", state.params.pa_lna);
    Ok(())
}

/// Handle LED_STATUS (0x02)
pub fn handle_led_status<N: Notifier>(
    payload: &[u8],
    state: &mut BridgeState,
    intents: &PendingIntents,
    notifier: &mut N,
) -> Result<(), CommandError> {
    state.params.led_status = first_byte(payload)? & 0x01 != 0;
    intents.raise(Intent::SendBleParams);
    notify_params(state, notifier)
}

/// Handle SET_NAME (0x03)
pub fn handle_set_name(payload: &[u8], state: &mut BridgeState) -> Result<(), CommandError> {
    state.params.set_device_name(payload);
    debug!("Device: name set ({} bytes)", state.params.device_name().len());
    Ok(())
}

/// Handle ADV_INTERVAL (0x05), big-endian 0.625ms units
pub fn handle_adv_interval(payload: &[u8], state: &mut BridgeState) -> Result<(), CommandError> {
    state.params.adv_interval = read_u16(payload, 0).ok_or(CommandError::InvalidPayload)?;
    Ok(())
}

/// Handle ADV_TIMEOUT (0x06), big-endian 10ms units
pub fn handle_adv_timeout(payload: &[u8], state: &mut BridgeState) -> Result<(), CommandError> {
    state.params.adv_timeout = read_u16(payload, 0).ok_or(CommandError::InvalidPayload)?;
    Ok(())
}

/// Handle SET_BLE_CONN_PARAMS (0x20): min, max, latency, timeout
pub fn handle_conn_params(
    payload: &[u8],
    state: &mut BridgeState,
    intents: &PendingIntents,
) -> Result<(), CommandError> {
    let params = ConnectionParams::from_be_bytes(payload).ok_or(CommandError::InvalidPayload)?;
    if state.params.set_preferred_conn_params(params) {
        intents.raise(Intent::ApplyConnParams);
    }
    Ok(())
}

/// Handle SET_BLE_PHY_PARAMS (0x21)
pub fn handle_phy(payload: &[u8], state: &mut BridgeState, intents: &PendingIntents) -> Result<(), CommandError> {
    if state.params.set_preferred_phy(first_byte(payload)?) {
        intents.raise(Intent::ApplyPhy);
    }
    Ok(())
}

/// Handle SET_BLE_ATT_SIZE_PARAMS (0x22): tx octets, rx octets
pub fn handle_att_size(
    payload: &[u8],
    state: &mut BridgeState,
    intents: &PendingIntents,
) -> Result<(), CommandError> {
    let [tx, rx, ..] = payload else {
        return Err(CommandError::InvalidPayload);
    };
    if state.params.set_preferred_data_length(*tx as u16, *rx as u16) {
        intents.raise(Intent::ApplyDataLength);
    }
    Ok(())
}

/// Handle CHAR_BUFFER (0x30): forward to the APP characteristic
pub fn handle_char_buffer(
    payload: &[u8],
    state: &mut BridgeState,
    intents: &PendingIntents,
) -> Result<(), CommandError> {
    state.app_buffer.set(payload);
    intents.raise(Intent::NotifyAppBuffer);
    Ok(())
}
