//! Command Processing Module
//!
//! Turns decoded serial frames and characteristic writes into parameter
//! changes and pending intents. Handlers never touch the UART themselves;
//! anything that must go back to the host is raised as an intent and built
//! later by [`reports`] inside the request slot.

use crate::ble::notifications::{self, Notifier, NotifyError};
use crate::core::intents::PendingIntents;
use crate::core::protocol::{Frame, MessageId, ProtocolError};
use crate::state::BridgeState;

pub mod characteristics;
pub mod device;
pub mod reports;
pub mod system;

/// Command processing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// Id has no inbound handler
    UnknownCommand,
    /// Payload has the wrong shape for its command
    InvalidPayload,
    /// The peer has not enabled notifications for the characteristic
    NotEnabled,
    ProtocolError(ProtocolError),
    NotifyError(NotifyError),
}

impl From<ProtocolError> for CommandError {
    fn from(err: ProtocolError) -> Self {
        CommandError::ProtocolError(err)
    }
}

impl From<NotifyError> for CommandError {
    fn from(err: NotifyError) -> Self {
        CommandError::NotifyError(err)
    }
}

/// First payload byte or `InvalidPayload`
pub(crate) fn first_byte(payload: &[u8]) -> Result<u8, CommandError> {
    payload.first().copied().ok_or(CommandError::InvalidPayload)
}

/// Push the PARAMS report now if anyone is listening
pub(crate) fn notify_params<N: Notifier>(state: &BridgeState, notifier: &mut N) -> Result<(), CommandError> {
    notifications::send_params_notification(notifier, &state.link, &state.cccd, &state.params)?;
    Ok(())
}

/// Process a frame received from the serial host
pub fn dispatch_frame<N: Notifier>(
    frame: &Frame,
    state: &mut BridgeState,
    intents: &PendingIntents,
    notifier: &mut N,
) -> Result<(), CommandError> {
    let message_id = frame.message_id().ok_or(CommandError::UnknownCommand)?;
    let payload = &frame.payload[..];

    debug!("Processing serial command: {:?} ({} bytes)", message_id, payload.len());

    match message_id {
        // Device settings
        MessageId::PaLna => device::handle_pa_lna(payload, state),
        MessageId::LedStatus => device::handle_led_status(payload, state, intents, notifier),
        MessageId::SetName => device::handle_set_name(payload, state),
        MessageId::AdvInterval => device::handle_adv_interval(payload, state),
        MessageId::AdvTimeout => device::handle_adv_timeout(payload, state),

        // Link preferences
        MessageId::SetBleConnParams => device::handle_conn_params(payload, state, intents),
        MessageId::SetBlePhyParams => device::handle_phy(payload, state, intents),
        MessageId::SetBleAttSizeParams => device::handle_att_size(payload, state, intents),

        // Data for the BLE peer
        MessageId::CharBuffer => device::handle_char_buffer(payload, state, intents),

        // System
        MessageId::GetVersion => system::handle_get_version(intents),
        MessageId::GetConnStatus => system::handle_get_conn_status(intents),
        MessageId::GetBleParams => system::handle_get_ble_params(intents),
        MessageId::SoftwareReset => system::handle_software_reset(payload, intents),

        // Outbound only
        MessageId::BootMode | MessageId::CharExtBuffer => {
            debug!("Serial id {:?} is not accepted inbound", message_id);
            Err(CommandError::UnknownCommand)
        }
    }
}
