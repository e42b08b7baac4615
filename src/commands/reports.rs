//! Outbound Serial Reports
//!
//! Maps a serial intent to the frame that services it. Builders run inside
//! the request slot once the line is confirmed quiet, so they always see the
//! latest state.

use crate::core::intents::Intent;
use crate::core::protocol::{
    encode_extended, encode_short, MessageId, ProtocolError, BOOT_MODE_MAGIC, FRAME_TYPE_NORMAL,
};
use crate::core::transport::{FrameBuffer, FrameKind};
use crate::state::BridgeState;

/// Serial id and framing for an intent, or `None` if it sends nothing
pub fn request_for(intent: Intent, state: &BridgeState) -> Option<(u8, FrameKind)> {
    let request = match intent {
        Intent::SendBootMode => (MessageId::BootMode.to_u8(), FrameKind::Short),
        Intent::SendVersion => (MessageId::GetVersion.to_u8(), FrameKind::Short),
        Intent::SendConnStatus => (MessageId::GetConnStatus.to_u8(), FrameKind::Short),
        Intent::SendBleParams => (MessageId::GetBleParams.to_u8(), FrameKind::Short),
        Intent::SendPaLna => (MessageId::PaLna.to_u8(), FrameKind::Short),
        Intent::RelayBuffer => (state.relay.id, FrameKind::Short),
        Intent::RelayExtendedBuffer => {
            let frame = state.extended.completed()?;
            (frame.id, FrameKind::Extended)
        }
        _ => return None,
    };
    Some(request)
}

/// Write the frame for `intent` into `out`
pub fn build_report(intent: Intent, state: &BridgeState, out: &mut FrameBuffer) -> Result<(), ProtocolError> {
    let params = &state.params;
    match intent {
        Intent::SendBootMode => short(MessageId::BootMode, &[BOOT_MODE_MAGIC], out),
        Intent::SendVersion => short(MessageId::GetVersion, params.version(), out),
        Intent::SendConnStatus => short(MessageId::GetConnStatus, &[state.link.status_byte()], out),
        Intent::SendBleParams => short(MessageId::GetBleParams, &params.ble_params_bytes(), out),
        Intent::SendPaLna => short(MessageId::PaLna, &[params.pa_lna as u8], out),
        Intent::RelayBuffer => encode_short(state.relay.id, state.relay.kind, &state.relay.payload, out),
        Intent::RelayExtendedBuffer => {
            let frame = state.extended.completed().ok_or(ProtocolError::Truncated)?;
            encode_extended(frame.id, frame.kind, &frame.payload, out)
        }
        _ => Err(ProtocolError::InvalidLength),
    }
}

fn short(id: MessageId, payload: &[u8], out: &mut FrameBuffer) -> Result<(), ProtocolError> {
    encode_short(id.to_u8(), FRAME_TYPE_NORMAL, payload, out)
}
