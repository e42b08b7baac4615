//! Characteristic Write Handlers
//!
//! Writes from the BLE central on the APP, TEST and PARAMS characteristics.
//!
//! APP:    `[id][len][data; len]` relayed to the serial host, or an extended
//!         segment `[0x41][len][total][current][data; len - 2]`
//! TEST:   one byte throughput command
//! PARAMS: `[opcode]` or `[opcode][len][value; len]`

use embassy_time::Instant;

use crate::ble::notifications::Notifier;
use crate::ble::service::Characteristic;
use crate::commands::system::is_reset_request;
use crate::commands::{notify_params, CommandError};
use crate::core::intents::{Intent, PendingIntents};
use crate::core::protocol::{Frame, MessageId, Segment};
use crate::state::{BridgeState, ConnectionParams, L2CAP_HEADER_LEN};

/// PARAMS opcodes
pub const PARAMS_GET_ALL: u8 = 0x00;
pub const PARAMS_SET_CONN: u8 = 0x01;
pub const PARAMS_SET_PHY: u8 = 0x02;
pub const PARAMS_SET_MTU: u8 = 0x03;
pub const PARAMS_SET_LED_STATUS: u8 = 0x04;
/// Shares its opcode with PARAMS_SET_CONN; told apart by the length byte
pub const PARAMS_SET_PA_LNA: u8 = 0x01;

/// Mask of valid PHY bits in a set-phy write
const PHY_MASK: u8 = 0x03;

/// Handle a write on the APP characteristic
pub fn handle_app_write(data: &[u8], state: &mut BridgeState, intents: &PendingIntents) -> Result<(), CommandError> {
    if data.len() <= 2 || data.len() != data[1] as usize + 2 {
        return Err(CommandError::InvalidPayload);
    }

    if data[0] == MessageId::CharExtBuffer.to_u8() {
        let segment = Segment::parse(data)?;
        if state.extended.push_segment(segment)?.is_some() {
            debug!("APP: extended buffer complete");
            intents.raise(Intent::RelayExtendedBuffer);
        }
        return Ok(());
    }

    state.relay = Frame::new(data[0], &data[2..])?;
    if data[0] == MessageId::SoftwareReset.to_u8() && is_reset_request(&data[2..]) {
        warn!("APP: reset requested by peer");
        intents.raise(Intent::ExecReset);
    }
    intents.raise(Intent::RelayBuffer);
    Ok(())
}

/// Handle a write on the TEST characteristic
pub fn handle_test_write<N: Notifier>(
    data: &[u8],
    state: &mut BridgeState,
    now: Instant,
    notifier: &mut N,
) -> Result<(), CommandError> {
    if !state.cccd.is_enabled(Characteristic::Test) {
        return Err(CommandError::NotEnabled);
    }
    let [code] = data else {
        return Err(CommandError::InvalidPayload);
    };

    let payload_len = state.params.current.data_length.notification_payload() as usize;
    if !state.throughput.command(*code, payload_len, now) {
        return Err(CommandError::InvalidPayload);
    }
    if state.link.is_connected() {
        state.throughput.pump(now, notifier);
    }
    Ok(())
}

/// Handle a write on the PARAMS characteristic
pub fn handle_params_write<N: Notifier>(
    data: &[u8],
    state: &mut BridgeState,
    intents: &PendingIntents,
    notifier: &mut N,
) -> Result<(), CommandError> {
    if !state.cccd.is_enabled(Characteristic::Params) {
        return Err(CommandError::NotEnabled);
    }

    match data {
        [PARAMS_GET_ALL] => {
            intents.raise(Intent::SendBleParams);
            notify_params(state, notifier)
        }
        [PARAMS_SET_CONN, 8, params @ ..] if params.len() == 8 => {
            let params = ConnectionParams::from_be_bytes(params).ok_or(CommandError::InvalidPayload)?;
            // Applied even when unchanged; a peer re-writes to renegotiate
            state.params.set_preferred_conn_params(params);
            intents.raise(Intent::ApplyConnParams);
            Ok(())
        }
        [PARAMS_SET_PA_LNA, 1, value] => {
            state.params.pa_lna = value & 0x01 != 0;
            intents.raise(Intent::SendPaLna);
            Ok(())
        }
        [PARAMS_SET_PHY, 1, phy] => {
            state.params.set_preferred_phy(phy & PHY_MASK);
            intents.raise(Intent::ApplyPhy);
            Ok(())
        }
        [PARAMS_SET_MTU, 2, rx, tx] => {
            let rx = *rx as u16 + L2CAP_HEADER_LEN;
            let tx = *tx as u16 + L2CAP_HEADER_LEN;
            state.params.set_preferred_data_length(tx, rx);
            intents.raise(Intent::ApplyDataLength);
            Ok(())
        }
        [PARAMS_SET_LED_STATUS, 1, value] => {
            state.params.led_status = value & 0x01 != 0;
            intents.raise(Intent::SendBleParams);
            notify_params(state, notifier)
        }
        _ => Err(CommandError::InvalidPayload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::notifications::NotifyError;
    use crate::config::BridgeConfig;
    use crate::state::DataLengthParams;

    #[derive(Default)]
    struct Recorder(std::vec::Vec<(Characteristic, std::vec::Vec<u8>)>);

    impl Notifier for Recorder {
        fn notify(&mut self, characteristic: Characteristic, data: &[u8]) -> Result<(), NotifyError> {
            self.0.push((characteristic, data.to_vec()));
            Ok(())
        }
    }

    fn connected_state() -> BridgeState {
        let mut state = BridgeState::new(&BridgeConfig::default());
        state.link.conn_handle = 0;
        for characteristic in Characteristic::ALL {
            state.cccd.set(characteristic, true);
        }
        state
    }

    #[test]
    fn app_write_is_staged_for_relay() {
        let mut state = connected_state();
        let intents = PendingIntents::new();

        handle_app_write(&[0x30, 3, 1, 2, 3], &mut state, &intents).unwrap();
        assert_eq!(state.relay.id, 0x30);
        assert_eq!(&state.relay.payload[..], &[1, 2, 3]);
        assert!(intents.is_pending(Intent::RelayBuffer));

        assert_eq!(
            handle_app_write(&[0x30, 4, 1, 2, 3], &mut state, &intents),
            Err(CommandError::InvalidPayload)
        );
        assert_eq!(handle_app_write(&[0x30, 0], &mut state, &intents), Err(CommandError::InvalidPayload));
    }

    #[test]
    fn app_reset_write_raises_reset_and_relay() {
        let mut state = connected_state();
        let intents = PendingIntents::new();

        handle_app_write(&[0xFF, 1, 0x02], &mut state, &intents).unwrap();
        assert!(intents.is_pending(Intent::ExecReset));
        assert!(intents.is_pending(Intent::RelayBuffer));
    }

    #[test]
    fn extended_segments_complete_on_last() {
        let mut state = connected_state();
        let intents = PendingIntents::new();

        handle_app_write(&[0x41, 4, 2, 1, 0xAA, 0xBB], &mut state, &intents).unwrap();
        assert!(!intents.is_pending(Intent::RelayExtendedBuffer));
        handle_app_write(&[0x41, 3, 2, 2, 0xCC], &mut state, &intents).unwrap();
        assert!(intents.is_pending(Intent::RelayExtendedBuffer));

        let frame = state.extended.completed().unwrap();
        assert_eq!(&frame.payload[..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn params_writes_need_cccd() {
        let mut state = BridgeState::new(&BridgeConfig::default());
        let intents = PendingIntents::new();
        let mut rec = Recorder::default();

        assert_eq!(
            handle_params_write(&[PARAMS_GET_ALL], &mut state, &intents, &mut rec),
            Err(CommandError::NotEnabled)
        );
        assert!(!intents.any());
    }

    #[test]
    fn rewriting_the_same_link_params_still_applies_them() {
        let mut state = connected_state();
        let intents = PendingIntents::new();
        let mut rec = Recorder::default();
        let conn = [PARAMS_SET_CONN, 8, 0, 6, 0, 6, 0, 0, 0x01, 0x90];
        let phy = [PARAMS_SET_PHY, 1, 0x02];
        let mtu = [PARAMS_SET_MTU, 2, 100, 100];

        for write in [&conn[..], &phy[..], &mtu[..]] {
            handle_params_write(write, &mut state, &intents, &mut rec).unwrap();
        }
        intents.clear(Intent::ApplyConnParams);
        intents.clear(Intent::ApplyPhy);
        intents.clear(Intent::ApplyDataLength);

        for write in [&conn[..], &phy[..], &mtu[..]] {
            handle_params_write(write, &mut state, &intents, &mut rec).unwrap();
        }
        assert!(intents.is_pending(Intent::ApplyConnParams));
        assert!(intents.is_pending(Intent::ApplyPhy));
        assert!(intents.is_pending(Intent::ApplyDataLength));
    }

    #[test]
    fn led_status_write_notifies_params() {
        let mut state = connected_state();
        state.params.led_status = false;
        let intents = PendingIntents::new();
        let mut rec = Recorder::default();

        handle_params_write(&[PARAMS_SET_LED_STATUS, 1, 1], &mut state, &intents, &mut rec).unwrap();
        assert!(intents.is_pending(Intent::SendBleParams));
        assert_eq!(rec.0.len(), 1);
        assert_eq!(rec.0[0].1[14], 1);
    }

    #[test]
    fn conn_and_pa_lna_share_an_opcode() {
        let mut state = connected_state();
        let intents = PendingIntents::new();
        let mut rec = Recorder::default();

        handle_params_write(&[PARAMS_SET_PA_LNA, 1, 1], &mut state, &intents, &mut rec).unwrap();
        assert!(state.params.pa_lna);
        assert!(intents.take(Intent::SendPaLna));

        let write = [PARAMS_SET_CONN, 8, 0, 6, 0, 6, 0, 0, 0x01, 0x90];
        handle_params_write(&write, &mut state, &intents, &mut rec).unwrap();
        assert_eq!(state.params.preferred.conn.min_conn_interval, 6);
        assert!(intents.take(Intent::ApplyConnParams));

        // Same values again: nothing to apply
        handle_params_write(&write, &mut state, &intents, &mut rec).unwrap();
        assert!(!intents.is_pending(Intent::ApplyConnParams));
    }

    #[test]
    fn mtu_write_adds_l2cap_header() {
        let mut state = connected_state();
        let intents = PendingIntents::new();
        let mut rec = Recorder::default();

        handle_params_write(&[PARAMS_SET_MTU, 2, 100, 200], &mut state, &intents, &mut rec).unwrap();
        assert_eq!(
            state.params.preferred.data_length,
            DataLengthParams {
                max_tx_octets: 204,
                max_rx_octets: 104
            }
        );
        assert!(intents.is_pending(Intent::ApplyDataLength));
        assert_eq!(
            handle_params_write(&[0x09], &mut state, &intents, &mut rec),
            Err(CommandError::InvalidPayload)
        );
    }

    #[test]
    fn test_write_starts_a_run() {
        let mut state = connected_state();
        state.params.current.data_length = DataLengthParams {
            max_tx_octets: 247,
            max_rx_octets: 247,
        };
        let mut rec = Recorder::default();

        handle_test_write(&[2], &mut state, Instant::from_ticks(0), &mut rec).unwrap();
        assert_eq!(state.throughput.bytes_transmitted(), 1024);
        assert!(rec.0.iter().all(|(c, _)| *c == Characteristic::Test));
        assert_eq!(
            handle_test_write(&[2, 0], &mut state, Instant::from_ticks(0), &mut rec),
            Err(CommandError::InvalidPayload)
        );
    }
}
