//! Bridge Context
//!
//! The one owned object that ties the serial transport, the command handlers
//! and the BLE side together. The firmware calls [`Bridge::poll`] from its
//! main loop and feeds BLE events in through [`Bridge::drain_events`];
//! everything else happens inside those two calls.
//!
//! Poll order:
//! 1. read bytes; close the receive window after the line goes quiet
//! 2. classify: ACK/NACK go to the request slot, frames are dispatched
//! 3. flush queued ACK/NACK replies
//! 4. service serial intents through the request slot
//! 5. APP notification, link requests, LED toggle, throughput

use embassy_time::Instant;

use crate::ble::connection::{self, LinkControl};
use crate::ble::events::{BleEvent, BleEventQueue};
use crate::ble::notifications::{Notifier, NotifyError};
use crate::ble::service::Characteristic;
use crate::board::leds::Indicators;
use crate::commands::{self, characteristics, reports};
use crate::config::BridgeConfig;
use crate::core::intents::{Intent, PendingIntents};
use crate::core::memory::{RxBuffer, TxBuffer};
use crate::core::protocol::{self, Frame, Inbound, ProtocolError, ACK, NACK};
use crate::core::transport::{
    Ack, FrameKind, LineStatus, RequestSlot, SendProgress, SerialPort, SlotState, TransportError,
};
use crate::state::{BridgeState, DataLengthParams, L2CAP_HEADER_LEN};

/// Room for a few queued acknowledgements
const ACK_QUEUE_SIZE: usize = 8;

/// What the caller should do after a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollOutcome {
    Continue,
    /// A reset was requested and the serial line has drained
    Reset,
}

/// A closed receive window, owned so the rx buffer can be reused
enum Received {
    Ack(Ack),
    Frame(Frame),
    Corrupt,
    Malformed,
}

/// Serial request currently held in the slot
#[derive(Debug, Clone, Copy)]
struct ActiveRequest {
    intent: Intent,
    id: u8,
    kind: FrameKind,
}

pub struct Bridge<'a> {
    config: BridgeConfig,
    intents: &'a PendingIntents,
    state: BridgeState,
    slot: RequestSlot,
    rx: RxBuffer,
    acks: TxBuffer<ACK_QUEUE_SIZE>,
    active: Option<ActiveRequest>,
    init_done: bool,
    last_ble_activity: Option<Instant>,
    last_uart_activity: Option<Instant>,
}

impl<'a> Bridge<'a> {
    /// New bridge; the boot announcement is queued immediately
    pub fn new(config: BridgeConfig, intents: &'a PendingIntents) -> Self {
        intents.raise(Intent::SendBootMode);
        Self {
            state: BridgeState::new(&config),
            slot: RequestSlot::new(config.timing.transport),
            rx: RxBuffer::new(),
            acks: TxBuffer::new(),
            active: None,
            init_done: false,
            last_ble_activity: None,
            last_uart_activity: None,
            config,
            intents,
        }
    }

    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn slot(&self) -> &RequestSlot {
        &self.slot
    }

    pub fn is_started(&self) -> bool {
        self.init_done
    }

    /// End of the start-up window; button 1 held enables PA/LNA
    pub fn finish_startup(&mut self, pa_lna_held: bool) {
        if pa_lna_held {
            info!("BRIDGE: PA/LNA enabled by button");
            self.state.params.pa_lna = true;
        }
        self.init_done = true;
        info!("BRIDGE: start-up complete");
    }

    /// LED levels for the current state
    pub fn indicators(&self, now: Instant) -> Indicators {
        Indicators::compute(
            self.init_done,
            self.state.params.led_status,
            &self.state.link,
            now,
            self.last_ble_activity,
            self.last_uart_activity,
            &self.config.timing,
        )
    }

    /// Handle every queued BLE event
    pub fn drain_events<N: Notifier>(&mut self, queue: &BleEventQueue, now: Instant, notifier: &mut N) {
        while let Ok(event) = queue.try_receive() {
            self.handle_ble_event(event, now, notifier);
        }
    }

    /// Apply one BLE stack event
    pub fn handle_ble_event<N: Notifier>(&mut self, event: BleEvent, now: Instant, notifier: &mut N) {
        let state = &mut self.state;
        match event {
            BleEvent::Connected { conn_handle, params } => {
                info!("BRIDGE: connected, handle {}", conn_handle);
                state.link.conn_handle = conn_handle;
                state.link.advertising = false;
                state.params.current.conn = params;
                self.intents.raise(Intent::SendConnStatus);
                connection::clear_requests(self.intents);
                connection::request_all(self.intents);
            }
            BleEvent::Disconnected { conn_handle, reason } => {
                info!("BRIDGE: disconnected, handle {} reason {=u8:#x}", conn_handle, reason);
                state.link.conn_handle = crate::state::CONN_HANDLE_INVALID;
                state.params.reset_current();
                state.cccd.clear_all();
                state.throughput.abort();
                self.intents.raise(Intent::SendConnStatus);
                connection::clear_requests(self.intents);
            }
            BleEvent::ConnParamsUpdated(params) => {
                state.params.current.conn = params;
                self.params_changed(notifier);
            }
            BleEvent::PhyUpdated(phy) => {
                state.params.current.phy = phy;
                self.params_changed(notifier);
            }
            BleEvent::DataLengthUpdated(octets) => {
                state.params.current.data_length = DataLengthParams {
                    max_tx_octets: octets.max_tx_octets.saturating_sub(L2CAP_HEADER_LEN),
                    max_rx_octets: octets.max_rx_octets.saturating_sub(L2CAP_HEADER_LEN),
                };
                self.params_changed(notifier);
            }
            BleEvent::AdvertisingStarted => {
                state.link.advertising = true;
                self.intents.raise(Intent::SendConnStatus);
            }
            BleEvent::AdvertisingStopped => {
                state.link.advertising = false;
                self.intents.raise(Intent::SendConnStatus);
            }
            BleEvent::NotificationsChanged { characteristic, enabled } => {
                debug!("BRIDGE: {:?} notifications {}", characteristic, enabled);
                state.cccd.set(characteristic, enabled);
            }
            BleEvent::Write { characteristic, data } => {
                self.last_ble_activity = Some(now);
                let result = match characteristic {
                    Characteristic::App => characteristics::handle_app_write(&data, state, self.intents),
                    Characteristic::Test => characteristics::handle_test_write(&data, state, now, notifier),
                    Characteristic::Params => {
                        characteristics::handle_params_write(&data, state, self.intents, notifier)
                    }
                };
                if let Err(e) = result {
                    debug!("BRIDGE: {:?} write ignored: {:?}", characteristic, e);
                }
            }
            BleEvent::NotifyComplete { count } => {
                self.last_ble_activity = Some(now);
                if state.link.is_connected() {
                    state.throughput.on_notify_complete(count, now, notifier);
                }
            }
        }
    }

    /// Advance every state machine by one step
    pub fn poll<S, B>(&mut self, now: Instant, serial: &mut S, ble: &mut B) -> PollOutcome
    where
        S: SerialPort,
        B: Notifier + LinkControl,
    {
        self.receive(now, serial, ble);
        self.flush_acks(now, serial);

        if self.service_serial(now, serial) == PollOutcome::Reset {
            return PollOutcome::Reset;
        }

        self.service_app_notification(ble);
        connection::apply_pending(ble, &self.state.link, &self.state.params, self.intents);

        if self.intents.take(Intent::ToggleLedStatus) {
            self.state.params.led_status = !self.state.params.led_status;
            self.params_changed(ble);
        }

        if self.state.throughput.is_active() && self.state.link.is_connected() {
            self.state.throughput.pump(now, ble);
        }

        PollOutcome::Continue
    }

    fn receive<S: SerialPort, N: Notifier>(&mut self, now: Instant, serial: &mut S, notifier: &mut N) {
        while let Some(byte) = serial.read_byte() {
            self.rx.push(byte, now);
            self.last_uart_activity = Some(now);
        }

        let received = match self.rx.close_if_silent(now, self.config.timing.rx_silence) {
            None => return,
            Some(raw) => match protocol::classify(raw) {
                Inbound::Ack => Received::Ack(Ack::Positive),
                Inbound::Nack => Received::Ack(Ack::Negative),
                Inbound::Frame(raw) => match protocol::decode_short(raw) {
                    Ok(frame) => Received::Frame(frame),
                    Err(ProtocolError::ChecksumMismatch { expected, received }) => {
                        warn!("BRIDGE: checksum {=u16:#x} != {=u16:#x}", received, expected);
                        Received::Corrupt
                    }
                    Err(e) => {
                        debug!("BRIDGE: malformed frame: {:?}", e);
                        Received::Malformed
                    }
                },
                Inbound::Other => Received::Malformed,
            },
        };

        match received {
            Received::Ack(ack) => {
                self.slot.on_ack(ack);
            }
            Received::Frame(frame) => {
                self.queue_reply(ACK);
                if let Err(e) = commands::dispatch_frame(&frame, &mut self.state, self.intents, notifier) {
                    debug!("BRIDGE: frame {=u8:#x} not handled: {:?}", frame.id, e);
                }
            }
            Received::Corrupt => self.queue_reply(NACK),
            Received::Malformed => trace!("BRIDGE: receive window discarded"),
        }
    }

    fn queue_reply(&mut self, reply: &[u8]) {
        if self.acks.append(reply).is_err() {
            warn!("BRIDGE: reply queue full");
        }
    }

    /// Replies never interleave with a frame being written
    fn flush_acks<S: SerialPort>(&mut self, now: Instant, serial: &mut S) {
        if self.acks.is_drained() || self.slot.is_writing() {
            return;
        }
        let accepted = serial.write(self.acks.pending());
        self.acks.advance(accepted);
        self.last_uart_activity = Some(now);
    }

    fn line_status<S: SerialPort>(&self, serial: &S) -> LineStatus {
        LineStatus {
            transmitting: serial.is_transmitting() || !self.acks.is_drained(),
            receiving: self.rx.is_receiving(),
        }
    }

    fn service_serial<S: SerialPort>(&mut self, now: Instant, serial: &mut S) -> PollOutcome {
        if self.intents.is_pending(Intent::ExecReset) {
            if let Some(outcome) = self.service_reset(serial) {
                return outcome;
            }
        }

        let request = match self.active {
            Some(request) => request,
            None => {
                let Some(mut intent) = self.intents.first_of(&Intent::SERIAL_PRIORITY) else {
                    return PollOutcome::Continue;
                };

                if intent == Intent::ExecReset {
                    // The relayed reset frame goes out first
                    intent = Intent::RelayBuffer;
                }

                self.intents.clear(intent);
                let Some((id, kind)) = reports::request_for(intent, &self.state) else {
                    return PollOutcome::Continue;
                };
                let request = ActiveRequest { intent, id, kind };
                self.active = Some(request);
                request
            }
        };

        let line = self.line_status(serial);
        let state = &self.state;
        let intents = self.intents;
        let result = self
            .slot
            .send_request(request.id, request.kind, now, line, serial, |buf| {
                // Anything raised since arming is covered by this build
                intents.clear(request.intent);
                reports::build_report(request.intent, state, buf)
            });

        match result {
            Ok(SendProgress::InFlight(_)) => {}
            Ok(SendProgress::Done) => {
                trace!("BRIDGE: {:?} delivered", request.intent);
                self.active = None;
                self.last_uart_activity = Some(now);
            }
            Ok(SendProgress::Failed) => {
                error!("BRIDGE: {:?} dropped after retries", request.intent);
                self.active = None;
            }
            Err(TransportError::Busy { holder }) => {
                warn!("BRIDGE: slot held by {=u8:#x}", holder);
            }
            Err(TransportError::Build(e)) => {
                warn!("BRIDGE: {:?} could not be built: {:?}", request.intent, e);
                self.active = None;
            }
        }
        PollOutcome::Continue
    }

    /// Reset outranks every serial request
    ///
    /// A frame half handed to the port is finished, and a pending relay is
    /// written out, but nothing waits for an ACK. Returns `None` when the
    /// regular request path still has bytes to put on the wire.
    fn service_reset<S: SerialPort>(&mut self, serial: &S) -> Option<PollOutcome> {
        if let Some(request) = self.active {
            let relay_unsent =
                request.intent == Intent::RelayBuffer && self.slot.state() != SlotState::AwaitingAck;
            if relay_unsent || self.slot.is_writing() {
                return None;
            }
            self.slot.abandon();
            self.active = None;
        }
        if self.intents.is_pending(Intent::RelayBuffer) {
            return None;
        }
        if serial.is_transmitting() || !self.acks.is_drained() {
            return Some(PollOutcome::Continue);
        }
        warn!("BRIDGE: resetting");
        Some(PollOutcome::Reset)
    }

    fn service_app_notification<N: Notifier>(&mut self, notifier: &mut N) {
        if !self.intents.is_pending(Intent::NotifyAppBuffer) {
            return;
        }
        if !self.state.link.is_connected() || !self.state.cccd.is_enabled(Characteristic::App) {
            debug!("BRIDGE: APP buffer dropped, nobody listening");
            self.intents.clear(Intent::NotifyAppBuffer);
            return;
        }

        match notifier.notify(Characteristic::App, &self.state.app_buffer.notification()) {
            Err(NotifyError::Resources) => {}
            Ok(()) => self.intents.clear(Intent::NotifyAppBuffer),
            Err(e) => {
                warn!("BRIDGE: APP notification failed: {:?}", e);
                self.intents.clear(Intent::NotifyAppBuffer);
            }
        }
    }

    /// Current parameters changed: tell both sides
    fn params_changed<N: Notifier>(&mut self, notifier: &mut N) {
        self.intents.raise(Intent::SendBleParams);
        if let Err(e) = commands::notify_params(&self.state, notifier) {
            debug!("BRIDGE: params notification failed: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::connection::LinkError;
    use crate::core::protocol::{decode_short, encode_short, MAX_SHORT_FRAME};
    use crate::state::{ConnectionParams, PhyParams};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Serial {
        inbound: VecDeque<u8>,
        written: std::vec::Vec<u8>,
    }

    impl SerialPort for Serial {
        fn read_byte(&mut self) -> Option<u8> {
            self.inbound.pop_front()
        }

        fn write(&mut self, bytes: &[u8]) -> usize {
            self.written.extend_from_slice(bytes);
            bytes.len()
        }

        fn is_transmitting(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct Ble {
        sent: std::vec::Vec<(Characteristic, std::vec::Vec<u8>)>,
    }

    impl Notifier for Ble {
        fn notify(&mut self, characteristic: Characteristic, data: &[u8]) -> Result<(), NotifyError> {
            self.sent.push((characteristic, data.to_vec()));
            Ok(())
        }
    }

    impl LinkControl for Ble {
        fn update_conn_params(&mut self, _: &ConnectionParams) -> Result<(), LinkError> {
            Ok(())
        }

        fn update_phy(&mut self, _: &PhyParams) -> Result<(), LinkError> {
            Ok(())
        }

        fn update_data_length(&mut self, _: &DataLengthParams) -> Result<(), LinkError> {
            Ok(())
        }
    }

    fn at(us: u64) -> Instant {
        Instant::from_micros(us)
    }

    fn frame(id: u8, payload: &[u8]) -> std::vec::Vec<u8> {
        let mut out: heapless::Vec<u8, MAX_SHORT_FRAME> = heapless::Vec::new();
        encode_short(id, b'N', payload, &mut out).unwrap();
        out.to_vec()
    }

    /// Poll every 100us until the wire holds `len` bytes
    fn poll_until(bridge: &mut Bridge, serial: &mut Serial, ble: &mut Ble, t: &mut u64, len: usize) {
        for _ in 0..200 {
            bridge.poll(at(*t), serial, ble);
            *t += 100;
            if serial.written.len() >= len {
                return;
            }
        }
        panic!("wire stalled at {} bytes", serial.written.len());
    }

    #[test]
    fn boot_announcement_then_idle_after_ack() {
        let intents = PendingIntents::new();
        let mut bridge = Bridge::new(BridgeConfig::default(), &intents);
        let (mut serial, mut ble) = (Serial::default(), Ble::default());
        let mut t = 0;

        poll_until(&mut bridge, &mut serial, &mut ble, &mut t, 6);
        assert_eq!(decode_short(&serial.written).unwrap().payload[..], [0x23]);

        serial.inbound.extend(ACK);
        for _ in 0..10 {
            bridge.poll(at(t), &mut serial, &mut ble);
            t += 100;
        }
        assert_eq!(bridge.slot().current_id(), protocol::NO_MESSAGE);
        assert!(!intents.any());
    }

    #[test]
    fn corrupt_frame_is_nacked() {
        let intents = PendingIntents::new();
        let mut bridge = Bridge::new(BridgeConfig::default(), &intents);
        intents.clear(Intent::SendBootMode);
        let (mut serial, mut ble) = (Serial::default(), Ble::default());

        let mut raw = frame(0x04, &[]);
        raw[4] ^= 0x01;
        serial.inbound.extend(raw);
        bridge.poll(at(0), &mut serial, &mut ble);
        bridge.poll(at(400), &mut serial, &mut ble);

        assert_eq!(serial.written, NACK);
        assert!(!intents.is_pending(Intent::SendVersion));
    }

    #[test]
    fn reset_follows_relay_without_waiting_for_ack() {
        let intents = PendingIntents::new();
        let mut bridge = Bridge::new(BridgeConfig::default(), &intents);
        intents.clear(Intent::SendBootMode);
        let (mut serial, mut ble) = (Serial::default(), Ble::default());

        bridge.handle_ble_event(
            BleEvent::write(Characteristic::App, &[0xFF, 1, 0x01]).unwrap(),
            at(0),
            &mut ble,
        );
        assert!(intents.is_pending(Intent::ExecReset));

        let mut t = 0;
        poll_until(&mut bridge, &mut serial, &mut ble, &mut t, 6);
        assert_eq!(serial.written, frame(0xFF, &[0x01]));
        assert_eq!(bridge.poll(at(t), &mut serial, &mut ble), PollOutcome::Reset);
        assert_eq!(bridge.slot().current_id(), protocol::NO_MESSAGE);
    }

    #[test]
    fn reset_abandons_unacknowledged_boot_frame() {
        let intents = PendingIntents::new();
        let mut bridge = Bridge::new(BridgeConfig::default(), &intents);
        let (mut serial, mut ble) = (Serial::default(), Ble::default());
        let mut t = 0;

        poll_until(&mut bridge, &mut serial, &mut ble, &mut t, 6);
        assert_eq!(bridge.slot().state(), SlotState::AwaitingAck);

        intents.raise(Intent::ExecReset);
        assert_eq!(bridge.poll(at(t), &mut serial, &mut ble), PollOutcome::Reset);
        assert_eq!(serial.written.len(), 6);
    }

    #[test]
    fn data_length_update_stores_att_mtu() {
        let intents = PendingIntents::new();
        let mut bridge = Bridge::new(BridgeConfig::default(), &intents);
        let mut ble = Ble::default();

        bridge.handle_ble_event(
            BleEvent::DataLengthUpdated(DataLengthParams {
                max_tx_octets: 251,
                max_rx_octets: 27,
            }),
            at(0),
            &mut ble,
        );
        let current = bridge.state().params.current.data_length;
        assert_eq!((current.max_tx_octets, current.max_rx_octets), (247, 23));
        assert!(intents.is_pending(Intent::SendBleParams));
    }

    #[test]
    fn disconnect_clears_link_state() {
        let intents = PendingIntents::new();
        let mut bridge = Bridge::new(BridgeConfig::default(), &intents);
        let mut ble = Ble::default();

        bridge.handle_ble_event(
            BleEvent::Connected {
                conn_handle: 0,
                params: ConnectionParams::default(),
            },
            at(0),
            &mut ble,
        );
        bridge.handle_ble_event(
            BleEvent::NotificationsChanged {
                characteristic: Characteristic::Params,
                enabled: true,
            },
            at(0),
            &mut ble,
        );
        assert!(intents.is_pending(Intent::ApplyConnParams));

        bridge.handle_ble_event(BleEvent::Disconnected { conn_handle: 0, reason: 0x13 }, at(10), &mut ble);
        assert!(!bridge.state().link.is_connected());
        assert!(!bridge.state().cccd.is_enabled(Characteristic::Params));
        assert!(intents.first_of(&Intent::LINK_PRIORITY).is_none());
        assert!(intents.is_pending(Intent::SendConnStatus));
    }
}
