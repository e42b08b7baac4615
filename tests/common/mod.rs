//! Shared test doubles for the host-side integration tests
//!
//! - `MockSerial`: scripted inbound bytes, records everything written
//! - `MockBle`: records notifications and link requests, optional queue limit
//! - `Clock`: monotonically advancing microsecond instants

#![allow(dead_code)]

use std::collections::VecDeque;

use embassy_time::{Duration, Instant};
use nrf52_uart_bridge_firmware::ble::connection::{LinkControl, LinkError};
use nrf52_uart_bridge_firmware::ble::notifications::{Notifier, NotifyError};
use nrf52_uart_bridge_firmware::ble::service::Characteristic;
use nrf52_uart_bridge_firmware::bridge::{Bridge, PollOutcome};
use nrf52_uart_bridge_firmware::core::protocol::{encode_short, MAX_SHORT_FRAME};
use nrf52_uart_bridge_firmware::core::transport::SerialPort;
use nrf52_uart_bridge_firmware::state::{ConnectionParams, DataLengthParams, PhyParams};

#[derive(Default)]
pub struct MockSerial {
    pub inbound: VecDeque<u8>,
    pub written: Vec<u8>,
    pub transmitting: bool,
}

impl MockSerial {
    pub fn feed(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Take everything written so far
    pub fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.written)
    }
}

impl SerialPort for MockSerial {
    fn read_byte(&mut self) -> Option<u8> {
        self.inbound.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        self.written.extend_from_slice(bytes);
        bytes.len()
    }

    fn is_transmitting(&self) -> bool {
        self.transmitting
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRequest {
    Conn(ConnectionParams),
    Phy(PhyParams),
    DataLength(DataLengthParams),
}

#[derive(Default)]
pub struct MockBle {
    pub notifications: Vec<(Characteristic, Vec<u8>)>,
    pub requests: Vec<LinkRequest>,
    /// Notifications accepted before reporting `Resources`
    pub queue_limit: Option<usize>,
    pub queued: usize,
}

impl MockBle {
    pub fn with_queue_limit(limit: usize) -> Self {
        Self {
            queue_limit: Some(limit),
            ..Default::default()
        }
    }

    /// The stack sent `count` queued notifications
    pub fn complete(&mut self, count: usize) {
        self.queued = self.queued.saturating_sub(count);
    }

    pub fn on(&self, characteristic: Characteristic) -> Vec<&Vec<u8>> {
        self.notifications
            .iter()
            .filter(|(c, _)| *c == characteristic)
            .map(|(_, data)| data)
            .collect()
    }
}

impl Notifier for MockBle {
    fn notify(&mut self, characteristic: Characteristic, data: &[u8]) -> Result<(), NotifyError> {
        if self.queue_limit.is_some_and(|limit| self.queued >= limit) {
            return Err(NotifyError::Resources);
        }
        self.queued += 1;
        self.notifications.push((characteristic, data.to_vec()));
        Ok(())
    }
}

impl LinkControl for MockBle {
    fn update_conn_params(&mut self, params: &ConnectionParams) -> Result<(), LinkError> {
        self.requests.push(LinkRequest::Conn(*params));
        Ok(())
    }

    fn update_phy(&mut self, phy: &PhyParams) -> Result<(), LinkError> {
        self.requests.push(LinkRequest::Phy(*phy));
        Ok(())
    }

    fn update_data_length(&mut self, params: &DataLengthParams) -> Result<(), LinkError> {
        self.requests.push(LinkRequest::DataLength(*params));
        Ok(())
    }
}

/// Synthetic clock advanced by the tests
pub struct Clock {
    now: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self { now: 0 }
    }

    pub fn now(&self) -> Instant {
        Instant::from_micros(self.now)
    }

    pub fn advance(&mut self, by: Duration) -> Instant {
        self.now += by.as_micros();
        self.now()
    }
}

/// Encode a short host frame
pub fn frame(id: u8, kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut out: heapless::Vec<u8, MAX_SHORT_FRAME> = heapless::Vec::new();
    encode_short(id, kind, payload, &mut out).expect("payload fits a short frame");
    out.to_vec()
}

/// Poll every 100us for `steps` steps, stopping early on reset
pub fn run(
    bridge: &mut Bridge,
    clock: &mut Clock,
    serial: &mut MockSerial,
    ble: &mut MockBle,
    steps: usize,
) -> PollOutcome {
    for _ in 0..steps {
        let now = clock.advance(Duration::from_micros(100));
        if bridge.poll(now, serial, ble) == PollOutcome::Reset {
            return PollOutcome::Reset;
        }
    }
    PollOutcome::Continue
}

/// Poll until the host has received one whole short frame, then take it
pub fn read_frame(
    bridge: &mut Bridge,
    clock: &mut Clock,
    serial: &mut MockSerial,
    ble: &mut MockBle,
) -> nrf52_uart_bridge_firmware::core::protocol::Frame {
    use nrf52_uart_bridge_firmware::core::protocol::{decode_short, ProtocolError};

    for _ in 0..1000 {
        match decode_short(&serial.written) {
            Ok(frame) => {
                serial.written.clear();
                return frame;
            }
            Err(ProtocolError::Truncated) => {
                run(bridge, clock, serial, ble, 1);
            }
            Err(e) => panic!("host saw a bad frame: {:?} in {:02x?}", e, serial.written),
        }
    }
    panic!("no frame after 100ms, wire holds {:02x?}", serial.written);
}

/// Host acknowledges the frame it just read
pub fn host_acks(bridge: &mut Bridge, clock: &mut Clock, serial: &mut MockSerial, ble: &mut MockBle) {
    use nrf52_uart_bridge_firmware::core::protocol::ACK;

    serial.feed(ACK);
    run(bridge, clock, serial, ble, 10);
}
