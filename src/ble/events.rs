//! BLE Event Queue
//!
//! SoftDevice callbacks run in the stack's task/interrupt context. They only
//! translate what happened into a [`BleEvent`] and post it to a bounded
//! channel; the polling loop drains the channel and does the actual work.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;

use crate::ble::service::Characteristic;
use crate::config::MAX_ATT_MTU;
use crate::state::{ConnectionParams, DataLengthParams, PhyParams};

/// Largest characteristic write carried by an event
pub const MAX_WRITE_LEN: usize = (MAX_ATT_MTU - 3) as usize;

/// Events buffered between the stack and the polling loop
pub const EVENT_QUEUE_DEPTH: usize = 8;

/// Characteristic write payload
pub type WriteData = Vec<u8, MAX_WRITE_LEN>;

/// Queue type shared by the producer and the polling loop
pub type BleEventQueue = Channel<CriticalSectionRawMutex, BleEvent, EVENT_QUEUE_DEPTH>;

/// Something the BLE stack reported
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleEvent {
    Connected {
        conn_handle: u16,
        params: ConnectionParams,
    },
    Disconnected {
        conn_handle: u16,
        reason: u8,
    },
    ConnParamsUpdated(ConnectionParams),
    PhyUpdated(PhyParams),
    /// Link-layer octets as reported by the controller
    DataLengthUpdated(DataLengthParams),
    AdvertisingStarted,
    AdvertisingStopped,
    NotificationsChanged {
        characteristic: Characteristic,
        enabled: bool,
    },
    Write {
        characteristic: Characteristic,
        data: WriteData,
    },
    /// The stack finished sending `count` queued notifications
    NotifyComplete {
        count: u8,
    },
}

impl BleEvent {
    /// Create a write event, rejecting payloads larger than one ATT write
    pub fn write(characteristic: Characteristic, data: &[u8]) -> Option<Self> {
        let mut payload = WriteData::new();
        payload.extend_from_slice(data).ok()?;
        Some(BleEvent::Write {
            characteristic,
            data: payload,
        })
    }
}

/// Post without blocking; a full queue drops the event
pub fn post(queue: &BleEventQueue, event: BleEvent) -> bool {
    match queue.try_send(event) {
        Ok(()) => true,
        Err(_) => {
            error!("EVENTS: queue full, dropping BLE event");
            false
        }
    }
}
