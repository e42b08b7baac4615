//! UART Communication Layer
//!
//! The UARTE DMA loops run as futures next to the bridge loop and talk to it
//! through two byte pipes:
//! - RX: bytes collected until the line idles, pushed into `RX_PIPE`
//! - TX: anything the bridge queued in `TX_PIPE`, written out in chunks
//!
//! [`UartPort`] is the bridge's non-blocking view of both pipes.

use core::sync::atomic::{AtomicBool, Ordering};

use defmt::warn;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pipe::Pipe;
use nrf52_uart_bridge_firmware::core::transport::SerialPort;

/// One extended frame plus slack
pub const TX_PIPE_SIZE: usize = 5120;
pub const RX_PIPE_SIZE: usize = 512;

/// Largest DMA transfer in either direction
pub const DMA_CHUNK: usize = 64;

/// Bytes received from the host, not yet seen by the bridge
pub static RX_PIPE: Pipe<CriticalSectionRawMutex, RX_PIPE_SIZE> = Pipe::new();

/// Bytes queued by the bridge, not yet handed to the UARTE
pub static TX_PIPE: Pipe<CriticalSectionRawMutex, TX_PIPE_SIZE> = Pipe::new();

/// A DMA write is in progress
static TX_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Hand a received chunk to the bridge
pub fn store_received(bytes: &[u8]) {
    let stored = RX_PIPE.try_write(bytes).unwrap_or(0);
    if stored < bytes.len() {
        warn!("UART: rx pipe full, dropped {} bytes", bytes.len() - stored);
    }
}

/// Wait for queued bytes and mark the transmitter busy
pub async fn next_tx_chunk(buf: &mut [u8; DMA_CHUNK]) -> usize {
    let n = TX_PIPE.read(buf).await;
    TX_ACTIVE.store(true, Ordering::Release);
    n
}

pub fn tx_chunk_done() {
    TX_ACTIVE.store(false, Ordering::Release);
}

/// Bridge side of the pipes
pub struct UartPort;

impl SerialPort for UartPort {
    fn read_byte(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        match RX_PIPE.try_read(&mut byte) {
            Ok(1) => Some(byte[0]),
            _ => None,
        }
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        TX_PIPE.try_write(bytes).unwrap_or(0)
    }

    fn is_transmitting(&self) -> bool {
        !TX_PIPE.is_empty() || TX_ACTIVE.load(Ordering::Acquire)
    }
}
