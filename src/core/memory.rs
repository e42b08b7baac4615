//! Serial Buffers
//!
//! Fixed-capacity buffers for the UART side: the receive window that
//! collects bytes until the line goes quiet, and the transmit buffer that
//! remembers how much of a frame has already been handed to the port.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::core::time;

/// Receive window capacity; one full short frame plus slack
pub const RX_BUFFER_SIZE: usize = 256;

/// Buffer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferError {
    /// Buffer too small for data
    BufferTooSmall,
}

/// Collects inbound bytes until the line has been silent long enough
pub struct RxBuffer {
    data: [u8; RX_BUFFER_SIZE],
    len: usize,
    overflowed: bool,
    last_byte: Option<Instant>,
}

impl RxBuffer {
    /// Create a new RX buffer
    pub const fn new() -> Self {
        Self {
            data: [0; RX_BUFFER_SIZE],
            len: 0,
            overflowed: false,
            last_byte: None,
        }
    }

    /// Append a received byte, opening a window if none is open
    pub fn push(&mut self, byte: u8, now: Instant) {
        if self.last_byte.is_none() {
            self.len = 0;
            self.overflowed = false;
        }

        if self.len < RX_BUFFER_SIZE {
            self.data[self.len] = byte;
            self.len += 1;
        } else {
            self.overflowed = true;
        }
        self.last_byte = Some(now);
    }

    /// A window is open and bytes may still be arriving
    pub fn is_receiving(&self) -> bool {
        self.last_byte.is_some()
    }

    /// Close the window once `silence` has passed since the last byte
    ///
    /// Returns the collected bytes; an overflowed window yields an empty
    /// slice. The slice stays valid until the next [`push`](Self::push).
    pub fn close_if_silent(&mut self, now: Instant, silence: Duration) -> Option<&[u8]> {
        let last = self.last_byte?;
        if !time::elapsed(now, last, silence) {
            return None;
        }

        self.last_byte = None;
        if self.overflowed {
            Some(&self.data[..0])
        } else {
            Some(&self.data[..self.len])
        }
    }

    /// Drop any partial window
    pub fn clear(&mut self) {
        self.len = 0;
        self.overflowed = false;
        self.last_byte = None;
    }
}

impl Default for RxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Outgoing bytes plus how many the port has accepted so far
pub struct TxBuffer<const N: usize> {
    data: Vec<u8, N>,
    sent: usize,
}

impl<const N: usize> TxBuffer<N> {
    pub const fn new() -> Self {
        Self {
            data: Vec::new(),
            sent: 0,
        }
    }

    /// Replace the contents with `bytes`
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.data.clear();
        self.sent = 0;
        self.data
            .extend_from_slice(bytes)
            .map_err(|_| BufferError::BufferTooSmall)
    }

    /// Append to whatever is still queued
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if self.is_drained() {
            self.data.clear();
            self.sent = 0;
        }
        self.data
            .extend_from_slice(bytes)
            .map_err(|_| BufferError::BufferTooSmall)
    }

    /// Mutable access for builders; resets the send cursor
    pub fn contents_mut(&mut self) -> &mut Vec<u8, N> {
        self.sent = 0;
        &mut self.data
    }

    /// Bytes not yet accepted by the port
    pub fn pending(&self) -> &[u8] {
        &self.data[self.sent..]
    }

    pub fn advance(&mut self, count: usize) {
        self.sent = (self.sent + count).min(self.data.len());
    }

    /// Start over from the first byte without touching the contents
    pub fn rewind(&mut self) {
        self.sent = 0;
    }

    pub fn is_drained(&self) -> bool {
        self.sent >= self.data.len()
    }

    /// Get the packet data as a slice
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.sent = 0;
    }
}

impl<const N: usize> Default for TxBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_closes_only_after_silence() {
        let mut rx = RxBuffer::new();
        let silence = Duration::from_micros(300);

        rx.push(b'A', Instant::from_micros(0));
        rx.push(b'C', Instant::from_micros(100));
        rx.push(b'K', Instant::from_micros(200));
        assert!(rx.close_if_silent(Instant::from_micros(450), silence).is_none());
        assert_eq!(rx.close_if_silent(Instant::from_micros(500), silence), Some(&b"ACK"[..]));
        assert!(!rx.is_receiving());

        rx.push(0x01, Instant::from_micros(600));
        assert_eq!(rx.close_if_silent(Instant::from_micros(900), silence), Some(&[0x01u8][..]));
    }

    #[test]
    fn overflowed_window_yields_nothing() {
        let mut rx = RxBuffer::new();
        for i in 0..(RX_BUFFER_SIZE + 10) {
            rx.push(i as u8, Instant::from_micros(i as u64));
        }
        let closed = rx.close_if_silent(Instant::from_millis(5), Duration::from_micros(300));
        assert_eq!(closed, Some(&[][..]));
    }

    #[test]
    fn partial_writes_resume_where_they_stopped() {
        let mut tx: TxBuffer<8> = TxBuffer::new();
        tx.load(&[1, 2, 3, 4]).unwrap();
        tx.advance(3);
        assert_eq!(tx.pending(), &[4]);
        tx.rewind();
        assert_eq!(tx.pending(), &[1, 2, 3, 4]);
        assert_eq!(tx.load(&[0; 9]), Err(BufferError::BufferTooSmall));
    }
}
