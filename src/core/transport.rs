//! Serial Request Transport
//!
//! The single outbound request slot. At most one frame is in flight on the
//! UART at a time; it is keyed by message id so the polling loop can call
//! [`RequestSlot::send_request`] repeatedly for the same id until it reports
//! completion, while any other id is turned away as busy.
//!
//! ```text
//! Idle -> Armed -> Debounce -> Transmitting -> AwaitingAck -> Idle
//!           ^          |            ^               |
//!           +-- busy --+            +-- NACK/timeout+
//! ```
//!
//! Extended frames carry no checksum and are never acknowledged, so they
//! return to Idle straight from Transmitting.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::core::memory::TxBuffer;
use crate::core::protocol::{ProtocolError, MAX_EXTENDED_FRAME, NO_MESSAGE};
use crate::core::time;

/// Non-blocking access to the UART
///
/// Implementations hand bytes to an interrupt/DMA driven queue and never
/// spin waiting for the hardware.
pub trait SerialPort {
    /// Next received byte, if any
    fn read_byte(&mut self) -> Option<u8>;

    /// Queue as many bytes as fit; returns how many were accepted
    fn write(&mut self, bytes: &[u8]) -> usize;

    /// True while previously queued bytes are still leaving the wire
    fn is_transmitting(&self) -> bool;
}

/// Scratch buffer payload builders write into
pub type FrameBuffer = Vec<u8, MAX_EXTENDED_FRAME>;

/// Slot states, numbered as they appear on diagnostics
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotState {
    Idle = 0,
    Armed = 1,
    Debounce = 2,
    Transmitting = 3,
    AwaitingAck = 4,
}

/// Which framing the request uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameKind {
    /// Checksum-protected, acknowledged by the host
    Short,
    /// Unprotected, fire and forget
    Extended,
}

/// Host acknowledgement of the frame in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ack {
    Positive,
    Negative,
}

/// What else is happening on the line right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineStatus {
    pub transmitting: bool,
    pub receiving: bool,
}

impl LineStatus {
    pub fn is_idle(&self) -> bool {
        !self.transmitting && !self.receiving
    }
}

/// Outcome of one `send_request` step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendProgress {
    /// Still working; call again with the same id
    InFlight(SlotState),
    /// Frame sent (and acknowledged, for short frames)
    Done,
    /// Retry ceiling reached; the slot is free again
    Failed,
}

/// Transport errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// Another id holds the slot
    Busy { holder: u8 },
    /// The payload builder could not produce a frame
    Build(ProtocolError),
}

impl From<ProtocolError> for TransportError {
    fn from(err: ProtocolError) -> Self {
        TransportError::Build(err)
    }
}

/// Timing knobs for the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTiming {
    /// Quiet period confirmed before transmitting
    pub quiet: Duration,
    /// How long to wait for ACK/NACK before resending
    pub ack_timeout: Duration,
    /// Give up after this many resends; `None` retries forever
    pub max_retries: Option<u16>,
}

impl Default for TransportTiming {
    fn default() -> Self {
        Self {
            quiet: Duration::from_micros(400),
            ack_timeout: Duration::from_millis(10),
            max_retries: None,
        }
    }
}

/// Running counters for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransportStats {
    pub frames_sent: u32,
    pub retransmissions: u32,
    pub nacks: u32,
    pub timeouts: u32,
    pub failures: u32,
}

/// The one outbound request slot
pub struct RequestSlot {
    state: SlotState,
    id: u8,
    kind: FrameKind,
    since: Instant,
    ack: Option<Ack>,
    retries: u16,
    buffer: TxBuffer<MAX_EXTENDED_FRAME>,
    timing: TransportTiming,
    stats: TransportStats,
}

impl RequestSlot {
    pub const fn new(timing: TransportTiming) -> Self {
        Self {
            state: SlotState::Idle,
            id: NO_MESSAGE,
            kind: FrameKind::Short,
            since: Instant::from_ticks(0),
            ack: None,
            retries: 0,
            buffer: TxBuffer::new(),
            timing,
            stats: TransportStats {
                frames_sent: 0,
                retransmissions: 0,
                nacks: 0,
                timeouts: 0,
                failures: 0,
            },
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Id holding the slot, or [`NO_MESSAGE`]
    pub fn current_id(&self) -> u8 {
        self.id
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// The slot is idle or already working on `id`
    pub fn is_free_for(&self, id: u8) -> bool {
        self.id == id || self.id == NO_MESSAGE
    }

    /// Bytes of the current frame are being handed to the port
    pub fn is_writing(&self) -> bool {
        self.state == SlotState::Transmitting
    }

    /// Deliver a host ACK/NACK
    ///
    /// Only accepted while a short frame awaits acknowledgement; returns
    /// whether it was consumed.
    pub fn on_ack(&mut self, ack: Ack) -> bool {
        if self.state == SlotState::AwaitingAck {
            self.ack = Some(ack);
            true
        } else {
            trace!("TRANSPORT: stray {:?} ignored", ack);
            false
        }
    }

    /// Drive the request for `id` one step further
    ///
    /// `build` runs exactly once per request, when the quiet period has been
    /// confirmed. Retransmissions replay the buffer it produced.
    pub fn send_request<S, F>(
        &mut self,
        id: u8,
        kind: FrameKind,
        now: Instant,
        line: LineStatus,
        port: &mut S,
        build: F,
    ) -> Result<SendProgress, TransportError>
    where
        S: SerialPort,
        F: FnOnce(&mut FrameBuffer) -> Result<(), ProtocolError>,
    {
        if !self.is_free_for(id) {
            return Err(TransportError::Busy { holder: self.id });
        }

        let mut build = Some(build);
        loop {
            match self.state {
                SlotState::Idle => {
                    self.id = id;
                    self.kind = kind;
                    self.retries = 0;
                    self.ack = None;
                    self.since = now;
                    self.state = SlotState::Armed;
                    debug!("TRANSPORT: request {=u8:#x} armed", id);
                }
                SlotState::Armed => {
                    if !line.is_idle() {
                        return Ok(SendProgress::InFlight(self.state));
                    }
                    self.since = now;
                    self.state = SlotState::Debounce;
                }
                SlotState::Debounce => {
                    if !time::elapsed(now, self.since, self.timing.quiet) {
                        return Ok(SendProgress::InFlight(self.state));
                    }
                    if !line.is_idle() {
                        self.state = SlotState::Armed;
                        return Ok(SendProgress::InFlight(self.state));
                    }

                    let Some(build) = build.take() else {
                        return Ok(SendProgress::InFlight(self.state));
                    };
                    if let Err(e) = build(self.buffer.contents_mut()) {
                        warn!("TRANSPORT: builder for {=u8:#x} failed: {:?}", id, e);
                        self.release();
                        return Err(e.into());
                    }
                    self.state = SlotState::Transmitting;
                }
                SlotState::Transmitting => {
                    if !self.buffer.is_drained() {
                        let accepted = port.write(self.buffer.pending());
                        self.buffer.advance(accepted);
                    }
                    if !self.buffer.is_drained() || port.is_transmitting() {
                        return Ok(SendProgress::InFlight(self.state));
                    }

                    self.stats.frames_sent = self.stats.frames_sent.wrapping_add(1);
                    match self.kind {
                        FrameKind::Extended => {
                            debug!("TRANSPORT: extended frame {=u8:#x} sent", id);
                            self.release();
                            return Ok(SendProgress::Done);
                        }
                        FrameKind::Short => {
                            self.since = now;
                            self.ack = None;
                            self.state = SlotState::AwaitingAck;
                        }
                    }
                }
                SlotState::AwaitingAck => {
                    match self.ack.take() {
                        Some(Ack::Positive) => {
                            debug!("TRANSPORT: frame {=u8:#x} acknowledged", id);
                            self.release();
                            return Ok(SendProgress::Done);
                        }
                        Some(Ack::Negative) => {
                            self.stats.nacks = self.stats.nacks.wrapping_add(1);
                            warn!("TRANSPORT: NACK for {=u8:#x}, resending", id);
                        }
                        None if time::elapsed(now, self.since, self.timing.ack_timeout) => {
                            self.stats.timeouts = self.stats.timeouts.wrapping_add(1);
                            warn!("TRANSPORT: ACK timeout for {=u8:#x}, resending", id);
                        }
                        None => return Ok(SendProgress::InFlight(self.state)),
                    }

                    if let Some(limit) = self.timing.max_retries {
                        if self.retries >= limit {
                            error!("TRANSPORT: giving up on {=u8:#x} after {} resends", id, self.retries);
                            self.stats.failures = self.stats.failures.wrapping_add(1);
                            self.release();
                            return Ok(SendProgress::Failed);
                        }
                    }
                    self.retries = self.retries.saturating_add(1);
                    self.stats.retransmissions = self.stats.retransmissions.wrapping_add(1);
                    self.buffer.rewind();
                    self.state = SlotState::Transmitting;
                }
            }
        }
    }

    /// Drop the current request without waiting for its acknowledgement
    pub fn abandon(&mut self) {
        if self.id != NO_MESSAGE {
            debug!("TRANSPORT: request {=u8:#x} abandoned in {:?}", self.id, self.state);
        }
        self.release();
    }

    fn release(&mut self) {
        self.state = SlotState::Idle;
        self.id = NO_MESSAGE;
        self.ack = None;
        self.retries = 0;
    }
}
