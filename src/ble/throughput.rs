//! Throughput Benchmark
//!
//! Streams notifications on the TEST characteristic as fast as the stack
//! accepts them and reports rate telemetry in every packet.
//!
//! ```text
//! Idle --start--> Running --target reached / time limit / stop--> Finishing --summary sent--> Idle
//! ```
//!
//! A full notification queue is not an error: the iteration that hit it is
//! rolled back and the session resumes on the next completion or poll.

use embassy_time::{Duration, Instant};

use crate::ble::notifications::{Notifier, NotifyError};
use crate::ble::service::Characteristic;
use crate::core::time;

/// Telemetry header at the start of every TEST notification
pub const TELEMETRY_LEN: usize = 18;

/// Smallest notification payload (default ATT MTU of 23)
pub const MIN_NOTIFICATION_PAYLOAD: usize = 20;

/// Largest notification payload (ATT MTU 247)
pub const MAX_NOTIFICATION_PAYLOAD: usize = 244;

/// Test commands written to the TEST characteristic
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TestKind {
    Stop = 1,
    OneKilobyte = 2,
    OneMegabyte = 3,
    SixtySeconds = 4,
}

impl TestKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Stop),
            2 => Some(Self::OneKilobyte),
            3 => Some(Self::OneMegabyte),
            4 => Some(Self::SixtySeconds),
            _ => None,
        }
    }

    /// Bytes to send before finishing
    pub fn target_bytes(self) -> u32 {
        match self {
            TestKind::Stop => 0,
            TestKind::OneKilobyte => 1024,
            TestKind::OneMegabyte => 1024 * 1024,
            // Large enough that the time limit ends the run
            TestKind::SixtySeconds => 50 * 1024 * 1024,
        }
    }
}

/// Session states, numbered as they appear in telemetry
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Idle = 0,
    Running = 1,
    Finishing = 2,
}

/// Throughput in bytes per millisecond, kept in hundredths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rate {
    centi: u32,
}

impl Rate {
    pub const ZERO: Rate = Rate { centi: 0 };

    /// Zero elapsed time reports zero
    pub fn measure(bytes: u32, millis: u32) -> Self {
        if millis == 0 {
            return Self::ZERO;
        }
        let centi = (bytes as u64 * 100) / millis as u64;
        Self {
            centi: centi.min(u32::MAX as u64) as u32,
        }
    }

    /// Whole part, saturating at 255
    pub fn integer(self) -> u8 {
        (self.centi / 100).min(u8::MAX as u32) as u8
    }

    /// Two truncated decimal digits
    pub fn fraction(self) -> u8 {
        (self.centi % 100) as u8
    }
}

/// One benchmark run and its counters
pub struct ThroughputSession {
    kind: TestKind,
    state: SessionState,
    index: u16,
    bytes: u32,
    target: u32,
    payload_len: usize,
    start: Instant,
    sample_at: Instant,
    sample_bytes: u32,
    current_rate: Rate,
    average_rate: Rate,
    outstanding: u16,
    limit: Duration,
}

impl ThroughputSession {
    pub const fn new(limit: Duration) -> Self {
        Self {
            kind: TestKind::Stop,
            state: SessionState::Idle,
            index: 0,
            bytes: 0,
            target: 0,
            payload_len: MIN_NOTIFICATION_PAYLOAD,
            start: Instant::from_ticks(0),
            sample_at: Instant::from_ticks(0),
            sample_bytes: 0,
            current_rate: Rate::ZERO,
            average_rate: Rate::ZERO,
            outstanding: 0,
            limit,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != SessionState::Idle
    }

    pub fn bytes_transmitted(&self) -> u32 {
        self.bytes
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn outstanding(&self) -> u16 {
        self.outstanding
    }

    /// Handle a TEST characteristic command
    ///
    /// `payload_len` is the notification payload the link allows. Unknown
    /// codes are ignored and return `false`.
    pub fn command(&mut self, code: u8, payload_len: usize, now: Instant) -> bool {
        let Some(kind) = TestKind::from_u8(code) else {
            debug!("THROUGHPUT: unknown test code {=u8}", code);
            return false;
        };

        self.kind = kind;
        if kind == TestKind::Stop {
            info!("THROUGHPUT: stop requested");
            self.state = SessionState::Finishing;
            return true;
        }

        self.payload_len = payload_len.clamp(MIN_NOTIFICATION_PAYLOAD, MAX_NOTIFICATION_PAYLOAD);
        self.index = 0;
        self.bytes = 0;
        self.target = kind.target_bytes();
        self.start = now;
        self.sample_at = now;
        self.sample_bytes = 0;
        self.current_rate = Rate::ZERO;
        self.average_rate = Rate::ZERO;
        self.state = SessionState::Running;
        info!(
            "THROUGHPUT: {:?} started, {} byte notifications, target {} bytes",
            kind, self.payload_len, self.target
        );
        true
    }

    /// A notification left the stack; keep the stream going
    pub fn on_notify_complete<N: Notifier>(&mut self, count: u8, now: Instant, notifier: &mut N) {
        self.outstanding = self.outstanding.saturating_sub(count as u16);
        if self.is_active() {
            self.pump(now, notifier);
        }
    }

    /// Link lost: the run cannot be finished
    pub fn abort(&mut self) {
        if self.is_active() {
            warn!("THROUGHPUT: aborted after {} bytes", self.bytes);
        }
        self.state = SessionState::Idle;
        self.outstanding = 0;
    }

    /// Send until the stack pushes back or the run finishes
    pub fn pump<N: Notifier>(&mut self, now: Instant, notifier: &mut N) {
        loop {
            match self.state {
                SessionState::Idle => return,
                SessionState::Running => {
                    let elapsed = now.saturating_duration_since(self.start);
                    let chunk = (self.target - self.bytes).min(self.payload_len as u32);
                    if chunk == 0 || elapsed > self.limit {
                        self.state = SessionState::Finishing;
                        continue;
                    }

                    let index = self.index.wrapping_add(1);
                    let bytes = self.bytes + chunk;
                    let millis = time::millis_between(now, self.start);
                    let average = Rate::measure(bytes, millis);
                    let current = self.sample_rate(now, bytes);

                    let mut packet = [0u8; MAX_NOTIFICATION_PAYLOAD];
                    self.write_telemetry(&mut packet, index, millis, bytes, current, average);

                    match notifier.notify(Characteristic::Test, &packet[..chunk as usize]) {
                        Ok(()) => {
                            self.index = index;
                            self.bytes = bytes;
                            self.average_rate = average;
                            if time::millis_between(now, self.sample_at) > 0 {
                                self.current_rate = current;
                                self.sample_at = now;
                                self.sample_bytes = bytes;
                            }
                            self.outstanding = self.outstanding.saturating_add(1);
                        }
                        Err(NotifyError::Resources) => {
                            trace!("THROUGHPUT: queue full at index {}", index);
                            return;
                        }
                        Err(e) => {
                            warn!("THROUGHPUT: notify failed: {:?}", e);
                            return;
                        }
                    }
                }
                SessionState::Finishing => {
                    let millis = time::millis_between(now, self.start);
                    let mut packet = [0u8; TELEMETRY_LEN];
                    self.write_telemetry(&mut packet, self.index, millis, self.bytes, Rate::ZERO, self.average_rate);

                    match notifier.notify(Characteristic::Test, &packet) {
                        Ok(()) => {
                            info!(
                                "THROUGHPUT: finished, {} bytes in {} ms ({}.{} B/ms)",
                                self.bytes,
                                millis,
                                self.average_rate.integer(),
                                self.average_rate.fraction()
                            );
                            self.outstanding = self.outstanding.saturating_add(1);
                            self.state = SessionState::Idle;
                        }
                        Err(NotifyError::Resources) => {}
                        Err(e) => warn!("THROUGHPUT: summary failed: {:?}", e),
                    }
                    return;
                }
            }
        }
    }

    /// Rate since the previous sample; unchanged if no time has passed
    fn sample_rate(&self, now: Instant, bytes: u32) -> Rate {
        let millis = time::millis_between(now, self.sample_at);
        if millis == 0 {
            self.current_rate
        } else {
            Rate::measure(bytes - self.sample_bytes, millis)
        }
    }

    /// `[type][state][index:2][elapsed_ms:4][bytes:4][cur int][cur frac][avg int][avg frac][min][max]`
    fn write_telemetry(&self, out: &mut [u8], index: u16, millis: u32, bytes: u32, current: Rate, average: Rate) {
        out[0] = self.kind as u8;
        out[1] = self.state as u8;
        out[2..4].copy_from_slice(&index.to_be_bytes());
        out[4..8].copy_from_slice(&millis.to_be_bytes());
        out[8..12].copy_from_slice(&bytes.to_be_bytes());
        out[12] = current.integer();
        out[13] = current.fraction();
        out[14] = average.integer();
        out[15] = average.fraction();
        // Packets per connection interval are not reported by the stack
        out[16] = 0;
        out[17] = 0;
    }
}
