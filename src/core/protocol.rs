//! Serial Wire Protocol
//!
//! Frames exchanged with the host controller over the UART.
//!
//! - Short frame: `[id][type][length][payload; length][crc_hi][crc_lo]`,
//!   payload up to 242 bytes, CRC-16/ARC over everything before the checksum.
//! - Extended frame: `[id][type][len_lo][len_hi][payload; len]`, payload up to
//!   4800 bytes, no checksum. Assembled from several APP characteristic writes.
//! - Control sequences: the literal bytes `ACK` and `NACK`.

use crc::{Crc, CRC_16_ARC};
use heapless::Vec;

/// Largest payload a short frame may carry
pub const MAX_SHORT_PAYLOAD: usize = 242;

/// id + type + length + 2 checksum bytes
pub const SHORT_OVERHEAD: usize = 5;

/// Largest short frame on the wire
pub const MAX_SHORT_FRAME: usize = MAX_SHORT_PAYLOAD + SHORT_OVERHEAD;

/// Largest payload an extended frame may carry
pub const MAX_EXTENDED_PAYLOAD: usize = 4800;

/// id + type + 16-bit length
pub const EXTENDED_HEADER: usize = 4;

/// Largest extended frame on the wire
pub const MAX_EXTENDED_FRAME: usize = MAX_EXTENDED_PAYLOAD + EXTENDED_HEADER;

/// Frame type used for every frame the bridge originates
pub const FRAME_TYPE_NORMAL: u8 = b'N';

/// Frame type the host uses for its own writes
pub const FRAME_TYPE_WRITE: u8 = b'W';

/// Positive acknowledgement control sequence
pub const ACK: &[u8] = b"ACK";

/// Negative acknowledgement control sequence
pub const NACK: &[u8] = b"NACK";

/// Placeholder id meaning "no message"
pub const NO_MESSAGE: u8 = 0xFE;

/// Payload byte of the boot announcement
pub const BOOT_MODE_MAGIC: u8 = 0x23;

/// Software reset sub-codes
pub const RESET_BLE_MODULE: u8 = 0x01;
pub const RESET_ALL: u8 = 0x02;

static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Message identifiers understood by the bridge
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageId {
    BootMode = 0x00,
    PaLna = 0x01,
    LedStatus = 0x02,
    SetName = 0x03,
    GetVersion = 0x04,
    AdvInterval = 0x05,
    AdvTimeout = 0x06,
    GetConnStatus = 0x07,
    GetBleParams = 0x08,
    SetBleConnParams = 0x20,
    SetBlePhyParams = 0x21,
    SetBleAttSizeParams = 0x22,
    CharBuffer = 0x30,
    CharExtBuffer = 0x41,
    SoftwareReset = 0xFF,
}

impl MessageId {
    /// Convert from raw u8 value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::BootMode),
            0x01 => Some(Self::PaLna),
            0x02 => Some(Self::LedStatus),
            0x03 => Some(Self::SetName),
            0x04 => Some(Self::GetVersion),
            0x05 => Some(Self::AdvInterval),
            0x06 => Some(Self::AdvTimeout),
            0x07 => Some(Self::GetConnStatus),
            0x08 => Some(Self::GetBleParams),
            0x20 => Some(Self::SetBleConnParams),
            0x21 => Some(Self::SetBlePhyParams),
            0x22 => Some(Self::SetBleAttSizeParams),
            0x30 => Some(Self::CharBuffer),
            0x41 => Some(Self::CharExtBuffer),
            0xFF => Some(Self::SoftwareReset),
            _ => None,
        }
    }

    /// Convert to raw u8 value
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Protocol error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// Length field exceeds the frame's capacity
    InvalidLength,
    /// Fewer bytes than the header promises
    Truncated,
    /// Checksum over the frame does not match the trailer
    ChecksumMismatch { expected: u16, received: u16 },
    /// Output buffer too small
    BufferFull,
    /// Extended segment arrived out of sequence
    UnexpectedSegment,
}

/// Decoded short frame
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub id: u8,
    pub kind: u8,
    pub payload: Vec<u8, MAX_SHORT_PAYLOAD>,
}

impl Frame {
    /// Create a normal-type frame
    pub fn new(id: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut frame = Self {
            id,
            kind: FRAME_TYPE_NORMAL,
            payload: Vec::new(),
        };
        frame
            .payload
            .extend_from_slice(payload)
            .map_err(|_| ProtocolError::InvalidLength)?;
        Ok(frame)
    }

    /// Known message id, if any
    pub fn message_id(&self) -> Option<MessageId> {
        MessageId::from_u8(self.id)
    }
}

/// Assembled extended frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedFrame {
    pub id: u8,
    pub kind: u8,
    pub payload: Vec<u8, MAX_EXTENDED_PAYLOAD>,
}

/// CRC-16/ARC: poly 0xA001 (reflected), init 0, no final XOR
pub fn checksum16(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

/// Serialize a short frame into `out`, replacing its contents
pub fn encode_short<const N: usize>(
    id: u8,
    kind: u8,
    payload: &[u8],
    out: &mut Vec<u8, N>,
) -> Result<(), ProtocolError> {
    if payload.len() > MAX_SHORT_PAYLOAD {
        return Err(ProtocolError::InvalidLength);
    }

    out.clear();
    serialization::write_slice(out, &[id, kind, payload.len() as u8])?;
    serialization::write_slice(out, payload)?;
    let crc = checksum16(out);
    serialization::write_u16(out, crc)
}

/// Parse and verify a short frame
///
/// Bytes past the checksum trailer are ignored.
pub fn decode_short(raw: &[u8]) -> Result<Frame, ProtocolError> {
    if raw.len() < SHORT_OVERHEAD {
        return Err(ProtocolError::Truncated);
    }

    let len = raw[2] as usize;
    if len > MAX_SHORT_PAYLOAD {
        return Err(ProtocolError::InvalidLength);
    }
    if raw.len() < len + SHORT_OVERHEAD {
        return Err(ProtocolError::Truncated);
    }

    let body = &raw[..len + 3];
    let expected = checksum16(body);
    let received = u16::from_be_bytes([raw[len + 3], raw[len + 4]]);
    if expected != received {
        return Err(ProtocolError::ChecksumMismatch { expected, received });
    }

    let mut frame = Frame {
        id: raw[0],
        kind: raw[1],
        payload: Vec::new(),
    };
    frame
        .payload
        .extend_from_slice(&raw[3..len + 3])
        .map_err(|_| ProtocolError::InvalidLength)?;
    Ok(frame)
}

/// Serialize an extended frame into `out`, replacing its contents
pub fn encode_extended<const N: usize>(
    id: u8,
    kind: u8,
    payload: &[u8],
    out: &mut Vec<u8, N>,
) -> Result<(), ProtocolError> {
    if payload.len() > MAX_EXTENDED_PAYLOAD {
        return Err(ProtocolError::InvalidLength);
    }

    out.clear();
    serialization::write_slice(out, &[id, kind])?;
    serialization::write_slice(out, &(payload.len() as u16).to_le_bytes())?;
    serialization::write_slice(out, payload)
}

/// What a closed receive window contained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    Ack,
    Nack,
    Frame(&'a [u8]),
    Other,
}

/// Classify the bytes collected during one receive window
pub fn classify(raw: &[u8]) -> Inbound<'_> {
    if raw == ACK {
        Inbound::Ack
    } else if raw == NACK {
        Inbound::Nack
    } else if raw.len() >= SHORT_OVERHEAD
        && (raw[1] == FRAME_TYPE_WRITE || raw[1] == FRAME_TYPE_NORMAL)
    {
        Inbound::Frame(raw)
    } else {
        Inbound::Other
    }
}

/// One extended-buffer write on the APP characteristic:
/// `[0x41][seg_len][total][current][data; seg_len - 2]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub total: u8,
    pub current: u8,
    pub data: &'a [u8],
}

impl<'a> Segment<'a> {
    /// Parse an APP write already known to start with the extended id
    pub fn parse(write: &'a [u8]) -> Result<Self, ProtocolError> {
        if write.len() < 4 {
            return Err(ProtocolError::Truncated);
        }
        let seg_len = write[1] as usize;
        if seg_len < 2 || write.len() != seg_len + 2 {
            return Err(ProtocolError::InvalidLength);
        }
        Ok(Self {
            total: write[2],
            current: write[3],
            data: &write[4..],
        })
    }
}

/// Reassembles extended frames from numbered segments
///
/// Segment 1 always restarts assembly. Later segments must follow in order;
/// a gap or an overflow discards the partial frame.
pub struct ExtendedAssembler {
    frame: ExtendedFrame,
    next: u8,
    complete: bool,
}

impl ExtendedAssembler {
    pub const fn new() -> Self {
        Self {
            frame: ExtendedFrame {
                id: MessageId::CharExtBuffer as u8,
                kind: FRAME_TYPE_NORMAL,
                payload: Vec::new(),
            },
            next: 0,
            complete: false,
        }
    }

    /// Feed one segment; returns the finished frame on the last one
    pub fn push_segment(
        &mut self,
        segment: Segment<'_>,
    ) -> Result<Option<&ExtendedFrame>, ProtocolError> {
        if segment.current == 1 {
            self.reset();
            self.next = 1;
        }

        if self.next == 0 || segment.current != self.next {
            self.reset();
            return Err(ProtocolError::UnexpectedSegment);
        }

        if self.frame.payload.extend_from_slice(segment.data).is_err() {
            self.reset();
            return Err(ProtocolError::BufferFull);
        }

        if segment.current == segment.total {
            self.next = 0;
            self.complete = true;
            Ok(Some(&self.frame))
        } else {
            self.next = segment.current.wrapping_add(1);
            Ok(None)
        }
    }

    /// The last fully assembled frame, until a new assembly starts
    pub fn completed(&self) -> Option<&ExtendedFrame> {
        self.complete.then_some(&self.frame)
    }

    pub fn reset(&mut self) {
        self.frame.payload.clear();
        self.next = 0;
        self.complete = false;
    }
}

impl Default for ExtendedAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper functions for big-endian serialization
pub mod serialization {
    use super::ProtocolError;
    use heapless::Vec;

    pub fn write_u16<const N: usize>(buffer: &mut Vec<u8, N>, value: u16) -> Result<(), ProtocolError> {
        buffer
            .extend_from_slice(&value.to_be_bytes())
            .map_err(|_| ProtocolError::BufferFull)
    }

    pub fn write_slice<const N: usize>(buffer: &mut Vec<u8, N>, data: &[u8]) -> Result<(), ProtocolError> {
        buffer.extend_from_slice(data).map_err(|_| ProtocolError::BufferFull)
    }

    pub fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
        let bytes = data.get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}
