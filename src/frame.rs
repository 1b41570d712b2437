//! On-air frame codec: length byte (FSK), RadioHead 4-byte header,
//! payload, optional BSD checksum trailer.
//!
//! FSK framing opens with a length byte to satisfy the chip's packet
//! handler; in LoRa mode the chip's payload-length register carries the
//! length, so frames start directly at the header.

use alloc::vec::Vec;

use crate::{checksum::bsd_checksum, error::Error};

/// Reserved node address: any receiver accepts it.
pub const BROADCAST_ADDRESS: u8 = 0xFF;
/// Flags bit marking an acknowledgement frame.
pub const FLAGS_ACK: u8 = 0x80;
/// Flags bit marking a retransmitted frame.
pub const FLAGS_RETRY: u8 = 0x40;

/// 64-byte FSK FIFO, minus the length byte, header and checksum trailer.
/// todo: Support longer packets via the unlimited length mode (DS, pg 76).
pub const MAX_PAYLOAD_FSK: usize = 57;
/// LoRa packet-length budget minus the header.
pub const MAX_PAYLOAD_LORA: usize = 252;

const HEADER_LEN: usize = 4;
const CHECKSUM_LEN: usize = 2;

/// The two chip packet modes sharing one link-layer surface.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    Fsk,
    Lora,
}

impl Protocol {
    pub const fn max_payload(self) -> usize {
        match self {
            Self::Fsk => MAX_PAYLOAD_FSK,
            Self::Lora => MAX_PAYLOAD_LORA,
        }
    }

    /// Offset of the first payload byte.
    const fn payload_start(self) -> usize {
        match self {
            Self::Fsk => 1 + HEADER_LEN,
            Self::Lora => HEADER_LEN,
        }
    }
}

/// RadioHead header: destination, source, sequence id, flags.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameHeader {
    pub to: u8,
    pub from: u8,
    pub id: u8,
    pub flags: u8,
}

impl FrameHeader {
    pub const fn is_ack(&self) -> bool {
        self.flags & FLAGS_ACK != 0
    }

    pub const fn is_retry(&self) -> bool {
        self.flags & FLAGS_RETRY != 0
    }

    pub const fn is_broadcast(&self) -> bool {
        self.to == BROADCAST_ADDRESS
    }
}

/// Build the on-air bytes for one frame. With the checksum enabled, the
/// FSK length byte is incremented by 2 before the trailer is computed, so
/// receivers can verify `checksum(frame[..len-2]) == frame[len-2..]`.
pub fn encode(
    protocol: Protocol,
    header: FrameHeader,
    data: &[u8],
    checksum: bool,
) -> Result<Vec<u8>, Error> {
    if data.is_empty() || data.len() > protocol.max_payload() {
        return Err(Error::PayloadSize(data.len()));
    }

    let mut frame = Vec::with_capacity(protocol.payload_start() + data.len() + CHECKSUM_LEN);

    if let Protocol::Fsk = protocol {
        frame.push((HEADER_LEN + data.len()) as u8);
    }
    frame.extend_from_slice(&[header.to, header.from, header.id, header.flags]);
    frame.extend_from_slice(data);

    if checksum {
        if let Protocol::Fsk = protocol {
            frame[0] += CHECKSUM_LEN as u8;
        }
        let trailer = bsd_checksum(&frame);
        frame.extend_from_slice(&trailer);
    }

    Ok(frame)
}

/// Split raw FIFO bytes into header and payload, verifying structure and
/// the checksum trailer. The payload borrows from `raw`.
pub fn decode(
    protocol: Protocol,
    raw: &[u8],
    checksum: bool,
) -> Result<(FrameHeader, &[u8]), Error> {
    // Too small to carry the framing and at least one byte of data.
    let min_len = protocol.payload_start() + 1;
    if raw.len() < min_len {
        return Err(Error::MalformedFrame);
    }

    if let Protocol::Fsk = protocol {
        // The length recorded in the frame must match the bytes we got.
        if raw[0] as usize != raw.len() - 1 {
            return Err(Error::MalformedFrame);
        }
    }

    let body = if checksum {
        let (body, trailer) = raw.split_at(raw.len() - CHECKSUM_LEN);
        if bsd_checksum(body) != trailer {
            return Err(Error::ChecksumMismatch);
        }
        body
    } else {
        raw
    };

    // The trailer strip may have eaten into the header + 1 data byte.
    if body.len() < protocol.payload_start() + 1 {
        return Err(Error::MalformedFrame);
    }

    let hdr_start = protocol.payload_start() - HEADER_LEN;
    let payload = &body[protocol.payload_start()..];

    Ok((
        FrameHeader {
            to: body[hdr_start],
            from: body[hdr_start + 1],
            id: body[hdr_start + 2],
            flags: body[hdr_start + 3],
        },
        payload,
    ))
}
