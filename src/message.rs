//! Multi-packet messages: splitting large payloads into link-sized
//! fragments and reassembling them on the receiver.
//!
//! A fragment's first payload byte is its opcode: START opens a stream,
//! MID continues it, END closes it and hands the accumulated message to
//! the caller. The memory-buffered family is used when the whole message
//! is materialised in RAM; the disk-buffered family streams a file that
//! may not fit.

use alloc::vec::Vec;

use crate::{
    Radio, RxOptions,
    error::Error,
    frame::Protocol,
    transport::{RxTxSwitch, Scheduler, Transceiver},
};

/// First payload byte of every framed message.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opcode {
    Default = 0x00,
    Beacon = 0x01,
    MemoryBufferedStart = 0x02,
    MemoryBufferedMid = 0x03,
    MemoryBufferedEnd = 0x04,
    DiskBufferedStart = 0x05,
    DiskBufferedMid = 0x06,
    DiskBufferedEnd = 0x07,
    Command = 0x08,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Self::Default,
            0x01 => Self::Beacon,
            0x02 => Self::MemoryBufferedStart,
            0x03 => Self::MemoryBufferedMid,
            0x04 => Self::MemoryBufferedEnd,
            0x05 => Self::DiskBufferedStart,
            0x06 => Self::DiskBufferedMid,
            0x07 => Self::DiskBufferedEnd,
            0x08 => Self::Command,
            _ => return None,
        })
    }
}

/// A complete inbound message. For reassembled streams `opcode` is the
/// START opcode of the family, so callers classify by family rather than
/// by which fragment closed the stream. Unrecognised opcodes pass through
/// verbatim as single-fragment messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn kind(&self) -> Option<Opcode> {
        Opcode::from_byte(self.opcode)
    }
}

/// An outbound message the engine drains one fragment at a time.
///
/// [`ack`](Self::ack) advances to the next fragment and is only called
/// after the current one was delivered; implementations whose fragments
/// are fire-and-forget must advance in [`packet`](Self::packet) instead.
pub trait OutboundMessage {
    /// The next fragment to put on the air, and whether it needs an ACK
    /// round trip.
    fn packet(&mut self) -> Result<(Vec<u8>, bool), Error>;
    fn ack(&mut self);
    fn done(&self) -> bool;
}

/// Number of fragments for `len` bytes of content. Always at least two:
/// a short message is a START carrying the data plus an empty END, so the
/// receiver sees every stream close.
fn fragment_count(len: usize, chunk: usize) -> usize {
    len.div_ceil(chunk).max(2)
}

fn fragment_bounds(cursor: usize, chunk: usize, len: usize) -> (usize, usize) {
    let lo = (cursor * chunk).min(len);
    let hi = (lo + chunk).min(len);
    (lo, hi)
}

/// A message materialised in RAM, sent as `MEMORY_BUFFERED_*` fragments,
/// each delivered reliably.
pub struct MemoryBufferedMessage {
    data: Vec<u8>,
    chunk: usize,
    cursor: usize,
    fragments: usize,
}

impl MemoryBufferedMessage {
    pub fn new(protocol: Protocol, data: Vec<u8>) -> Self {
        // One byte of every fragment goes to the opcode.
        let chunk = protocol.max_payload() - 1;
        let fragments = fragment_count(data.len(), chunk);
        Self {
            data,
            chunk,
            cursor: 0,
            fragments,
        }
    }

    fn opcode(&self) -> Opcode {
        if self.cursor == 0 {
            Opcode::MemoryBufferedStart
        } else if self.cursor == self.fragments - 1 {
            Opcode::MemoryBufferedEnd
        } else {
            Opcode::MemoryBufferedMid
        }
    }
}

impl OutboundMessage for MemoryBufferedMessage {
    fn packet(&mut self) -> Result<(Vec<u8>, bool), Error> {
        let (lo, hi) = fragment_bounds(self.cursor, self.chunk, self.data.len());
        let mut out = Vec::with_capacity(1 + hi - lo);
        out.push(self.opcode() as u8);
        out.extend_from_slice(&self.data[lo..hi]);
        Ok((out, true))
    }

    fn ack(&mut self) {
        self.cursor += 1;
    }

    fn done(&self) -> bool {
        self.cursor >= self.fragments
    }
}

/// A file streamed from disk as `DISK_BUFFERED_*` fragments; only one
/// fragment is ever resident.
#[cfg(feature = "std")]
pub struct DiskBufferedMessage {
    file: std::fs::File,
    len: u64,
    chunk: usize,
    cursor: usize,
    fragments: usize,
}

#[cfg(feature = "std")]
impl DiskBufferedMessage {
    pub fn new(protocol: Protocol, path: &std::path::Path) -> Result<Self, Error> {
        let file = std::fs::File::open(path).map_err(|_| Error::Io)?;
        let len = file.metadata().map_err(|_| Error::Io)?.len();
        let chunk = protocol.max_payload() - 1;
        let fragments = fragment_count(len as usize, chunk);
        Ok(Self {
            file,
            len,
            chunk,
            cursor: 0,
            fragments,
        })
    }

    fn opcode(&self) -> Opcode {
        if self.cursor == 0 {
            Opcode::DiskBufferedStart
        } else if self.cursor == self.fragments - 1 {
            Opcode::DiskBufferedEnd
        } else {
            Opcode::DiskBufferedMid
        }
    }
}

#[cfg(feature = "std")]
impl OutboundMessage for DiskBufferedMessage {
    fn packet(&mut self) -> Result<(Vec<u8>, bool), Error> {
        use std::io::{Read, Seek, SeekFrom};

        let (lo, hi) = fragment_bounds(self.cursor, self.chunk, self.len as usize);
        let mut out = Vec::with_capacity(1 + hi - lo);
        out.push(self.opcode() as u8);
        if hi > lo {
            // Re-seek every time: a retry re-reads the same fragment.
            self.file
                .seek(SeekFrom::Start(lo as u64))
                .map_err(|_| Error::Io)?;
            let mut buf = alloc::vec![0u8; hi - lo];
            self.file.read_exact(&mut buf).map_err(|_| Error::Io)?;
            out.extend_from_slice(&buf);
        }
        Ok((out, true))
    }

    fn ack(&mut self) {
        self.cursor += 1;
    }

    fn done(&self) -> bool {
        self.cursor >= self.fragments
    }
}

/// Drain an outbound message fragment by fragment, aborting on the first
/// fragment that exhausts its ACK retries.
pub fn send_message<D, S, C, M>(radio: &mut Radio<D, S, C>, msg: &mut M) -> Result<(), Error>
where
    D: Transceiver,
    S: RxTxSwitch,
    C: Scheduler,
    M: OutboundMessage,
{
    loop {
        let (packet, with_ack) = msg.packet()?;
        if with_ack {
            radio.send_with_ack(&packet)?;
            msg.ack();
        } else {
            radio.send(&packet, true)?;
        }
        if msg.done() {
            return Ok(());
        }
    }
}

/// One inbound fragment stream. The duplicate rule compares only against
/// the immediately previous fragment payload, so a legitimate repeat of
/// the preceding fragment's exact bytes is silently dropped; the opcode
/// stream carries no fragment sequence number to tell the cases apart.
#[derive(Default)]
struct StreamState {
    accum: Vec<u8>,
    last: Vec<u8>,
}

impl StreamState {
    fn start(&mut self, payload: &[u8]) {
        self.accum = payload.to_vec();
        self.last = payload.to_vec();
    }

    fn push(&mut self, payload: &[u8]) {
        if payload != &self.last[..] {
            self.accum.extend_from_slice(payload);
            self.last = payload.to_vec();
        } else {
            // Retransmission of the previous fragment.
            log::debug!("repeated fragment payload ({} bytes)", payload.len());
        }
    }
}

/// Receive until a complete message lands: an atomic DEFAULT/BEACON
/// frame, a closed buffered stream, or an unrecognised opcode returned
/// verbatim. Fragments are acknowledged as they arrive. Gives up after
/// `max_rx_fails` consecutive empty polls.
pub fn wait_for_message<D, S, C>(
    radio: &mut Radio<D, S, C>,
    max_rx_fails: u32,
) -> Result<Message, Error>
where
    D: Transceiver,
    S: RxTxSwitch,
    C: Scheduler,
{
    let mut memory = StreamState::default();
    let mut disk = StreamState::default();

    let mut rx_fails = 0;
    loop {
        let opts = RxOptions {
            keep_listening: true,
            with_ack: true,
            timeout_s: None,
        };
        let received = match radio.receive(&opts)? {
            Some(received) => received,
            None => {
                rx_fails += 1;
                if rx_fails > max_rx_fails {
                    log::warn!("giving up on message after {rx_fails} empty polls");
                    return Err(Error::MaxRxFailsExceeded);
                }
                continue;
            }
        };
        rx_fails = 0;

        let opcode = received.payload[0];
        let body = &received.payload[1..];
        match Opcode::from_byte(opcode) {
            Some(Opcode::Default) | Some(Opcode::Beacon) => {
                return Ok(Message {
                    opcode,
                    payload: body.to_vec(),
                });
            }
            Some(Opcode::MemoryBufferedStart) => memory.start(body),
            Some(Opcode::MemoryBufferedMid) => memory.push(body),
            Some(Opcode::MemoryBufferedEnd) => {
                memory.push(body);
                return Ok(Message {
                    opcode: Opcode::MemoryBufferedStart as u8,
                    payload: core::mem::take(&mut memory.accum),
                });
            }
            Some(Opcode::DiskBufferedStart) => disk.start(body),
            Some(Opcode::DiskBufferedMid) => disk.push(body),
            Some(Opcode::DiskBufferedEnd) => {
                disk.push(body);
                return Ok(Message {
                    opcode: Opcode::DiskBufferedStart as u8,
                    payload: core::mem::take(&mut disk.accum),
                });
            }
            _ => {
                log::debug!("unrecognized opcode {opcode:#04x}");
                return Ok(Message {
                    opcode,
                    payload: body.to_vec(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockTransceiver, TestScheduler, ack_frame, data_frame};
    use crate::{BROADCAST_ADDRESS, NoSwitch, frame};
    use alloc::vec;

    const GROUND: u8 = 0x33;
    const SAT: u8 = 0xAB;

    fn ground_radio(device: MockTransceiver) -> Radio<MockTransceiver, NoSwitch, TestScheduler> {
        let mut radio = Radio::new(Protocol::Fsk, device, TestScheduler::new(), true, 99);
        radio.node = GROUND;
        radio.destination = SAT;
        radio
    }

    /// Fragment frame as the satellite would send it.
    fn fragment(id: u8, opcode: Opcode, body: &[u8]) -> Vec<u8> {
        let mut payload = vec![opcode as u8];
        payload.extend_from_slice(body);
        data_frame(Protocol::Fsk, true, GROUND, SAT, id, 0, &payload)
    }

    fn drain(msg: &mut impl OutboundMessage) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        loop {
            let (packet, with_ack) = msg.packet().unwrap();
            assert!(with_ack);
            packets.push(packet);
            msg.ack();
            if msg.done() {
                return packets;
            }
        }
    }

    #[test]
    fn memory_message_fragments_in_order() {
        // 150 bytes over 56-byte chunks: START, MID, END.
        let data: Vec<u8> = (0..150u8).collect();
        let mut msg = MemoryBufferedMessage::new(Protocol::Fsk, data.clone());
        let packets = drain(&mut msg);

        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0][0], Opcode::MemoryBufferedStart as u8);
        assert_eq!(packets[1][0], Opcode::MemoryBufferedMid as u8);
        assert_eq!(packets[2][0], Opcode::MemoryBufferedEnd as u8);

        let rejoined: Vec<u8> = packets.iter().flat_map(|p| p[1..].to_vec()).collect();
        assert_eq!(rejoined, data);
    }

    #[test]
    fn short_message_is_start_plus_empty_end() {
        let mut msg = MemoryBufferedMessage::new(Protocol::Fsk, b"tiny".to_vec());
        let packets = drain(&mut msg);

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0][0], Opcode::MemoryBufferedStart as u8);
        assert_eq!(&packets[0][1..], b"tiny");
        assert_eq!(packets[1], vec![Opcode::MemoryBufferedEnd as u8]);
    }

    #[test]
    fn send_message_delivers_every_fragment_with_ack() {
        let device = MockTransceiver::new().respond_with(|raw| {
            match ack_frame(Protocol::Fsk, true, raw) {
                Some(ack) => vec![ack],
                None => vec![],
            }
        });
        let mut radio = ground_radio(device);

        let data: Vec<u8> = (0..150u8).collect();
        let mut msg = MemoryBufferedMessage::new(Protocol::Fsk, data);
        send_message(&mut radio, &mut msg).unwrap();

        assert_eq!(radio.tx_device.sent.len(), 3);
        let (_, first) = frame::decode(Protocol::Fsk, &radio.tx_device.sent[0], true).unwrap();
        assert_eq!(first[0], Opcode::MemoryBufferedStart as u8);
    }

    #[test]
    fn send_message_aborts_when_a_fragment_is_never_acked() {
        let mut radio = ground_radio(MockTransceiver::new());
        let mut msg = MemoryBufferedMessage::new(Protocol::Fsk, b"doomed".to_vec());
        assert_eq!(send_message(&mut radio, &mut msg), Err(Error::AckMissing));
    }

    #[test]
    fn atomic_frames_return_immediately() {
        let mut device = MockTransceiver::new();
        device.queue(fragment(1, Opcode::Beacon, b"telemetry"));
        let mut radio = ground_radio(device);

        let msg = wait_for_message(&mut radio, 10).unwrap();
        assert_eq!(msg.kind(), Some(Opcode::Beacon));
        assert_eq!(msg.payload, b"telemetry");
    }

    #[test]
    fn buffered_stream_reassembles_and_reports_start_opcode() {
        let mut device = MockTransceiver::new();
        device.queue(fragment(1, Opcode::MemoryBufferedStart, b"alpha "));
        device.queue(fragment(2, Opcode::MemoryBufferedMid, b"beta "));
        device.queue(fragment(3, Opcode::MemoryBufferedEnd, b"gamma"));
        let mut radio = ground_radio(device);

        let msg = wait_for_message(&mut radio, 10).unwrap();
        assert_eq!(msg.kind(), Some(Opcode::MemoryBufferedStart));
        assert_eq!(msg.payload, b"alpha beta gamma");
        // Every fragment was acknowledged.
        assert_eq!(radio.tx_device.sent.len(), 3);
    }

    #[test]
    fn repeated_fragment_is_folded_once() {
        // START(A), MID(B), MID(B), MID(C), END(D) reassembles to ABCD.
        let mut device = MockTransceiver::new();
        device.queue(fragment(1, Opcode::MemoryBufferedStart, b"A"));
        device.queue(fragment(2, Opcode::MemoryBufferedMid, b"B"));
        device.queue(fragment(3, Opcode::MemoryBufferedMid, b"B"));
        device.queue(fragment(4, Opcode::MemoryBufferedMid, b"C"));
        device.queue(fragment(5, Opcode::MemoryBufferedEnd, b"D"));
        let mut radio = ground_radio(device);

        let msg = wait_for_message(&mut radio, 10).unwrap();
        assert_eq!(msg.payload, b"ABCD");
    }

    #[test]
    fn disk_stream_reassembles_independently() {
        let mut device = MockTransceiver::new();
        device.queue(fragment(1, Opcode::DiskBufferedStart, b"file "));
        device.queue(fragment(2, Opcode::DiskBufferedEnd, b"contents"));
        let mut radio = ground_radio(device);

        let msg = wait_for_message(&mut radio, 10).unwrap();
        assert_eq!(msg.kind(), Some(Opcode::DiskBufferedStart));
        assert_eq!(msg.payload, b"file contents");
    }

    #[test]
    fn unknown_opcode_passes_through_verbatim() {
        let mut device = MockTransceiver::new();
        device.queue(fragment(1, Opcode::Command, b"huh"));
        let mut radio = ground_radio(device);

        let msg = wait_for_message(&mut radio, 10).unwrap();
        assert_eq!(msg.opcode, Opcode::Command as u8);
        assert_eq!(msg.payload, b"huh");
    }

    #[test]
    fn max_rx_fails_bounds_the_wait() {
        let mut radio = ground_radio(MockTransceiver::new());
        assert_eq!(
            wait_for_message(&mut radio, 2),
            Err(Error::MaxRxFailsExceeded)
        );
    }

    #[test]
    fn broadcast_fragments_are_accepted_without_acks() {
        let mut device = MockTransceiver::new();
        device.queue(data_frame(
            Protocol::Fsk,
            true,
            BROADCAST_ADDRESS,
            SAT,
            1,
            0,
            &[Opcode::Beacon as u8, 1, 2, 3],
        ));
        let mut radio = ground_radio(device);

        let msg = wait_for_message(&mut radio, 10).unwrap();
        assert_eq!(msg.kind(), Some(Opcode::Beacon));
        assert!(radio.tx_device.sent.is_empty());
    }

    #[cfg(feature = "std")]
    mod disk {
        use super::*;
        use std::io::Write;

        fn temp_path(name: &str) -> std::path::PathBuf {
            let mut path = std::env::temp_dir();
            path.push(alloc::format!("radiohead-test-{}-{name}", std::process::id()));
            path
        }

        #[test]
        fn disk_message_streams_a_file() {
            let path = temp_path("stream.bin");
            let content: Vec<u8> = (0..130u8).collect();
            std::fs::File::create(&path)
                .unwrap()
                .write_all(&content)
                .unwrap();

            let mut msg = DiskBufferedMessage::new(Protocol::Fsk, &path).unwrap();
            let packets = drain(&mut msg);
            std::fs::remove_file(&path).unwrap();

            assert_eq!(packets.len(), 3);
            assert_eq!(packets[0][0], Opcode::DiskBufferedStart as u8);
            assert_eq!(packets[2][0], Opcode::DiskBufferedEnd as u8);
            let rejoined: Vec<u8> = packets.iter().flat_map(|p| p[1..].to_vec()).collect();
            assert_eq!(rejoined, content);
        }

        #[test]
        fn missing_file_is_an_io_error() {
            let path = temp_path("does-not-exist");
            assert!(matches!(
                DiskBufferedMessage::new(Protocol::Fsk, &path),
                Err(Error::Io)
            ));
        }
    }
}
