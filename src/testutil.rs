//! Test doubles: a scripted transceiver and a deterministic scheduler.

use alloc::{boxed::Box, collections::VecDeque, vec::Vec};

use crate::{
    error::{Cancelled, Error},
    frame::{self, FLAGS_ACK, FrameHeader, Protocol},
    transport::{RadioMode, Scheduler, TICKS_MAX, Transceiver},
};

/// Called with every frame "put on the air"; whatever it returns lands in
/// the receive queue, emulating the peer end of the link.
type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>>>;

pub struct MockTransceiver {
    pub mode: RadioMode,
    fifo: Vec<u8>,
    /// Every frame transmitted, in order.
    pub sent: Vec<Vec<u8>>,
    inbound: VecDeque<Vec<u8>>,
    responder: Option<Responder>,
    pub rssi: f32,
    pub snr: f32,
    pub crc_err: bool,
    /// Set false to emulate a wedged transmitter.
    pub tx_completes: bool,

    pub frequency_mhz: f32,
    pub tx_power: i8,
}

impl MockTransceiver {
    pub fn new() -> Self {
        Self {
            mode: RadioMode::Idle,
            fifo: Vec::new(),
            sent: Vec::new(),
            inbound: VecDeque::new(),
            responder: None,
            rssi: -60.0,
            snr: 0.0,
            crc_err: false,
            tx_completes: true,
            frequency_mhz: 0.0,
            tx_power: 0,
        }
    }

    pub fn respond_with(mut self, responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + 'static) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Park a frame in the receive queue, as if it arrived off the air.
    pub fn queue(&mut self, frame: Vec<u8>) {
        self.inbound.push_back(frame);
    }
}

impl Transceiver for MockTransceiver {
    fn write_fifo(&mut self, frame: &[u8]) -> Result<(), Error> {
        self.fifo = frame.to_vec();
        Ok(())
    }

    fn read_until_fifo_empty(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.inbound.pop_front() {
            Some(frame) => {
                buf[..frame.len()].copy_from_slice(&frame);
                Ok(frame.len())
            }
            None => Ok(0),
        }
    }

    fn tx_done(&mut self) -> bool {
        self.tx_completes
    }

    fn rx_done(&mut self) -> bool {
        !self.inbound.is_empty()
    }

    fn rssi(&mut self) -> f32 {
        self.rssi
    }

    fn snr(&mut self) -> f32 {
        self.snr
    }

    fn crc_error(&mut self) -> bool {
        self.crc_err
    }

    fn set_mode(&mut self, mode: RadioMode) -> Result<(), Error> {
        if mode == RadioMode::Transmit && !self.fifo.is_empty() {
            let frame = core::mem::take(&mut self.fifo);
            if let Some(responder) = &mut self.responder {
                for reply in responder(&frame) {
                    self.inbound.push_back(reply);
                }
            }
            self.sent.push(frame);
        }
        self.mode = mode;
        Ok(())
    }

    fn set_frequency_mhz(&mut self, mhz: f32) -> Result<(), Error> {
        self.frequency_mhz = mhz;
        Ok(())
    }

    fn set_bitrate(&mut self, _bps: u32) -> Result<(), Error> {
        Ok(())
    }

    fn set_frequency_deviation(&mut self, _hz: u32) -> Result<(), Error> {
        Ok(())
    }

    fn set_rx_bandwidth_khz(&mut self, _khz: f32) -> Result<(), Error> {
        Ok(())
    }

    fn set_preamble_length(&mut self, _symbols: u32) -> Result<(), Error> {
        Ok(())
    }

    fn set_tx_power(&mut self, dbm: i8) -> Result<(), Error> {
        self.tx_power = dbm;
        Ok(())
    }

    fn set_lna_gain(&mut self, _gain: u8) -> Result<(), Error> {
        Ok(())
    }

    fn set_afc_enable(&mut self, _enable: bool) -> Result<(), Error> {
        Ok(())
    }
}

/// Tick source advancing a fixed step per yield, so deadlines elapse after
/// a bounded number of polls.
pub struct TestScheduler {
    pub ticks: u32,
    pub step_ms: u32,
    /// Report cancellation once ticks pass this point.
    pub cancel_at: Option<u32>,
}

impl TestScheduler {
    pub fn new() -> Self {
        Self {
            ticks: 0,
            step_ms: 50,
            cancel_at: None,
        }
    }
}

impl Scheduler for TestScheduler {
    fn ticks_ms(&mut self) -> u32 {
        self.ticks & TICKS_MAX
    }

    fn yield_now(&mut self) -> Result<(), Cancelled> {
        self.ticks = self.ticks.wrapping_add(self.step_ms);
        if let Some(cancel_at) = self.cancel_at {
            if self.ticks >= cancel_at {
                return Err(Cancelled);
            }
        }
        Ok(())
    }
}

/// Encode a data frame as the peer would put it on the air.
pub fn data_frame(
    protocol: Protocol,
    checksum: bool,
    to: u8,
    from: u8,
    id: u8,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    frame::encode(protocol, FrameHeader { to, from, id, flags }, payload, checksum).unwrap()
}

/// The ACK a well-behaved peer sends back for `raw`, or `None` if `raw`
/// is itself an ACK.
pub fn ack_frame(protocol: Protocol, checksum: bool, raw: &[u8]) -> Option<Vec<u8>> {
    let (header, _) = frame::decode(protocol, raw, checksum).ok()?;
    if header.is_ack() {
        return None;
    }
    let ack = FrameHeader {
        to: header.from,
        from: header.to,
        id: header.id,
        flags: header.flags | FLAGS_ACK,
    };
    Some(frame::encode(protocol, ack, b"!", checksum).unwrap())
}
