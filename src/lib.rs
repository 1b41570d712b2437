//! Reliable datagram link layer for RFM9x FSK and LoRa radios.
//!
//! Frames carry the RadioHead 4-byte header (to, from, id, flags) behind
//! the length byte the Semtech FSK packet handler expects, with an
//! optional 16-bit BSD checksum trailer. On top of single frames the
//! engine provides stop-and-wait delivery with retries and duplicate
//! suppression, multi-packet message reassembly, and a command/response
//! session between a ground station and a satellite.
//!
//! The chip itself is consumed through the narrow [`Transceiver`]
//! capability set; ticks and yield points come from a [`Scheduler`]. Both
//! are supplied at construction, so the engine is a plain value with
//! exclusive ownership of its device handle and peer state.

#![no_std]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod beacon;
pub mod checksum;
pub mod error;
pub mod frame;
pub mod message;
pub mod params;
pub mod session;
pub mod transport;
#[cfg(test)]
mod testutil;

use alloc::vec::Vec;

use rand::{Rng, SeedableRng, rngs::SmallRng};

pub use crate::{
    error::{Cancelled, Error},
    frame::{BROADCAST_ADDRESS, FLAGS_ACK, FLAGS_RETRY, FrameHeader, Protocol},
    params::{LinkTiming, RadioParams},
    transport::{NoSwitch, RadioMode, RxTxSwitch, Scheduler, Transceiver, UtcClock},
};
use crate::transport::ticks_diff;

/// Covers the LoRa FIFO; the FSK packet handler never fills this.
const FIFO_BUF_LEN: usize = 256;

/// Per-send header overrides. Unset fields fall back to the engine's
/// current attributes; overrides never mutate engine state.
#[derive(Clone, Copy, Default)]
pub struct TxHeader {
    pub destination: Option<u8>,
    pub node: Option<u8>,
    pub identifier: Option<u8>,
    pub flags: Option<u8>,
}

/// Options for [`Radio::receive`].
#[derive(Clone, Copy)]
pub struct RxOptions {
    /// Re-enter listen after the call instead of falling back to idle.
    pub keep_listening: bool,
    /// Acknowledge valid unicast frames (reliable datagram mode).
    pub with_ack: bool,
    /// Polling deadline in seconds; engine default when `None`.
    pub timeout_s: Option<f32>,
}

impl Default for RxOptions {
    fn default() -> Self {
        Self {
            keep_listening: true,
            with_ack: false,
            timeout_s: None,
        }
    }
}

/// A frame that passed structure, checksum and address checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

/// The reliable datagram engine: one per link end, owning the transmit
/// device, an optional separate receive device (dual-radio ground
/// stations), the optional antenna switch, and all peer state.
///
/// All long-running operations poll device flags against a tick deadline
/// and yield to the scheduler on every iteration; there is no preemption
/// and no other task may touch the devices.
pub struct Radio<D: Transceiver, S: RxTxSwitch, C: Scheduler> {
    protocol: Protocol,
    tx_device: D,
    rx_device: Option<D>,
    switch: Option<S>,
    scheduler: C,
    rng: SmallRng,

    /// Address of this node. 0xFF accepts every frame.
    pub node: u8,
    /// Default destination for transmissions. 0xFF broadcasts.
    pub destination: u8,
    /// Third header byte; set to the sequence number by
    /// [`send_with_ack`](Self::send_with_ack).
    identifier: u8,
    /// Fourth header byte. The upper nibble belongs to the reliable
    /// datagram protocol; the lower bits pass through untouched.
    pub flags: u8,
    /// Append/verify the BSD checksum trailer.
    pub checksum: bool,
    pub timing: LinkTiming,

    sequence_number: u8,
    /// Last accepted frame id per source address, for retry suppression.
    seen_ids: [u8; 256],

    pub checksum_error_count: u32,
    pub crc_error_count: u32,
    /// RSSI of the last received packet, captured at reception; the
    /// instantaneous value drifts once the mode changes.
    pub last_rssi: f32,
    /// SNR of the last received packet (LoRa only).
    pub last_snr: f32,
}

impl<D: Transceiver, C: Scheduler> Radio<D, NoSwitch, C> {
    pub fn new(
        protocol: Protocol,
        tx_device: D,
        scheduler: C,
        checksum: bool,
        rng_seed: u64,
    ) -> Self {
        Self {
            protocol,
            tx_device,
            rx_device: None,
            switch: None,
            scheduler,
            rng: SmallRng::seed_from_u64(rng_seed),
            node: BROADCAST_ADDRESS,
            destination: BROADCAST_ADDRESS,
            identifier: 0,
            flags: 0,
            checksum,
            timing: LinkTiming::default(),
            sequence_number: 0,
            seen_ids: [0; 256],
            checksum_error_count: 0,
            crc_error_count: 0,
            last_rssi: 0.0,
            last_snr: 0.0,
        }
    }
}

impl<D: Transceiver, S: RxTxSwitch, C: Scheduler> Radio<D, S, C> {
    /// Receive through a second device, leaving the first transmit-only.
    pub fn with_rx_device(mut self, rx_device: D) -> Self {
        self.rx_device = Some(rx_device);
        self
    }

    /// Drive an external RX/TX switch in lockstep with the device mode.
    pub fn with_switch<S2: RxTxSwitch>(self, switch: S2) -> Radio<D, S2, C> {
        Radio {
            protocol: self.protocol,
            tx_device: self.tx_device,
            rx_device: self.rx_device,
            switch: Some(switch),
            scheduler: self.scheduler,
            rng: self.rng,
            node: self.node,
            destination: self.destination,
            identifier: self.identifier,
            flags: self.flags,
            checksum: self.checksum,
            timing: self.timing,
            sequence_number: self.sequence_number,
            seen_ids: self.seen_ids,
            checksum_error_count: self.checksum_error_count,
            crc_error_count: self.crc_error_count,
            last_rssi: self.last_rssi,
            last_snr: self.last_snr,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Push validated parameters to the device(s). Only call while no
    /// send or receive is in progress.
    pub fn configure(&mut self, params: &RadioParams) -> Result<(), Error> {
        apply_params(&mut self.tx_device, params)?;
        if let Some(rx) = &mut self.rx_device {
            apply_params(rx, params)?;
        }
        Ok(())
    }

    /// Enter listen on the receive device, idling the transmit device
    /// when they are separate.
    pub fn listen(&mut self) -> Result<(), Error> {
        if let Some(rx) = &mut self.rx_device {
            self.tx_device.set_mode(RadioMode::Idle)?;
            rx.set_mode(RadioMode::Listen)?;
        } else {
            self.tx_device.set_mode(RadioMode::Listen)?;
        }
        if let Some(switch) = &mut self.switch {
            switch.receive();
        }
        Ok(())
    }

    /// Idle both devices.
    pub fn idle(&mut self) -> Result<(), Error> {
        self.tx_device.set_mode(RadioMode::Idle)?;
        if let Some(rx) = &mut self.rx_device {
            rx.set_mode(RadioMode::Idle)?;
        }
        if let Some(switch) = &mut self.switch {
            switch.idle();
        }
        Ok(())
    }

    /// Enter transmit, idling the receive device when separate.
    pub fn transmit(&mut self) -> Result<(), Error> {
        if let Some(rx) = &mut self.rx_device {
            rx.set_mode(RadioMode::Idle)?;
        }
        self.tx_device.set_mode(RadioMode::Transmit)?;
        if let Some(switch) = &mut self.switch {
            switch.transmit();
        }
        Ok(())
    }

    /// Transmit one frame with the engine's current header attributes.
    /// Blocks (yielding) until the hardware reports completion or
    /// `xmit_timeout` elapses.
    pub fn send(&mut self, data: &[u8], keep_listening: bool) -> Result<(), Error> {
        self.send_with(data, keep_listening, &TxHeader::default())
    }

    /// [`send`](Self::send) with per-call header overrides.
    pub fn send_with(
        &mut self,
        data: &[u8],
        keep_listening: bool,
        hdr: &TxHeader,
    ) -> Result<(), Error> {
        let header = FrameHeader {
            to: hdr.destination.unwrap_or(self.destination),
            from: hdr.node.unwrap_or(self.node),
            id: hdr.identifier.unwrap_or(self.identifier),
            flags: hdr.flags.unwrap_or(self.flags),
        };

        // Stop receiving, keeping the FIFO clear for the outbound frame.
        self.idle()?;
        let frame = frame::encode(self.protocol, header, data, self.checksum)?;
        log::trace!("sending {:02x?}", &frame[..]);
        self.tx_device.write_fifo(&frame)?;
        self.transmit()?;

        let deadline_ms = (self.timing.xmit_timeout * 1000.0) as i32;
        let start = self.scheduler.ticks_ms();
        let mut timed_out = false;
        while !self.tx_device.tx_done() {
            let now = self.scheduler.ticks_ms();
            if ticks_diff(now, start) >= deadline_ms {
                timed_out = true;
                break;
            }
            self.scheduler.yield_now()?;
        }

        if keep_listening {
            self.listen()?;
        } else {
            self.idle()?;
        }

        if timed_out {
            log::debug!("tx timed out");
            Err(Error::TxTimeout)
        } else {
            Ok(())
        }
    }

    /// Poll for one frame. Returns `Ok(None)` when the deadline elapses
    /// with nothing valid received. Frames failing the checksum, the
    /// address filter or duplicate suppression are dropped and listening
    /// continues within the same deadline.
    pub fn receive(&mut self, opts: &RxOptions) -> Result<Option<ReceivedFrame>, Error> {
        let timeout_s = opts.timeout_s.unwrap_or(self.timing.receive_timeout);
        let deadline_ms = (timeout_s * 1000.0) as i32;
        let start = self.scheduler.ticks_ms();

        self.listen()?;
        let mut result = None;
        loop {
            if self.rx_device_mut().rx_done() {
                let rssi = self.rx_device_mut().rssi();
                self.last_rssi = rssi;
                if let Protocol::Lora = self.protocol {
                    let snr = self.rx_device_mut().snr();
                    self.last_snr = snr;
                }
                // Idle to stop receiving while the FIFO is drained.
                self.idle()?;
                match self.process_frame(opts.with_ack) {
                    Ok(received) => {
                        result = Some(received);
                        break;
                    }
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        log::debug!("dropping frame: {:?}", e);
                        self.listen()?;
                    }
                }
            }

            let now = self.scheduler.ticks_ms();
            if ticks_diff(now, start) >= deadline_ms {
                log::trace!("rx timed out");
                break;
            }
            self.scheduler.yield_now()?;
        }

        if opts.keep_listening {
            self.listen()?;
        } else {
            self.idle()?;
        }
        Ok(result)
    }

    /// Reliable datagram mode: transmit and wait for the matching ACK,
    /// retrying with a random backoff and the RETRY flag set. A broadcast
    /// destination succeeds after a single send.
    pub fn send_with_ack(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut retries_remaining = self.timing.ack_retries.max(1);
        let mut got_ack = false;

        self.sequence_number = self.sequence_number.wrapping_add(1);
        while !got_ack && retries_remaining > 0 {
            self.identifier = self.sequence_number;
            self.send(data, true)?;

            if self.destination == BROADCAST_ADDRESS {
                // No one ACKs a broadcast.
                got_ack = true;
            } else {
                let opts = RxOptions {
                    keep_listening: true,
                    with_ack: false,
                    timeout_s: Some(self.timing.ack_wait),
                };
                if let Some(ack) = self.receive(&opts)? {
                    if ack.header.is_ack() && ack.header.id == self.identifier {
                        got_ack = true;
                        break;
                    }
                    log::debug!("invalid ack: {:?}", ack.header);
                }
            }

            if !got_ack {
                // Desynchronize from the peer before the next attempt.
                let backoff = self.rng.gen_range(0.0f32..1.0) * self.timing.ack_wait;
                self.sleep_s(backoff)?;
                log::debug!("no ack; retries remaining: {}", retries_remaining - 1);
            }
            retries_remaining -= 1;
            self.flags |= FLAGS_RETRY;
        }
        self.flags = 0;

        if got_ack { Ok(()) } else { Err(Error::AckMissing) }
    }

    /// Yield until `seconds` have elapsed on the scheduler's clock.
    fn sleep_s(&mut self, seconds: f32) -> Result<(), Error> {
        let duration_ms = (seconds * 1000.0) as i32;
        let start = self.scheduler.ticks_ms();
        loop {
            let now = self.scheduler.ticks_ms();
            if ticks_diff(now, start) >= duration_ms {
                return Ok(());
            }
            self.scheduler.yield_now()?;
        }
    }

    fn rx_device_mut(&mut self) -> &mut D {
        match &mut self.rx_device {
            Some(rx) => rx,
            None => &mut self.tx_device,
        }
    }

    /// Drain and validate the frame waiting in the FIFO. Errors classify
    /// the drop reasons; the receive loop logs them and keeps listening.
    fn process_frame(&mut self, with_ack: bool) -> Result<ReceivedFrame, Error> {
        if let Protocol::Lora = self.protocol {
            if self.rx_device_mut().crc_error() {
                self.crc_error_count += 1;
                return Err(Error::ChecksumMismatch);
            }
        }

        let mut buf = [0u8; FIFO_BUF_LEN];
        let len = self.rx_device_mut().read_until_fifo_empty(&mut buf)?;

        let (header, payload) = match frame::decode(self.protocol, &buf[..len], self.checksum) {
            Ok(decoded) => decoded,
            Err(Error::ChecksumMismatch) => {
                self.checksum_error_count += 1;
                return Err(Error::ChecksumMismatch);
            }
            Err(e) => return Err(e),
        };

        if self.node != BROADCAST_ADDRESS
            && header.to != BROADCAST_ADDRESS
            && header.to != self.node
        {
            return Err(Error::AddressFiltered);
        }
        let payload = payload.to_vec();

        // Acknowledge unless the frame is itself an ACK or a broadcast.
        if with_ack && !header.is_ack() && !header.is_broadcast() {
            if let Some(delay) = self.timing.ack_delay {
                // Give the sender a chance to turn its receiver around.
                self.sleep_s(delay)?;
            }
            log::trace!("sending ACK for id {}", header.id);
            let ack = TxHeader {
                destination: Some(header.from),
                node: Some(header.to),
                identifier: Some(header.id),
                flags: Some(header.flags | FLAGS_ACK),
            };
            self.send_with(b"!", false, &ack)?;

            // The ACK for the original may have been lost; the peer
            // resends with RETRY and we re-ACK without redelivering.
            if self.seen_ids[header.from as usize] == header.id && header.is_retry() {
                return Err(Error::DuplicateFragment);
            }
            self.seen_ids[header.from as usize] = header.id;
        }

        Ok(ReceivedFrame { header, payload })
    }
}

fn apply_params<D: Transceiver>(device: &mut D, params: &RadioParams) -> Result<(), Error> {
    device.set_frequency_mhz(params.frequency_mhz)?;
    device.set_bitrate(params.bitrate)?;
    device.set_frequency_deviation(params.frequency_deviation)?;
    device.set_rx_bandwidth_khz(params.rx_bandwidth_khz)?;
    device.set_preamble_length(params.preamble_length)?;
    device.set_tx_power(params.tx_power_dbm)?;
    device.set_lna_gain(params.lna_gain)?;
    device.set_afc_enable(params.afc_enable)
}
