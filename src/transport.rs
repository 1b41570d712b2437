//! Capabilities the link layer consumes: the transceiver's narrow command
//! surface, the optional RX/TX antenna switch, and the cooperative
//! scheduler that supplies ticks and yield points.
//!
//! Register programming stays in the driver crate behind [`Transceiver`];
//! the engine assumes nothing about register layout.

use crate::error::{Cancelled, Error};

/// Chip operating mode as the engine drives it. Transitions are explicit
/// on entry to send and receive.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioMode {
    Idle,
    Listen,
    Transmit,
}

/// Tick counters wrap modulo 2^29.
pub const TICKS_PERIOD: u32 = 1 << 29;
pub const TICKS_MAX: u32 = TICKS_PERIOD - 1;
pub const TICKS_HALFPERIOD: u32 = TICKS_PERIOD / 2;

/// Signed difference between two tick values; differences above the half
/// period wrap backward.
pub fn ticks_diff(t1: u32, t2: u32) -> i32 {
    let diff = t1.wrapping_sub(t2) & TICKS_MAX;
    (((diff + TICKS_HALFPERIOD) & TICKS_MAX) as i32) - TICKS_HALFPERIOD as i32
}

/// The capability set the engine needs from an RFM9x-class chip, in FSK or
/// LoRa packet mode. One instance per physical device; dual-radio ground
/// stations hand the engine two.
pub trait Transceiver {
    /// Write one encoded frame into the chip FIFO. The chip must be idle.
    fn write_fifo(&mut self, frame: &[u8]) -> Result<(), Error>;

    /// Drain the receive FIFO into `buf`; returns the number of bytes read.
    fn read_until_fifo_empty(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Has the in-flight transmission completed?
    fn tx_done(&mut self) -> bool;

    /// Is a received packet waiting in the FIFO?
    fn rx_done(&mut self) -> bool;

    /// RSSI of the last received packet, in dBm. Read promptly on
    /// reception; the instantaneous value drifts once the mode changes.
    fn rssi(&mut self) -> f32;

    /// SNR of the last received packet, in dB. FSK drivers return 0.
    fn snr(&mut self) -> f32 {
        0.0
    }

    /// Did the chip's own CRC reject the packet in the FIFO? (LoRa packet
    /// engine; FSK drivers return false.)
    fn crc_error(&mut self) -> bool;

    fn set_mode(&mut self, mode: RadioMode) -> Result<(), Error>;

    // Parameter setters. The engine validates values against the accepted
    // ranges in `params` before they reach the driver.
    fn set_frequency_mhz(&mut self, mhz: f32) -> Result<(), Error>;
    fn set_bitrate(&mut self, bps: u32) -> Result<(), Error>;
    fn set_frequency_deviation(&mut self, hz: u32) -> Result<(), Error>;
    fn set_rx_bandwidth_khz(&mut self, khz: f32) -> Result<(), Error>;
    fn set_preamble_length(&mut self, symbols: u32) -> Result<(), Error>;
    fn set_tx_power(&mut self, dbm: i8) -> Result<(), Error>;
    fn set_lna_gain(&mut self, gain: u8) -> Result<(), Error>;
    fn set_afc_enable(&mut self, enable: bool) -> Result<(), Error>;
}

/// External RX/TX antenna switch, driven in lockstep with the device mode.
pub trait RxTxSwitch {
    fn transmit(&mut self);
    fn receive(&mut self);
    fn idle(&mut self);
}

/// For boards with no external switch.
pub struct NoSwitch;

impl RxTxSwitch for NoSwitch {
    fn transmit(&mut self) {}
    fn receive(&mut self) {}
    fn idle(&mut self) {}
}

/// The cooperative runtime: a monotonic millisecond tick source and a
/// yield point. The engine calls [`yield_now`](Self::yield_now) on every
/// polling iteration and inside every sleep, so cancellation requests are
/// honoured at the next yield.
pub trait Scheduler {
    /// Monotonic millisecond counter, wrapping modulo 2^29. Compare values
    /// with [`ticks_diff`].
    fn ticks_ms(&mut self) -> u32;

    /// Hand control to other tasks for one beat.
    fn yield_now(&mut self) -> Result<(), Cancelled>;
}

/// Wall-clock capability, supplied where available. Used by the session
/// layer to default the satellite clock-set command to "now".
pub trait UtcClock {
    /// Seconds since the Unix epoch.
    fn unix_time(&mut self) -> i64;
}

/// Host-side scheduler: ticks from a process-local monotonic clock, yields
/// to the OS.
#[cfg(feature = "std")]
pub struct StdScheduler {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdScheduler {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Scheduler for StdScheduler {
    fn ticks_ms(&mut self) -> u32 {
        (self.start.elapsed().as_millis() as u32) & TICKS_MAX
    }

    fn yield_now(&mut self) -> Result<(), Cancelled> {
        std::thread::yield_now();
        Ok(())
    }
}
