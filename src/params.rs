//! Runtime-adjustable radio parameters, their accepted ranges, and the
//! link-timing knobs of the datagram engine.
//!
//! Bounded scalars clamp at the boundary; values that select hardware
//! behaviour (frequency, bitrate, deviation, bandwidth bin) are rejected
//! when out of range.

use crate::error::Error;

/// Accepted carrier frequency range, MHz.
pub const FREQUENCY_RANGE_MHZ: (f32, f32) = (240.0, 960.0);
/// Accepted output power range, dBm (PA_BOOST pin).
pub const TX_POWER_RANGE_DBM: (i8, i8) = (5, 23);
/// Accepted FSK bitrate range, bps.
pub const BITRATE_RANGE_BPS: (u32, u32) = (500, 300_000);
/// Accepted FSK frequency deviation range, Hz.
pub const FREQUENCY_DEVIATION_RANGE_HZ: (u32, u32) = (600, 200_000);
/// Accepted preamble length range, symbols.
pub const PREAMBLE_LENGTH_RANGE: (u32, u32) = (3, 65_536);
/// Accepted ACK delay range, seconds.
pub const ACK_DELAY_RANGE_S: (f32, f32) = (0.0, 10.0);
/// Accepted ACK wait range, seconds.
pub const ACK_WAIT_RANGE_S: (f32, f32) = (0.0, 100.0);
/// LNA gain steps; 1 is maximum gain, 6 minimum.
pub const LNA_GAIN_RANGE: (u8, u8) = (1, 6);

/// Single-sided RX filter bandwidth bins of the FSK packet engine, kHz.
/// The mantissa/exponent register encoding only reaches these points.
pub const RX_BANDWIDTH_BINS_KHZ: [f32; 22] = [
    2.6, 3.1, 3.9, 5.2, 6.3, 7.8, 10.4, 12.5, 15.6, 20.8, 25.0, 31.3, 41.7, 50.0, 62.5, 83.3,
    100.0, 125.0, 166.7, 200.0, 250.0, 500.0,
];

/// Chip-side parameters, validated here before they reach the driver's
/// setters. Changes are live, but only safe while no send or receive is
/// in progress.
#[derive(Clone, Debug)]
pub struct RadioParams {
    pub frequency_mhz: f32,
    pub bitrate: u32,
    pub frequency_deviation: u32,
    pub rx_bandwidth_khz: f32,
    pub preamble_length: u32,
    pub tx_power_dbm: i8,
    pub lna_gain: u8,
    pub afc_enable: bool,
}

impl Default for RadioParams {
    fn default() -> Self {
        Self {
            frequency_mhz: 433.0,
            bitrate: 1200,
            frequency_deviation: 2400,
            rx_bandwidth_khz: 25.0,
            preamble_length: 16,
            tx_power_dbm: 23,
            lna_gain: 1,
            afc_enable: false,
        }
    }
}

impl RadioParams {
    pub fn set_frequency_mhz(&mut self, mhz: f32) -> Result<(), Error> {
        if !(FREQUENCY_RANGE_MHZ.0..=FREQUENCY_RANGE_MHZ.1).contains(&mhz) {
            return Err(Error::Config);
        }
        self.frequency_mhz = mhz;
        Ok(())
    }

    pub fn set_bitrate(&mut self, bps: u32) -> Result<(), Error> {
        if !(BITRATE_RANGE_BPS.0..=BITRATE_RANGE_BPS.1).contains(&bps) {
            return Err(Error::Config);
        }
        self.bitrate = bps;
        Ok(())
    }

    pub fn set_frequency_deviation(&mut self, hz: u32) -> Result<(), Error> {
        if !(FREQUENCY_DEVIATION_RANGE_HZ.0..=FREQUENCY_DEVIATION_RANGE_HZ.1).contains(&hz) {
            return Err(Error::Config);
        }
        self.frequency_deviation = hz;
        Ok(())
    }

    /// Accepts only the exact bin values in [`RX_BANDWIDTH_BINS_KHZ`].
    pub fn set_rx_bandwidth_khz(&mut self, khz: f32) -> Result<(), Error> {
        if !RX_BANDWIDTH_BINS_KHZ.contains(&khz) {
            return Err(Error::Config);
        }
        self.rx_bandwidth_khz = khz;
        Ok(())
    }

    pub fn set_preamble_length(&mut self, symbols: u32) {
        self.preamble_length = symbols.clamp(PREAMBLE_LENGTH_RANGE.0, PREAMBLE_LENGTH_RANGE.1);
    }

    pub fn set_tx_power(&mut self, dbm: i8) {
        self.tx_power_dbm = dbm.clamp(TX_POWER_RANGE_DBM.0, TX_POWER_RANGE_DBM.1);
    }

    pub fn set_lna_gain(&mut self, gain: u8) {
        self.lna_gain = gain.clamp(LNA_GAIN_RANGE.0, LNA_GAIN_RANGE.1);
    }
}

/// Stop-and-wait timing knobs owned by the engine.
#[derive(Clone, Debug)]
pub struct LinkTiming {
    /// Delay before a retry after a missed ACK, and the per-retry ACK
    /// polling deadline. Seconds.
    pub ack_wait: f32,
    /// Deadline for a single receive when the caller gives none. Seconds.
    pub receive_timeout: f32,
    /// How long to wait for the hardware to clock a packet out; guards
    /// against a wedged chip. Seconds.
    pub xmit_timeout: f32,
    /// ACK attempts before reporting a failure.
    pub ack_retries: u8,
    /// Pause before sending an ACK, for receivers slow to turn around.
    /// Try 0.1 or 0.2 if ACKs are being missed.
    pub ack_delay: Option<f32>,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            ack_wait: 0.5,
            receive_timeout: 0.5,
            xmit_timeout: 2.0,
            ack_retries: 5,
            ack_delay: None,
        }
    }
}

impl LinkTiming {
    pub fn set_ack_wait(&mut self, seconds: f32) {
        self.ack_wait = seconds.clamp(ACK_WAIT_RANGE_S.0, ACK_WAIT_RANGE_S.1);
    }

    pub fn set_ack_delay(&mut self, seconds: Option<f32>) {
        self.ack_delay = seconds.map(|s| s.clamp(ACK_DELAY_RANGE_S.0, ACK_DELAY_RANGE_S.1));
    }
}
