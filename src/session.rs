//! Ground-to-satellite command session: typed command codes behind a
//! fixed tag prefix, delivered reliably, with the response multiplexed by
//! opcode.
//!
//! A command payload is `COMMAND opcode ∥ tag ∥ command code ∥ args`.
//! Path pairs travel as a JSON array; Unix time as a little-endian signed
//! 32-bit integer.

use alloc::vec::Vec;

use crate::{
    Radio,
    beacon::Beacon,
    error::Error,
    message::{self, Message, Opcode},
    transport::{RxTxSwitch, Scheduler, Transceiver, UtcClock},
};

/// Fixed byte tag prefixed to every command payload. Receivers reject
/// commands without it. A filter against stray frames, not authentication.
pub const COMMAND_TAG: [u8; 4] = *b"p\xba\xb8C";

/// Consecutive empty polls tolerated while waiting for a response.
pub const DEFAULT_MAX_RX_FAILS: u32 = 10;

/// Satellite upload staging file; MOVE_FILE relocates it afterwards.
#[cfg(feature = "std")]
pub const UPLOAD_STAGING_PATH: &str = "/sd/disk_buffered_message";

/// The command registry shared by both ends of the link.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    NoOp = 0x00,
    HardReset = 0x01,
    Query = 0x02,
    RequestFile = 0x05,
    ListDir = 0x06,
    MoveFile = 0x08,
    DeleteFile = 0x09,
    RequestBeacon = 0x0B,
    GetRtcUtime = 0x0C,
    SetRtcUtime = 0x0D,
}

impl Command {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Self::NoOp,
            0x01 => Self::HardReset,
            0x02 => Self::Query,
            0x05 => Self::RequestFile,
            0x06 => Self::ListDir,
            0x08 => Self::MoveFile,
            0x09 => Self::DeleteFile,
            0x0B => Self::RequestBeacon,
            0x0C => Self::GetRtcUtime,
            0x0D => Self::SetRtcUtime,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::NoOp => "NO_OP",
            Self::HardReset => "HARD_RESET",
            Self::Query => "QUERY",
            Self::RequestFile => "REQUEST_FILE",
            Self::ListDir => "LIST_DIR",
            Self::MoveFile => "MOVE_FILE",
            Self::DeleteFile => "DELETE_FILE",
            Self::RequestBeacon => "REQUEST_BEACON",
            Self::GetRtcUtime => "GET_RTC_UTIME",
            Self::SetRtcUtime => "SET_RTC_UTIME",
        }
    }

    /// Does the satellite answer with a message after the ACK?
    pub const fn will_respond(self) -> bool {
        !matches!(self, Self::NoOp | Self::HardReset | Self::SetRtcUtime)
    }

    pub const fn has_args(self) -> bool {
        matches!(
            self,
            Self::Query
                | Self::RequestFile
                | Self::ListDir
                | Self::MoveFile
                | Self::DeleteFile
                | Self::SetRtcUtime
        )
    }
}

/// Deliver one command reliably and, for commands that respond, wait for
/// the (possibly multi-fragment) answer. `Ok(None)` means the command was
/// ACKed and no response was expected.
pub fn send_command<D, S, C>(
    radio: &mut Radio<D, S, C>,
    command: Command,
    args: &[u8],
    max_rx_fails: u32,
) -> Result<Option<Message>, Error>
where
    D: Transceiver,
    S: RxTxSwitch,
    C: Scheduler,
{
    let mut payload = Vec::with_capacity(2 + COMMAND_TAG.len() + args.len());
    payload.push(Opcode::Command as u8);
    payload.extend_from_slice(&COMMAND_TAG);
    payload.push(command.code());
    payload.extend_from_slice(args);

    radio.send_with_ack(&payload)?;
    log::debug!("{} delivered", command.name());

    if !command.will_respond() {
        return Ok(None);
    }
    let response = message::wait_for_message(radio, max_rx_fails)?;
    Ok(Some(response))
}

/// Relocate a file on the satellite. True when the response reports
/// success (the satellite answers in prose; match it case-insensitively).
pub fn move_file<D, S, C>(
    radio: &mut Radio<D, S, C>,
    source_path: &str,
    destination_path: &str,
) -> Result<bool, Error>
where
    D: Transceiver,
    S: RxTxSwitch,
    C: Scheduler,
{
    let args = serde_json::to_vec(&[source_path, destination_path]).map_err(|_| Error::Json)?;
    let response = send_command(radio, Command::MoveFile, &args, DEFAULT_MAX_RX_FAILS)?;
    Ok(response.is_some_and(|m| contains_ignore_case(&m.payload, b"success")))
}

/// Fetch a file's contents. The satellite streams them disk-buffered; a
/// plain DEFAULT response means it could not open the path.
pub fn request_file<D, S, C>(radio: &mut Radio<D, S, C>, path: &str) -> Result<Message, Error>
where
    D: Transceiver,
    S: RxTxSwitch,
    C: Scheduler,
{
    let response = send_command(radio, Command::RequestFile, path.as_bytes(), DEFAULT_MAX_RX_FAILS)?
        .ok_or(Error::UnexpectedResponse)?;
    if response.kind() == Some(Opcode::Default) {
        return Err(Error::UnexpectedResponse);
    }
    Ok(response)
}

/// Ask for the current telemetry record.
pub fn request_beacon<D, S, C>(radio: &mut Radio<D, S, C>) -> Result<Beacon, Error>
where
    D: Transceiver,
    S: RxTxSwitch,
    C: Scheduler,
{
    let response = send_command(radio, Command::RequestBeacon, &[], DEFAULT_MAX_RX_FAILS)?
        .ok_or(Error::UnexpectedResponse)?;
    if response.kind() != Some(Opcode::Beacon) {
        return Err(Error::UnexpectedResponse);
    }
    Beacon::decode(&response.payload)
}

/// Set the satellite's real-time clock.
pub fn set_time<D, S, C>(radio: &mut Radio<D, S, C>, unix_time: i32) -> Result<(), Error>
where
    D: Transceiver,
    S: RxTxSwitch,
    C: Scheduler,
{
    send_command(
        radio,
        Command::SetRtcUtime,
        &unix_time.to_le_bytes(),
        DEFAULT_MAX_RX_FAILS,
    )?;
    Ok(())
}

/// [`set_time`] from a wall clock, where the host has one.
pub fn set_time_now<D, S, C, U>(radio: &mut Radio<D, S, C>, clock: &mut U) -> Result<(), Error>
where
    D: Transceiver,
    S: RxTxSwitch,
    C: Scheduler,
    U: UtcClock,
{
    set_time(radio, clock.unix_time() as i32)
}

/// Read the satellite's real-time clock.
pub fn get_time<D, S, C>(radio: &mut Radio<D, S, C>) -> Result<i32, Error>
where
    D: Transceiver,
    S: RxTxSwitch,
    C: Scheduler,
{
    let response = send_command(radio, Command::GetRtcUtime, &[], DEFAULT_MAX_RX_FAILS)?
        .ok_or(Error::UnexpectedResponse)?;
    if response.kind() != Some(Opcode::Default) {
        return Err(Error::UnexpectedResponse);
    }
    match response.payload.as_slice() {
        &[a, b, c, d] => Ok(i32::from_le_bytes([a, b, c, d])),
        _ => Err(Error::UnexpectedResponse),
    }
}

/// Stream a local file up as a disk-buffered message, then MOVE_FILE it
/// from the staging path to its destination.
#[cfg(feature = "std")]
pub fn upload_file<D, S, C>(
    radio: &mut Radio<D, S, C>,
    local_path: &std::path::Path,
    satellite_path: &str,
) -> Result<bool, Error>
where
    D: Transceiver,
    S: RxTxSwitch,
    C: Scheduler,
{
    let mut msg = message::DiskBufferedMessage::new(radio.protocol(), local_path)?;
    message::send_message(radio, &mut msg)?;
    move_file(radio, UPLOAD_STAGING_PATH, satellite_path)
}

fn contains_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}
