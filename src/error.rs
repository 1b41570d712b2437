//! Link and session layer errors.

/// Errors reported by the link layer. Checksum, address-filter and
/// duplicate drops are recovered inside the receive loop; the variants
/// exist so the drop reason can be classified and logged. Timeouts on a
/// single receive are not errors (the call returns `None`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// `tx_done` never asserted within the transmit timeout.
    TxTimeout,
    /// No frame arrived within the deadline.
    RxTimeout,
    /// Frame too short, or its length byte disagrees with the bytes read.
    MalformedFrame,
    /// Checksum trailer mismatch. Counted by the engine, then dropped.
    ChecksumMismatch,
    /// Frame addressed to another node.
    AddressFiltered,
    /// Retransmission of a fragment already folded into the reassembly buffer.
    DuplicateFragment,
    /// Unicast send completed but no matching ACK arrived after all retries.
    AckMissing,
    /// Too many consecutive receive timeouts while reassembling a message.
    MaxRxFailsExceeded,
    /// A response arrived with the wrong opcode or an undecodable payload.
    UnexpectedResponse,
    /// Payload does not fit the protocol's FIFO budget.
    PayloadSize(usize),
    /// Parameter outside its accepted range.
    Config,
    /// The transceiver reported a hardware-level failure.
    Device,
    /// Argument serialization failed.
    Json,
    /// Filesystem failure in a disk-buffered message.
    Io,
    /// A cooperative cancellation request arrived at a yield point.
    Cancelled,
}

/// Marker returned through [`Scheduler::yield_now`](crate::Scheduler::yield_now)
/// when an external stop was requested.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cancelled;

impl From<Cancelled> for Error {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}
