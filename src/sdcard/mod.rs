//! The SD/MMC Protocol
//!
//! Implements the SD/MMC protocol in SPI mode on top of a [`Transport`],
//! as a set of state machines that each do one bounded unit of work per
//! call.
//!
//! This is currently optimised for readability and debugability, not
//! performance.

pub mod device;
pub mod negotiate;
pub mod proto;
pub mod read;
pub mod spi;
pub mod status;
pub mod transport;
pub mod write;

use core::task::Poll;
use proto::*;

#[doc(inline)]
pub use device::{CardType, DebugCounters, Device};
#[doc(inline)]
pub use negotiate::Negotiate;
#[doc(inline)]
pub use read::ReadBlock;
#[doc(inline)]
pub use spi::{Clock, SpiTransport};
#[doc(inline)]
pub use status::CardStatus;
#[doc(inline)]
pub use transport::{ClockSpeed, Transport, TransportError};
#[doc(inline)]
pub use write::WriteBlock;

// ****************************************************************************
// Types and Implementations
// ****************************************************************************

/// The outcome of one call to a state machine's `step`.
///
/// `Poll::Pending` means call again later; `Poll::Ready` carries the
/// operation's result code.
pub type StepResult = Poll<Result<(), Error>>;

/// Options for driving the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Options {
    /// How many times negotiation resets the card before giving up.
    pub init_attempts: u8,
    /// How many bytes to clock while waiting for a command response.
    ///
    /// The card has to answer within eight bytes; this is generous.
    pub response_polls: u16,
    /// How many bytes of a block a read moves per step.
    pub read_batch: usize,
    /// How many bytes of a block a write moves per step.
    pub write_batch: usize,
    /// How long to wait at each timed phase.
    pub timeouts: Timeouts,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            init_attempts: 3,
            // About 5 ms at the 400 kHz identification clock.
            response_polls: 256,
            read_batch: 16,
            write_batch: 16,
            timeouts: Timeouts::default(),
        }
    }
}

/// Timeouts, in milliseconds.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Power-up settling time after the 80 wake-up clocks.
    pub settle_ms: u32,
    /// How long to keep sending GO_IDLE_STATE.
    pub go_idle_ms: u32,
    /// How long a v2 card may take to leave the idle state.
    pub v2_ready_ms: u32,
    /// How long a v1 SD or MMC card may take to leave the idle state.
    pub v1_ready_ms: u32,
    /// How long to wait for a data start token.
    pub read_token_ms: u32,
    /// How long a card may stay busy programming a written block.
    pub write_busy_ms: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            settle_ms: 500,
            go_idle_ms: 500,
            v2_ready_ms: 1000,
            v1_ready_ms: 250,
            read_token_ms: 100,
            write_busy_ms: 250,
        }
    }
}

/// The result codes an operation can finish with.
///
/// Success is `Ok(())`.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The card isn't initialised, or negotiation failed
    NoInit,
    /// The card rejected a command, or never sent its data
    Disk,
    /// The request was malformed: a sector past the end of the card, an
    /// empty read window or a short write buffer
    Parameter,
    /// The card was still programming when the write timed out
    Busy,
    /// The card refused the data block
    Reject,
    /// The card didn't answer
    NoResponse,
    /// We got an error from the SPI peripheral or the chip select pin
    Transport(TransportError),
}

impl From<TransportError> for Error {
    fn from(value: TransportError) -> Self {
        Error::Transport(value)
    }
}

/// Select the card and send it a command, returning the R1 response.
///
/// Gives up after `polls` bytes and returns the last byte clocked in, which
/// for a silent card is [`NO_RESPONSE`].
pub(crate) fn card_command<T>(
    transport: &mut T,
    command: u8,
    arg: u32,
    polls: u16,
) -> Result<u8, Error>
where
    T: Transport,
{
    // A gap of one byte with the card deselected, then one selected.
    transport.deassert_select()?;
    transport.read_byte()?;
    transport.assert_select()?;
    transport.read_byte()?;

    for b in command_frame(command, arg) {
        transport.write_byte(b)?;
    }

    let mut response = NO_RESPONSE;
    for _ in 0..polls.max(1) {
        response = transport.read_byte()?;
        if (response & R1_START_MASK) == ERROR_OK {
            break;
        }
    }
    Ok(response)
}

/// Perform an application-specific command.
pub(crate) fn card_acmd<T>(
    transport: &mut T,
    command: u8,
    arg: u32,
    polls: u16,
) -> Result<u8, Error>
where
    T: Transport,
{
    let response = card_command(transport, CMD55, 0, polls)?;
    if response > R1_IDLE_STATE {
        return Ok(response);
    }
    card_command(transport, command, arg, polls)
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
