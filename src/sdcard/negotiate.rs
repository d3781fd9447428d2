//! Card initialisation, one protocol action per step.
//!
//! The sequence is the usual SPI-mode bring-up:
//!
//! 1. 80 clocks with chip select high at the slow clock, then a settling
//!    delay.
//! 2. `GO_IDLE_STATE` until the card reports idle.
//! 3. `SEND_IF_COND`. A card that answers is v2 capable: check the echoed
//!    voltage and pattern, run `ACMD41` with HCS until it leaves idle, then
//!    read the OCR to find out whether it is block addressed.
//! 4. Otherwise it is SD v1 (answers `ACMD41`) or MMC (needs `CMD1`): wait
//!    for it to leave idle, turn CRC checking off and set a 512 byte block
//!    length.
//! 5. Read the CSD to size the card and switch to the fast clock.
//!
//! Any failure in steps 2 to 4 starts the whole thing again, up to
//! [`Options::init_attempts`] times.

use super::{
    card_acmd, card_command, proto::*, CardType, ClockSpeed, DebugCounters, Device, Error,
    Options, StepResult, Transport,
};
use crate::blockdevice::BLOCK_LEN_U32;
use crate::{debug, trace, warn};
use core::task::Poll;

/// Number of dummy bytes sent to wake the card (80 clocks).
const WAKE_BYTES: usize = 10;

/// The command a v1 SD or MMC card is polled with until it leaves idle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum OpCond {
    /// `ACMD41` with no arguments (SD v1).
    App,
    /// `CMD1` (MMC).
    Mmc,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    /// Start the next attempt, or move on once we know the card type.
    Reset,
    /// Waiting for the power-up settle timer.
    Settle,
    /// Sending GO_IDLE_STATE until the card is idle or the window closes.
    GoIdle,
    /// Send SEND_IF_COND.
    CheckInterface,
    /// Collecting the R7 trailer.
    InterfaceTrailer { index: usize, trailer: IfCond },
    /// ACMD41 with HCS until the card is ready.
    WaitReadyV2,
    /// Send READ_OCR.
    ReadOcr,
    /// Collecting the OCR.
    OcrTrailer { index: usize, ocr: Ocr },
    /// Tell SD v1 from MMC.
    ProbeV1,
    /// Polling SEND_OP_COND until the card is ready.
    WaitReadyV1 { kind: CardType, command: OpCond },
    /// Send CRC_ON_OFF(0).
    DisableCrc { kind: CardType },
    /// Send SET_BLOCKLEN(512).
    SetBlockLength { kind: CardType },
    /// Send SEND_CSD.
    ReadCsd,
    /// Waiting for the CSD's data start token.
    CsdToken,
    /// Collecting the CSD and its CRC.
    CsdData { index: usize, csd: [u8; CSD_LEN] },
}

/// The card negotiation state machine.
///
/// Create one per negotiation and call [`Negotiate::step`] until it is
/// ready.
#[derive(Debug)]
pub struct Negotiate {
    state: State,
    options: Options,
    attempts: u8,
    card_type: CardType,
}

impl Negotiate {
    /// Start a negotiation. Nothing is sent until the first step.
    pub fn new(options: Options) -> Negotiate {
        Negotiate {
            state: State::Reset,
            options,
            attempts: 0,
            card_type: CardType::empty(),
        }
    }

    /// Perform one protocol action.
    ///
    /// On success the device is mounted with its card type and last sector
    /// filled in. After the attempt budget is spent the device is left
    /// unmounted and the result is [`Error::NoInit`].
    pub fn step<T>(&mut self, transport: &mut T, device: &mut Device) -> StepResult
    where
        T: Transport,
    {
        let polls = self.options.response_polls;
        let timeouts = self.options.timeouts;
        match self.state {
            State::Reset => {
                if !self.card_type.is_empty() {
                    self.state = State::ReadCsd;
                } else if self.attempts < self.options.init_attempts {
                    self.attempts += 1;
                    trace!("Reset card, attempt {}..", self.attempts);
                    device.mark_card_uninit();
                    transport.deassert_select()?;
                    transport.set_clock(ClockSpeed::Low)?;
                    for _ in 0..WAKE_BYTES {
                        transport.write_byte(0xFF)?;
                    }
                    transport.start_timer(timeouts.settle_ms);
                    self.state = State::Settle;
                } else {
                    warn!("No card found after {} attempts", self.attempts);
                    return self.fail(transport);
                }
            }
            State::Settle => {
                if !transport.timer_running() {
                    transport.start_timer(timeouts.go_idle_ms);
                    self.state = State::GoIdle;
                }
            }
            State::GoIdle => {
                let r = card_command(transport, CMD0, 0, polls)?;
                if r == R1_IDLE_STATE {
                    transport.stop_timer();
                    self.state = State::CheckInterface;
                } else if !transport.timer_running() {
                    warn!("GO_IDLE_STATE got {:x}, giving up on this attempt", r);
                    self.retry(transport);
                }
            }
            State::CheckInterface => {
                let r = card_command(transport, CMD8, IF_COND_ARG, polls)?;
                if r == R1_IDLE_STATE {
                    self.state = State::InterfaceTrailer {
                        index: 0,
                        trailer: IfCond::default(),
                    };
                } else {
                    if (r & R1_ILLEGAL_COMMAND) != 0 {
                        trace!("No SEND_IF_COND, SD v1 or MMC");
                    } else {
                        warn!("SEND_IF_COND got {:x}, trying SD v1 or MMC", r);
                    }
                    self.state = State::ProbeV1;
                }
            }
            State::InterfaceTrailer { index, mut trailer } => {
                trailer.data[index] = transport.read_byte()?;
                if index + 1 < trailer.data.len() {
                    self.state = State::InterfaceTrailer {
                        index: index + 1,
                        trailer,
                    };
                } else if trailer.is_valid() {
                    transport.start_timer(timeouts.v2_ready_ms);
                    self.state = State::WaitReadyV2;
                } else {
                    warn!("Bad SEND_IF_COND echo {:?}", trailer.data);
                    self.retry(transport);
                }
            }
            State::WaitReadyV2 => {
                let r = card_acmd(transport, ACMD41, ACMD41_HCS, polls)?;
                if r == R1_READY_STATE {
                    transport.stop_timer();
                    self.state = State::ReadOcr;
                } else if !transport.timer_running() {
                    warn!("v2 card stuck in idle ({:x})", r);
                    self.retry(transport);
                }
            }
            State::ReadOcr => {
                if card_command(transport, CMD58, 0, polls)? == R1_READY_STATE {
                    self.state = State::OcrTrailer {
                        index: 0,
                        ocr: Ocr::default(),
                    };
                } else {
                    warn!("READ_OCR refused");
                    self.retry(transport);
                }
            }
            State::OcrTrailer { index, mut ocr } => {
                ocr.data[index] = transport.read_byte()?;
                if index + 1 < ocr.data.len() {
                    self.state = State::OcrTrailer {
                        index: index + 1,
                        ocr,
                    };
                } else {
                    trace!("OCR {:x}", ocr.value());
                    self.card_type = if ocr.card_capacity_status() {
                        CardType::SD2 | CardType::BLOCK
                    } else {
                        CardType::SD2
                    };
                    self.state = State::Reset;
                }
            }
            State::ProbeV1 => {
                let r = card_acmd(transport, ACMD41, 0, polls)?;
                let (kind, command) = if r <= R1_IDLE_STATE {
                    (CardType::SD1, OpCond::App)
                } else {
                    (CardType::MMC, OpCond::Mmc)
                };
                transport.start_timer(timeouts.v1_ready_ms);
                self.state = State::WaitReadyV1 { kind, command };
            }
            State::WaitReadyV1 { kind, command } => {
                let r = match command {
                    OpCond::App => card_acmd(transport, ACMD41, 0, polls)?,
                    OpCond::Mmc => card_command(transport, CMD1, 0, polls)?,
                };
                if r == R1_READY_STATE {
                    transport.stop_timer();
                    self.state = State::DisableCrc { kind };
                } else if !transport.timer_running() {
                    warn!("{:?} card stuck in idle ({:x})", kind, r);
                    self.retry(transport);
                }
            }
            State::DisableCrc { kind } => {
                if card_command(transport, CMD59, 0, polls)? == R1_READY_STATE {
                    self.state = State::SetBlockLength { kind };
                } else {
                    warn!("CRC_ON_OFF refused");
                    self.retry(transport);
                }
            }
            State::SetBlockLength { kind } => {
                if card_command(transport, CMD16, BLOCK_LEN_U32, polls)? == R1_READY_STATE {
                    self.card_type = kind;
                    self.state = State::Reset;
                } else {
                    warn!("SET_BLOCKLEN refused");
                    self.retry(transport);
                }
            }
            State::ReadCsd => {
                if card_command(transport, CMD9, 0, polls)? != R1_READY_STATE {
                    warn!("SEND_CSD refused");
                    return self.fail(transport);
                }
                transport.start_timer(timeouts.read_token_ms);
                self.state = State::CsdToken;
            }
            State::CsdToken => {
                let token = transport.read_byte()?;
                if token == DATA_START_BLOCK {
                    transport.stop_timer();
                    self.state = State::CsdData {
                        index: 0,
                        csd: [0; CSD_LEN],
                    };
                } else if token != NO_RESPONSE || !transport.timer_running() {
                    transport.stop_timer();
                    warn!("No CSD ({:x})", token);
                    return self.fail(transport);
                }
            }
            State::CsdData { index, mut csd } => {
                let b = transport.read_byte()?;
                if let Some(slot) = csd.get_mut(index) {
                    *slot = b;
                }
                if index + 1 < CSD_LEN + DATA_CRC_LEN {
                    self.state = State::CsdData {
                        index: index + 1,
                        csd,
                    };
                } else {
                    return self.finish(transport, device, csd);
                }
            }
        }
        Poll::Pending
    }

    /// Give up on this attempt and start the next one.
    fn retry<T>(&mut self, transport: &mut T)
    where
        T: Transport,
    {
        transport.stop_timer();
        self.card_type = CardType::empty();
        self.state = State::Reset;
    }

    /// Size the card from its CSD and mount it.
    fn finish<T>(
        &mut self,
        transport: &mut T,
        device: &mut Device,
        csd: [u8; CSD_LEN],
    ) -> StepResult
    where
        T: Transport,
    {
        let blocks = match Csd::from_bytes(csd) {
            Some(csd) => csd.card_capacity_blocks(),
            None => {
                warn!("Unknown CSD structure {:x}", csd[0] >> 6);
                return self.fail(transport);
            }
        };
        let Some(last) = blocks.checked_sub(1) else {
            warn!("CSD says the card is empty");
            return self.fail(transport);
        };
        device.card_type = self.card_type;
        device.last_sector = u32::try_from(last).unwrap_or(u32::MAX);
        device.debug = DebugCounters::default();
        device.mounted = true;
        debug!(
            "Card version: {:?}, last sector {}",
            device.card_type, device.last_sector
        );
        transport.set_clock(ClockSpeed::High)?;
        transport.release_bus()?;
        Poll::Ready(Ok(()))
    }

    /// Leave the device unmounted and report that there's no card.
    fn fail<T>(&mut self, transport: &mut T) -> StepResult
    where
        T: Transport,
    {
        transport.stop_timer();
        transport.release_bus()?;
        Poll::Ready(Err(Error::NoInit))
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
