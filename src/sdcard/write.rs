//! Single block writes.

use super::{card_command, proto::*, Device, Error, Options, StepResult, Transport};
use crate::blockdevice::{is_full_block, DataBuffer, BLOCK_LEN};
use crate::{trace, warn};
use core::task::Poll;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    /// Send WRITE_BLOCK.
    Command,
    /// Streaming the block. Holds the bytes sent so far.
    Data(usize),
    /// Waiting for the data response token.
    Response,
    /// The card holds the line low while it programs. Holds the last byte
    /// seen.
    Busy(u8),
}

/// Writes one block.
#[derive(Debug)]
pub struct WriteBlock {
    state: State,
    sector: u32,
    address: u32,
    batch: usize,
    options: Options,
}

impl WriteBlock {
    /// Check a write of `data` to `sector`.
    ///
    /// Nothing touches the bus here. A device that isn't mounted gets
    /// [`Error::NoInit`]; a sector past the end of the card, or a buffer
    /// that isn't exactly one block, gets [`Error::Parameter`].
    pub fn start(
        device: &Device,
        sector: u32,
        data: &DataBuffer,
        options: Options,
    ) -> Result<WriteBlock, Error> {
        if !device.is_mounted() {
            return Err(Error::NoInit);
        }
        if sector > device.last_sector() || !is_full_block(data) {
            return Err(Error::Parameter);
        }
        Ok(WriteBlock {
            state: State::Command,
            sector,
            address: device.address_of(sector),
            batch: options.write_batch.max(1),
            options,
        })
    }

    /// Perform one protocol action.
    ///
    /// `data` must be the buffer this write was started with.
    pub fn step<T>(
        &mut self,
        transport: &mut T,
        device: &mut Device,
        data: &DataBuffer,
    ) -> StepResult
    where
        T: Transport,
    {
        match self.state {
            State::Command => {
                let r = card_command(
                    transport,
                    CMD24,
                    self.address,
                    self.options.response_polls,
                )?;
                if r != R1_READY_STATE {
                    warn!("WRITE_BLOCK {} refused ({:x})", self.sector, r);
                    transport.release_bus()?;
                    return Poll::Ready(Err(Error::Disk));
                }
                transport.write_byte(DATA_START_BLOCK)?;
                self.state = State::Data(0);
            }
            State::Data(index) => {
                let stop = BLOCK_LEN.min(index + self.batch);
                for b in data.get(index..stop).unwrap_or_default() {
                    transport.write_byte(*b)?;
                }
                if stop < BLOCK_LEN {
                    self.state = State::Data(stop);
                } else {
                    // Dummy CRC
                    for _ in 0..DATA_CRC_LEN {
                        transport.write_byte(0xFF)?;
                    }
                    self.state = State::Response;
                }
            }
            State::Response => {
                let response = transport.read_byte()?;
                if (response & DATA_RES_MASK) != DATA_RES_ACCEPTED {
                    warn!("Sector {} data rejected ({:x})", self.sector, response);
                    transport.release_bus()?;
                    device.debug.writes = device.debug.writes.wrapping_add(1);
                    return Poll::Ready(Err(Error::Reject));
                }
                transport.start_timer(self.options.timeouts.write_busy_ms);
                self.state = State::Busy(transport.read_byte()?);
            }
            State::Busy(line) => {
                if line == 0 && transport.timer_running() {
                    self.state = State::Busy(transport.read_byte()?);
                    return Poll::Pending;
                }
                transport.stop_timer();
                transport.release_bus()?;
                device.debug.writes = device.debug.writes.wrapping_add(1);
                if line == 0 {
                    warn!("Sector {} still programming", self.sector);
                    return Poll::Ready(Err(Error::Busy));
                }
                trace!("Wrote sector {}", self.sector);
                return Poll::Ready(Ok(()));
            }
        }
        Poll::Pending
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
