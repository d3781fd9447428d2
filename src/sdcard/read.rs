//! Single block reads.

use super::{card_command, proto::*, Device, Error, Options, StepResult, Transport};
use crate::blockdevice::{DataBuffer, BLOCK_LEN};
use crate::{trace, warn};
use core::task::Poll;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    /// Send READ_SINGLE_BLOCK.
    Command,
    /// Waiting for the data start token. Holds the last byte seen.
    Token(u8),
    /// Streaming the block and its CRC. Holds the bytes consumed so far.
    Data(usize),
}

/// Reads one block, keeping only a window of it.
///
/// All 512 data bytes and the CRC are always clocked through, whatever the
/// window, so the card is left at a block boundary.
#[derive(Debug)]
pub struct ReadBlock {
    state: State,
    sector: u32,
    address: u32,
    start: usize,
    end: usize,
    batch: usize,
    options: Options,
}

impl ReadBlock {
    /// Check a read of `count` bytes from `offset` within `sector`.
    ///
    /// Nothing touches the bus here. A device that isn't mounted gets
    /// [`Error::NoInit`]; a sector past the end of the card or an empty
    /// window gets [`Error::Parameter`]. A window running past the end of
    /// the block is clipped.
    pub fn start(
        device: &Device,
        sector: u32,
        offset: u16,
        count: u16,
        options: Options,
    ) -> Result<ReadBlock, Error> {
        if !device.is_mounted() {
            return Err(Error::NoInit);
        }
        if sector > device.last_sector() || count == 0 {
            return Err(Error::Parameter);
        }
        let start = usize::from(offset);
        Ok(ReadBlock {
            state: State::Command,
            sector,
            address: device.address_of(sector),
            start,
            end: start + usize::from(count),
            batch: options.read_batch.max(1),
            options,
        })
    }

    /// Perform one protocol action.
    ///
    /// Window bytes are appended to `data`, which is expected to start
    /// empty.
    pub fn step<T>(
        &mut self,
        transport: &mut T,
        device: &mut Device,
        data: &mut DataBuffer,
    ) -> StepResult
    where
        T: Transport,
    {
        match self.state {
            State::Command => {
                let r = card_command(
                    transport,
                    CMD17,
                    self.address,
                    self.options.response_polls,
                )?;
                if r != R1_READY_STATE {
                    warn!("READ_SINGLE_BLOCK {} refused ({:x})", self.sector, r);
                    transport.release_bus()?;
                    return Poll::Ready(Err(Error::Disk));
                }
                transport.start_timer(self.options.timeouts.read_token_ms);
                self.state = State::Token(transport.read_byte()?);
            }
            State::Token(DATA_START_BLOCK) => {
                transport.stop_timer();
                self.state = State::Data(0);
            }
            State::Token(token) => {
                if token != NO_RESPONSE || !transport.timer_running() {
                    warn!("No data token for sector {} ({:x})", self.sector, token);
                    transport.stop_timer();
                    transport.release_bus()?;
                    device.debug.reads = device.debug.reads.wrapping_add(1);
                    return Poll::Ready(Err(Error::Disk));
                }
                self.state = State::Token(transport.read_byte()?);
            }
            State::Data(index) => {
                let total = BLOCK_LEN + DATA_CRC_LEN;
                let stop = total.min(index + self.batch);
                for i in index..stop {
                    let b = transport.read_byte()?;
                    if i < BLOCK_LEN && (self.start..self.end).contains(&i) {
                        // The window lies inside one block, so this always fits.
                        let _ = data.push(b);
                    }
                }
                if stop < total {
                    self.state = State::Data(stop);
                } else {
                    trace!("Read sector {}", self.sector);
                    transport.release_bus()?;
                    device.debug.reads = device.debug.reads.wrapping_add(1);
                    return Poll::Ready(Ok(()));
                }
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
