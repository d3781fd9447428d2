//! Asking a mounted card whether it is still there and happy.

use super::{card_command, proto::*, Device, Error, Options, StepResult, Transport};
use crate::{trace, warn};
use core::task::Poll;

/// A SEND_STATUS probe. Finishes in one step.
#[derive(Debug)]
pub struct CardStatus {
    polls: u16,
}

impl CardStatus {
    /// Check the probe can be sent. Only a mounted card is asked.
    pub fn start(device: &Device, options: Options) -> Result<CardStatus, Error> {
        if !device.is_mounted() {
            return Err(Error::NoInit);
        }
        Ok(CardStatus {
            polls: options.response_polls,
        })
    }

    /// Send SEND_STATUS and read the R2 response.
    ///
    /// [`Error::NoResponse`] if the card doesn't answer, [`Error::Disk`] if
    /// it answers with any status bit set.
    pub fn step<T>(&mut self, transport: &mut T) -> StepResult
    where
        T: Transport,
    {
        let r1 = card_command(transport, CMD13, 0, self.polls)?;
        let r2 = transport.read_byte()?;
        transport.release_bus()?;
        if (r1 & R1_START_MASK) != ERROR_OK {
            warn!("No answer to SEND_STATUS");
            return Poll::Ready(Err(Error::NoResponse));
        }
        if r1 != R1_READY_STATE || r2 != 0 {
            warn!("Card status {:x} {:x}", r1, r2);
            return Poll::Ready(Err(Error::Disk));
        }
        trace!("Card status clear");
        Poll::Ready(Ok(()))
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
