//! A [`Transport`] built from `embedded-hal` parts.
//!
//! The card needs its chip select toggled between commands and clocks sent
//! with chip select high, which an [`embedded_hal::spi::SpiDevice`] can't
//! express. So this owns the raw [`SpiBus`] and drives the [`OutputPin`]
//! itself.

use embedded_hal::{digital::OutputPin, spi::SpiBus};

use super::transport::{ClockSpeed, Transport, TransportError};
use crate::trace;

/// A free-running millisecond counter.
///
/// Wrapping is fine; the countdown uses wrapping arithmetic.
pub trait Clock {
    /// Milliseconds since some arbitrary epoch.
    fn now_ms(&self) -> u32;
}

/// Changes the bus clock rate. Most HALs only allow this on the concrete
/// peripheral type, so the caller supplies it.
pub type Reclock<BUS> = fn(&mut BUS, ClockSpeed);

/// An SD card on an SPI bus, with its own chip select pin.
pub struct SpiTransport<BUS, CS, CLOCK>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    CLOCK: Clock,
{
    bus: BUS,
    cs: CS,
    clock: CLOCK,
    reclock: Option<Reclock<BUS>>,
    deadline: Option<u32>,
}

impl<BUS, CS, CLOCK> SpiTransport<BUS, CS, CLOCK>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    CLOCK: Clock,
{
    /// Build a transport from a bus, a chip select pin and a clock.
    ///
    /// Without [`SpiTransport::with_reclock`] the bus stays at whatever rate
    /// it was configured for, which must then be 400 kHz or less.
    pub fn new(bus: BUS, cs: CS, clock: CLOCK) -> Self {
        SpiTransport {
            bus,
            cs,
            clock,
            reclock: None,
            deadline: None,
        }
    }

    /// Supply the function that switches the bus between clock rates.
    pub fn with_reclock(mut self, reclock: Reclock<BUS>) -> Self {
        self.reclock = Some(reclock);
        self
    }

    /// Get a temporary borrow on the underlying SPI bus.
    pub fn bus<T, F>(&mut self, func: F) -> T
    where
        F: FnOnce(&mut BUS) -> T,
    {
        func(&mut self.bus)
    }

    /// Give back the parts.
    pub fn free(self) -> (BUS, CS, CLOCK) {
        (self.bus, self.cs, self.clock)
    }
}

impl<BUS, CS, CLOCK> Transport for SpiTransport<BUS, CS, CLOCK>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    CLOCK: Clock,
{
    fn exchange_byte(&mut self, out: u8) -> Result<u8, TransportError> {
        let mut read_buf = [0u8; 1];
        let transfer_res = self.bus.transfer(&mut read_buf, &[out]);
        // On failure, it's important to still flush.
        let flush_res = self.bus.flush();
        transfer_res.map_err(|_| TransportError::Spi)?;
        flush_res.map_err(|_| TransportError::Spi)?;
        Ok(read_buf[0])
    }

    fn assert_select(&mut self) -> Result<(), TransportError> {
        self.cs.set_low().map_err(|_| TransportError::Cs)
    }

    fn deassert_select(&mut self) -> Result<(), TransportError> {
        self.cs.set_high().map_err(|_| TransportError::Cs)
    }

    fn set_clock(&mut self, speed: ClockSpeed) -> Result<(), TransportError> {
        trace!("SPI clock -> {:?}", speed);
        self.bus.flush().map_err(|_| TransportError::Spi)?;
        if let Some(reclock) = self.reclock {
            reclock(&mut self.bus, speed);
        }
        Ok(())
    }

    fn start_timer(&mut self, ms: u32) {
        self.deadline = Some(self.clock.now_ms().wrapping_add(ms));
    }

    fn timer_running(&mut self) -> bool {
        match self.deadline {
            Some(deadline) => {
                let remaining = deadline.wrapping_sub(self.clock.now_ms());
                // Past the deadline the difference wraps to a huge value.
                if remaining == 0 || remaining > u32::MAX / 2 {
                    self.deadline = None;
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    fn stop_timer(&mut self) {
        self.deadline = None;
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
