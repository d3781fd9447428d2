//! The byte-level link to the card.
//!
//! The state machines never touch hardware directly. Everything they need
//! is behind [`Transport`]: a synchronous byte exchange, the chip select
//! line, the SPI clock rate and one restartable millisecond countdown.

/// SPI clock rates the driver asks for.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClockSpeed {
    /// The identification clock, at most 400 kHz.
    Low,
    /// The full data transfer clock.
    High,
}

/// Errors that can occur when driving the bus.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// An operation on the inner SPI bus failed.
    Spi,
    /// Setting the value of the Chip Select (CS) pin failed.
    Cs,
}

/// Everything the card protocol needs from the board.
///
/// None of these methods may block for longer than one byte time.
pub trait Transport {
    /// Clock one byte out to the card and return the byte clocked in.
    fn exchange_byte(&mut self, out: u8) -> Result<u8, TransportError>;

    /// Drive the card's chip select low.
    fn assert_select(&mut self) -> Result<(), TransportError>;

    /// Drive the card's chip select high.
    fn deassert_select(&mut self) -> Result<(), TransportError>;

    /// Switch the SPI clock rate.
    fn set_clock(&mut self, speed: ClockSpeed) -> Result<(), TransportError>;

    /// (Re)start the countdown timer with the given period.
    fn start_timer(&mut self, ms: u32);

    /// Is the countdown timer still running?
    ///
    /// Returns `false` once the period has elapsed, and after
    /// [`Transport::stop_timer`].
    fn timer_running(&mut self) -> bool;

    /// Stop the countdown timer.
    fn stop_timer(&mut self);

    /// Deselect the card and let it release MISO.
    ///
    /// A card only lets go of the data out line on the clock edge after chip
    /// select goes high, so one dummy byte follows the deselect.
    fn release_bus(&mut self) -> Result<(), TransportError> {
        self.deassert_select()?;
        self.exchange_byte(0xFF)?;
        Ok(())
    }

    /// Receive a byte from the card by clocking out an 0xFF byte.
    fn read_byte(&mut self) -> Result<u8, TransportError> {
        self.exchange_byte(0xFF)
    }

    /// Send a byte to the card and ignore what comes back.
    fn write_byte(&mut self, out: u8) -> Result<(), TransportError> {
        let _ = self.exchange_byte(out)?;
        Ok(())
    }
}

impl<T> Transport for &mut T
where
    T: Transport + ?Sized,
{
    fn exchange_byte(&mut self, out: u8) -> Result<u8, TransportError> {
        T::exchange_byte(self, out)
    }

    fn assert_select(&mut self) -> Result<(), TransportError> {
        T::assert_select(self)
    }

    fn deassert_select(&mut self) -> Result<(), TransportError> {
        T::deassert_select(self)
    }

    fn set_clock(&mut self, speed: ClockSpeed) -> Result<(), TransportError> {
        T::set_clock(self, speed)
    }

    fn start_timer(&mut self, ms: u32) {
        T::start_timer(self, ms)
    }

    fn timer_running(&mut self) -> bool {
        T::timer_running(self)
    }

    fn stop_timer(&mut self) {
        T::stop_timer(self)
    }

    fn release_bus(&mut self) -> Result<(), TransportError> {
        T::release_bus(self)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
