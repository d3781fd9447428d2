//! The per-slot device descriptor.

use bitflags::bitflags;

bitflags! {
    /// What negotiation learned about the card.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CardType: u8 {
        /// A MultiMediaCard (v3).
        const MMC = 0x01;
        /// An SD card supporting v1.x of the standard.
        const SD1 = 0x02;
        /// An SD card supporting v2.00 or later of the standard.
        const SD2 = 0x04;
        /// Commands take a block index rather than a byte address.
        ///
        /// Only ever set together with [`CardType::SD2`] (SDHC/SDXC).
        const BLOCK = 0x08;
    }
}

#[cfg(feature = "defmt-log")]
impl defmt::Format for CardType {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "CardType({=u8:#04x})", self.bits())
    }
}

/// How many operations a device has completed.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DebugCounters {
    /// Block reads which got past the read command.
    pub reads: u32,
    /// Block writes which got past the write command.
    pub writes: u32,
}

/// Describes one card slot.
///
/// Only the state machines change a `Device`. While a transaction is in
/// flight the [`Server`](crate::Server) holds it, so nothing else can.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Device {
    pub(crate) card_type: CardType,
    pub(crate) mounted: bool,
    pub(crate) last_sector: u32,
    pub(crate) debug: DebugCounters,
}

impl Device {
    /// A slot with no card negotiated yet.
    pub const fn new() -> Device {
        Device {
            card_type: CardType::empty(),
            mounted: false,
            last_sector: 0,
            debug: DebugCounters { reads: 0, writes: 0 },
        }
    }

    /// The card type found by the last successful negotiation.
    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    /// Did the last negotiation succeed?
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// The highest valid zero-based sector index.
    pub fn last_sector(&self) -> u32 {
        self.last_sector
    }

    /// Completed read and write counts.
    pub fn debug_counters(&self) -> DebugCounters {
        self.debug
    }

    /// Does this card take block indices rather than byte addresses?
    pub fn is_block_addressed(&self) -> bool {
        self.card_type.contains(CardType::BLOCK)
    }

    /// Tell the driver the card has already been negotiated.
    ///
    /// This is here in case the card was brought up by a previous instance
    /// of the driver (or a bootloader) and is known to have stayed powered
    /// and initialised since.
    ///
    /// # Safety
    ///
    /// Only do this if the card really is initialised, with a 512 byte block
    /// length, and is of the indicated type and size. Failure to uphold this
    /// will cause data corruption.
    pub unsafe fn mark_card_as_init(&mut self, card_type: CardType, last_sector: u32) {
        self.card_type = card_type;
        self.last_sector = last_sector;
        self.mounted = true;
    }

    /// Mark the card as requiring a reset.
    ///
    /// Reads and writes are refused until negotiation succeeds again.
    pub fn mark_card_uninit(&mut self) {
        self.card_type = CardType::empty();
        self.mounted = false;
    }

    /// The address argument a read or write command takes for `sector`.
    pub(crate) fn address_of(&self, sector: u32) -> u32 {
        if self.is_block_addressed() {
            sector
        } else {
            sector.wrapping_mul(crate::blockdevice::BLOCK_LEN_U32)
        }
    }
}

impl Default for Device {
    fn default() -> Self {
        Device::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn addressing_follows_card_class() {
        let mut device = Device::new();
        unsafe { device.mark_card_as_init(CardType::SD2 | CardType::BLOCK, 1000) };
        assert_eq!(device.address_of(7), 7);
        unsafe { device.mark_card_as_init(CardType::SD1, 1000) };
        assert_eq!(device.address_of(7), 7 * 512);
    }

    #[test]
    fn uninit_unmounts() {
        let mut device = Device::new();
        unsafe { device.mark_card_as_init(CardType::MMC, 10) };
        assert!(device.is_mounted());
        device.mark_card_uninit();
        assert!(!device.is_mounted());
        assert!(device.card_type().is_empty());
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
