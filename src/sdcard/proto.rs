//! Constants and register layouts from the SD Specifications
//!
//! Command indices, response bits and data tokens follow the SD Physical
//! Layer Simplified Specification, Section 7 (SPI Mode). The MMC-only
//! `SEND_OP_COND` is from the MMC System Specification.

use byteorder::{BigEndian, ByteOrder};

//==============================================================================

// Possible errors the SD card can return

/// Card indicates last operation was a success
pub const ERROR_OK: u8 = 0x00;

//==============================================================================

// SD Card Commands

/// GO_IDLE_STATE - init card in spi mode if CS low
pub const CMD0: u8 = 0x00;
/// SEND_OP_COND - activates the card's initialization process (MMC)
pub const CMD1: u8 = 0x01;
/// SEND_IF_COND - verify SD Memory Card interface operating condition.
pub const CMD8: u8 = 0x08;
/// SEND_CSD - read the Card Specific Data (CSD register)
pub const CMD9: u8 = 0x09;
/// SEND_STATUS - read the card status register
pub const CMD13: u8 = 0x0D;
/// SET_BLOCKLEN - set the block length for reads and writes
pub const CMD16: u8 = 0x10;
/// READ_SINGLE_BLOCK - read a single data block from the card
pub const CMD17: u8 = 0x11;
/// WRITE_BLOCK - write a single data block to the card
pub const CMD24: u8 = 0x18;
/// APP_CMD - escape for application specific command
pub const CMD55: u8 = 0x37;
/// READ_OCR - read the OCR register of a card
pub const CMD58: u8 = 0x3A;
/// CRC_ON_OFF - enable or disable CRC checking
pub const CMD59: u8 = 0x3B;
/// SD_SEND_OP_COMD - Sends host capacity support information and activates
/// the card's initialization process
pub const ACMD41: u8 = 0x29;

//==============================================================================

/// Argument for CMD8: 2.7-3.6V supply and the `0xAA` check pattern
pub const IF_COND_ARG: u32 = 0x0000_01AA;

/// Argument bit for ACMD41: the host supports high capacity cards
pub const ACMD41_HCS: u32 = 1 << 30;

//==============================================================================

/// status for card in the ready state
pub const R1_READY_STATE: u8 = 0x00;

/// status for card in the idle state
pub const R1_IDLE_STATE: u8 = 0x01;

/// status bit for illegal command
pub const R1_ILLEGAL_COMMAND: u8 = 0x04;

/// R1 responses always have the top bit clear
pub const R1_START_MASK: u8 = 0x80;

/// What the card drives when it has nothing to say
pub const NO_RESPONSE: u8 = 0xFF;

/// start data token for read or write single block
pub const DATA_START_BLOCK: u8 = 0xFE;

/// mask for data response tokens after a write block operation
pub const DATA_RES_MASK: u8 = 0x1F;

/// write data accepted token
pub const DATA_RES_ACCEPTED: u8 = 0x05;

/// Length of a command frame on the wire
pub const COMMAND_LEN: usize = 6;

/// Length of the CSD register
pub const CSD_LEN: usize = 16;

/// Length of the CRC16 trailer after every data block
pub const DATA_CRC_LEN: usize = 2;

/// Build the six byte frame for a command: start bits and index, big-endian
/// argument, then the CRC7 with its end bit.
pub fn command_frame(command: u8, arg: u32) -> [u8; COMMAND_LEN] {
    let mut buf = [0x40 | command, 0, 0, 0, 0, 0];
    BigEndian::write_u32(&mut buf[1..5], arg);
    buf[5] = crc7(&buf[0..5]);
    buf
}

/// Trailer of an R7 response to `SEND_IF_COND`
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct IfCond {
    /// The four bytes that follow the R1 byte
    pub data: [u8; 4],
}

impl IfCond {
    define_field!(command_version, u8, 0, 4, 4);
    define_field!(voltage_accepted, u8, 2, 0, 4);
    define_field!(check_pattern, u8, 3, 0, 8);

    /// Did the card accept our voltage range and echo the check pattern?
    pub fn is_valid(&self) -> bool {
        self.voltage_accepted() == (IF_COND_ARG >> 8) as u8
            && self.check_pattern() == IF_COND_ARG as u8
    }
}

/// Operating Conditions Register, as returned by `READ_OCR`
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Ocr {
    /// The four bytes that follow the R1 byte
    pub data: [u8; 4],
}

impl Ocr {
    define_field!(power_up_complete, bool, 0, 7);
    define_field!(card_capacity_status, bool, 0, 6);
    define_field!(value, u32, 0);
}

/// Card Specific Data, version 1
///
/// Used by standard capacity SD cards and by MMC.
#[derive(Debug, Default)]
pub struct CsdV1 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; CSD_LEN],
}

/// Card Specific Data, version 2
///
/// Used by high capacity (SDHC/SDXC) cards.
#[derive(Debug, Default)]
pub struct CsdV2 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; CSD_LEN],
}

/// Card Specific Data
#[derive(Debug)]
pub enum Csd {
    /// A version 1 CSD
    V1(CsdV1),
    /// A version 2 CSD
    V2(CsdV2),
}

impl Csd {
    /// Pick the layout named by the register's own `CSD_STRUCTURE` field.
    ///
    /// Returns `None` for structure versions we can't size.
    pub fn from_bytes(data: [u8; CSD_LEN]) -> Option<Csd> {
        match data[0] >> 6 {
            0 => Some(Csd::V1(CsdV1 { data })),
            1 => Some(Csd::V2(CsdV2 { data })),
            _ => None,
        }
    }

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u64 {
        match self {
            Csd::V1(contents) => contents.card_capacity_blocks(),
            Csd::V2(contents) => contents.card_capacity_blocks(),
        }
    }
}

impl CsdV1 {
    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(device_size, u32, [(6, 0, 2), (7, 0, 8), (8, 6, 2)]);
    define_field!(device_size_multiplier, u8, [(9, 0, 2), (10, 7, 1)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);
    define_field!(crc, u8, 15, 0, 8);

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        let multiplier = self.device_size_multiplier() + self.read_block_length() + 2;
        (u64::from(self.device_size()) + 1) << multiplier
    }

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u64 {
        self.card_capacity_bytes() / 512
    }
}

impl CsdV2 {
    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(device_size, u32, [(7, 0, 6), (8, 0, 8), (9, 0, 8)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);
    define_field!(crc, u8, 15, 0, 8);

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * 512 * 1024
    }

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * 1024
    }
}

/// Perform the 7-bit CRC used on the SD card
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for mut d in data.iter().cloned() {
        for _bit in 0..8 {
            crc <<= 1;
            if ((d & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            d <<= 1;
        }
    }
    (crc << 1) | 1
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
