//! Types for working with 512-byte blocks.
//!
//! Cards are always driven with a block length of 512 bytes, whatever their
//! native read block length is.

/// A standard 512 byte block (also known as a sector).
pub type Block = [u8; BLOCK_LEN];

/// All our blocks are a fixed length of 512 bytes.
pub const BLOCK_LEN: usize = 512;

/// Sometimes we want `LEN` as a `u32` and the casts don't look nice.
pub const BLOCK_LEN_U32: u32 = 512;

/// The buffer handed through a [`Transaction`](crate::Transaction).
///
/// A read appends the requested window of the block to it, a write sends
/// its contents, which must then be exactly one block long.
pub type DataBuffer = heapless::Vec<u8, BLOCK_LEN>;

/// Copy a whole block into a fresh [`DataBuffer`], ready for a write.
///
/// ```
/// # use sdmmc_server::blockdevice::{block_buffer, BLOCK_LEN};
/// let buffer = block_buffer(&[0xA5; BLOCK_LEN]);
/// assert_eq!(buffer.len(), BLOCK_LEN);
/// assert!(buffer.iter().all(|b| *b == 0xA5));
/// ```
pub fn block_buffer(block: &Block) -> DataBuffer {
    let mut buffer = DataBuffer::new();
    // A block always fits: the capacity is one block.
    let _ = buffer.extend_from_slice(block);
    buffer
}

/// Is this buffer a complete block?
pub fn is_full_block(buffer: &DataBuffer) -> bool {
    buffer.len() == BLOCK_LEN
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
