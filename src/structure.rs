//! Macros for decoding SD/MMC registers.
//!
//! Registers arrive most significant byte first, so byte `0` of `data` holds
//! the highest numbered bits. Each field is given as a byte index plus the
//! lowest bit and width within that byte.

/// Pull `$width` bits out of byte `$byte`, starting at bit `$low`.
macro_rules! register_bits {
    ($self:expr, $byte:expr, $bit:expr, 1) => {
        ($self.data[$byte] >> $bit) & 1 == 1
    };
    ($self:expr, $byte:expr, $low:expr, $width:expr) => {
        ($self.data[$byte] >> $low) & (((1u16 << $width) - 1) as u8)
    };
}

/// Generate a getter for one register field.
macro_rules! define_field {
    ($name:ident, bool, $byte:expr, $bit:expr) => {
        /// Is the $name bit set?
        pub fn $name(&self) -> bool {
            register_bits!(self, $byte, $bit, 1)
        }
    };
    ($name:ident, u8, $byte:expr, $low:expr, $width:expr) => {
        /// The $name field
        pub fn $name(&self) -> u8 {
            register_bits!(self, $byte, $low, $width)
        }
    };
    // A field split over several bytes, most significant part first.
    ($name:ident, $type:ty, [ $( ( $byte:expr, $low:expr, $width:expr ) ),+ ]) => {
        /// The $name field
        pub fn $name(&self) -> $type {
            let mut value: $type = 0;
            $(
                value = (value << $width) | (register_bits!(self, $byte, $low, $width) as $type);
            )+
            value
        }
    };
    // A whole big-endian word.
    ($name:ident, u32, $byte:expr) => {
        /// The $name register as a word
        pub fn $name(&self) -> u32 {
            BigEndian::read_u32(&self.data[$byte..$byte + 4])
        }
    };
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
