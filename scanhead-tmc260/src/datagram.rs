//! Codec for the TMC260's 20-bit command/response datagrams.
//!
//! Command words are 20 significant bits shipped as three bytes, most
//! significant first. The chip clocks its response out while the command
//! shifts in, so the three echoed bytes carry the 20-bit response in their
//! upper bits with four junk bits of padding at the bottom.

/// Significant bits of a command or response word.
pub const DATAGRAM_MASK: u32 = 0x000F_FFFF;

/// Packs a register value into the three wire bytes.
///
/// The value is expected left-aligned in bits 0-19 as laid out in the
/// TMC260 register map. It is shifted up a byte and split most significant
/// first; the low byte of the shifted word is padding and never leaves the
/// MCU.
pub fn pack(regval: u32) -> [u8; 3] {
    let shifted = (regval & DATAGRAM_MASK) << 8;
    [
        (shifted >> 24) as u8,
        (shifted >> 16) as u8,
        (shifted >> 8) as u8,
    ]
}

/// Recovers the 20-bit response word from the three echoed bytes.
pub fn unpack(bytes: [u8; 3]) -> u32 {
    let mut word: u32 = 0;
    word |= (bytes[0] as u32) << 24;
    word |= (bytes[1] as u32) << 16;
    word |= (bytes[2] as u32) << 8;
    word >> 12
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_splits_most_significant_first() {
        assert_eq!(pack(0x84044), [0x08, 0x40, 0x44]);
        assert_eq!(pack(0xE0000), [0x0E, 0x00, 0x00]);
        assert_eq!(pack(0x00102), [0x00, 0x01, 0x02]);
    }

    #[test]
    fn pack_discards_bits_above_twenty() {
        assert_eq!(pack(0xFFF0_0102), pack(0x00102));
    }

    #[test]
    fn unpack_drops_the_four_padding_bits() {
        // 24 received bits, top 20 are the response word.
        assert_eq!(unpack([0xAB, 0xCD, 0xEF]), 0xABCDE);
        assert_eq!(unpack([0x00, 0x00, 0x10]), 0x00001);
        assert_eq!(unpack([0xFF, 0xFF, 0xFF]), 0xFFFFF);
    }
}
