// SPDX-License-Identifier: Apache-2.0
// Copyright © 2021 Will Ross

/// This is a very small reimplementation of [bytes::Buf] with just the parts needed for this
/// crate.
///
/// Everything the sensor hub sends is little-endian, so unlike `bytes::Buf` there are no `_le`
/// suffixes here.
///
/// [bytes::Buf]: https://docs.rs/bytes/*/bytes/trait.Buf.html
pub(crate) trait Buffer {
    fn get_u8(&mut self) -> u8;
    fn get_i16(&mut self) -> i16;
    fn get_u16(&mut self) -> u16;
    fn get_u32(&mut self) -> u32;
    fn get_u40(&mut self) -> u64;
    fn get_f32(&mut self) -> f32;
}

impl Buffer for &[u8] {
    fn get_u8(&mut self) -> u8 {
        let (byte, rest) = self.split_at(1);
        *self = rest;
        byte[0]
    }

    fn get_i16(&mut self) -> i16 {
        let (bytes, rest) = self.split_at(2);
        *self = rest;
        i16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn get_u16(&mut self) -> u16 {
        let (bytes, rest) = self.split_at(2);
        *self = rest;
        u16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn get_u32(&mut self) -> u32 {
        let (bytes, rest) = self.split_at(4);
        *self = rest;
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn get_u40(&mut self) -> u64 {
        let (bytes, rest) = self.split_at(5);
        *self = rest;
        u64::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], 0, 0, 0])
    }

    fn get_f32(&mut self) -> f32 {
        f32::from_bits(self.get_u32())
    }
}

/// Check if the n-th bit is set.
///
/// Bits are 0-indexed, from the LSB.
pub(crate) fn is_bit_set<B>(value: B, index: usize) -> bool
where
    B: num_traits::PrimInt + num_traits::Unsigned,
{
    (value & (B::one() << index)) > B::zero()
}

/// Round a length up to the next multiple of four.
///
/// Every length the host interface puts on the wire is word aligned.
pub(crate) const fn align_to_word(length: usize) -> usize {
    (length + 3) & !3
}
