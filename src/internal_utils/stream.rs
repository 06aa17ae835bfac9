// Copyright 2026 the crabby-heif authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::internal_utils::*;
use crate::parser::mp4box::BoxSize;
use crate::utils::Fraction;
use crate::utils::UFraction;
use crate::*;

/// MSB-first bit reader over an immutable byte slice. Used for bit-packed
/// codec configuration payloads.
#[derive(Debug)]
pub struct IBitStream<'a> {
    pub data: &'a [u8],
    pub bit_offset: usize,
}

#[allow(dead_code)]
impl IBitStream<'_> {
    pub(crate) fn create(data: &[u8]) -> IBitStream<'_> {
        IBitStream {
            data,
            bit_offset: 0,
        }
    }

    fn read_bit(&mut self) -> HeifResult<u8> {
        let byte_offset = self.bit_offset / 8;
        if byte_offset >= self.data.len() {
            return HeifError::end_of_data();
        }
        let byte = self.data[byte_offset];
        let shift = 7 - (self.bit_offset % 8);
        self.bit_offset += 1;
        Ok((byte >> shift) & 0x01)
    }

    pub(crate) fn read(&mut self, n: usize) -> HeifResult<u32> {
        assert!(n <= 32);
        let mut value: u32 = 0;
        for _i in 0..n {
            value <<= 1;
            value |= self.read_bit()? as u32;
        }
        Ok(value)
    }

    pub(crate) fn peek(&mut self, n: usize) -> HeifResult<u32> {
        let bit_offset = self.bit_offset;
        let value = self.read(n);
        self.bit_offset = bit_offset;
        value
    }

    pub(crate) fn read_bool(&mut self) -> HeifResult<bool> {
        let bit = self.read_bit()?;
        Ok(bit == 1)
    }

    pub(crate) fn skip(&mut self, n: usize) -> HeifResult<()> {
        if checked_add!(self.bit_offset, n)? > checked_mul!(self.data.len(), 8)? {
            return HeifError::end_of_data();
        }
        self.bit_offset += n;
        Ok(())
    }

    pub(crate) fn align_to_byte(&mut self) -> HeifResult<()> {
        let unaligned_bits = self.bit_offset % 8;
        if unaligned_bits != 0 {
            self.skip(8 - unaligned_bits)?;
        }
        Ok(())
    }

    // Unsigned Exp-Golomb code, ue(v).
    pub(crate) fn read_uvlc(&mut self) -> HeifResult<u32> {
        let mut leading_zeros = 0usize;
        while !self.read_bool()? {
            leading_zeros += 1;
            if leading_zeros > 32 {
                return HeifError::invalid_input(
                    SubErrorKind::Unspecified,
                    "invalid exp-golomb code",
                );
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let value = self.read(leading_zeros)? as u64;
        u32_from_u64((1u64 << leading_zeros) - 1 + value)
    }

    // Signed Exp-Golomb code, se(v).
    pub(crate) fn read_svlc(&mut self) -> HeifResult<i32> {
        let unsigned = self.read_uvlc()? as i64;
        // Mapping as per ITU-T H.265, section 9.2.
        let value = if unsigned % 2 == 0 { -(unsigned / 2) } else { (unsigned + 1) / 2 };
        Ok(value as i32)
    }

    pub(crate) fn remaining_bits(&self) -> HeifResult<usize> {
        checked_sub!(checked_mul!(self.data.len(), 8)?, self.bit_offset)
    }
}

/// Byte cursor over an immutable slice. All multi-byte reads are
/// big-endian. Bit-level reads are allowed anywhere; byte-level reads
/// require byte alignment.
#[derive(Debug)]
pub struct IStream<'a> {
    // The bytes to parse.
    pub data: &'a [u8],
    // The number of bytes read so far within self.data.
    pub offset: usize,
    // If not zero, number of bits of data[offset] that were already read.
    bit_offset: usize,
}

impl IStream<'_> {
    pub(crate) fn create(data: &[u8]) -> IStream<'_> {
        IStream {
            data,
            offset: 0,
            bit_offset: 0,
        }
    }

    fn check(&self, size: usize) -> HeifResult<()> {
        assert_eq!(self.bit_offset, 0);
        if self.bytes_left()? < size {
            return HeifError::end_of_data();
        }
        Ok(())
    }

    pub(crate) fn sub_stream<'a>(&'a mut self, size: &BoxSize) -> HeifResult<IStream<'a>> {
        let offset = self.offset;
        checked_incr!(
            self.offset,
            match size {
                BoxSize::FixedSize(size) => {
                    self.check(*size)?;
                    *size
                }
                BoxSize::UntilEndOfStream => self.bytes_left()?,
            }
        );
        Ok(IStream {
            data: &self.data[offset..self.offset],
            offset: 0,
            bit_offset: 0,
        })
    }

    pub(crate) fn sub_bit_stream(&mut self, num_bytes: usize) -> HeifResult<IBitStream<'_>> {
        self.check(num_bytes)?;
        let offset = self.offset;
        checked_incr!(self.offset, num_bytes);
        Ok(IBitStream {
            data: &self.data[offset..self.offset],
            bit_offset: 0,
        })
    }

    pub(crate) fn bytes_left(&self) -> HeifResult<usize> {
        if self.data.len() < self.offset {
            return HeifError::end_of_data();
        }
        Ok(self.data.len() - self.offset)
    }

    pub(crate) fn has_bytes_left(&self) -> HeifResult<bool> {
        Ok(self.bytes_left()? > 0)
    }

    pub(crate) fn get_slice(&mut self, size: usize) -> HeifResult<&[u8]> {
        self.check(size)?;
        let offset_start = self.offset;
        checked_incr!(self.offset, size);
        Ok(&self.data[offset_start..offset_start + size])
    }

    pub(crate) fn get_immutable_vec(&self, size: usize) -> HeifResult<Vec<u8>> {
        self.check(size)?;
        Ok(self.data[self.offset..self.offset + size].to_vec())
    }

    fn get_vec(&mut self, size: usize) -> HeifResult<Vec<u8>> {
        Ok(self.get_slice(size)?.to_vec())
    }

    pub(crate) fn read_u8(&mut self) -> HeifResult<u8> {
        self.check(1)?;
        let value = self.data[self.offset];
        checked_incr!(self.offset, 1);
        Ok(value)
    }

    pub(crate) fn read_u16(&mut self) -> HeifResult<u16> {
        Ok(u16::from_be_bytes(self.get_slice(2)?.try_into().unwrap()))
    }

    pub(crate) fn read_u24(&mut self) -> HeifResult<u32> {
        Ok(self.read_uxx(3)? as u32)
    }

    pub(crate) fn read_u32(&mut self) -> HeifResult<u32> {
        Ok(u32::from_be_bytes(self.get_slice(4)?.try_into().unwrap()))
    }

    pub(crate) fn read_u64(&mut self) -> HeifResult<u64> {
        Ok(u64::from_be_bytes(self.get_slice(8)?.try_into().unwrap()))
    }

    pub(crate) fn read_i16(&mut self) -> HeifResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub(crate) fn read_i32(&mut self) -> HeifResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub(crate) fn read_ufraction(&mut self) -> HeifResult<UFraction> {
        Ok(UFraction(self.read_u32()?, self.read_u32()?))
    }

    // Reads size characters of a non-null-terminated string.
    pub(crate) fn read_string(&mut self, size: usize) -> HeifResult<String> {
        Ok(String::from_utf8(self.get_vec(size)?).unwrap_or("".into()))
    }

    // Reads an xx-byte unsigned integer.
    pub(crate) fn read_uxx(&mut self, xx: u8) -> HeifResult<u64> {
        let n: usize = xx.into();
        if n == 0 {
            return Ok(0);
        }
        if n > 8 {
            return HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                format!("cannot read a {n} byte integer"),
            );
        }
        let mut out = [0; 8];
        let start = out.len() - n;
        out[start..].copy_from_slice(self.get_slice(n)?);
        Ok(u64::from_be_bytes(out))
    }

    // Reads a null-terminated string.
    pub(crate) fn read_c_string(&mut self) -> HeifResult<String> {
        self.check(1)?;
        let null_position = self.data[self.offset..]
            .iter()
            .position(|&x| x == b'\0')
            .ok_or(HeifError::end_of_data::<()>().unwrap_err())?;
        let range = self.offset..self.offset + null_position;
        self.offset += null_position + 1;
        Ok(String::from_utf8(self.data[range].to_vec()).unwrap_or("".into()))
    }

    pub(crate) fn read_version_and_flags(&mut self) -> HeifResult<(u8, u32)> {
        let version = self.read_u8()?;
        let flags = self.read_u24()?;
        Ok((version, flags))
    }

    pub(crate) fn read_and_enforce_version_and_flags(
        &mut self,
        enforced_version: u8,
    ) -> HeifResult<(u8, u32)> {
        let (version, flags) = self.read_version_and_flags()?;
        if version != enforced_version {
            return HeifError::invalid_input(
                SubErrorKind::UnsupportedDataVersion,
                format!("expected box version {enforced_version}, got {version}"),
            );
        }
        Ok((version, flags))
    }

    pub(crate) fn skip(&mut self, size: usize) -> HeifResult<()> {
        self.check(size)?;
        checked_incr!(self.offset, size);
        Ok(())
    }

    fn read_partial_bit(&mut self) -> HeifResult<u8> {
        if self.offset >= self.data.len() {
            return HeifError::end_of_data();
        }
        let byte = self.data[self.offset];
        let shift = 7 - self.bit_offset;
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.offset += 1;
        }
        Ok((byte >> shift) & 0x01)
    }

    // MSB-first bit read that may start and end inside a byte. Byte-level
    // reads are only legal again once the cursor is back on a byte boundary.
    pub(crate) fn read_bits(&mut self, n: usize) -> HeifResult<u32> {
        assert!(n <= 32);
        let mut value: u32 = 0;
        for _ in 0..n {
            value <<= 1;
            value |= self.read_partial_bit()? as u32;
        }
        Ok(value)
    }

    pub(crate) fn skip_bits(&mut self, n: usize) -> HeifResult<()> {
        self.read_bits(n).map(|_| ())
    }

    pub(crate) fn read_bool(&mut self) -> HeifResult<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    pub(crate) fn pad(&mut self) -> HeifResult<()> {
        if self.bit_offset != 0 && self.read_bits(8 - self.bit_offset)? != 0 {
            return HeifError::invalid_input(
                SubErrorKind::InvalidParameterValue,
                "padding not set to 0",
            );
        }
        Ok(())
    }
}

/// Growable output byte buffer with bit packing and nested box markers.
#[derive(Default)]
pub struct OStream {
    // The bytes written so far.
    pub data: Vec<u8>,
    // If not zero, number of most significant bits already written in the
    // last byte of self.data.
    num_bits: u8,
    // The positions in self.data where the 4-byte sizes of the boxes that
    // were started but not yet finished will be written.
    box_marker_offsets: Vec<usize>,
}

#[allow(dead_code)]
impl OStream {
    pub(crate) fn offset(&self) -> usize {
        assert_eq!(self.num_bits, 0);
        self.data.len()
    }

    pub(crate) fn try_reserve(&mut self, size: usize) -> HeifResult<()> {
        self.data.try_reserve(size).or(HeifError::out_of_memory())
    }

    pub(crate) fn write_bits(&mut self, value: u32, num_bits: u8) -> HeifResult<()> {
        if num_bits == 0 || num_bits > 31 {
            return HeifError::invalid_input(SubErrorKind::InvalidParameterValue, "bit count");
        }
        if value >= (1 << num_bits) {
            return HeifError::invalid_input(SubErrorKind::InvalidParameterValue, "bit value");
        }
        let mut num_remaining_bits = num_bits;
        while num_remaining_bits != 0 {
            if self.num_bits == 0 {
                self.write_u8(0)?;
            }
            let byte = self.data.last_mut().unwrap();
            // Number of bits among num_bits that fit in the last byte of self.data.
            let num_written_bits = std::cmp::min(8 - self.num_bits, num_remaining_bits);
            // Write the most significant bits first.
            let written_bits = (value >> (num_remaining_bits - num_written_bits))
                & ((1u32 << num_written_bits) - 1);
            *byte |= (written_bits as u8) << (8 - self.num_bits - num_written_bits);
            num_remaining_bits -= num_written_bits;
            self.num_bits = (self.num_bits + num_written_bits) % 8;
        }
        Ok(())
    }

    pub(crate) fn pad(&mut self) -> HeifResult<()> {
        if self.num_bits != 0 {
            self.write_bits(0, 8 - self.num_bits)?;
            assert_eq!(self.num_bits, 0);
        }
        Ok(())
    }

    pub(crate) fn write_bool(&mut self, value: bool) -> HeifResult<()> {
        self.write_bits(if value { 1 } else { 0 }, 1)
    }

    pub(crate) fn write_u8(&mut self, value: u8) -> HeifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.try_reserve(1)?;
        self.data.push(value);
        Ok(())
    }

    pub(crate) fn write_u16(&mut self, value: u16) -> HeifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.try_reserve(2)?;
        self.data.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub(crate) fn write_u24(&mut self, value: u32) -> HeifResult<()> {
        assert_eq!(self.num_bits, 0);
        if value > 0xFFFFFF {
            return HeifError::invalid_input(SubErrorKind::InvalidParameterValue, "u24 overflow");
        }
        self.try_reserve(3)?;
        self.data.extend_from_slice(&value.to_be_bytes()[1..]);
        Ok(())
    }

    pub(crate) fn write_u32(&mut self, value: u32) -> HeifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.try_reserve(4)?;
        self.data.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub(crate) fn write_u64(&mut self, value: u64) -> HeifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.try_reserve(8)?;
        self.data.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub(crate) fn write_i16(&mut self, value: i16) -> HeifResult<()> {
        self.write_u16(value as u16)
    }

    pub(crate) fn write_i32(&mut self, value: i32) -> HeifResult<()> {
        self.write_u32(value as u32)
    }

    pub(crate) fn write_u32_at_offset(&mut self, value: u32, offset: usize) -> HeifResult<()> {
        assert_eq!(self.num_bits, 0);
        let range = offset..offset + 4;
        check_slice_range(self.data.len(), &range)?;
        self.data[range].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub(crate) fn write_u64_at_offset(&mut self, value: u64, offset: usize) -> HeifResult<()> {
        assert_eq!(self.num_bits, 0);
        let range = offset..offset + 8;
        check_slice_range(self.data.len(), &range)?;
        self.data[range].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub(crate) fn write_str(&mut self, value: &str) -> HeifResult<()> {
        assert_eq!(self.num_bits, 0);
        let bytes = value.as_bytes();
        self.try_reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn write_str_with_nul(&mut self, value: &str) -> HeifResult<()> {
        self.write_str(value)?;
        self.write_u8(0)
    }

    pub(crate) fn write_slice(&mut self, data: &[u8]) -> HeifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.try_reserve(data.len())?;
        self.data.extend_from_slice(data);
        Ok(())
    }

    pub(crate) fn write_ufraction(&mut self, value: UFraction) -> HeifResult<()> {
        self.write_u32(value.0)?;
        self.write_u32(value.1)
    }

    pub(crate) fn write_fraction(&mut self, value: Fraction) -> HeifResult<()> {
        self.write_i32(value.0)?;
        self.write_u32(value.1)
    }

    fn start_box_impl(
        &mut self,
        box_type: &str,
        version_and_flags: Option<(u8, u32)>,
    ) -> HeifResult<()> {
        assert_eq!(self.num_bits, 0);
        self.box_marker_offsets.push(self.offset());
        // 4 bytes for size to be filled out later.
        self.write_u32(0)?;
        self.write_str(box_type)?;
        if let Some((version, flags)) = version_and_flags {
            self.write_u8(version)?;
            self.write_u24(flags)?;
        }
        Ok(())
    }

    pub(crate) fn start_box(&mut self, box_type: &str) -> HeifResult<()> {
        self.start_box_impl(box_type, None)
    }

    pub(crate) fn start_full_box(
        &mut self,
        box_type: &str,
        version_and_flags: (u8, u32),
    ) -> HeifResult<()> {
        self.start_box_impl(box_type, Some(version_and_flags))
    }

    pub(crate) fn finish_box(&mut self) -> HeifResult<()> {
        assert_eq!(self.num_bits, 0);
        let offset = self
            .box_marker_offsets
            .pop()
            .ok_or(HeifError::usage::<(), _>("finish_box without start_box").unwrap_err())?;
        let box_size = checked_sub!(self.offset(), offset)?;
        match u32_from_usize(box_size) {
            Ok(size) => self.write_u32_at_offset(size, offset)?,
            Err(_) => {
                // The payload overflowed the 32-bit size field. Switch the
                // box to the largesize encoding: size = 1 followed by a
                // 64-bit size right after the box type.
                self.try_reserve(8)?;
                let largesize_offset = offset + 8;
                self.data
                    .splice(largesize_offset..largesize_offset, [0u8; 8]);
                self.write_u32_at_offset(1, offset)?;
                self.write_u64_at_offset(u64_from_usize(box_size)? + 8, largesize_offset)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_uxx() {
        let mut stream = IStream::create(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(stream.read_uxx(0), Ok(0));
        assert_eq!(stream.offset, 0);
        assert_eq!(stream.read_uxx(1), Ok(1));
        assert_eq!(stream.offset, 1);
        stream.offset = 0;
        assert_eq!(stream.read_uxx(2), Ok(258));
        stream.offset = 0;
        assert_eq!(stream.read_uxx(4), Ok(16909060));
        stream.offset = 0;
        assert_eq!(stream.read_uxx(8), Ok(72623859790382856));
        stream.offset = 0;
        assert!(stream.read_uxx(9).is_err());
    }

    #[test]
    fn read_string() {
        let bytes = "abcd\0e".as_bytes();
        assert_eq!(IStream::create(bytes).read_string(4), Ok("abcd".into()));
        assert_eq!(IStream::create(bytes).read_string(6), Ok("abcd\0e".into()));
        assert!(IStream::create(bytes).read_string(8).is_err());
        assert_eq!(IStream::create(bytes).read_c_string(), Ok("abcd".into()));
    }

    #[test]
    fn read_bits() {
        let bytes = [0b1010_0110, 0b0100_0001];
        let mut stream = IStream::create(&bytes);
        assert_eq!(stream.read_bits(1), Ok(1));
        assert_eq!(stream.read_bits(3), Ok(0b010));
        assert_eq!(stream.read_bits(6), Ok(0b0110_01));
        assert_eq!(stream.read_bits(6), Ok(0b00_0001));
        assert_eq!(stream.offset, 2);
        assert!(stream.read_bits(1).is_err());
    }

    #[test]
    fn bit_stream_peek_and_uvlc() {
        // ue(v) codes: 0 -> "1", 3 -> "00100", 8 -> "0001001".
        let bytes = [0b1_00100_00, 0b01001_000];
        let mut bits = IBitStream::create(&bytes);
        assert_eq!(bits.peek(6), Ok(0b1_00100));
        assert_eq!(bits.read_uvlc(), Ok(0));
        assert_eq!(bits.read_uvlc(), Ok(3));
        assert_eq!(bits.read_uvlc(), Ok(8));
        assert_eq!(bits.remaining_bits(), Ok(3));
    }

    #[test]
    fn bit_stream_svlc() {
        // se(v) mapping: ue 0 -> 0, ue 1 -> 1, ue 2 -> -1, ue 3 -> 2, ue 4 -> -2.
        let bytes = [0b1_010_011_0, 0b0100_0010, 0b1_0000000];
        let mut bits = IBitStream::create(&bytes);
        assert_eq!(bits.read_svlc(), Ok(0));
        assert_eq!(bits.read_svlc(), Ok(1));
        assert_eq!(bits.read_svlc(), Ok(-1));
        assert_eq!(bits.read_svlc(), Ok(2));
        assert_eq!(bits.read_svlc(), Ok(-2));
    }

    #[test]
    fn write_box() {
        let mut stream = OStream::default();
        assert!(stream.start_box("ftyp").is_ok());
        assert!(stream.write_u8(20).is_ok());
        assert!(stream.start_full_box("abcd", (0, 1)).is_ok());
        assert!(stream.write_u32(25).is_ok());
        assert!(stream.finish_box().is_ok());
        assert!(stream.finish_box().is_ok());
        assert!(stream.finish_box().is_err());
        // Outer box: 4 (size) + 4 (type) + 1 (u8) + inner box of 16 bytes.
        assert_eq!(stream.data[..4], 25u32.to_be_bytes());
        assert_eq!(stream.data[9..13], 16u32.to_be_bytes());
    }

    #[test]
    fn write_bits() {
        let mut stream = OStream::default();
        assert_eq!(stream.write_bits(1, 1), Ok(()));
        assert_eq!(stream.data.len(), 1);
        assert_eq!(stream.write_bits(2, 3), Ok(()));
        assert_eq!(stream.data.len(), 1);
        assert_eq!(stream.write_bits(1, 4), Ok(()));
        assert_eq!(stream.data.len(), 1);
        assert_eq!(stream.write_bits(1, 4), Ok(()));
        assert_eq!(stream.data.len(), 2);
        assert_eq!(stream.write_bits(4, 4), Ok(()));
        assert_eq!(stream.data.len(), 2);
        assert_eq!(stream.write_u8(0xCC), Ok(()));
        assert_eq!(stream.data, vec![0xA1, 0x14, 0xCC]);
    }
}
