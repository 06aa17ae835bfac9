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
use crate::*;

// This enum must not derive `Clone`: plane buffers have to be cloned with
// error checking through `try_clone`.
#[derive(Debug)]
pub enum Pixels {
    // Used for images with channel depths of 8 bits or fewer.
    Buffer(Vec<u8>),
    // Used for images with channel depths of 9 to 16 bits.
    Buffer16(Vec<u16>),
}

impl Pixels {
    pub(crate) fn create(depth: u8) -> Pixels {
        if depth > 8 {
            Pixels::Buffer16(Vec::new())
        } else {
            Pixels::Buffer(Vec::new())
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Pixels::Buffer(buffer) => buffer.len(),
            Pixels::Buffer16(buffer) => buffer.len(),
        }
    }

    pub(crate) fn has_data(&self) -> bool {
        match self {
            Pixels::Buffer(buffer) => !buffer.is_empty(),
            Pixels::Buffer16(buffer) => !buffer.is_empty(),
        }
    }

    pub(crate) fn resize(&mut self, size: usize, default: u16) -> HeifResult<()> {
        match self {
            Pixels::Buffer(buffer) => {
                if buffer.capacity() < size && buffer.try_reserve_exact(size).is_err() {
                    return HeifError::out_of_memory();
                }
                buffer.resize(size, default as u8);
            }
            Pixels::Buffer16(buffer) => {
                if buffer.capacity() < size && buffer.try_reserve_exact(size).is_err() {
                    return HeifError::out_of_memory();
                }
                buffer.resize(size, default);
            }
        }
        Ok(())
    }

    pub(crate) fn try_clone(&self) -> HeifResult<Pixels> {
        match self {
            Pixels::Buffer(buffer) => {
                let mut copy = create_vec_exact(buffer.len())?;
                copy.extend_from_slice(buffer);
                Ok(Pixels::Buffer(copy))
            }
            Pixels::Buffer16(buffer) => {
                let mut copy = create_vec_exact(buffer.len())?;
                copy.extend_from_slice(buffer);
                Ok(Pixels::Buffer16(copy))
            }
        }
    }

    pub fn slice(&self, offset: u32, size: u32) -> HeifResult<&[u8]> {
        match self {
            Pixels::Buffer(buffer) => {
                let offset: usize = usize_from_u32(offset)?;
                let size: usize = usize_from_u32(size)?;
                let end = checked_add!(offset, size)?;
                check_slice_range(buffer.len(), &(offset..end))?;
                Ok(&buffer[offset..end])
            }
            Pixels::Buffer16(_) => {
                HeifError::invalid_input(SubErrorKind::UnsupportedBitDepth, "16-bit plane")
            }
        }
    }

    pub fn slice_mut(&mut self, offset: u32, size: u32) -> HeifResult<&mut [u8]> {
        match self {
            Pixels::Buffer(buffer) => {
                let offset: usize = usize_from_u32(offset)?;
                let size: usize = usize_from_u32(size)?;
                let end = checked_add!(offset, size)?;
                check_slice_range(buffer.len(), &(offset..end))?;
                Ok(&mut buffer[offset..end])
            }
            Pixels::Buffer16(_) => {
                HeifError::invalid_input(SubErrorKind::UnsupportedBitDepth, "16-bit plane")
            }
        }
    }

    pub fn slice16(&self, offset: u32, size: u32) -> HeifResult<&[u16]> {
        match self {
            Pixels::Buffer(_) => {
                HeifError::invalid_input(SubErrorKind::UnsupportedBitDepth, "8-bit plane")
            }
            Pixels::Buffer16(buffer) => {
                let offset: usize = usize_from_u32(offset)?;
                let size: usize = usize_from_u32(size)?;
                let end = checked_add!(offset, size)?;
                check_slice_range(buffer.len(), &(offset..end))?;
                Ok(&buffer[offset..end])
            }
        }
    }

    pub fn slice16_mut(&mut self, offset: u32, size: u32) -> HeifResult<&mut [u16]> {
        match self {
            Pixels::Buffer(_) => {
                HeifError::invalid_input(SubErrorKind::UnsupportedBitDepth, "8-bit plane")
            }
            Pixels::Buffer16(buffer) => {
                let offset: usize = usize_from_u32(offset)?;
                let size: usize = usize_from_u32(size)?;
                let end = checked_add!(offset, size)?;
                check_slice_range(buffer.len(), &(offset..end))?;
                Ok(&mut buffer[offset..end])
            }
        }
    }
}
