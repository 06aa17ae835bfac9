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

use crate::decoder::GrowStatus;
use crate::decoder::StreamReader;
use crate::decoder::IO;
use crate::internal_utils::checked_add;
use crate::internal_utils::u64_from_usize;
use crate::internal_utils::usize_from_u64;
use crate::*;

use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;

/// IO over a fully in-memory file.
#[derive(Debug, Default)]
pub struct DecoderMemoryIO {
    pub data: Vec<u8>,
}

impl IO for DecoderMemoryIO {
    fn read(&mut self, offset: u64, max_read_size: usize) -> HeifResult<&[u8]> {
        let size = self.size_hint();
        if offset > size {
            return HeifError::end_of_data();
        }
        let offset = offset as usize;
        let available_size = self.data.len() - offset;
        let size_to_read = std::cmp::min(max_read_size, available_size);
        Ok(&self.data[offset..offset + size_to_read])
    }

    fn size_hint(&self) -> u64 {
        self.data.len() as u64
    }

    fn persistent(&self) -> bool {
        true
    }
}

/// IO over a seekable file. Reads are buffered into a scratch buffer that is
/// reused across calls, so no per-read allocation happens in steady state.
#[derive(Debug, Default)]
pub struct DecoderFileIO {
    file: Option<File>,
    buffer: Vec<u8>,
}

impl DecoderFileIO {
    pub fn create(filename: &str) -> HeifResult<DecoderFileIO> {
        let file = File::open(filename)
            .or(HeifError::input_does_not_exist(format!("cannot open {filename}")))?;
        Ok(DecoderFileIO {
            file: Some(file),
            buffer: Vec::new(),
        })
    }
}

impl IO for DecoderFileIO {
    fn read(&mut self, offset: u64, max_read_size: usize) -> HeifResult<&[u8]> {
        let file_size = self.size_hint();
        if offset > file_size {
            return HeifError::end_of_data();
        }
        let available_size = (file_size - offset) as usize;
        let size_to_read = std::cmp::min(max_read_size, available_size);
        if size_to_read > 0 {
            if self.buffer.capacity() < size_to_read {
                self.buffer.reserve(size_to_read - self.buffer.len());
            }
            self.buffer.resize(size_to_read, 0);
            let file = self.file.as_mut().unwrap();
            if file.seek(SeekFrom::Start(offset)).is_err()
                || file.read_exact(self.buffer.as_mut_slice()).is_err()
            {
                return HeifError::end_of_data();
            }
        } else {
            self.buffer.clear();
        }
        Ok(self.buffer.as_slice())
    }

    fn size_hint(&self) -> u64 {
        match self.file.as_ref().unwrap().metadata() {
            Ok(metadata) => metadata.len(),
            Err(_) => 0,
        }
    }

    fn persistent(&self) -> bool {
        false
    }
}

/// IO over a caller-supplied [StreamReader]. The reader may represent a file
/// that is still growing: when the requested range is beyond the bytes that
/// have arrived so far, `wait_for_file_size` decides between suspending the
/// parse (Timeout) and a definitive end of data (SizeBeyondEof).
pub struct DecoderStreamIO {
    reader: Box<dyn StreamReader>,
    buffer: Vec<u8>,
}

impl DecoderStreamIO {
    pub fn create(reader: Box<dyn StreamReader>) -> DecoderStreamIO {
        DecoderStreamIO {
            reader,
            buffer: Vec::new(),
        }
    }
}

impl IO for DecoderStreamIO {
    fn read(&mut self, offset: u64, max_read_size: usize) -> HeifResult<&[u8]> {
        let target = checked_add!(offset, u64_from_usize(max_read_size)?)?;
        let size_to_read = match self.reader.wait_for_file_size(target) {
            GrowStatus::SizeReached => max_read_size,
            GrowStatus::Timeout => return HeifError::waiting_on_io(),
            GrowStatus::SizeBeyondEof => {
                let available = self.reader.get_position_limit();
                if offset >= available {
                    0
                } else {
                    usize_from_u64(std::cmp::min(
                        available - offset,
                        u64_from_usize(max_read_size)?,
                    ))?
                }
            }
        };
        self.buffer.resize(size_to_read, 0);
        if size_to_read > 0 {
            self.reader.seek(offset)?;
            self.reader.read(&mut self.buffer)?;
        }
        Ok(self.buffer.as_slice())
    }

    fn size_hint(&self) -> u64 {
        self.reader.get_position_limit()
    }

    fn persistent(&self) -> bool {
        false
    }
}
