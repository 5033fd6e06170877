//! Executable images in the NOFF layout.
//!
//! An image starts with a little-endian header of ten `u32` words: the magic number
//! followed by `(virtual_addr, in_file_addr, size)` triples for the code, initialized
//! data and uninitialized data segments. Segment bytes follow the header.

use alloc::{boxed::Box, vec::Vec};
use core::ops::Range;

use crate::{OpenFile, StorageError, VmError};

/// Magic number identifying a NOFF image.
pub const NOFF_MAGIC: u32 = 0x00BA_DFAD;

/// Size of the NOFF header in bytes.
const HEADER_SIZE: usize = 10 * 4;

/// One segment of an executable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    /// Virtual address the segment is loaded at.
    pub virtual_addr: usize,
    /// Offset of the segment's bytes inside the image file.
    pub in_file_addr: usize,
    /// Size of the segment in bytes.
    pub size: usize,
}

impl Segment {
    /// Returns the virtual address range covered by the segment.
    pub fn range(&self) -> Range<usize> {
        self.virtual_addr..self.virtual_addr + self.size
    }

    /// Returns the part of `range` that overlaps this segment.
    pub fn overlap(&self, range: &Range<usize>) -> Option<Range<usize>> {
        let start = range.start.max(self.virtual_addr);
        let end = range.end.min(self.virtual_addr + self.size);
        (start < end).then_some(start..end)
    }

    /// Returns true if `range` lies entirely inside this segment.
    pub fn contains(&self, range: &Range<usize>) -> bool {
        range.start >= self.virtual_addr && range.end <= self.virtual_addr + self.size
    }

    fn decode(words: &[u32]) -> Self {
        Self {
            virtual_addr: words[0] as usize,
            in_file_addr: words[1] as usize,
            size: words[2] as usize,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        for word in [self.virtual_addr, self.in_file_addr, self.size] {
            out.extend_from_slice(&(word as u32).to_le_bytes());
        }
    }
}

/// An opened executable image.
pub struct Executable {
    file: Box<dyn OpenFile>,
    code: Segment,
    init_data: Segment,
    uninit_data: Segment,
}

impl Executable {
    /// Reads and validates the header of an image.
    pub fn open(mut file: Box<dyn OpenFile>) -> Result<Self, VmError> {
        let mut header = [0u8; HEADER_SIZE];
        match file.read_exact_at(&mut header, 0) {
            Ok(()) => {}
            Err(StorageError::ShortTransfer | StorageError::OutOfRange { .. }) => {
                return Err(VmError::InvalidExecutable);
            }
            Err(err) => return Err(err.into()),
        }

        let mut words = [0u32; 10];
        for (word, bytes) in words.iter_mut().zip(header.chunks_exact(4)) {
            *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
        if words[0] != NOFF_MAGIC {
            log::warn!("executable has bad magic {:#x}", words[0]);
            return Err(VmError::InvalidExecutable);
        }

        let executable = Self {
            file,
            code: Segment::decode(&words[1..4]),
            init_data: Segment::decode(&words[4..7]),
            uninit_data: Segment::decode(&words[7..10]),
        };
        executable.validate()?;
        Ok(executable)
    }

    /// Checks that segment bytes lie inside the file and that segments follow each other
    /// in address order without overlapping.
    fn validate(&self) -> Result<(), VmError> {
        let len = self.file.len();
        for segment in [self.code(), self.init_data()] {
            let end = segment.in_file_addr.checked_add(segment.size);
            if segment.size > 0 && end.is_none_or(|end| end > len) {
                log::warn!(
                    "executable segment at file offset {:#x} runs past the end of the image",
                    segment.in_file_addr
                );
                return Err(VmError::InvalidExecutable);
            }
        }

        let mut end = 0;
        for segment in [self.code(), self.init_data(), self.uninit_data()] {
            if segment.size == 0 {
                continue;
            }
            if segment.virtual_addr < end {
                log::warn!(
                    "executable segment at {:#x} overlaps the one before it",
                    segment.virtual_addr
                );
                return Err(VmError::InvalidExecutable);
            }
            end = segment.range().end;
        }
        Ok(())
    }

    /// Returns the code segment.
    pub fn code(&self) -> Segment {
        self.code
    }

    /// Returns the initialized data segment.
    pub fn init_data(&self) -> Segment {
        self.init_data
    }

    /// Returns the uninitialized data segment.
    pub fn uninit_data(&self) -> Segment {
        self.uninit_data
    }

    /// Returns the number of bytes the program occupies, excluding the stack.
    pub fn size(&self) -> usize {
        [self.code, self.init_data, self.uninit_data]
            .iter()
            .filter(|segment| segment.size > 0)
            .map(|segment| segment.virtual_addr + segment.size)
            .max()
            .unwrap_or(0)
    }

    /// Reads bytes of the code segment, starting `offset` bytes into the segment.
    pub fn read_code(&mut self, buf: &mut [u8], offset: usize) -> Result<(), StorageError> {
        Self::read_segment(&mut *self.file, &self.code, buf, offset)
    }

    /// Reads bytes of the initialized data segment, starting `offset` bytes into the segment.
    pub fn read_data(&mut self, buf: &mut [u8], offset: usize) -> Result<(), StorageError> {
        Self::read_segment(&mut *self.file, &self.init_data, buf, offset)
    }

    fn read_segment(
        file: &mut dyn OpenFile,
        segment: &Segment,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<(), StorageError> {
        if offset + buf.len() > segment.size {
            return Err(StorageError::OutOfRange {
                offset,
                len: buf.len(),
            });
        }
        file.read_exact_at(buf, segment.in_file_addr + offset)
    }
}

/// Assembles NOFF images with code loaded at address zero and data right after it.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    code: Vec<u8>,
    data: Vec<u8>,
    data_addr: Option<usize>,
    bss: usize,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the contents of the code segment.
    pub fn code(mut self, code: &[u8]) -> Self {
        self.code = code.to_vec();
        self
    }

    /// Sets the contents of the initialized data segment.
    pub fn data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    /// Places the data segment at an explicit virtual address instead of after the code.
    pub fn data_at(mut self, virtual_addr: usize) -> Self {
        self.data_addr = Some(virtual_addr);
        self
    }

    /// Sets the size of the uninitialized data segment.
    pub fn bss(mut self, size: usize) -> Self {
        self.bss = size;
        self
    }

    /// Serializes the image.
    pub fn build(&self) -> Vec<u8> {
        let code = Segment {
            virtual_addr: 0,
            in_file_addr: HEADER_SIZE,
            size: self.code.len(),
        };
        let init_data = Segment {
            virtual_addr: self.data_addr.unwrap_or(self.code.len()),
            in_file_addr: HEADER_SIZE + self.code.len(),
            size: self.data.len(),
        };
        let uninit_data = Segment {
            virtual_addr: init_data.virtual_addr + init_data.size,
            in_file_addr: 0,
            size: self.bss,
        };

        let mut out = Vec::with_capacity(HEADER_SIZE + self.code.len() + self.data.len());
        out.extend_from_slice(&NOFF_MAGIC.to_le_bytes());
        code.encode(&mut out);
        init_data.encode(&mut out);
        uninit_data.encode(&mut out);
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&self.data);
        out
    }
}
