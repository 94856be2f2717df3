//! Byte sources the reader and loader pull from.

use super::error::{ElfError, ElfResult};

/// Seekable byte source
///
/// The reader borrows a stream for the duration of each call and never keeps
/// it, so the same stream can be handed to the segment loader afterwards.
pub trait ElfStream {
    /// Move the read position to an absolute offset
    fn seek(&mut self, offset: u64) -> ElfResult<()>;

    /// Fill `buf` completely from the current position
    fn read_exact(&mut self, buf: &mut [u8]) -> ElfResult<()>;
}

impl<S: ElfStream + ?Sized> ElfStream for &mut S {
    fn seek(&mut self, offset: u64) -> ElfResult<()> {
        (**self).seek(offset)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> ElfResult<()> {
        (**self).read_exact(buf)
    }
}

/// Stream over an in-memory image, e.g. a program linked into flash
#[derive(Debug, Clone)]
pub struct SliceStream<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ElfStream for SliceStream<'_> {
    fn seek(&mut self, offset: u64) -> ElfResult<()> {
        let offset = usize::try_from(offset).map_err(|_| ElfError::Truncated)?;
        if offset > self.data.len() {
            return Err(ElfError::Truncated);
        }
        self.pos = offset;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> ElfResult<()> {
        let end = self.pos.checked_add(buf.len()).ok_or(ElfError::Truncated)?;
        let src = self.data.get(self.pos..end).ok_or(ElfError::Truncated)?;
        buf.copy_from_slice(src);
        self.pos = end;
        Ok(())
    }
}
