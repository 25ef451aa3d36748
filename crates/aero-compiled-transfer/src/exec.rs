//! Bulk copies against a compiled transfer.
//!
//! Spans are consumed strictly in order and the host buffer cursor advances by each span's usable
//! length. No bounds adjustment happens per span: the spans of a compiled transfer tile
//! `[0, len)` exactly.

use crate::error::{TransferError, TransferResult};
use crate::map::MappingService;
use crate::transfer::{Direction, Transfer, TransferState};

impl<M: MappingService> Transfer<M> {
    /// Run the transfer in its own direction: copy `buf` into guest memory for
    /// [`Direction::Write`], or fill `buf` from guest memory for [`Direction::Read`].
    pub fn execute(&mut self, buf: &mut [u8]) -> TransferResult<()> {
        match self.direction() {
            Direction::Write => self.write_from(buf),
            Direction::Read => self.read_into(buf),
        }
    }

    /// Copy the first `len()` bytes of `src` into guest memory.
    pub fn write_from(&mut self, src: &[u8]) -> TransferResult<()> {
        self.check_exec(Direction::Write, src.len())?;

        let mut cursor = 0usize;
        for span in self.spans() {
            let n = span.usable_len();
            let chunk = &src[cursor..cursor + n];
            // Safety: the span's usable window lies inside a live mapping that is valid for
            // writes (`MappingService` contract), and host buffers never alias guest mappings.
            unsafe {
                core::ptr::copy_nonoverlapping(chunk.as_ptr(), span.usable_ptr(), n);
            }
            cursor += n;
        }
        debug_assert_eq!(cursor, self.len());
        Ok(())
    }

    /// Fill the first `len()` bytes of `dst` from guest memory.
    pub fn read_into(&mut self, dst: &mut [u8]) -> TransferResult<()> {
        self.check_exec(Direction::Read, dst.len())?;

        let mut cursor = 0usize;
        for span in self.spans() {
            let n = span.usable_len();
            let chunk = &mut dst[cursor..cursor + n];
            // Safety: as in `write_from`, with the mapping valid for reads.
            unsafe {
                core::ptr::copy_nonoverlapping(span.usable_ptr() as *const u8, chunk.as_mut_ptr(), n);
            }
            cursor += n;
        }
        debug_assert_eq!(cursor, self.len());
        Ok(())
    }

    fn check_exec(&self, actual: Direction, buf_len: usize) -> TransferResult<()> {
        if self.state() != TransferState::Compiled {
            return Err(TransferError::NotCompiled {
                state: self.state(),
            });
        }
        if self.direction() != actual {
            return Err(TransferError::DirectionMismatch {
                expected: self.direction(),
                actual,
            });
        }
        if buf_len < self.len() {
            return Err(TransferError::BufferTooSmall {
                len: buf_len,
                required: self.len(),
            });
        }
        Ok(())
    }
}
