//! Guest physical → host memory mapping.

use core::ops::Range;
use core::ptr::NonNull;
use std::sync::Arc;

/// A host-addressable view of a guest physical range, as returned by [`MappingService::map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostMapping {
    pub base: NonNull<u8>,
    /// Bytes actually mapped. May exceed the requested length when the service rounds up to its
    /// own granularity.
    pub len: usize,
}

// Safety: a `HostMapping` is a plain (pointer, length) pair; validity of the pointed-to memory is
// guaranteed by the `MappingService` that produced it, independent of the thread holding it.
unsafe impl Send for HostMapping {}
unsafe impl Sync for HostMapping {}

impl HostMapping {
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }
}

/// Turns guest physical ranges into host memory and releases them again.
///
/// # Safety
/// Implementors must guarantee that a [`HostMapping`] returned from [`MappingService::map`]
/// points to memory valid for reads and writes of `mapping.len` bytes, backing the requested
/// guest physical range starting at its first byte, until that mapping is passed to
/// [`MappingService::unmap`].
pub unsafe trait MappingService {
    /// Map `len` bytes of guest physical memory starting at `paddr`.
    ///
    /// Returns `None` if the range cannot be mapped. The returned length may be larger than `len`
    /// but a shorter mapping is treated as a failure by callers.
    fn map(&self, paddr: u64, len: usize) -> Option<HostMapping>;

    /// Release a mapping returned by [`MappingService::map`]. `access` is the byte range within the
    /// mapping that was actually used by the caller. Called exactly once per successful `map`.
    fn unmap(&self, mapping: HostMapping, access: Range<usize>);
}

unsafe impl<M: MappingService + ?Sized> MappingService for &M {
    #[inline]
    fn map(&self, paddr: u64, len: usize) -> Option<HostMapping> {
        (**self).map(paddr, len)
    }

    #[inline]
    fn unmap(&self, mapping: HostMapping, access: Range<usize>) {
        (**self).unmap(mapping, access)
    }
}

unsafe impl<M: MappingService + ?Sized> MappingService for Arc<M> {
    #[inline]
    fn map(&self, paddr: u64, len: usize) -> Option<HostMapping> {
        (**self).map(paddr, len)
    }

    #[inline]
    fn unmap(&self, mapping: HostMapping, access: Range<usize>) {
        (**self).unmap(mapping, access)
    }
}
