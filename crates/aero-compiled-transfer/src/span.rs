use core::ops::Range;

use crate::map::HostMapping;

/// One physically contiguous run of guest memory mapped into the host.
///
/// The mapping covers whole guest pages; the usable window is the part of it that belongs to the
/// transfer (`usable_offset + usable_len <= mapped.len`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    guest_addr: u64,
    phys_addr: u64,
    mapped: HostMapping,
    usable_offset: usize,
    usable_len: usize,
}

impl Span {
    pub(crate) fn new(
        guest_addr: u64,
        phys_addr: u64,
        mapped: HostMapping,
        usable_offset: usize,
        usable_len: usize,
    ) -> Self {
        debug_assert!(usable_offset
            .checked_add(usable_len)
            .is_some_and(|end| end <= mapped.len));
        Self {
            guest_addr,
            phys_addr,
            mapped,
            usable_offset,
            usable_len,
        }
    }

    /// Guest virtual address of the first usable byte.
    pub fn guest_addr(&self) -> u64 {
        self.guest_addr
    }

    /// Guest physical address of the first mapped byte (page aligned).
    pub fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    pub fn mapped(&self) -> HostMapping {
        self.mapped
    }

    pub fn mapped_len(&self) -> usize {
        self.mapped.len
    }

    pub fn usable_offset(&self) -> usize {
        self.usable_offset
    }

    pub fn usable_len(&self) -> usize {
        self.usable_len
    }

    pub fn usable_range(&self) -> Range<usize> {
        self.usable_offset..self.usable_offset + self.usable_len
    }

    /// Guest virtual range backed by the usable window.
    pub fn guest_range(&self) -> Range<u64> {
        self.guest_addr..self.guest_addr + self.usable_len as u64
    }

    /// Host pointer to the first usable byte.
    pub fn usable_ptr(&self) -> *mut u8 {
        // Safety: `usable_offset <= mapped.len`, so the result stays within (or one past) the
        // mapping's allocation.
        unsafe { self.mapped.as_ptr().add(self.usable_offset) }
    }
}

/// Append-only, insertion-ordered span storage used while a transfer is being compiled.
///
/// Ownership moves to the transfer with [`SpanList::detach`] once every span is in place.
#[derive(Debug, Default)]
pub struct SpanList {
    spans: Vec<Span>,
}

impl SpanList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, span: Span) {
        self.spans.push(span);
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn as_slice(&self) -> &[Span] {
        &self.spans
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Span> {
        self.spans.iter()
    }

    /// Sum of the usable lengths of every span.
    pub fn usable_len(&self) -> usize {
        self.spans.iter().map(Span::usable_len).sum()
    }

    /// Hand the accumulated spans to the caller, leaving the list empty.
    pub fn detach(&mut self) -> Box<[Span]> {
        core::mem::take(&mut self.spans).into_boxed_slice()
    }

    /// Remove every span, yielding them in insertion order.
    pub fn drain(&mut self) -> std::vec::Drain<'_, Span> {
        self.spans.drain(..)
    }
}

impl<'a> IntoIterator for &'a SpanList {
    type Item = &'a Span;
    type IntoIter = core::slice::Iter<'a, Span>;

    fn into_iter(self) -> Self::IntoIter {
        self.spans.iter()
    }
}
