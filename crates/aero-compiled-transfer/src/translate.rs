//! Virtual page → physical page resolution.
//!
//! A miss is an ordinary outcome: the page may be unmapped, have no backing, or fault in the
//! requesting context. Translators must be side-effect free from the caller's point of view and
//! safe to call repeatedly; the compiler never caches results across calls.

use std::collections::BTreeMap;
use std::fmt;

use crate::page::PageSize;

pub trait AddressTranslator {
    /// Resolve the page-aligned virtual address `vpage` to the physical address of its backing
    /// page, or `None` if there is none.
    fn translate(&mut self, vpage: u64) -> Option<u64>;
}

impl<F> AddressTranslator for F
where
    F: FnMut(u64) -> Option<u64>,
{
    #[inline]
    fn translate(&mut self, vpage: u64) -> Option<u64> {
        self(vpage)
    }
}

/// Adapts a page walk that reports faults (e.g. an MMU returning `Result<u64, PageFault>`) to an
/// [`AddressTranslator`]. Faults become misses; the walk itself is never retried.
pub struct FaultTranslator<F> {
    walk: F,
}

impl<F> FaultTranslator<F> {
    pub fn new(walk: F) -> Self {
        Self { walk }
    }

    pub fn into_inner(self) -> F {
        self.walk
    }
}

impl<F, E> AddressTranslator for FaultTranslator<F>
where
    F: FnMut(u64) -> Result<u64, E>,
    E: fmt::Debug,
{
    fn translate(&mut self, vpage: u64) -> Option<u64> {
        match (self.walk)(vpage) {
            Ok(paddr) => Some(paddr),
            Err(fault) => {
                tracing::trace!(vpage, ?fault, "page walk faulted");
                None
            }
        }
    }
}

/// Software page table: a sparse map from virtual page to physical page.
///
/// Physical page 0 is a valid backing; absence is the only miss.
#[derive(Debug, Clone, Default)]
pub struct PageTable {
    page_size: PageSize,
    entries: BTreeMap<u64, u64>,
    lookups: u64,
}

impl PageTable {
    pub fn new(page_size: PageSize) -> Self {
        Self {
            page_size,
            entries: BTreeMap::new(),
            lookups: 0,
        }
    }

    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    /// Map the page containing `vaddr` to the page containing `paddr`, replacing any previous
    /// entry.
    pub fn map_page(&mut self, vaddr: u64, paddr: u64) -> Option<u64> {
        let ps = self.page_size;
        self.entries.insert(ps.page_base(vaddr), ps.page_base(paddr))
    }

    pub fn unmap_page(&mut self, vaddr: u64) -> Option<u64> {
        self.entries.remove(&self.page_size.page_base(vaddr))
    }

    /// Map `pages` consecutive virtual pages starting at `vaddr` to consecutive physical pages
    /// starting at `paddr`.
    pub fn map_range(&mut self, vaddr: u64, paddr: u64, pages: u64) {
        let step = self.page_size.get();
        for i in 0..pages {
            self.map_page(vaddr + i * step, paddr + i * step);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of translations performed so far.
    pub fn lookups(&self) -> u64 {
        self.lookups
    }
}

impl AddressTranslator for PageTable {
    fn translate(&mut self, vpage: u64) -> Option<u64> {
        debug_assert!(self.page_size.is_aligned(vpage));
        self.lookups += 1;
        self.entries.get(&vpage).copied()
    }
}
