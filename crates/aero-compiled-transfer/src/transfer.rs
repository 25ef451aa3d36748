//! Compiling a guest virtual range into host-mapped spans.
//!
//! The range is walked page by page. Consecutive virtual pages whose physical pages continue at
//! the same stride are coalesced into one run, and each run is mapped into the host as a single
//! span. Runs are discovered greedily in one pass; later runs are never merged with earlier ones.

use core::fmt;

use crate::error::{TransferError, TransferResult};
use crate::map::MappingService;
use crate::page::{PageSize, TransferConfig};
use crate::registry::Registration;
use crate::span::{Span, SpanList};
use crate::translate::AddressTranslator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Guest memory is copied out into the host buffer.
    Read,
    /// The host buffer is copied into guest memory.
    Write,
}

impl Direction {
    #[inline]
    pub fn is_write(self) -> bool {
        self == Direction::Write
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// No spans; waiting for [`Transfer::compile`].
    Pending,
    /// Spans tile the whole range.
    Compiled,
    /// The last compile pass failed; no spans are held.
    Failed,
}

/// A guest virtual range prepared for bulk copies.
///
/// Every span held by the transfer is unmapped exactly once: on re-compilation, on
/// [`Transfer::release`]/[`Transfer::reset`], or when the transfer is dropped.
pub struct Transfer<M: MappingService> {
    mapper: M,
    config: TransferConfig,
    vaddr: u64,
    len: usize,
    direction: Direction,
    state: TransferState,
    spans: Box<[Span]>,
    pub(crate) registration: Option<Registration>,
}

impl<M: MappingService> fmt::Debug for Transfer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("vaddr", &format_args!("0x{:x}", self.vaddr))
            .field("len", &self.len)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("spans", &self.spans.len())
            .field("registered", &self.registration.is_some())
            .finish()
    }
}

impl<M: MappingService> Transfer<M> {
    /// Create a pending transfer for `len` bytes at guest virtual address `vaddr`.
    pub fn new(
        mapper: M,
        config: TransferConfig,
        vaddr: u64,
        len: usize,
        direction: Direction,
    ) -> TransferResult<Self> {
        validate_request(&config, vaddr, len)?;
        Ok(Self {
            mapper,
            config,
            vaddr,
            len,
            direction,
            state: TransferState::Pending,
            spans: Box::default(),
            registration: None,
        })
    }

    pub fn vaddr(&self) -> u64 {
        self.vaddr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn is_compiled(&self) -> bool {
        self.state == TransferState::Compiled
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Spans of a compiled transfer, in guest address order. Empty unless compiled.
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Resolve and map the whole range.
    ///
    /// Any spans from a previous compile are released first, and the transfer leaves its
    /// liveness registry. On failure every span mapped during this pass has already been
    /// unmapped and the transfer is left in [`TransferState::Failed`].
    pub fn compile<T>(&mut self, translator: &mut T) -> TransferResult<()>
    where
        T: AddressTranslator + ?Sized,
    {
        let _span = tracing::trace_span!(
            "compiled_transfer_prepare",
            vaddr = self.vaddr,
            len = self.len,
            write = self.direction.is_write()
        )
        .entered();

        self.registration = None;
        self.release();

        match compile_spans(
            &self.mapper,
            self.config.page_size,
            self.vaddr,
            self.len,
            translator,
        ) {
            Ok(spans) => {
                tracing::trace!(num_spans = spans.len(), "compiled");
                self.spans = spans;
                self.state = TransferState::Compiled;
                Ok(())
            }
            Err(err) => {
                self.state = TransferState::Failed;
                Err(err)
            }
        }
    }

    /// Unmap every span and return to the pending state. Returns the number of spans released.
    ///
    /// A pending or failed transfer holds no spans, so this is a no-op for them.
    pub fn release(&mut self) -> usize {
        let spans = core::mem::take(&mut self.spans);
        for span in spans.iter() {
            self.mapper.unmap(span.mapped(), span.usable_range());
        }
        if self.state == TransferState::Compiled {
            self.state = TransferState::Pending;
        }
        spans.len()
    }

    /// Re-target the transfer at a new request, releasing any spans it holds.
    pub fn reset(&mut self, vaddr: u64, len: usize, direction: Direction) -> TransferResult<()> {
        validate_request(&self.config, vaddr, len)?;
        self.release();
        self.vaddr = vaddr;
        self.len = len;
        self.direction = direction;
        self.state = TransferState::Pending;
        Ok(())
    }
}

impl<M: MappingService> Drop for Transfer<M> {
    fn drop(&mut self) {
        self.release();
    }
}

fn validate_request(config: &TransferConfig, vaddr: u64, len: usize) -> TransferResult<()> {
    if len == 0 {
        return Err(TransferError::EmptyTransfer);
    }
    if len > config.max_transfer_len {
        return Err(TransferError::TooLarge {
            len,
            max: config.max_transfer_len,
        });
    }
    if vaddr.checked_add(len as u64).is_none() {
        return Err(TransferError::AddressOverflow { vaddr, len });
    }
    Ok(())
}

/// Spans mapped so far in one compile pass. Anything still held when this is dropped is
/// unmapped, so every early return unwinds the pass.
struct PendingSpans<'a, M: MappingService> {
    mapper: &'a M,
    spans: SpanList,
}

impl<M: MappingService> Drop for PendingSpans<'_, M> {
    fn drop(&mut self) {
        if self.spans.is_empty() {
            return;
        }
        tracing::debug!(num_spans = self.spans.len(), "unwinding partially compiled transfer");
        for span in self.spans.drain() {
            self.mapper.unmap(span.mapped(), span.usable_range());
        }
    }
}

fn compile_spans<M, T>(
    mapper: &M,
    page: PageSize,
    vaddr: u64,
    len: usize,
    translator: &mut T,
) -> TransferResult<Box<[Span]>>
where
    M: MappingService,
    T: AddressTranslator + ?Sized,
{
    debug_assert!(len > 0);

    let page_len = page.get();
    let last_page = page.page_base(vaddr + (len as u64 - 1));
    let mut cur = vaddr;
    let mut remaining = len;
    let mut pending = PendingSpans {
        mapper,
        spans: SpanList::new(),
    };

    while remaining > 0 {
        let start_page = page.page_base(cur);
        let Some(start_phys) = translator.translate(start_page) else {
            tracing::warn!("no physical backing for guest page 0x{start_page:x}");
            return Err(TransferError::Translation { vaddr: start_page });
        };

        let mut end_page = start_page;
        while end_page < last_page {
            let next_page = end_page + page_len;
            let Some(next_phys) = translator.translate(next_page) else {
                tracing::debug!("run ends at unbacked guest page 0x{next_page:x}");
                break;
            };

            // Stop as soon as the physical pages are not a linear continuation of the run.
            if next_phys < start_phys || next_phys - start_phys != next_page - start_page {
                break;
            }

            end_page = next_page;
        }

        let run_len = usize::try_from(end_page - start_page + page_len).map_err(|_| {
            TransferError::Mapping {
                paddr: start_phys,
                len: usize::MAX,
            }
        })?;

        let mapped = match mapper.map(start_phys, run_len) {
            Some(mapped) if mapped.len != 0 => mapped,
            _ => {
                tracing::warn!("failed to map guest physical 0x{start_phys:x}+0x{run_len:x}");
                return Err(TransferError::Mapping {
                    paddr: start_phys,
                    len: run_len,
                });
            }
        };
        if mapped.len < run_len {
            tracing::warn!(
                "short mapping of guest physical 0x{start_phys:x}: requested 0x{run_len:x} got 0x{:x}",
                mapped.len
            );
            mapper.unmap(mapped, 0..0);
            return Err(TransferError::ShortMapping {
                paddr: start_phys,
                requested: run_len,
                mapped: mapped.len,
            });
        }

        let offset = page.page_offset(cur) as usize;
        let usable = (run_len - offset).min(remaining);
        pending
            .spans
            .push(Span::new(cur, start_phys, mapped, offset, usable));

        cur += usable as u64;
        remaining -= usable;
    }

    Ok(pending.spans.detach())
}
