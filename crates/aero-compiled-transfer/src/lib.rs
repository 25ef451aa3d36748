//! Compiled guest-virtual transfers.
//!
//! Devices that move buffers between a guest process's virtual address space and the host do it
//! in two steps:
//!
//! 1. [`Transfer::compile`] walks the virtual range page by page through an
//!    [`AddressTranslator`], coalesces physically contiguous pages into runs and maps each run into
//!    host memory through a [`MappingService`], producing an ordered list of [`Span`]s.
//! 2. [`Transfer::execute`] (or [`Transfer::write_from`] / [`Transfer::read_into`]) copies a flat
//!    host buffer to or from those spans.
//!
//! Compilation either succeeds with spans that exactly tile the requested range or fails with no
//! spans left mapped. Spans are unmapped exactly once, when the transfer is recompiled, released,
//! reset or dropped.
//!
//! Transfers are not internally synchronized: a transfer belongs to one execution context and the
//! caller serializes access to it (and holds whatever lock keeps guest page tables stable for the
//! duration of a compile).

mod error;
mod exec;
pub mod map;
pub mod page;
pub mod ram;
pub mod registry;
pub mod span;
pub mod transfer;
pub mod translate;

pub use error::{ConfigError, RamError, RamResult, TransferError, TransferResult};
pub use map::{HostMapping, MappingService};
pub use page::{PageSize, TransferConfig};
pub use ram::{GuestRam, MapperStats, RamMapper};
pub use registry::{ContextId, SharedTransfer, TransferRegistry};
pub use span::{Span, SpanList};
pub use transfer::{Direction, Transfer, TransferState};
pub use translate::{AddressTranslator, FaultTranslator, PageTable};
