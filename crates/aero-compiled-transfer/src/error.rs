use thiserror::Error;

use crate::transfer::{Direction, TransferState};

pub type TransferResult<T> = Result<T, TransferError>;

/// Errors surfaced by transfer creation, compilation and execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The first page of a run has no physical backing.
    #[error("no physical backing for guest page 0x{vaddr:x}")]
    Translation { vaddr: u64 },

    /// The mapping service returned nothing (or an empty mapping) for a physical run.
    #[error("failed to map guest physical range 0x{paddr:x}+0x{len:x}")]
    Mapping { paddr: u64, len: usize },

    /// The mapping service returned fewer bytes than the run covers.
    #[error(
        "short mapping of guest physical range 0x{paddr:x}: requested 0x{requested:x} got 0x{mapped:x}"
    )]
    ShortMapping {
        paddr: u64,
        requested: usize,
        mapped: usize,
    },

    #[error("transfer length must be non-zero")]
    EmptyTransfer,

    #[error("transfer length {len} exceeds the maximum of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("transfer range 0x{vaddr:x}+0x{len:x} overflows the guest address space")]
    AddressOverflow { vaddr: u64, len: usize },

    #[error("transfer is not compiled (state: {state:?})")]
    NotCompiled { state: TransferState },

    #[error("host buffer of {len} bytes is smaller than the transfer ({required} bytes)")]
    BufferTooSmall { len: usize, required: usize },

    #[error("transfer direction is {expected:?} but a {actual:?} copy was requested")]
    DirectionMismatch {
        expected: Direction,
        actual: Direction,
    },
}

impl TransferError {
    /// Whether the error came from resolving or mapping guest memory, as opposed to a caller
    /// precondition. Only these are worth retrying after the guest fault has been serviced.
    pub fn is_guest_fault(&self) -> bool {
        matches!(
            self,
            TransferError::Translation { .. }
                | TransferError::Mapping { .. }
                | TransferError::ShortMapping { .. }
        )
    }
}

/// Errors validating a [`crate::TransferConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("page size {size} is not a non-zero power of two")]
    InvalidPageSize { size: u64 },
}

/// Errors returned by the reference [`crate::ram::GuestRam`] backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RamError {
    #[error("guest memory access out of range: paddr=0x{paddr:x} len={len} size=0x{size:x}")]
    OutOfRange { paddr: u64, len: usize, size: u64 },

    #[error("guest memory size {size} does not fit in usize")]
    SizeTooLarge { size: u64 },
}

pub type RamResult<T> = Result<T, RamError>;
