//! Guest page geometry and transfer configuration.

use crate::error::ConfigError;

/// Guest page size in bytes. Always a non-zero power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageSize(u64);

impl PageSize {
    pub const SIZE_4K: PageSize = PageSize(4096);

    pub fn new(size: u64) -> Result<Self, ConfigError> {
        if size == 0 || !size.is_power_of_two() {
            return Err(ConfigError::InvalidPageSize { size });
        }
        Ok(Self(size))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }

    #[inline]
    fn mask(self) -> u64 {
        self.0 - 1
    }

    /// Address of the page containing `addr`.
    #[inline]
    pub fn page_base(self, addr: u64) -> u64 {
        addr & !self.mask()
    }

    /// Byte offset of `addr` within its page.
    #[inline]
    pub fn page_offset(self, addr: u64) -> u64 {
        addr & self.mask()
    }

    #[inline]
    pub fn is_aligned(self, addr: u64) -> bool {
        self.page_offset(addr) == 0
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self::SIZE_4K
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    pub page_size: PageSize,
    /// Longest transfer accepted by [`crate::Transfer::new`]. Guest requests carry a 32-bit length.
    pub max_transfer_len: usize,
}

impl TransferConfig {
    pub fn with_page_size(page_size: PageSize) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            page_size: PageSize::default(),
            max_transfer_len: u32::MAX as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two() {
        assert_eq!(
            PageSize::new(0),
            Err(ConfigError::InvalidPageSize { size: 0 })
        );
        assert_eq!(
            PageSize::new(3000),
            Err(ConfigError::InvalidPageSize { size: 3000 })
        );
        assert_eq!(PageSize::new(64).unwrap().get(), 64);
    }

    #[test]
    fn base_and_offset_split_address() {
        let page = PageSize::SIZE_4K;
        assert_eq!(page.page_base(0x1234_5678), 0x1234_5000);
        assert_eq!(page.page_offset(0x1234_5678), 0x678);
        assert!(page.is_aligned(0x2000));
        assert!(!page.is_aligned(0x2001));
    }
}
