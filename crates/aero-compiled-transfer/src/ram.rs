//! Flat guest RAM and a [`MappingService`] that hands out pointers into it.
//!
//! Guest RAM is stored as atomic bytes so that host pointers can be handed out from a shared
//! reference and other threads can still access RAM through [`GuestRam::read_into`] /
//! [`GuestRam::write_from`] without data-race UB. Copies through mapped spans are plain memcpy;
//! callers serialize those against other accesses to the same bytes.

use core::ops::Range;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU8, Ordering};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{RamError, RamResult};
use crate::map::{HostMapping, MappingService};

/// Contiguous guest physical RAM covering `[0, size)`.
pub struct GuestRam {
    bytes: Box<[AtomicU8]>,
}

impl core::fmt::Debug for GuestRam {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GuestRam")
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl GuestRam {
    pub fn new(size: u64) -> RamResult<Self> {
        let size_usize = usize::try_from(size).map_err(|_| RamError::SizeTooLarge { size })?;
        Ok(Self {
            bytes: (0..size_usize).map(|_| AtomicU8::new(0)).collect(),
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn range(&self, paddr: u64, len: usize) -> RamResult<Range<usize>> {
        let size = self.size();
        let out_of_range = RamError::OutOfRange { paddr, len, size };
        let end = paddr
            .checked_add(len as u64)
            .ok_or_else(|| out_of_range.clone())?;
        if end > size {
            return Err(out_of_range);
        }
        // Both fit: `end <= size` and `size` came from a `usize`.
        Ok(paddr as usize..end as usize)
    }

    pub fn read_into(&self, paddr: u64, dst: &mut [u8]) -> RamResult<()> {
        let range = self.range(paddr, dst.len())?;
        for (slot, byte) in dst.iter_mut().zip(&self.bytes[range]) {
            *slot = byte.load(Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn write_from(&self, paddr: u64, src: &[u8]) -> RamResult<()> {
        let range = self.range(paddr, src.len())?;
        for (byte, value) in self.bytes[range].iter().zip(src) {
            byte.store(*value, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Host pointer to `len` bytes at `paddr`, or `None` if the range is empty or out of range.
    pub fn host_ptr(&self, paddr: u64, len: usize) -> Option<NonNull<u8>> {
        if len == 0 {
            return None;
        }
        let range = self.range(paddr, len).ok()?;
        // `AtomicU8` has the same layout as `u8` and permits mutation through shared references.
        let base = self.bytes.as_ptr().cast::<u8>().cast_mut();
        NonNull::new(base.wrapping_add(range.start))
    }
}

/// Counters kept by [`RamMapper`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapperStats {
    pub maps: u64,
    pub unmaps: u64,
    pub failed_maps: u64,
    /// Unmaps of mappings that were not outstanding (double unmap or foreign pointer).
    pub bad_unmaps: u64,
    pub bytes_mapped: u64,
}

#[derive(Debug, Default)]
struct MapperState {
    outstanding: HashMap<(usize, usize), u32>,
    faults: BTreeSet<u64>,
    stats: MapperStats,
}

/// [`MappingService`] over a [`GuestRam`], with accounting and fault injection.
#[derive(Debug)]
pub struct RamMapper {
    ram: Arc<GuestRam>,
    granularity: usize,
    state: Mutex<MapperState>,
}

impl RamMapper {
    pub fn new(ram: Arc<GuestRam>) -> Self {
        Self::with_granularity(ram, 1)
    }

    /// Round every mapping up to a multiple of `granularity` bytes (clamped to the end of RAM).
    pub fn with_granularity(ram: Arc<GuestRam>, granularity: usize) -> Self {
        Self {
            ram,
            granularity: granularity.max(1),
            state: Mutex::new(MapperState::default()),
        }
    }

    pub fn ram(&self) -> &Arc<GuestRam> {
        &self.ram
    }

    fn state(&self) -> MutexGuard<'_, MapperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every later mapping that covers `paddr` fail.
    pub fn fail_map_at(&self, paddr: u64) {
        self.state().faults.insert(paddr);
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    pub fn stats(&self) -> MapperStats {
        self.state().stats
    }

    /// Number of mappings handed out and not yet unmapped.
    pub fn outstanding(&self) -> usize {
        self.state().outstanding.values().map(|&n| n as usize).sum()
    }

    fn mapped_len(&self, paddr: u64, len: usize) -> usize {
        let rounded = len
            .checked_next_multiple_of(self.granularity)
            .unwrap_or(len);
        let available = self.ram.size().saturating_sub(paddr);
        let available = usize::try_from(available).unwrap_or(usize::MAX);
        rounded.min(available).max(len)
    }
}

unsafe impl MappingService for RamMapper {
    fn map(&self, paddr: u64, len: usize) -> Option<HostMapping> {
        let mut state = self.state();
        let end = paddr.saturating_add(len as u64);
        let faulted = state.faults.range(paddr..end).next().is_some();

        let mapped_len = self.mapped_len(paddr, len);
        let base = if faulted {
            None
        } else {
            self.ram.host_ptr(paddr, mapped_len)
        };
        let Some(base) = base else {
            state.stats.failed_maps += 1;
            return None;
        };

        *state
            .outstanding
            .entry((base.as_ptr() as usize, mapped_len))
            .or_default() += 1;
        state.stats.maps += 1;
        state.stats.bytes_mapped += mapped_len as u64;
        Some(HostMapping {
            base,
            len: mapped_len,
        })
    }

    fn unmap(&self, mapping: HostMapping, access: Range<usize>) {
        let mut state = self.state();
        state.stats.unmaps += 1;

        if access.start > access.end || access.end > mapping.len {
            tracing::error!(
                ?access,
                len = mapping.len,
                "unmap access range outside of mapping"
            );
        }

        let key = (mapping.as_ptr() as usize, mapping.len);
        match state.outstanding.get_mut(&key) {
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    state.outstanding.remove(&key);
                }
            }
            None => {
                tracing::error!(
                    base = key.0,
                    len = key.1,
                    "unmap of a mapping that is not outstanding"
                );
                state.stats.bad_unmaps += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_read_write_and_bounds() {
        let ram = GuestRam::new(64).unwrap();
        ram.write_from(60, &[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 4];
        ram.read_into(60, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        assert_eq!(
            ram.read_into(62, &mut buf),
            Err(RamError::OutOfRange {
                paddr: 62,
                len: 4,
                size: 64
            })
        );
        assert!(matches!(
            ram.write_from(u64::MAX, &[0]),
            Err(RamError::OutOfRange { .. })
        ));
        assert!(ram.host_ptr(64, 1).is_none());
        assert!(ram.host_ptr(0, 0).is_none());
    }

    #[test]
    fn mapper_rounds_up_and_tracks_outstanding() {
        let ram = Arc::new(GuestRam::new(0x3000).unwrap());
        let mapper = RamMapper::with_granularity(ram, 0x2000);

        let m = mapper.map(0x1000, 0x800).unwrap();
        assert_eq!(m.len, 0x2000);
        assert_eq!(mapper.outstanding(), 1);

        // Clamped to the end of RAM.
        let tail = mapper.map(0x2000, 0x10).unwrap();
        assert_eq!(tail.len, 0x1000);

        mapper.unmap(m, 0..0x800);
        mapper.unmap(tail, 0..0x10);
        assert_eq!(mapper.outstanding(), 0);

        let stats = mapper.stats();
        assert_eq!(stats.maps, 2);
        assert_eq!(stats.unmaps, 2);
        assert_eq!(stats.bad_unmaps, 0);
    }

    #[test]
    fn mapper_detects_double_unmap() {
        let ram = Arc::new(GuestRam::new(0x1000).unwrap());
        let mapper = RamMapper::new(ram);

        let m = mapper.map(0, 0x100).unwrap();
        mapper.unmap(m, 0..0x100);
        mapper.unmap(m, 0..0x100);
        assert_eq!(mapper.stats().bad_unmaps, 1);
    }

    #[test]
    fn injected_fault_fails_covering_maps_only() {
        let ram = Arc::new(GuestRam::new(0x4000).unwrap());
        let mapper = RamMapper::new(ram);
        mapper.fail_map_at(0x2000);

        assert!(mapper.map(0x1000, 0x2000).is_none());
        let ok = mapper.map(0x1000, 0x1000).unwrap();
        mapper.unmap(ok, 0..0x1000);

        mapper.clear_faults();
        let ok = mapper.map(0x2000, 0x1000).unwrap();
        mapper.unmap(ok, 0..0x1000);

        assert_eq!(mapper.stats().failed_maps, 1);
        assert_eq!(mapper.outstanding(), 0);
    }

    #[test]
    fn writes_through_host_pointer_are_visible() {
        let ram = GuestRam::new(16).unwrap();
        let ptr = ram.host_ptr(4, 4).unwrap();
        unsafe { core::ptr::copy_nonoverlapping([9u8, 8, 7, 6].as_ptr(), ptr.as_ptr(), 4) };

        let mut buf = [0u8; 4];
        ram.read_into(4, &mut buf).unwrap();
        assert_eq!(buf, [9, 8, 7, 6]);
    }
}
