#![allow(dead_code)]

use std::sync::Arc;

use aero_compiled_transfer::{
    Direction, GuestRam, PageSize, PageTable, RamMapper, Transfer, TransferConfig,
};

pub const PAGE: u64 = 0x1000;

/// A guest with flat RAM, one address space and a mapper over that RAM.
pub struct Guest {
    pub mapper: Arc<RamMapper>,
    pub page_table: PageTable,
}

impl Guest {
    pub fn new(ram_pages: u64) -> Self {
        let ram = Arc::new(GuestRam::new(ram_pages * PAGE).expect("guest RAM"));
        Self {
            mapper: Arc::new(RamMapper::new(ram)),
            page_table: PageTable::new(PageSize::SIZE_4K),
        }
    }

    /// Back consecutive virtual pages starting at `vaddr` with the given physical page numbers.
    pub fn map_pages(&mut self, vaddr: u64, ppns: &[u64]) {
        for (i, &ppn) in ppns.iter().enumerate() {
            self.page_table.map_page(vaddr + i as u64 * PAGE, ppn * PAGE);
        }
    }

    pub fn transfer(&self, vaddr: u64, len: usize, direction: Direction) -> Transfer<Arc<RamMapper>> {
        Transfer::new(
            self.mapper.clone(),
            TransferConfig::default(),
            vaddr,
            len,
            direction,
        )
        .expect("valid transfer request")
    }

    /// Read guest virtual memory byte by byte through the page table, bypassing transfers.
    pub fn read_virt(&self, vaddr: u64, len: usize) -> Vec<u8> {
        let ps = self.page_table.page_size();
        let mut pt = self.page_table.clone();
        (0..len as u64)
            .map(|i| {
                let va = vaddr + i;
                let pa = aero_compiled_transfer::AddressTranslator::translate(
                    &mut pt,
                    ps.page_base(va),
                )
                .expect("page is mapped")
                    + ps.page_offset(va);
                let mut b = [0u8; 1];
                self.mapper.ram().read_into(pa, &mut b).expect("in RAM");
                b[0]
            })
            .collect()
    }

    pub fn assert_no_outstanding_mappings(&self) {
        let stats = self.mapper.stats();
        assert_eq!(self.mapper.outstanding(), 0, "outstanding mappings: {stats:?}");
        assert_eq!(stats.maps, stats.unmaps, "unbalanced map/unmap: {stats:?}");
        assert_eq!(stats.bad_unmaps, 0, "bad unmaps: {stats:?}");
    }
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}
