mod common;

use aero_compiled_transfer::{Direction, Span, TransferState};
use common::{init_tracing, pattern, Guest, PAGE};

const VBASE: u64 = 0x7fff_0000;

#[test]
fn write_then_read_reproduces_buffer_across_scattered_pages() {
    init_tracing();

    let mut guest = Guest::new(64);
    // Two coalescable runs separated by a backwards jump and a skip.
    guest.map_pages(VBASE, &[40, 41, 42, 9, 10, 33]);

    let len = 5 * PAGE as usize + 123;
    let vaddr = VBASE + 0x321;
    let src = pattern(len, 0x5a);

    let mut w = guest.transfer(vaddr, len, Direction::Write);
    w.compile(&mut guest.page_table).unwrap();
    assert_eq!(w.spans().len(), 3);
    w.execute(&mut src.clone()).unwrap();
    drop(w);

    assert_eq!(guest.read_virt(vaddr, len), src);

    let mut r = guest.transfer(vaddr, len, Direction::Read);
    r.compile(&mut guest.page_table).unwrap();
    let mut dst = vec![0u8; len];
    r.execute(&mut dst).unwrap();
    assert_eq!(dst, src);
    drop(r);

    guest.assert_no_outstanding_mappings();
}

#[test]
fn write_lands_only_inside_the_requested_range() {
    let mut guest = Guest::new(8);
    guest.map_pages(VBASE, &[2, 3]);

    let before = guest.read_virt(VBASE, 2 * PAGE as usize);
    assert!(before.iter().all(|&b| b == 0));

    let vaddr = VBASE + PAGE - 3;
    let mut w = guest.transfer(vaddr, 6, Direction::Write);
    w.compile(&mut guest.page_table).unwrap();
    w.write_from(&[1, 2, 3, 4, 5, 6, 0xee, 0xee]).unwrap();

    let after = guest.read_virt(VBASE, 2 * PAGE as usize);
    let touched: Vec<usize> = after
        .iter()
        .enumerate()
        .filter(|(_, b)| **b != 0)
        .map(|(i, _)| i)
        .collect();
    let start = (PAGE - 3) as usize;
    assert_eq!(touched, (start..start + 6).collect::<Vec<_>>());
    assert_eq!(&after[start..start + 6], &[1, 2, 3, 4, 5, 6]);
}

#[test]
fn spans_tile_the_virtual_range_in_order() {
    let mut guest = Guest::new(64);
    guest.map_pages(VBASE, &[1, 2, 3, 20, 19, 18, 50, 51]);

    let vaddr = VBASE + 0x10;
    let len = 8 * PAGE as usize - 0x20;
    let mut t = guest.transfer(vaddr, len, Direction::Read);
    t.compile(&mut guest.page_table).unwrap();

    let spans = t.spans();
    assert_eq!(spans.iter().map(Span::usable_len).sum::<usize>(), len);
    assert_eq!(spans.first().unwrap().guest_addr(), vaddr);
    for pair in spans.windows(2) {
        assert_eq!(pair[0].guest_range().end, pair[1].guest_range().start);
    }
    assert_eq!(spans.last().unwrap().guest_range().end, vaddr + len as u64);

    // [1,2,3] [20] [19] [18] [50,51]
    assert_eq!(spans.len(), 5);
}

#[test]
fn reused_transfer_serves_a_later_access() {
    let mut guest = Guest::new(16);
    guest.map_pages(VBASE, &[4, 8]);

    let src = pattern(64, 1);
    let mut t = guest.transfer(VBASE + PAGE - 32, 64, Direction::Write);
    t.compile(&mut guest.page_table).unwrap();
    t.execute(&mut src.clone()).unwrap();

    t.reset(VBASE + PAGE - 32, 64, Direction::Read).unwrap();
    assert_eq!(t.state(), TransferState::Pending);
    t.compile(&mut guest.page_table).unwrap();

    let mut dst = vec![0u8; 64];
    t.execute(&mut dst).unwrap();
    assert_eq!(dst, src);

    drop(t);
    guest.assert_no_outstanding_mappings();
}

#[test]
fn remapped_page_is_picked_up_on_recompile() {
    let mut guest = Guest::new(16);
    guest.map_pages(VBASE, &[4]);
    guest.mapper.ram().write_from(4 * PAGE, &[0xaa; 8]).unwrap();
    guest.mapper.ram().write_from(6 * PAGE, &[0xbb; 8]).unwrap();

    let mut t = guest.transfer(VBASE, 8, Direction::Read);
    let mut buf = [0u8; 8];
    t.compile(&mut guest.page_table).unwrap();
    t.execute(&mut buf).unwrap();
    assert_eq!(buf, [0xaa; 8]);

    guest.map_pages(VBASE, &[6]);
    t.compile(&mut guest.page_table).unwrap();
    t.execute(&mut buf).unwrap();
    assert_eq!(buf, [0xbb; 8]);
}
