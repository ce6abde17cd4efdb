//! Integration scenarios for `VirtualArray`.

use std::cell::Cell;
use std::rc::Rc;

use vmarray::{vm, VirtualArray, VmError};

#[test]
fn construct_then_query() {
    for capacity in [0usize, 1, 3, 4096, 100_000] {
        let array = VirtualArray::<u32>::with_capacity(capacity);
        assert_eq!(array.len(), 0);
        assert_eq!(array.capacity(), capacity);
    }
}

#[test]
fn three_strings_then_reset() {
    let mut array = VirtualArray::with_capacity(3);
    array.push("a".to_string());
    array.push("b".to_string());
    array.push("c".to_string());
    assert_eq!(array.len(), 3);
    assert_eq!(array[0], "a");
    assert_eq!(array[1], "b");
    assert_eq!(array[2], "c");

    assert!(matches!(
        array.try_push("d".to_string()),
        Err(VmError::CapacityExhausted { capacity: 3 })
    ));

    array.reset();
    assert_eq!(array.len(), 0);
    array.push("x".to_string());
    assert_eq!(array[0], "x");
    assert_eq!(array.len(), 1);
}

#[test]
#[should_panic(expected = "capacity exhausted")]
fn fourth_push_is_fatal() {
    let array = VirtualArray::with_capacity(3);
    for s in ["a", "b", "c", "d"] {
        array.push(s);
    }
}

#[test]
#[should_panic(expected = "out of live range")]
fn index_below_capacity_but_past_len_is_fatal() {
    let array = VirtualArray::<u8>::with_capacity(10);
    array.push(1);
    let _value = array[5];
}

#[test]
fn references_stay_valid_across_appends() {
    let array = VirtualArray::with_capacity(10_000);
    let mut held = Vec::new();
    for i in 0..10_000u64 {
        let value = array.push(i * 3);
        held.push(value);
        assert_eq!(array.len() as u64, i + 1);
    }
    for (i, value) in held.iter().enumerate() {
        assert_eq!(**value, i as u64 * 3);
        assert!(std::ptr::eq(*value, &array[i]));
    }
}

#[test]
fn reset_cycles_are_identical() {
    let mut array = VirtualArray::with_capacity(5_000);
    let base = array.as_ptr();
    for _ in 0..4 {
        for i in 0..5_000u32 {
            array.push(i);
        }
        assert!(array.is_full());
        assert!(array.iter().copied().eq(0..5_000));
        array.reset();
        assert!(array.is_empty());
        assert_eq!(array.capacity(), 5_000);
        assert_eq!(array.as_ptr(), base);
    }
}

#[test]
fn reset_pages_read_back_fresh() {
    let mut array = VirtualArray::with_capacity(1_024);
    for _ in 0..1_024 {
        array.push(u64::MAX);
    }
    array.reset();
    let fp = array.footprint().unwrap();
    assert_eq!(fp.resident_bytes, 0);
    array.push(7);
    assert_eq!(array.as_slice(), &[7]);
}

#[test]
fn zero_capacity_never_reserves() {
    let array = VirtualArray::<[u8; 64]>::with_capacity(0);
    assert_eq!(array.reserved_bytes(), 0);
    assert_eq!(array.footprint().unwrap().reserved_bytes, 0);
    assert!(array.try_push([0; 64]).is_err());
}

#[test]
#[should_panic(expected = "capacity exhausted")]
fn zero_capacity_append_is_fatal() {
    let array = VirtualArray::<u8>::with_capacity(0);
    array.push(0);
}

#[test]
fn large_capacity_commits_lazily() {
    let array = VirtualArray::<u64>::with_capacity(100_000);
    let reserved = array.footprint().unwrap();
    assert_eq!(reserved.resident_bytes, 0);

    for i in 0..5 {
        array.push(i);
    }
    let fp = array.footprint().unwrap();
    assert_eq!(fp.reserved_bytes, 800_000);
    assert!(fp.reserved_pages() > 100);
    assert!(
        fp.is_lazy(1),
        "{} pages resident for {} live pages",
        fp.resident_pages(),
        fp.live_pages()
    );
    assert!(fp.resident_ratio() < 0.05);
}

#[test]
fn page_sized_elements_commit_one_page_each() {
    let page = vm::page_size();
    let array = VirtualArray::<[u8; 4096]>::with_capacity(1_000);
    for i in 0..10u8 {
        array.push([i; 4096]);
    }
    let fp = array.footprint().unwrap();
    assert_eq!(fp.live_bytes, 40_960);
    assert!(fp.resident_bytes >= 40_960);
    assert!(fp.resident_bytes <= 40_960 + page);
    assert_eq!(array[9][4095], 9);
}

#[test]
fn drop_runs_every_destructor_once() {
    struct Counted(Rc<Cell<usize>>);
    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    let drops = Rc::new(Cell::new(0));
    let mut array = VirtualArray::with_capacity(100);
    for _ in 0..40 {
        array.push(Counted(Rc::clone(&drops)));
    }
    array.reset();
    assert_eq!(drops.get(), 40);

    for _ in 0..25 {
        array.push(Counted(Rc::clone(&drops)));
    }
    drop(array);
    assert_eq!(drops.get(), 65);
}

#[test]
fn many_arrays_coexist() {
    let arrays: Vec<VirtualArray<u32>> = (0..16)
        .map(|_| VirtualArray::with_capacity(1 << 20))
        .collect();
    for (n, array) in arrays.iter().enumerate() {
        for i in 0..100 {
            array.push(n as u32 * 1000 + i);
        }
    }
    for (n, array) in arrays.iter().enumerate() {
        assert_eq!(array[99], n as u32 * 1000 + 99);
    }
}

#[test]
fn moved_to_another_thread() {
    let array = VirtualArray::with_capacity(1_000);
    for i in 0..10u64 {
        array.push(i);
    }
    let sum = std::thread::spawn(move || {
        array.push(100);
        array.iter().sum::<u64>()
    })
    .join()
    .unwrap();
    assert_eq!(sum, 145);
}
