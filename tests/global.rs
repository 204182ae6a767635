//! Runs the whole test binary on top of [`SegAlloc`].

use std::{collections::HashMap, thread};

use segalloc::SegAlloc;

#[global_allocator]
static ALLOCATOR: SegAlloc = SegAlloc::new();

#[test]
fn std_collections_work() {
    let mut v = Vec::new();
    for i in 0..10_000u64 {
        v.push(i * 10);
    }
    assert_eq!(v.iter().sum::<u64>(), 10 * (0..10_000u64).sum::<u64>());

    let mut map = HashMap::new();
    for i in 0..1000 {
        map.insert(i.to_string(), vec![i; i % 17]);
    }
    assert_eq!(map["999"].len(), 999 % 17);

    let msg = String::from("Heap Testing");
    assert_eq!(msg.to_uppercase(), "HEAP TESTING");
}

#[test]
fn freed_boxes_are_merged_and_reused() {
    // Two neighbours released together make room for one twice as big.
    let a = Box::new([1u8; 64]);
    let b = Box::new([2u8; 64]);
    drop(a);
    drop(b);

    let c = Box::new([3u8; 128]);
    assert!(c.iter().all(|&x| x == 3));
}

#[test]
fn over_aligned_boxes() {
    #[repr(align(4096))]
    struct Page([u8; 4096]);

    let pages: Vec<Box<Page>> = (0..8).map(|i| Box::new(Page([i; 4096]))).collect();

    for (i, page) in pages.iter().enumerate() {
        assert_eq!(&**page as *const Page as usize % 4096, 0);
        assert!(page.0.iter().all(|&x| x == i as u8));
    }
}

#[test]
fn threads_share_the_heap() {
    let handles: Vec<_> = (0..8)
        .map(|t| {
            thread::spawn(move || {
                let mut blocks = Vec::new();
                for i in 0..500 {
                    blocks.push(vec![t as u8; (i * 7) % 300 + 1]);
                    if i % 3 == 0 {
                        blocks.swap_remove(0);
                    }
                }
                blocks.iter().all(|b| b.iter().all(|&x| x == t as u8))
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }

    ALLOCATOR.verify().unwrap();
    assert!(ALLOCATOR.stats().arena_bytes > 0);
}
