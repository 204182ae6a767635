use segalloc::{Heap, Reserved};

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    let mut heap = Heap::new(Reserved::with_capacity(1 << 20));

    unsafe {
        let addr1 = heap.allocate(8);
        log_alloc(addr1, 8);

        let addr2 = heap.allocate(100);
        log_alloc(addr2, 100);

        let addr3 = heap.allocate(16);
        log_alloc(addr3, 16);

        println!("{:#?}", heap.stats());

        heap.release(addr1);
        heap.release(addr2);
        heap.release(addr3);
    }

    // Everything merged back into a single free chunk.
    println!("{:#?}", heap.stats());
    heap.verify().expect("heap is consistent");
}
