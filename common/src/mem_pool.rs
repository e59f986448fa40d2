// Memory arena for book nodes.
//
// A fixed-capacity pool of `T` pre-constructed at startup. Allocation scans
// forward from a cursor for the next free block and reinitializes it in
// place; deallocation flips the block's free flag. Scanning is O(n) worst
// case but O(1) amortized in steady state, where deallocations dominate and
// the slot just behind the cursor is usually free again by the time the
// cursor wraps back to it.
//
// Handles are plain indices into the pool. The value of a deallocated block
// is deliberately left in place until the slot is reused; element types must
// tolerate that (the book nodes are plain data).
//
// Single-threaded by construction: each pool is owned by the one thread that
// allocates and deallocates from it.

struct Block<T> {
    value: T,
    is_free: bool,
}

/// Fixed-capacity object pool with index handles.
pub struct MemPool<T> {
    blocks: Vec<Block<T>>,
    /// Next index to try on allocation.
    cursor: usize,
    free_count: usize,
}

impl<T: Default> MemPool<T> {
    /// Creates a pool of `capacity` default-constructed free blocks.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "memory pool capacity must be greater than 0");

        let mut blocks = Vec::with_capacity(capacity);
        blocks.resize_with(capacity, || Block { value: T::default(), is_free: true });

        Self { blocks, cursor: 0, free_count: capacity }
    }
}

impl<T> MemPool<T> {
    /// Claims the next free block, reinitializes it with `value` and returns
    /// its index.
    ///
    /// # Panics
    /// Panics when the pool is exhausted - the pools are sized to the
    /// system's configured limits, so running out is a defect.
    #[inline]
    pub fn allocate(&mut self, value: T) -> usize {
        let index = self.find_free();
        let block = &mut self.blocks[index];
        block.is_free = false;
        block.value = value;
        self.cursor = (index + 1) % self.blocks.len();
        self.free_count -= 1;
        index
    }

    /// Returns the block at `index` to the pool. The stored value is not
    /// dropped until the slot is reused.
    ///
    /// # Panics
    /// Panics on double-free.
    #[inline]
    pub fn deallocate(&mut self, index: usize) {
        let block = &mut self.blocks[index];
        assert!(!block.is_free, "double free of pool block {}", index);
        block.is_free = true;
        self.free_count += 1;
    }

    /// Shared access to an allocated block.
    #[inline]
    pub fn get(&self, index: usize) -> &T {
        let block = &self.blocks[index];
        debug_assert!(!block.is_free, "access to freed pool block {}", index);
        &block.value
    }

    /// Exclusive access to an allocated block.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut T {
        let block = &mut self.blocks[index];
        debug_assert!(!block.is_free, "access to freed pool block {}", index);
        &mut block.value
    }

    /// Number of free blocks remaining.
    #[inline]
    pub fn available(&self) -> usize {
        self.free_count
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Marks every block free again. Values are left in place, exactly as
    /// with individual deallocation.
    pub fn clear(&mut self) {
        for block in &mut self.blocks {
            block.is_free = true;
        }
        self.cursor = 0;
        self.free_count = self.blocks.len();
    }

    fn find_free(&self) -> usize {
        let capacity = self.blocks.len();
        let mut index = self.cursor;
        for _ in 0..capacity {
            if self.blocks[index].is_free {
                return index;
            }
            index = (index + 1) % capacity;
        }
        panic!("memory pool exhausted (capacity {})", capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_deallocate_round_trip() {
        let mut pool: MemPool<u64> = MemPool::new(4);
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);

        let idx = pool.allocate(42);
        assert_eq!(pool.available(), 3);
        assert_eq!(*pool.get(idx), 42);

        *pool.get_mut(idx) = 43;
        assert_eq!(*pool.get(idx), 43);

        pool.deallocate(idx);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn cursor_scans_past_live_blocks() {
        let mut pool: MemPool<u32> = MemPool::new(4);
        let a = pool.allocate(1);
        let b = pool.allocate(2);
        let c = pool.allocate(3);
        let d = pool.allocate(4);
        assert_eq!(pool.available(), 0);

        // Free a middle block; the wrapped cursor must find it.
        pool.deallocate(b);
        let e = pool.allocate(5);
        assert_eq!(e, b);
        assert_eq!(*pool.get(e), 5);

        assert_eq!(*pool.get(a), 1);
        assert_eq!(*pool.get(c), 3);
        assert_eq!(*pool.get(d), 4);
    }

    #[test]
    fn reinitializes_reused_slot() {
        let mut pool: MemPool<u64> = MemPool::new(2);
        let idx = pool.allocate(100);
        pool.deallocate(idx);
        let idx2 = pool.allocate(200);
        assert_eq!(idx, idx2);
        assert_eq!(*pool.get(idx2), 200);
    }

    #[test]
    fn clear_frees_everything() {
        let mut pool: MemPool<u32> = MemPool::new(3);
        pool.allocate(1);
        pool.allocate(2);
        pool.clear();
        assert_eq!(pool.available(), 3);
        // All three slots allocatable again.
        pool.allocate(4);
        pool.allocate(5);
        pool.allocate(6);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    #[should_panic(expected = "memory pool exhausted")]
    fn exhaustion_is_fatal() {
        let mut pool: MemPool<u32> = MemPool::new(2);
        pool.allocate(1);
        pool.allocate(2);
        pool.allocate(3);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_is_fatal() {
        let mut pool: MemPool<u32> = MemPool::new(2);
        let idx = pool.allocate(1);
        pool.deallocate(idx);
        pool.deallocate(idx);
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn zero_capacity_rejected() {
        let _pool: MemPool<u32> = MemPool::new(0);
    }
}
