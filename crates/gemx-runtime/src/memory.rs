//! Device address-space bookkeeping.
//!
//! [`DeviceArena`] hands out aligned, non-overlapping regions of a fixed-size
//! device memory using a first-fit free list. Freed regions are coalesced
//! with their neighbours so long-running sessions do not fragment.

/// A contiguous region of device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub offset: usize,
    pub size: usize,
}

impl Region {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// First-fit allocator over `[0, capacity)`.
#[derive(Debug, Clone)]
pub struct DeviceArena {
    capacity: usize,
    alignment: usize,
    /// Sorted by offset, never adjacent (always coalesced).
    free: Vec<Region>,
    used: usize,
    peak: usize,
}

impl DeviceArena {
    /// Create an arena. `alignment` must be a power of two; capacity is
    /// rounded down to a whole number of aligned blocks.
    pub fn new(capacity: usize, alignment: usize) -> Self {
        assert!(alignment.is_power_of_two(), "alignment {alignment} is not a power of two");
        let capacity = capacity & !(alignment - 1);
        let free = if capacity > 0 { vec![Region { offset: 0, size: capacity }] } else { vec![] };
        Self { capacity, alignment, free, used: 0, peak: 0 }
    }

    /// Round `size` up to the arena alignment (minimum one block).
    pub fn align_up(&self, size: usize) -> usize {
        let mask = self.alignment - 1;
        (size.max(1) + mask) & !mask
    }

    /// Reserve at least `size` bytes. Returns `None` if no free region is
    /// large enough.
    pub fn allocate(&mut self, size: usize) -> Option<Region> {
        let size = self.align_up(size);
        let idx = self.free.iter().position(|r| r.size >= size)?;
        let slot = &mut self.free[idx];
        let region = Region { offset: slot.offset, size };
        if slot.size == size {
            self.free.remove(idx);
        } else {
            slot.offset += size;
            slot.size -= size;
        }
        self.used += size;
        self.peak = self.peak.max(self.used);
        Some(region)
    }

    /// Return a region previously handed out by [`DeviceArena::allocate`].
    pub fn free(&mut self, region: Region) {
        let idx = self.free.partition_point(|r| r.offset < region.offset);
        self.free.insert(idx, region);
        self.used -= region.size;

        // merge with the right neighbour, then the left
        if idx + 1 < self.free.len() && self.free[idx].end() == self.free[idx + 1].offset {
            self.free[idx].size += self.free[idx + 1].size;
            self.free.remove(idx + 1);
        }
        if idx > 0 && self.free[idx - 1].end() == self.free[idx].offset {
            self.free[idx - 1].size += self.free[idx].size;
            self.free.remove(idx);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn used_bytes(&self) -> usize {
        self.used
    }

    pub fn free_bytes(&self) -> usize {
        self.capacity - self.used
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak
    }

    /// Size of the largest region that could currently be allocated.
    pub fn largest_free_region(&self) -> usize {
        self.free.iter().map(|r| r.size).max().unwrap_or(0)
    }
}
