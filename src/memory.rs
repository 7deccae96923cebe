use crate::indices::MemAddr;
use crate::store::Store;
use crate::translate::MemoryPlan;
use crate::trap::Trap;
use crate::{Error, MEMORY_MAX};

/// A linear memory owned by a store.
///
/// Backed by a plain growable byte buffer; growing is page-granular and the
/// byte view only ever changes size at a `grow`, never mid-access.
#[derive(Debug)]
pub(crate) struct MemoryInstance {
    bytes: Vec<u8>,
    /// The current length of this memory, in its own pages.
    current_pages: u64,
    /// The log2 of this memory's page size, in bytes.
    page_size_log2: u8,
    /// The optional declared maximum, in pages.
    maximum: Option<u64>,
    /// Whether the memory may be shared between multiple threads.
    pub shared: bool,
    /// Whether this is a 64-bit memory.
    pub memory64: bool,
    /// Maximum page count representable in the index type.
    index_max_pages: u64,
}

impl MemoryInstance {
    pub fn new(plan: &MemoryPlan) -> crate::Result<Self> {
        let byte_size = plan
            .minimum
            .checked_mul(plan.page_size())
            .filter(|&n| n <= MEMORY_MAX as u64)
            .ok_or(Error::OutOfMemory("memory"))?;

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(byte_size as usize)
            .map_err(|_| Error::OutOfMemory("memory"))?;
        bytes.resize(byte_size as usize, 0);

        Ok(Self {
            bytes,
            current_pages: plan.minimum,
            page_size_log2: plan.page_size_log2,
            maximum: plan.maximum,
            shared: plan.shared,
            memory64: plan.memory64,
            index_max_pages: plan.max_pages_based_on_index_type(),
        })
    }

    #[inline]
    pub fn byte_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    #[inline]
    pub fn size_pages(&self) -> u64 {
        self.current_pages
    }

    #[inline]
    pub fn page_size(&self) -> u64 {
        1 << self.page_size_log2
    }

    #[inline]
    pub fn maximum(&self) -> Option<u64> {
        self.maximum
    }

    /// Grow by `delta` pages. Returns the previous size in pages, or `None`
    /// when the declared maximum or an implementation limit would be
    /// exceeded; the caller turns `None` into the `-1` sentinel.
    pub fn grow(&mut self, delta: u64) -> Option<u64> {
        let old_pages = self.current_pages;
        let new_pages = old_pages.checked_add(delta)?;

        if new_pages > self.index_max_pages {
            return None;
        }
        if let Some(maximum) = self.maximum {
            if new_pages > maximum {
                return None;
            }
        }

        let new_bytes = new_pages.checked_mul(self.page_size())?;
        if new_bytes > MEMORY_MAX as u64 {
            return None;
        }

        let additional = (new_bytes - self.byte_size()) as usize;
        if self.bytes.try_reserve_exact(additional).is_err() {
            return None;
        }
        self.bytes.resize(new_bytes as usize, 0);
        self.current_pages = new_pages;
        Some(old_pages)
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Bounds-check an access of `len` bytes at `addr`, returning the start
    /// offset. Out of bounds is a trap, never undefined behavior; there is no
    /// third outcome.
    #[inline]
    pub fn check_range(&self, addr: u64, len: u64) -> Result<usize, Trap> {
        let end = addr.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        if end > self.byte_size() {
            return Err(Trap::MemoryOutOfBounds);
        }
        Ok(addr as usize)
    }
}

/// A handle to a linear memory within some store.
#[derive(Debug, Clone, Copy)]
pub struct Memory(MemAddr);

impl Memory {
    pub(crate) fn from_addr(addr: MemAddr) -> Self {
        Self(addr)
    }

    pub(crate) fn addr(&self) -> MemAddr {
        self.0
    }

    /// Current size in pages.
    pub fn size(&self, store: &Store) -> u64 {
        store.memory(self.0).size_pages()
    }

    /// Current size in bytes.
    pub fn byte_size(&self, store: &Store) -> u64 {
        store.memory(self.0).byte_size()
    }

    /// Grow by `delta` pages, returning the previous size in pages.
    pub fn grow(&self, store: &mut Store, delta: u64) -> Option<u64> {
        store.memory_mut(self.0).grow(delta)
    }

    /// Bounds-checked host read at `offset`.
    pub fn read(&self, store: &Store, offset: u64, buf: &mut [u8]) -> crate::Result<()> {
        let mem = store.memory(self.0);
        let start = mem.check_range(offset, buf.len() as u64)?;
        buf.copy_from_slice(&mem.data()[start..start + buf.len()]);
        Ok(())
    }

    /// Bounds-checked host write at `offset`.
    pub fn write(&self, store: &mut Store, offset: u64, data: &[u8]) -> crate::Result<()> {
        let mem = store.memory_mut(self.0);
        let start = mem.check_range(offset, data.len() as u64)?;
        mem.data_mut()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(minimum: u64, maximum: Option<u64>) -> MemoryPlan {
        MemoryPlan {
            minimum,
            maximum,
            shared: false,
            memory64: false,
            page_size_log2: MemoryPlan::DEFAULT_PAGE_SIZE_LOG2,
        }
    }

    #[test]
    fn grow_respects_the_declared_maximum() {
        let mut mem = MemoryInstance::new(&plan(1, Some(2))).unwrap();
        assert_eq!(mem.size_pages(), 1);
        assert_eq!(mem.grow(1), Some(1));
        assert_eq!(mem.grow(1), None);
        assert_eq!(mem.size_pages(), 2);
    }

    #[test]
    fn bounds_checks_have_no_third_outcome() {
        let mem = MemoryInstance::new(&plan(1, None)).unwrap();
        assert!(mem.check_range(0, 4).is_ok());
        assert!(mem.check_range(65532, 4).is_ok());
        assert_eq!(mem.check_range(65533, 4), Err(Trap::MemoryOutOfBounds));
        // Offset arithmetic must not wrap.
        assert_eq!(
            mem.check_range(u64::MAX, 4),
            Err(Trap::MemoryOutOfBounds)
        );
    }
}
