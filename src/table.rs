use crate::indices::TableAddr;
use crate::store::Store;
use crate::translate::TablePlan;
use crate::trap::Trap;
use crate::types::RefType;
use crate::values::refs;
use crate::{Error, TABLE_MAX};

/// A table owned by a store: a growable vector of encoded reference slots.
///
/// Entries use the crate-wide 64-bit reference encoding, so the same
/// representation serves funcref, externref, and GC-typed tables.
#[derive(Debug)]
pub(crate) struct TableInstance {
    elements: Vec<u64>,
    pub element_type: RefType,
    maximum: Option<u64>,
    pub table64: bool,
}

impl TableInstance {
    pub fn new(plan: &TablePlan, init: u64) -> crate::Result<Self> {
        let minimum = usize::try_from(plan.minimum)
            .ok()
            .filter(|&n| n <= TABLE_MAX)
            .ok_or(Error::OutOfMemory("table"))?;

        let mut elements = Vec::new();
        elements
            .try_reserve_exact(minimum)
            .map_err(|_| Error::OutOfMemory("table"))?;
        elements.resize(minimum, init);

        Ok(Self {
            elements,
            element_type: plan.element_type,
            maximum: plan.maximum,
            table64: plan.table64,
        })
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.elements.len() as u64
    }

    #[inline]
    pub fn maximum(&self) -> Option<u64> {
        self.maximum
    }

    /// Grow by `delta` entries filled with `init`. Returns the previous size,
    /// or `None` when a limit would be exceeded.
    pub fn grow(&mut self, delta: u64, init: u64) -> Option<u64> {
        let old_size = self.size();
        let new_size = old_size.checked_add(delta)?;

        if let Some(maximum) = self.maximum {
            if new_size > maximum {
                return None;
            }
        }
        if new_size > TABLE_MAX as u64 {
            return None;
        }
        if !self.table64 && new_size > u64::from(u32::MAX) {
            return None;
        }

        if self.elements.try_reserve_exact(delta as usize).is_err() {
            return None;
        }
        self.elements.resize(new_size as usize, init);
        Some(old_size)
    }

    #[inline]
    pub fn get(&self, index: u64) -> Result<u64, Trap> {
        self.elements
            .get(usize::try_from(index).map_err(|_| Trap::TableOutOfBounds)?)
            .copied()
            .ok_or(Trap::TableOutOfBounds)
    }

    #[inline]
    pub fn set(&mut self, index: u64, value: u64) -> Result<(), Trap> {
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| self.elements.get_mut(i))
            .ok_or(Trap::TableOutOfBounds)?;
        *slot = value;
        Ok(())
    }

    /// Bounds-check a `[start, start + len)` window, returning it as `usize`.
    /// Checked before any write so segment application stays all-or-nothing.
    pub fn check_range(&self, start: u64, len: u64) -> Result<(usize, usize), Trap> {
        let end = start.checked_add(len).ok_or(Trap::TableOutOfBounds)?;
        if end > self.size() {
            return Err(Trap::TableOutOfBounds);
        }
        Ok((start as usize, len as usize))
    }

    pub fn fill(&mut self, start: u64, value: u64, len: u64) -> Result<(), Trap> {
        let (start, len) = self.check_range(start, len)?;
        self.elements[start..start + len].fill(value);
        Ok(())
    }

    /// Write evaluated segment entries at `start`.
    pub fn init(&mut self, start: u64, entries: &[u64]) -> Result<(), Trap> {
        let (start, len) = self.check_range(start, entries.len() as u64)?;
        self.elements[start..start + len].copy_from_slice(entries);
        Ok(())
    }

    /// Copy within one table, handling overlap like `memmove`.
    pub fn copy_within(&mut self, dst: u64, src: u64, len: u64) -> Result<(), Trap> {
        let (dst, len) = self.check_range(dst, len)?;
        let (src, _) = self.check_range(src, len as u64)?;
        self.elements.copy_within(src..src + len, dst);
        Ok(())
    }

    pub fn elements(&self) -> &[u64] {
        &self.elements
    }
}

/// A handle to a table within some store.
#[derive(Debug, Clone, Copy)]
pub struct Table(TableAddr);

impl Table {
    pub(crate) fn from_addr(addr: TableAddr) -> Self {
        Self(addr)
    }

    pub(crate) fn addr(&self) -> TableAddr {
        self.0
    }

    /// Current size in entries.
    pub fn size(&self, store: &Store) -> u64 {
        store.table(self.0).size()
    }

    /// Grow by `delta` null-filled entries, returning the previous size.
    pub fn grow(&self, store: &mut Store, delta: u64) -> Option<u64> {
        store.table_mut(self.0).grow(delta, refs::NULL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RefType;

    fn plan(minimum: u64, maximum: Option<u64>) -> TablePlan {
        TablePlan {
            element_type: RefType::FUNCREF,
            minimum,
            maximum,
            table64: false,
            shared: false,
        }
    }

    #[test]
    fn new_tables_are_null_filled() {
        let table = TableInstance::new(&plan(4, None), refs::NULL).unwrap();
        assert_eq!(table.size(), 4);
        assert_eq!(table.get(3), Ok(refs::NULL));
        assert_eq!(table.get(4), Err(Trap::TableOutOfBounds));
    }

    #[test]
    fn init_is_all_or_nothing() {
        let mut table = TableInstance::new(&plan(4, None), refs::NULL).unwrap();
        let entries = [refs::from_handle(1), refs::from_handle(2)];
        // Would straddle the end: nothing may be written.
        assert_eq!(
            table.init(3, &entries),
            Err(Trap::TableOutOfBounds)
        );
        assert_eq!(table.get(3), Ok(refs::NULL));

        table.init(2, &entries).unwrap();
        assert_eq!(table.get(2), Ok(refs::from_handle(1)));
        assert_eq!(table.get(3), Ok(refs::from_handle(2)));
    }

    #[test]
    fn overlapping_copy_moves_like_memmove() {
        let mut table = TableInstance::new(&plan(5, None), refs::NULL).unwrap();
        for i in 0..5 {
            table.set(i, refs::from_handle(i as u32)).unwrap();
        }
        table.copy_within(1, 0, 4).unwrap();
        let got: Vec<u64> = (0..5).map(|i| table.get(i).unwrap()).collect();
        assert_eq!(
            got,
            vec![
                refs::from_handle(0),
                refs::from_handle(0),
                refs::from_handle(1),
                refs::from_handle(2),
                refs::from_handle(3),
            ]
        );
    }
}
