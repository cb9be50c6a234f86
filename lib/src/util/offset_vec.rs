use std::fmt::{Debug, Error, Formatter};
use std::iter::{Enumerate, Extend, FromIterator};
use std::result::Result;
use std::slice::Iter;

/// Elements with a width (eg. when used in an `OffsetVec`)
pub trait Width {
    fn width(&self) -> usize;
}

/// A vector of elements of different logical "widths", where offsets into the vector are given in
/// terms of the sum of the widths of the previous elements (as opposed to the number of preceding
/// elements).
///
/// Class files use this indexing scheme in two places we care about:
///
///   - the constant pool (`long` and `double` entries take up two indices)
///   - local variables and operand stacks in frames (`long` and `double` take two slots)
///
#[derive(Clone)]
pub struct OffsetVec<T: Sized> {
    /// Entries, along with their offset
    entries: Vec<(Offset, T)>,

    /// Offset of the next element to be added
    offset_len: Offset,

    /// Offset for the first element (0 for frames, 1 for the constant pool)
    initial_offset: Offset,
}

/// Offset into an `OffsetVec`
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Offset(pub usize);

impl<T: Sized + Width> OffsetVec<T> {
    /// New empty offset vector
    pub fn new() -> OffsetVec<T> {
        OffsetVec::new_starting_at(Offset(0))
    }

    /// New empty offset vector, with a custom starting offset
    pub fn new_starting_at(initial_offset: Offset) -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: initial_offset,
            initial_offset,
        }
    }

    /// Number of entries (not the offset length)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offset of the next element to be added
    pub fn offset_len(&self) -> Offset {
        self.offset_len
    }

    /// Add an entry to the back, returning the offset at which it landed
    pub fn push(&mut self, slot: T) -> Offset {
        let offset = self.offset_len;
        self.offset_len.0 += slot.width();
        self.entries.push((offset, slot));
        offset
    }

    /// Remove an entry from the back
    pub fn pop(&mut self) -> Option<(Offset, T)> {
        let (offset, elem) = self.entries.pop()?;
        self.offset_len = offset;
        Some((offset, elem))
    }

    /// Keep only the first `len` entries
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
        self.offset_len = match self.entries.last() {
            Some((offset, elem)) => Offset(offset.0 + elem.width()),
            None => self.initial_offset,
        };
    }

    /// Last entry (and its offset)
    pub fn last(&self) -> Option<(Offset, &T)> {
        self.entries.last().map(|(offset, elem)| (*offset, elem))
    }

    /// Get an entry by its offset in the vector
    ///
    /// Note: this uses binary search to find the offset
    pub fn get_offset(&self, offset: Offset) -> OffsetResult<'_, T> {
        match self.entries.binary_search_by_key(&offset, |(off, _)| *off) {
            Err(insert_at) if insert_at == self.entries.len() => OffsetResult::TooLarge,
            Err(insert_at) => OffsetResult::InvalidOffset(insert_at),
            Ok(found_idx) => OffsetResult::Ok(found_idx, &self.entries[found_idx].1),
        }
    }

    /// Get an entry (and its offset) by its position in the vector
    pub fn get_index(&self, index: usize) -> Option<(Offset, &T)> {
        self.entries.get(index).map(|(offset, t)| (*offset, t))
    }

    pub fn iter(&self) -> OffsetVecIter<'_, T> {
        self.into_iter()
    }
}

impl<A: PartialEq> PartialEq for OffsetVec<A> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<A: Eq> Eq for OffsetVec<A> {}

impl<A: Width> Default for OffsetVec<A> {
    fn default() -> Self {
        OffsetVec::new()
    }
}

pub enum OffsetResult<'a, T> {
    /// Element was found at this index
    Ok(usize, &'a T),

    /// Offset was invalid, and falls in the middle of the element at this index
    InvalidOffset(usize),

    /// Offset is past the end
    TooLarge,
}

impl<'a, T> OffsetResult<'a, T> {
    /// Convert to an `Option` and keep only the value found
    pub fn ok(&self) -> Option<&'a T> {
        match self {
            OffsetResult::Ok(_, found) => Some(found),
            OffsetResult::InvalidOffset(_) | OffsetResult::TooLarge => None,
        }
    }
}

/// Iterator for borrowed `OffsetVec`
pub struct OffsetVecIter<'a, T>(Enumerate<Iter<'a, (Offset, T)>>);

impl<'a, T> Iterator for OffsetVecIter<'a, T> {
    type Item = (Offset, usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(idx, (off, elem))| (*off, idx, elem))
    }
}

impl<'a, T> IntoIterator for &'a OffsetVec<T> {
    type Item = (Offset, usize, &'a T);
    type IntoIter = OffsetVecIter<'a, T>;

    fn into_iter(self) -> OffsetVecIter<'a, T> {
        OffsetVecIter(self.entries.iter().enumerate())
    }
}

impl<T: Width> FromIterator<T> for OffsetVec<T> {
    fn from_iter<A: IntoIterator<Item = T>>(elems: A) -> Self {
        let mut offset_vec = OffsetVec::new();
        offset_vec.extend(elems);
        offset_vec
    }
}

impl<T: Width> Extend<T> for OffsetVec<T> {
    fn extend<U: IntoIterator<Item = T>>(&mut self, iter: U) {
        for elem in iter {
            self.push(elem);
        }
    }
}

impl<T: Debug> Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let mut list = f.debug_list();
        for (off, elem) in &self.entries {
            list.entry(&format_args!("#{} = {:?}", off.0, elem));
        }
        list.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    enum Slot {
        Narrow(u8),
        Wide(u8),
    }

    impl Width for Slot {
        fn width(&self) -> usize {
            match self {
                Slot::Narrow(_) => 1,
                Slot::Wide(_) => 2,
            }
        }
    }

    #[test]
    fn offsets_account_for_wide_slots() {
        let slots: OffsetVec<Slot> = vec![Slot::Narrow(1), Slot::Wide(2), Slot::Narrow(3)]
            .into_iter()
            .collect();
        assert_eq!(
            slots.iter().map(|(off, idx, s)| (off, idx, *s)).collect::<Vec<_>>(),
            vec![
                (Offset(0), 0, Slot::Narrow(1)),
                (Offset(1), 1, Slot::Wide(2)),
                (Offset(3), 2, Slot::Narrow(3)),
            ]
        );
        assert_eq!(slots.offset_len(), Offset(4));
    }

    #[test]
    fn pool_style_indexing() {
        let mut pool: OffsetVec<Slot> = OffsetVec::new_starting_at(Offset(1));
        assert_eq!(pool.push(Slot::Wide(7)), Offset(1));
        assert_eq!(pool.push(Slot::Narrow(8)), Offset(3));
        assert_eq!(pool.get_offset(Offset(3)).ok(), Some(&Slot::Narrow(8)));
        assert!(matches!(pool.get_offset(Offset(2)), OffsetResult::InvalidOffset(1)));
        assert!(matches!(pool.get_offset(Offset(4)), OffsetResult::TooLarge));
    }

    #[test]
    fn truncate_and_pop_restore_offset_len() {
        let mut slots: OffsetVec<Slot> = vec![Slot::Wide(1), Slot::Narrow(2), Slot::Wide(3)]
            .into_iter()
            .collect();
        assert_eq!(slots.pop(), Some((Offset(3), Slot::Wide(3))));
        assert_eq!(slots.offset_len(), Offset(3));
        slots.truncate(1);
        assert_eq!(slots.offset_len(), Offset(2));
        slots.truncate(0);
        assert!(slots.is_empty());
        assert_eq!(slots.offset_len(), Offset(0));
    }
}
