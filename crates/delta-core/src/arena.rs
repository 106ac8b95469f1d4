//! Slot arena with stable handles.
//!
//! Segments, sources, documents and index records refer to each other through
//! these handles instead of references. A freed slot is reused by the next
//! insertion, so a handle must not be kept past the removal of its value.

use std::ops::AddAssign;

pub trait ArenaId: Copy + Eq + std::hash::Hash + std::fmt::Debug {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl crate::arena::ArenaId for $name {
            #[inline]
            fn from_index(index: usize) -> Self {
                Self(u32::try_from(index).expect("arena index overflow"))
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Handle of a segment owned by a [`crate::repository::SegmentsRepository`].
    SegmentId
);
arena_id!(
    /// Handle of an opened [`io::file_source::FileDataSource`].
    FileSourceId
);
arena_id!(
    /// Handle of a [`io::memory_source::MemoryDataSource`].
    MemorySourceId
);
arena_id!(DocumentId);
arena_id!(RecordId);

#[derive(Debug)]
pub struct Arena<I, T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
    len: usize,
    _id: std::marker::PhantomData<I>,
}

impl<I: ArenaId, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _id: std::marker::PhantomData,
        }
    }
}

impl<I: ArenaId, T> Arena<I, T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> I {
        self.len.add_assign(1);

        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(value);

                I::from_index(index)
            }
            None => {
                self.slots.push(Some(value));

                I::from_index(self.slots.len() - 1)
            }
        }
    }

    /// # Panics
    ///
    /// Panics if `id` is not live.
    pub fn remove(&mut self, id: I) -> T {
        let value = self
            .slots
            .get_mut(id.index())
            .and_then(Option::take)
            .unwrap_or_else(|| panic!("{id:?} is not live"));

        self.free.push(id.index());
        self.len -= 1;

        value
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, id: I) -> bool {
        self.try_get(id).is_some()
    }

    #[inline]
    #[must_use]
    pub fn try_get(&self, id: I) -> Option<&T> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// # Panics
    ///
    /// Panics if `id` is not live.
    #[inline]
    #[must_use]
    pub fn get(&self, id: I) -> &T {
        self.try_get(id)
            .unwrap_or_else(|| panic!("{id:?} is not live"))
    }

    /// # Panics
    ///
    /// Panics if `id` is not live.
    #[inline]
    pub fn get_mut(&mut self, id: I) -> &mut T {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("{id:?} is not live"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (I::from_index(index), value)))
    }

    pub fn ids(&self) -> Vec<I> {
        self.iter().map(|(id, _)| id).collect()
    }
}
