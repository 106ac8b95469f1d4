use std::ops::{AddAssign, SubAssign};

/// Nominal page size of a [`MemoryDataSource`].
///
/// Pages grow past this while bytes are inserted into them and are split back
/// once they reach twice the size.
pub const MEMORY_PAGE_SIZE: usize = 4096;

/// Growable in-memory byte buffer stored as a list of pages.
///
/// Inserting or removing in the middle only touches the page involved instead
/// of moving the whole tail of the buffer. Pages are never empty and `starts`
/// holds the buffer offset of every page, so a position is found with a binary
/// search.
#[derive(Debug, Default, Clone)]
pub struct MemoryDataSource {
    pages: Vec<Vec<u8>>,
    starts: Vec<u64>,
    len: u64,
}

/*

====================================
========= CREATION METHOD ==========
====================================

*/

impl MemoryDataSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut source = Self::new();

        source.insert(0, bytes);

        source
    }
}

/*

====================================
========= INLINE METHODS  ==========
====================================

*/

impl MemoryDataSource {
    /// Total number of bytes.
    #[inline]
    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page index and offset inside it for `position`.
    ///
    /// `position == len` resolves to the end of the last page.
    fn locate(&self, position: u64) -> (usize, usize) {
        match self.pages.len() {
            0 => (0, 0),
            count if position >= self.len => (count - 1, self.pages[count - 1].len()),
            _ => {
                let idx = self.starts.partition_point(|start| *start <= position) - 1;

                (idx, (position - self.starts[idx]) as usize)
            }
        }
    }

    /// Recomputes page offsets from page `from` onwards.
    fn reindex(&mut self, from: usize) {
        self.starts.truncate(from);

        let mut start = match from {
            0 => 0,
            _ => self.starts[from - 1] + self.pages[from - 1].len() as u64,
        };

        for page in &self.pages[from..] {
            self.starts.push(start);
            start.add_assign(page.len() as u64);
        }

        debug_assert_eq!(start, self.len);
    }

    #[inline]
    fn check_range(&self, position: u64, length: u64) {
        let end = position.checked_add(length);

        assert!(
            end.is_some_and(|end| end <= self.len),
            "memory range {position}+{length} is outside of {} bytes",
            self.len
        );
    }
}

/*

====================================
============= READING ==============
====================================

*/

impl MemoryDataSource {
    /// # Panics
    ///
    /// Panics if `position` is not below [`MemoryDataSource::data_size`].
    #[must_use]
    pub fn get_byte(&self, position: u64) -> u8 {
        self.check_range(position, 1);

        let (idx, offset) = self.locate(position);

        self.pages[idx][offset]
    }

    /// Copies `target.len()` bytes starting at `position` into `target`.
    ///
    /// # Panics
    ///
    /// Panics if the range is outside of the buffer.
    pub fn copy_to_slice(&self, position: u64, target: &mut [u8]) {
        self.check_range(position, target.len() as u64);

        if target.is_empty() {
            return;
        }

        let (mut idx, mut offset) = self.locate(position);
        let mut copied = 0;

        while copied < target.len() {
            let page = &self.pages[idx];
            let take = (page.len() - offset).min(target.len() - copied);

            target[copied..copied + take].copy_from_slice(&page[offset..offset + take]);
            copied.add_assign(take);
            idx.add_assign(1);
            offset = 0;
        }
    }

    /// Returns a copy of `length` bytes starting at `position`.
    ///
    /// # Panics
    ///
    /// Panics if the range is outside of the buffer.
    #[must_use]
    pub fn copy(&self, position: u64, length: u64) -> Vec<u8> {
        let mut res = vec![0; length as usize];

        self.copy_to_slice(position, &mut res);

        res
    }
}

/*

====================================
============= WRITING ==============
====================================

*/

impl MemoryDataSource {
    /// # Panics
    ///
    /// Panics if `position` is not below [`MemoryDataSource::data_size`].
    pub fn set_byte(&mut self, position: u64, value: u8) {
        self.check_range(position, 1);

        let (idx, offset) = self.locate(position);

        self.pages[idx][offset] = value;
    }

    /// Inserts `bytes` at `position`, moving the following bytes forward.
    ///
    /// # Panics
    ///
    /// Panics if `position` is past the end of the buffer.
    pub fn insert(&mut self, position: u64, bytes: &[u8]) {
        self.check_range(position, 0);

        if bytes.is_empty() {
            return;
        }

        if self.pages.is_empty() {
            self.pages.push(Vec::with_capacity(MEMORY_PAGE_SIZE));
        }

        let (idx, offset) = self.locate(position);

        self.pages[idx].splice(offset..offset, bytes.iter().copied());
        self.len.add_assign(bytes.len() as u64);
        self.rebalance(idx);
        self.reindex(idx);
    }

    /// Inserts `length` zero bytes at `position`.
    ///
    /// # Panics
    ///
    /// Panics if `position` is past the end of the buffer.
    pub fn insert_zeroed(&mut self, position: u64, length: u64) {
        let mut remaining = length;
        let mut at = position;
        let chunk = vec![0u8; MEMORY_PAGE_SIZE];

        while remaining > 0 {
            let take = remaining.min(MEMORY_PAGE_SIZE as u64);

            self.insert(at, &chunk[..take as usize]);
            at.add_assign(take);
            remaining.sub_assign(take);
        }
    }

    /// Removes `length` bytes starting at `position`.
    ///
    /// # Panics
    ///
    /// Panics if the range is outside of the buffer.
    pub fn remove(&mut self, position: u64, length: u64) {
        self.check_range(position, length);

        if length == 0 {
            return;
        }

        let (mut idx, mut offset) = self.locate(position);
        let first = idx;
        let mut remaining = length;

        while remaining > 0 {
            let page_len = self.pages[idx].len();
            let take = ((page_len - offset) as u64).min(remaining) as usize;

            self.pages[idx].drain(offset..offset + take);
            remaining.sub_assign(take as u64);

            if self.pages[idx].is_empty() {
                self.pages.remove(idx);
            } else {
                idx.add_assign(1);
            }

            offset = 0;
        }

        self.len.sub_assign(length);
        self.reindex(first);
    }

    /// Grows the buffer with zeros or truncates it.
    pub fn set_data_size(&mut self, size: u64) {
        if size > self.len {
            self.insert_zeroed(self.len, size - self.len);
        } else if size < self.len {
            self.remove(size, self.len - size);
        }
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.starts.clear();
        self.len = 0;
    }

    /// Splits an oversized page back into [`MEMORY_PAGE_SIZE`] pieces.
    fn rebalance(&mut self, idx: usize) {
        if self.pages[idx].len() < MEMORY_PAGE_SIZE * 2 {
            return;
        }

        let page = std::mem::take(&mut self.pages[idx]);
        let pieces = page
            .chunks(MEMORY_PAGE_SIZE)
            .map(<[u8]>::to_vec)
            .collect::<Vec<Vec<u8>>>();

        self.pages.splice(idx..=idx, pieces);
    }
}
