use std::collections::HashMap;
use std::ops::AddAssign;

use crate::arena::{Arena, RecordId, SegmentId};

#[derive(Debug)]
struct SegmentRecord {
    segment: SegmentId,
    start: u64,
    length: u64,
    /// Largest end offset among this record and every record before it.
    max_position: u64,
    prev: Option<RecordId>,
    next: Option<RecordId>,
}

impl SegmentRecord {
    #[inline]
    fn end(&self) -> u64 {
        self.start + self.length
    }

    #[inline]
    fn key(&self) -> (u64, u64) {
        (self.start, self.length)
    }
}

/// Interval index of every segment created against one source.
///
/// Records form a linked list ordered by `(start, length)`. The running
/// maximum of end offsets lets overlap queries skip the prefix that ends
/// before the queried range. Queries start at the record the previous query
/// stopped at, so sequential access patterns stay cheap.
#[derive(Debug, Default)]
pub(crate) struct DataSegmentsMap {
    records: Arena<RecordId, SegmentRecord>,
    head: Option<RecordId>,
    tail: Option<RecordId>,
    pointer: Option<RecordId>,
    lookup: HashMap<SegmentId, RecordId>,
}

/*

====================================
========= INLINE METHODS  ==========
====================================

*/

impl DataSegmentsMap {
    #[inline]
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    #[must_use]
    pub(crate) fn contains(&self, segment: SegmentId) -> bool {
        self.lookup.contains_key(&segment)
    }

    #[inline]
    fn max_before(&self, record: &SegmentRecord) -> u64 {
        record
            .prev
            .map_or(0, |prev| self.records.get(prev).max_position)
    }

    #[inline]
    fn record_of(&self, segment: SegmentId) -> RecordId {
        *self
            .lookup
            .get(&segment)
            .unwrap_or_else(|| panic!("{segment:?} is not indexed"))
    }

    /// Recomputes `max_position` starting at `cursor` until a value stops changing.
    fn refresh_from(&mut self, mut cursor: Option<RecordId>) {
        while let Some(id) = cursor {
            let record = self.records.get(id);
            let max = self.max_before(record).max(record.end());
            let record = self.records.get_mut(id);

            if record.max_position == max {
                break;
            }

            record.max_position = max;
            cursor = record.next;
        }
    }

    /// In-order `(segment, start, length)` triples.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (SegmentId, u64, u64)> + '_ {
        std::iter::successors(self.head, |id| self.records.get(*id).next).map(|id| {
            let record = self.records.get(id);

            (record.segment, record.start, record.length)
        })
    }
}

/*

====================================
============ MAINTENANCE ===========
====================================

*/

impl DataSegmentsMap {
    /// Registers `segment` covering `[start, start + length)`.
    ///
    /// # Panics
    ///
    /// Panics if the segment is already indexed.
    pub(crate) fn add(&mut self, segment: SegmentId, start: u64, length: u64) {
        assert!(!self.contains(segment), "{segment:?} is already indexed");

        let key = (start, length);
        let after = match self.pointer.or(self.head) {
            None => None,
            Some(mut cursor) => {
                if self.records.get(cursor).key() > key {
                    loop {
                        match self.records.get(cursor).prev {
                            Some(prev) if self.records.get(cursor).key() > key => cursor = prev,
                            _ => break,
                        }
                    }

                    (self.records.get(cursor).key() <= key).then_some(cursor)
                } else {
                    while let Some(next) = self.records.get(cursor).next {
                        if self.records.get(next).key() > key {
                            break;
                        }

                        cursor = next;
                    }

                    Some(cursor)
                }
            }
        };
        let next = match after {
            Some(after) => self.records.get(after).next,
            None => self.head,
        };
        let id = self.records.insert(SegmentRecord {
            segment,
            start,
            length,
            max_position: 0,
            prev: after,
            next,
        });

        match after {
            Some(after) => self.records.get_mut(after).next = Some(id),
            None => self.head = Some(id),
        }

        match next {
            Some(next) => self.records.get_mut(next).prev = Some(id),
            None => self.tail = Some(id),
        }

        let record = self.records.get(id);
        let max = self.max_before(record).max(record.end());

        self.records.get_mut(id).max_position = max;
        self.refresh_from(next);
        self.lookup.insert(segment, id);
        self.pointer = Some(id);
    }

    /// # Panics
    ///
    /// Panics if the segment is not indexed.
    pub(crate) fn remove(&mut self, segment: SegmentId) {
        let id = self.record_of(segment);

        self.lookup.remove(&segment);

        let record = self.records.remove(id);

        match record.prev {
            Some(prev) => self.records.get_mut(prev).next = record.next,
            None => self.head = record.next,
        }

        match record.next {
            Some(next) => self.records.get_mut(next).prev = record.prev,
            None => self.tail = record.prev,
        }

        if self.pointer == Some(id) {
            self.pointer = record.prev.or(record.next);
        }

        self.refresh_from(record.next);
    }

    /// Moves the record of `segment` to its new interval.
    pub(crate) fn update(&mut self, segment: SegmentId, start: u64, length: u64) {
        self.remove(segment);
        self.add(segment, start, length);
    }

    /// Adds `delta` to the start of every record starting at or after
    /// `position` and returns the shifted segments.
    ///
    /// Relative order is kept because every shifted record ends up past all
    /// the records that stay, so the records are updated in place.
    pub(crate) fn shift_from(&mut self, position: u64, delta: u64) -> Vec<SegmentId> {
        let mut shifted = Vec::new();
        let mut cursor = self.first_starting_at(position);
        let first = cursor;

        while let Some(id) = cursor {
            let record = self.records.get_mut(id);

            record.start.add_assign(delta);
            shifted.push(record.segment);
            cursor = record.next;
        }

        // Every value from the first shifted record on may change.
        let mut cursor = first;

        while let Some(id) = cursor {
            let record = self.records.get(id);
            let max = self.max_before(record).max(record.end());
            let record = self.records.get_mut(id);

            record.max_position = max;
            cursor = record.next;
        }

        shifted
    }
}

/*

====================================
============== QUERIES =============
====================================

*/

impl DataSegmentsMap {
    fn first_starting_at(&mut self, position: u64) -> Option<RecordId> {
        let mut cursor = self.pointer.or(self.head)?;

        if self.records.get(cursor).start >= position {
            while let Some(prev) = self.records.get(cursor).prev {
                if self.records.get(prev).start < position {
                    break;
                }

                cursor = prev;
            }
        } else {
            loop {
                cursor = self.records.get(cursor).next?;

                if self.records.get(cursor).start >= position {
                    break;
                }
            }
        }

        self.pointer = Some(cursor);

        Some(cursor)
    }

    /// First record, in index order, that may overlap `[start, start + length)`.
    fn focus_first_overlay(&mut self, start: u64, length: u64) -> Option<RecordId> {
        let mut cursor = self.pointer.or(self.head)?;

        if self.records.get(cursor).max_position > start {
            while let Some(prev) = self.records.get(cursor).prev {
                if self.records.get(prev).max_position <= start {
                    break;
                }

                cursor = prev;
            }
        } else {
            loop {
                cursor = self.records.get(cursor).next?;

                if self.records.get(cursor).max_position > start {
                    break;
                }
            }
        }

        self.pointer = Some(cursor);

        let end = start + length;

        (self.records.get(cursor).start < end).then_some(cursor)
    }

    /// Every segment overlapping `[start, start + length)`, in index order.
    ///
    /// A zero `length` asks for segments strictly containing `start`, which
    /// is the conflict set of an insertion at `start`.
    pub(crate) fn overlapping(&mut self, start: u64, length: u64) -> Vec<SegmentId> {
        let end = start + length;
        let mut res = Vec::new();
        let mut cursor = self.focus_first_overlay(start, length);

        while let Some(id) = cursor {
            let record = self.records.get(id);

            if record.start >= end {
                break;
            }

            if record.end() > start {
                res.push(record.segment);
            }

            cursor = record.next;
        }

        res
    }

    /// Checks ordering, cached maxima and the segment lookup.
    pub(crate) fn validate(&self) -> Result<(), String> {
        let mut prev_key = None;
        let mut max = 0;
        let mut count = 0;

        for id in std::iter::successors(self.head, |id| self.records.get(*id).next) {
            let record = self.records.get(id);

            if prev_key.is_some_and(|key| key > record.key()) {
                return Err(format!("{:?} is out of order", record.segment));
            }

            max = max.max(record.end());

            if record.max_position != max {
                return Err(format!(
                    "{:?} caches max {} instead of {max}",
                    record.segment, record.max_position
                ));
            }

            if self.lookup.get(&record.segment) != Some(&id) {
                return Err(format!("{:?} is missing from the lookup", record.segment));
            }

            prev_key = Some(record.key());
            count.add_assign(1);
        }

        if count != self.len() || count != self.lookup.len() {
            return Err(format!(
                "{count} linked records, {} stored, {} looked up",
                self.len(),
                self.lookup.len()
            ));
        }

        Ok(())
    }
}
