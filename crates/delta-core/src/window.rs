use std::ops::{AddAssign, SubAssign};

use crate::arena::{DocumentId, SegmentId};
use crate::errors::{DeltaError, DeltaResult};
use crate::repository::{Payload, RepositoryState};
use crate::segment::SegmentKind;

/// Cached position of a window.
///
/// `position` is the document offset where `segment` starts. `None` means the
/// window sits at the end of the document, `position` is then the data size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct DataPointer {
    pub(crate) position: u64,
    pub(crate) segment: Option<SegmentId>,
}

/// Cursor over the segment list of one document.
///
/// Lookups walk from the last focused segment, so sequential access costs
/// about one step per segment boundary. Every edit of the segment list goes
/// through a window. A window whose revision is behind the document adopts the
/// pointer the last editing window published.
#[derive(Debug, Clone)]
pub(crate) struct DeltaDocumentWindow {
    document: DocumentId,
    pointer: DataPointer,
    revision: u64,
}

/*

====================================
========= CREATION METHOD ==========
====================================

*/

impl DeltaDocumentWindow {
    pub(crate) fn new(state: &RepositoryState, document: DocumentId) -> Self {
        let data = state.document(document);

        Self {
            document,
            pointer: data.synced_pointer,
            revision: data.revision,
        }
    }
}

/*

====================================
========= INLINE METHODS  ==========
====================================

*/

impl DeltaDocumentWindow {
    #[inline]
    pub(crate) fn pointer(&self) -> DataPointer {
        self.pointer
    }

    #[inline]
    pub(crate) fn data_size(&self, state: &RepositoryState) -> u64 {
        state.document(self.document).data_length
    }

    /// Adopts the published pointer if the document changed behind this window.
    pub(crate) fn sync(&mut self, state: &RepositoryState) {
        let data = state.document(self.document);

        if self.revision != data.revision {
            self.pointer = data.synced_pointer;
            self.revision = data.revision;
        }
    }

    /// Announces a change of the segment list made through this window.
    pub(crate) fn publish(&mut self, state: &mut RepositoryState) {
        let data = state.document_mut(self.document);

        data.revision.add_assign(1);
        data.synced_pointer = self.pointer;
        self.revision = data.revision;
    }

    #[inline]
    fn out_of_bounds(&self, state: &RepositoryState, position: u64) -> DeltaError {
        DeltaError::OutOfBounds {
            position,
            size: self.data_size(state),
        }
    }

    #[inline]
    pub(crate) fn check_position(&self, state: &RepositoryState, position: u64) -> DeltaResult<()> {
        if position > self.data_size(state) {
            return Err(self.out_of_bounds(state, position));
        }

        Ok(())
    }

    /// Checks that `[position, position + length)` lies inside the document.
    #[inline]
    pub(crate) fn check_range(&self, state: &RepositoryState, position: u64, length: u64) -> DeltaResult<u64> {
        position
            .checked_add(length)
            .filter(|end| *end <= self.data_size(state))
            .ok_or_else(|| self.out_of_bounds(state, position))
    }
}

/*

====================================
============ NAVIGATION ============
====================================

*/

impl DeltaDocumentWindow {
    /// Moves to the segment containing `position`.
    ///
    /// Returns `None` when `position` is the data size.
    ///
    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if `position` is past the data size.
    pub(crate) fn focus_segment(
        &mut self,
        state: &RepositoryState,
        position: u64,
    ) -> DeltaResult<Option<SegmentId>> {
        let document = state.document(self.document);
        let size = document.data_length;

        if position > size {
            return Err(self.out_of_bounds(state, position));
        }

        if position == size {
            self.pointer = DataPointer {
                position,
                segment: None,
            };

            return Ok(None);
        }

        if position == 0 {
            self.pointer = DataPointer {
                position,
                segment: document.head,
            };

            return Ok(document.head);
        }

        let (mut start, mut segment) = match self.pointer.segment {
            Some(segment) => (self.pointer.position, segment),
            None => {
                let tail = document.tail.expect("non-empty document without tail");

                (size - state.segments.get(tail).length, tail)
            }
        };

        while position < start {
            segment = state
                .segments
                .get(segment)
                .prev
                .expect("segment list is shorter than the data size");
            start.sub_assign(state.segments.get(segment).length);
        }

        loop {
            let data = state.segments.get(segment);

            if position < start + data.length {
                break;
            }

            start.add_assign(data.length);
            segment = data.next.expect("segment list is shorter than the data size");
        }

        self.pointer = DataPointer {
            position: start,
            segment: Some(segment),
        };

        Ok(Some(segment))
    }

    /// Resets the pointer to the first segment.
    pub(crate) fn reset(&mut self, state: &RepositoryState) {
        self.pointer = DataPointer {
            position: 0,
            segment: state.document(self.document).head,
        };
    }

    /// Splits the segment containing `position` so that a segment starts there.
    pub(crate) fn split_segment(&mut self, state: &mut RepositoryState, position: u64) -> DeltaResult<()> {
        let Some(segment) = self.focus_segment(state, position)? else {
            return Ok(());
        };
        let offset = position - self.pointer.position;

        if offset == 0 {
            return Ok(());
        }

        let length = state.segments.get(segment).length;
        let next = state.segments.get(segment).next;
        let tail = state.copy_segment(segment, offset, length - offset);

        state.update_segment_length(segment, offset);
        state.link_before(self.document, next, tail);

        Ok(())
    }

    /// Puts `new` in place of the linked segment `old` of the same length.
    pub(crate) fn replace_linked(&mut self, state: &mut RepositoryState, old: SegmentId, new: SegmentId) {
        debug_assert_eq!(state.segments.get(old).length, state.segments.get(new).length);

        let next = state.segments.get(old).next;

        state.unlink(self.document, old);
        state.link_before(self.document, next, new);

        if self.pointer.segment == Some(old) {
            self.pointer.segment = Some(new);
        }
    }
}

/*

====================================
============= READING ==============
====================================

*/

impl DeltaDocumentWindow {
    pub(crate) fn get_byte(&mut self, state: &mut RepositoryState, position: u64) -> DeltaResult<u8> {
        if position >= self.data_size(state) {
            return Err(self.out_of_bounds(state, position));
        }

        let segment = self
            .focus_segment(state, position)?
            .expect("position inside the document has a segment");
        let start = state.segments.get(segment).start_position;

        state.segment_byte(segment, start + position - self.pointer.position)
    }

    pub(crate) fn copy_to_slice(
        &mut self,
        state: &mut RepositoryState,
        position: u64,
        target: &mut [u8],
    ) -> DeltaResult<()> {
        self.check_range(state, position, target.len() as u64)?;

        if target.is_empty() {
            return Ok(());
        }

        let mut segment = self
            .focus_segment(state, position)?
            .expect("position inside the document has a segment");
        let mut offset = position - self.pointer.position;
        let mut copied = 0;

        loop {
            let length = state.segments.get(segment).length;
            let take = std::cmp::min(length - offset, (target.len() - copied) as u64) as usize;

            state.read_segment(segment, offset, &mut target[copied..copied + take])?;
            copied.add_assign(take);

            if copied == target.len() {
                return Ok(());
            }

            let next = state
                .segments
                .get(segment)
                .next
                .expect("segment list is shorter than the data size");

            self.pointer = DataPointer {
                position: self.pointer.position + length,
                segment: Some(next),
            };
            segment = next;
            offset = 0;
        }
    }

    /// Unlinked copy of the part of the segment at `position`, at most `length` bytes.
    pub(crate) fn part_copy(
        &mut self,
        state: &mut RepositoryState,
        position: u64,
        length: u64,
    ) -> DeltaResult<SegmentId> {
        if position >= self.data_size(state) {
            return Err(self.out_of_bounds(state, position));
        }

        let segment = self
            .focus_segment(state, position)?
            .expect("position inside the document has a segment");
        let offset = position - self.pointer.position;
        let take = std::cmp::min(length, state.segments.get(segment).length - offset);

        Ok(state.copy_segment(segment, offset, take))
    }

    /// Unlinked copies of the segments covering `[position, position + length)`.
    pub(crate) fn copy_segments(
        &mut self,
        state: &mut RepositoryState,
        position: u64,
        length: u64,
    ) -> DeltaResult<Vec<SegmentId>> {
        self.check_range(state, position, length)?;

        let mut copies = Vec::new();
        let mut copied = 0;

        while copied < length {
            let copy = self.part_copy(state, position + copied, length - copied)?;

            copied.add_assign(state.segments.get(copy).length);
            copies.push(copy);
        }

        Ok(copies)
    }

    /// Integrity check of the pointer against the segment list.
    pub(crate) fn validate_pointer_position(&self, state: &RepositoryState) -> DeltaResult<()> {
        let size = self.data_size(state);

        let Some(target) = self.pointer.segment else {
            if self.pointer.position != size {
                return Err(DeltaError::Integrity(format!(
                    "end pointer at {} but data size is {size}",
                    self.pointer.position
                )));
            }

            return Ok(());
        };

        let mut position = 0;

        for segment in state.document_segments(self.document) {
            if segment == target {
                if position != self.pointer.position {
                    return Err(DeltaError::Integrity(format!(
                        "pointer at {} but {target:?} starts at {position}",
                        self.pointer.position
                    )));
                }

                return Ok(());
            }

            position.add_assign(state.segments.get(segment).length);
        }

        Err(DeltaError::Integrity(format!(
            "pointer segment {target:?} is not linked into the document"
        )))
    }
}

/*

====================================
============= EDITING ==============
====================================

*/

impl DeltaDocumentWindow {
    /// Overwrites one byte. Writing at the data size appends it.
    pub(crate) fn set_byte(&mut self, state: &mut RepositoryState, position: u64, value: u8) -> DeltaResult<()> {
        if position == self.data_size(state) {
            return self.insert(state, position, Payload::Bytes(&[value]));
        }

        let segment = self
            .focus_segment(state, position)?
            .expect("position inside the document has a segment");
        let data = state.segments.get(segment);
        let (kind, start) = (data.kind, data.start_position);

        match kind {
            SegmentKind::Memory(_) => {
                let source_position = start + position - self.pointer.position;

                state.set_memory_byte(segment, source_position, value)
            }
            SegmentKind::File(_) => self.set_file_byte(state, position, value),
            SegmentKind::Space => panic!("attempt to write into space segment {segment:?}"),
        }
    }

    /// Carves the byte at `position` out of a file segment into memory.
    fn set_file_byte(&mut self, state: &mut RepositoryState, position: u64, value: u8) -> DeltaResult<()> {
        self.split_segment(state, position)?;

        let file_segment = self
            .focus_segment(state, position)?
            .expect("position inside the document has a segment");
        let prev = state
            .segments
            .get(file_segment)
            .prev
            .filter(|prev| state.is_memory_tail(*prev));

        let memory_segment = match prev {
            Some(prev) => {
                let end = state.segments.get(prev).end_position();

                state.insert_memory_data(prev, end, Payload::Bytes(&[value]))?;

                prev
            }
            None => {
                let source = state.open_memory_source_with(Payload::Bytes(&[value]));
                let segment = state.create_memory_segment(source, 0, 1);

                state.link_before(self.document, Some(file_segment), segment);

                segment
            }
        };

        let file = state.segments.get(file_segment);
        let (start, length) = (file.start_position, file.length);

        if length == 1 {
            state.unlink(self.document, file_segment);
            state.drop_segment(file_segment);
        } else {
            state.update_segment(file_segment, start + 1, length - 1);
        }

        self.pointer = DataPointer {
            position: position + 1 - state.segments.get(memory_segment).length,
            segment: Some(memory_segment),
        };

        if let Some(next) = state.segments.get(memory_segment).next {
            self.try_merge_segments(state, memory_segment, next);
        }

        Ok(())
    }

    /// Inserts bytes at `position`.
    ///
    /// Data goes into an adjoining memory segment when that is possible without
    /// moving other segments' bytes around, otherwise into a new one.
    pub(crate) fn insert(&mut self, state: &mut RepositoryState, position: u64, payload: Payload<'_>) -> DeltaResult<()> {
        let length = payload.len();

        self.check_position(state, position)?;

        if length == 0 {
            return Ok(());
        }

        let segment = self.focus_segment(state, position)?;

        if let Some(segment) = segment {
            let data = state.segments.get(segment);
            let (kind, start) = (data.kind, data.start_position);

            if let SegmentKind::Memory(_) = kind {
                let source_position = start + position - self.pointer.position;

                state.insert_memory_data(segment, source_position, payload)?;
                state.grow_document(self.document, length);

                return Ok(());
            }
        }

        let at_boundary = segment.is_none() || position == self.pointer.position;
        let prev = match segment {
            Some(segment) => state.segments.get(segment).prev,
            None => state.document(self.document).tail,
        };

        if let Some(prev) = prev.filter(|prev| at_boundary && state.is_memory_tail(*prev)) {
            let prev_length = state.segments.get(prev).length;
            let end = state.segments.get(prev).end_position();

            state.insert_memory_data(prev, end, payload)?;
            state.grow_document(self.document, length);

            self.pointer = DataPointer {
                position: position - prev_length,
                segment: Some(prev),
            };

            return Ok(());
        }

        self.split_segment(state, position)?;

        let next = self.focus_segment(state, position)?;
        let source = state.open_memory_source_with(payload);
        let segment = state.create_memory_segment(source, 0, length);

        state.link_before(self.document, next, segment);
        state.grow_document(self.document, length);

        self.pointer = DataPointer {
            position,
            segment: Some(segment),
        };
        self.try_merge_area(state, segment, segment);

        Ok(())
    }

    /// Links already created segments in at `position`.
    pub(crate) fn insert_segments(
        &mut self,
        state: &mut RepositoryState,
        position: u64,
        segments: &[SegmentId],
    ) -> DeltaResult<()> {
        self.check_position(state, position)?;

        let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
            return Ok(());
        };

        self.split_segment(state, position)?;

        let next = self.focus_segment(state, position)?;

        for segment in segments {
            let length = state.segments.get(*segment).length;

            state.link_before(self.document, next, *segment);
            state.grow_document(self.document, length);
        }

        self.pointer = DataPointer {
            position,
            segment: Some(*first),
        };
        self.try_merge_area(state, *first, *last);

        Ok(())
    }

    /// Overwrites the bytes at `position` with `segments`, growing the document
    /// if they reach past the end.
    pub(crate) fn replace_segments(
        &mut self,
        state: &mut RepositoryState,
        position: u64,
        segments: &[SegmentId],
    ) -> DeltaResult<()> {
        self.check_position(state, position)?;

        let length: u64 = segments.iter().map(|segment| state.segments.get(*segment).length).sum();
        let overlap = std::cmp::min(length, self.data_size(state) - position);

        self.remove(state, position, overlap)?;
        self.insert_segments(state, position, segments)
    }

    pub(crate) fn remove(&mut self, state: &mut RepositoryState, position: u64, length: u64) -> DeltaResult<()> {
        let end = self.check_range(state, position, length)?;

        if length == 0 {
            return Ok(());
        }

        self.split_segment(state, position)?;
        self.split_segment(state, end)?;

        let first = self
            .focus_segment(state, position)?
            .expect("removed range has a segment");
        let before = state.segments.get(first).prev;
        let mut cursor = Some(first);
        let mut removed = 0;

        while removed < length {
            let segment = cursor.expect("segment list is shorter than the removed range");

            cursor = state.segments.get(segment).next;
            removed.add_assign(state.segments.get(segment).length);
            state.unlink(self.document, segment);
            state.drop_segment(segment);
        }

        assert_eq!(removed, length, "removed segments do not match the removed length");

        state.shrink_document(self.document, length);

        match before {
            Some(before) => {
                self.pointer = DataPointer {
                    position: position - state.segments.get(before).length,
                    segment: Some(before),
                };

                if let Some(after) = cursor {
                    self.try_merge_segments(state, before, after);
                }
            }
            None => self.reset(state),
        }

        Ok(())
    }

    pub(crate) fn set_data_size(&mut self, state: &mut RepositoryState, size: u64) -> DeltaResult<()> {
        let current = self.data_size(state);

        if size > current {
            self.insert(state, current, Payload::Zeroed(size - current))
        } else {
            self.remove(state, size, current - size)
        }
    }

    /// Drops every segment of the document.
    pub(crate) fn clear(&mut self, state: &mut RepositoryState) {
        for segment in state.document_segments(self.document) {
            state.unlink(self.document, segment);
            state.drop_segment(segment);
        }

        let data_length = self.data_size(state);

        state.shrink_document(self.document, data_length);
        self.reset(state);
    }
}

/*

====================================
============= MERGING ==============
====================================

*/

impl DeltaDocumentWindow {
    /// Merges the inserted run `first..=last` with its neighbours where possible.
    pub(crate) fn try_merge_area(&mut self, state: &mut RepositoryState, first: SegmentId, last: SegmentId) {
        let mut last = last;

        if let Some(prev) = state.segments.get(first).prev {
            if self.try_merge_segments(state, prev, first) && first == last {
                last = prev;
            }
        }

        if let Some(next) = state.segments.get(last).next {
            self.try_merge_segments(state, last, next);
        }
    }

    /// Merges `second` into the preceding `first` when both are contiguous
    /// intervals of the same source.
    pub(crate) fn try_merge_segments(
        &mut self,
        state: &mut RepositoryState,
        first: SegmentId,
        second: SegmentId,
    ) -> bool {
        let a = state.segments.get(first);
        let b = state.segments.get(second);

        debug_assert_eq!(a.next, Some(second));

        let same_source = match (a.kind, b.kind) {
            (SegmentKind::File(x), SegmentKind::File(y)) => x == y,
            (SegmentKind::Memory(x), SegmentKind::Memory(y)) => x == y,
            _ => false,
        };

        if !same_source || a.end_position() != b.start_position {
            return false;
        }

        let (first_length, second_length) = (a.length, b.length);

        state.unlink(self.document, second);
        state.drop_segment(second);
        state.update_segment_length(first, first_length + second_length);

        if self.pointer.segment == Some(second) {
            self.pointer = DataPointer {
                position: self.pointer.position - first_length,
                segment: Some(first),
            };
        }

        true
    }
}
