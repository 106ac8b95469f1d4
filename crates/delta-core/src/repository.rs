use std::cell::RefCell;
use std::ops::{AddAssign, SubAssign};
use std::rc::Rc;

use crate::arena::{Arena, DocumentId, FileSourceId, MemorySourceId, SegmentId};
use crate::errors::{DeltaError, DeltaResult};
use crate::segment::{DataSegment, SegmentKind, SourceKey};
use crate::segments_map::DataSegmentsMap;
use crate::window::DataPointer;

#[derive(Debug)]
pub(crate) struct FileSourceEntry {
    pub(crate) source: io::file_source::FileDataSource,
    pub(crate) map: DataSegmentsMap,
}

#[derive(Debug, Default)]
pub(crate) struct MemorySourceEntry {
    pub(crate) source: io::memory_source::MemoryDataSource,
    pub(crate) map: DataSegmentsMap,
}

/// Repository side of a [`crate::document::DeltaDocument`].
#[derive(Debug)]
pub(crate) struct DocumentState {
    pub(crate) head: Option<SegmentId>,
    pub(crate) tail: Option<SegmentId>,
    pub(crate) data_length: u64,
    pub(crate) file_source: Option<FileSourceId>,
    /// Bumped by every structural change, windows compare it to their own copy.
    pub(crate) revision: u64,
    /// Pointer of the window that made the last change.
    pub(crate) synced_pointer: DataPointer,
    pub(crate) poisoned: bool,
}

/// Bytes handed to an insertion.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Payload<'a> {
    Zeroed(u64),
    Bytes(&'a [u8]),
}

impl Payload<'_> {
    #[inline]
    pub(crate) fn len(&self) -> u64 {
        match self {
            Payload::Zeroed(length) => *length,
            Payload::Bytes(bytes) => bytes.len() as u64,
        }
    }
}

/// Everything a [`SegmentsRepository`] owns.
#[derive(Debug, Default)]
pub(crate) struct RepositoryState {
    pub(crate) config: crate::config::RepositoryConfig,
    pub(crate) segments: Arena<SegmentId, DataSegment>,
    pub(crate) file_sources: Arena<FileSourceId, FileSourceEntry>,
    pub(crate) memory_sources: Arena<MemorySourceId, MemorySourceEntry>,
    pub(crate) documents: Arena<DocumentId, DocumentState>,
}

/*

====================================
=========== INDEX ACCESS ===========
====================================

*/

impl RepositoryState {
    fn map_mut(&mut self, key: SourceKey) -> &mut DataSegmentsMap {
        match key {
            SourceKey::File(source) => &mut self.file_sources.get_mut(source).map,
            SourceKey::Memory(source) => &mut self.memory_sources.get_mut(source).map,
        }
    }

    fn index_segment(&mut self, id: SegmentId) {
        let segment = self.segments.get(id);
        let (start, length) = (segment.start_position, segment.length);

        if let Some(key) = segment.source_key() {
            self.map_mut(key).add(id, start, length);
        }
    }

    fn unindex_segment(&mut self, id: SegmentId) {
        if let Some(key) = self.segments.get(id).source_key() {
            self.map_mut(key).remove(id);
        }
    }

    /// Whether `id` is a memory segment ending exactly at the end of its buffer.
    pub(crate) fn is_memory_tail(&self, id: SegmentId) -> bool {
        let segment = self.segments.get(id);

        match segment.kind {
            SegmentKind::Memory(source) => {
                segment.end_position() == self.memory_sources.get(source).source.data_size()
            }
            SegmentKind::File(_) | SegmentKind::Space => false,
        }
    }
}

/*

====================================
======== SEGMENT LIFECYCLE =========
====================================

*/

impl RepositoryState {
    fn create_segment(&mut self, kind: SegmentKind, start: u64, length: u64) -> SegmentId {
        let id = self
            .segments
            .insert(DataSegment::new(kind, start, length));

        self.index_segment(id);

        id
    }

    pub(crate) fn create_file_segment(
        &mut self,
        source: FileSourceId,
        start: u64,
        length: u64,
    ) -> SegmentId {
        self.create_segment(SegmentKind::File(source), start, length)
    }

    pub(crate) fn create_memory_segment(
        &mut self,
        source: MemorySourceId,
        start: u64,
        length: u64,
    ) -> SegmentId {
        self.create_segment(SegmentKind::Memory(source), start, length)
    }

    pub(crate) fn create_space_segment(&mut self, length: u64) -> SegmentId {
        self.create_segment(SegmentKind::Space, 0, length)
    }

    pub(crate) fn open_memory_source(&mut self) -> MemorySourceId {
        self.memory_sources.insert(MemorySourceEntry::default())
    }

    pub(crate) fn open_memory_source_with(&mut self, payload: Payload<'_>) -> MemorySourceId {
        let id = self.open_memory_source();
        let source = &mut self.memory_sources.get_mut(id).source;

        match payload {
            Payload::Zeroed(length) => source.insert_zeroed(0, length),
            Payload::Bytes(bytes) => source.insert(0, bytes),
        }

        id
    }

    /// Unlinked copy of `[offset, offset + length)` of a segment.
    ///
    /// # Panics
    ///
    /// Panics if the part is not inside the segment.
    pub(crate) fn copy_segment(&mut self, id: SegmentId, offset: u64, length: u64) -> SegmentId {
        let segment = self.segments.get(id);
        let (kind, start) = (segment.kind, segment.start_position);

        assert!(
            offset + length <= segment.length,
            "part {offset}+{length} is outside of {id:?} ({} bytes)",
            segment.length
        );

        self.create_segment(kind, start + offset, length)
    }

    pub(crate) fn update_segment(&mut self, id: SegmentId, start: u64, length: u64) {
        let segment = self.segments.get_mut(id);

        segment.start_position = start;
        segment.length = length;

        if let Some(key) = segment.source_key() {
            self.map_mut(key).update(id, start, length);
        }
    }

    pub(crate) fn update_segment_length(&mut self, id: SegmentId, length: u64) {
        let start = self.segments.get(id).start_position;

        self.update_segment(id, start, length);
    }

    /// Removes an unlinked segment from the repository and its index.
    pub(crate) fn drop_segment(&mut self, id: SegmentId) {
        let kind = self.segments.get(id).kind;

        match kind {
            SegmentKind::File(_) => self.drop_file_segment(id),
            SegmentKind::Memory(source) => self.drop_memory_segment(id, source),
            SegmentKind::Space => {
                self.segments.remove(id);
            }
        }
    }

    fn drop_file_segment(&mut self, id: SegmentId) {
        self.unindex_segment(id);
        self.segments.remove(id);
    }

    fn drop_memory_segment(&mut self, id: SegmentId, source: MemorySourceId) {
        self.unindex_segment(id);
        self.segments.remove(id);
        self.release_memory_source(source);
    }

    /// Frees a memory source no segment refers to anymore.
    fn release_memory_source(&mut self, source: MemorySourceId) {
        if self.memory_sources.get(source).map.is_empty() {
            self.memory_sources.remove(source);

            log::trace!("released {source:?}");
        }
    }
}

/*

====================================
============= READING ==============
====================================

*/

impl RepositoryState {
    /// Byte of a segment at a source-space position.
    ///
    /// # Panics
    ///
    /// Panics for a space segment.
    pub(crate) fn segment_byte(&mut self, id: SegmentId, position: u64) -> DeltaResult<u8> {
        let kind = self.segments.get(id).kind;

        match kind {
            SegmentKind::File(source) => Ok(self.file_sources.get_mut(source).source.get_byte(position)?),
            SegmentKind::Memory(source) => Ok(self.memory_sources.get(source).source.get_byte(position)),
            SegmentKind::Space => panic!("attempt to read space segment {id:?}"),
        }
    }

    /// Fills `target` from `kind`'s source starting at the source-space `position`.
    pub(crate) fn read_source(
        &mut self,
        kind: SegmentKind,
        position: u64,
        target: &mut [u8],
    ) -> DeltaResult<()> {
        match kind {
            SegmentKind::File(source) => {
                self.file_sources
                    .get_mut(source)
                    .source
                    .read_at(position, target)?;
            }
            SegmentKind::Memory(source) => self
                .memory_sources
                .get(source)
                .source
                .copy_to_slice(position, target),
            SegmentKind::Space => panic!("attempt to read space segment"),
        }

        Ok(())
    }

    /// Fills `target` from segment `id` starting `offset` bytes into the segment.
    pub(crate) fn read_segment(&mut self, id: SegmentId, offset: u64, target: &mut [u8]) -> DeltaResult<()> {
        let segment = self.segments.get(id);
        let (kind, start) = (segment.kind, segment.start_position);

        debug_assert!(offset + target.len() as u64 <= segment.length);

        self.read_source(kind, start + offset, target)
    }
}

/*

====================================
========== COPY ON WRITE ===========
====================================

*/

impl RepositoryState {
    /// Overwrites one byte of a memory segment's buffer.
    pub(crate) fn set_memory_byte(&mut self, id: SegmentId, position: u64, value: u8) -> DeltaResult<()> {
        let SegmentKind::Memory(source) = self.segments.get(id).kind else {
            panic!("{id:?} is not a memory segment");
        };

        self.detach_memory_area(source, position, 1, id)?;
        self.memory_sources
            .get_mut(source)
            .source
            .set_byte(position, value);

        Ok(())
    }

    /// Inserts into the buffer of memory segment `id` at the source-space
    /// `position` and grows the segment accordingly.
    ///
    /// # Panics
    ///
    /// Panics if `position` is not inside or at an end of the segment.
    pub(crate) fn insert_memory_data(
        &mut self,
        id: SegmentId,
        position: u64,
        payload: Payload<'_>,
    ) -> DeltaResult<()> {
        let segment = self.segments.get(id);
        let SegmentKind::Memory(source) = segment.kind else {
            panic!("{id:?} is not a memory segment");
        };
        let (start, length) = (segment.start_position, segment.length);
        let delta = payload.len();

        assert!(
            (start..=start + length).contains(&position),
            "insertion at {position} is outside of {id:?}"
        );

        self.detach_memory_area(source, position, 0, id)?;

        // The grown segment keeps its start even when it begins at `position`.
        self.memory_sources.get_mut(source).map.remove(id);

        let buffer = &mut self.memory_sources.get_mut(source).source;

        match payload {
            Payload::Zeroed(count) => buffer.insert_zeroed(position, count),
            Payload::Bytes(bytes) => buffer.insert(position, bytes),
        }

        self.shift_segments(source, position, delta);

        self.segments.get_mut(id).length = length + delta;
        self.memory_sources
            .get_mut(source)
            .map
            .add(id, start, length + delta);

        Ok(())
    }

    /// Moves every segment of `source` starting at or after `position` by `delta`.
    pub(crate) fn shift_segments(&mut self, source: MemorySourceId, position: u64, delta: u64) {
        let shifted = self
            .memory_sources
            .get_mut(source)
            .map
            .shift_from(position, delta);

        for id in shifted {
            self.segments.get_mut(id).start_position.add_assign(delta);
        }
    }

    /// Detaches every segment except `except` overlapping `[start, start + length)`
    /// of `source`. A zero `length` stands for an insertion point.
    pub(crate) fn detach_memory_area(
        &mut self,
        source: MemorySourceId,
        start: u64,
        length: u64,
        except: SegmentId,
    ) -> DeltaResult<()> {
        let overlapping = self
            .memory_sources
            .get_mut(source)
            .map
            .overlapping(start, length);

        for id in overlapping.into_iter().filter(|id| *id != except) {
            self.detach_segment(id)?;
        }

        Ok(())
    }

    /// Copies the bytes of a segment into a private memory source and
    /// points the segment at it.
    pub(crate) fn detach_segment(&mut self, id: SegmentId) -> DeltaResult<()> {
        let segment = self.segments.get(id).clone();
        let mut buf = vec![0; <u64 as TryInto<usize>>::try_into(segment.length)?];

        self.read_source(segment.kind, segment.start_position, &mut buf)?;
        self.unindex_segment(id);

        let detached = self.open_memory_source_with(Payload::Bytes(&buf));
        let target = self.segments.get_mut(id);

        target.kind = SegmentKind::Memory(detached);
        target.start_position = 0;

        self.index_segment(id);

        if let SegmentKind::Memory(previous) = segment.kind {
            self.release_memory_source(previous);
        }

        log::trace!("detached {id:?} ({} bytes) into {detached:?}", segment.length);

        Ok(())
    }
}

/*

====================================
============ DOCUMENTS =============
====================================

*/

impl RepositoryState {
    #[inline]
    pub(crate) fn document(&self, id: DocumentId) -> &DocumentState {
        self.documents.get(id)
    }

    #[inline]
    pub(crate) fn document_mut(&mut self, id: DocumentId) -> &mut DocumentState {
        self.documents.get_mut(id)
    }

    pub(crate) fn grow_document(&mut self, id: DocumentId, length: u64) {
        self.document_mut(id).data_length.add_assign(length);
    }

    pub(crate) fn shrink_document(&mut self, id: DocumentId, length: u64) {
        self.document_mut(id).data_length.sub_assign(length);
    }

    pub(crate) fn check_document(&self, id: DocumentId) -> DeltaResult<()> {
        if self.document(id).poisoned {
            return Err(DeltaError::Poisoned);
        }

        Ok(())
    }

    /// Creates a document made of the given unlinked segments.
    pub(crate) fn create_document_with(
        &mut self,
        segments: &[SegmentId],
        file_source: Option<FileSourceId>,
    ) -> DocumentId {
        let id = self.documents.insert(DocumentState {
            head: None,
            tail: None,
            data_length: 0,
            file_source,
            revision: 0,
            synced_pointer: DataPointer::default(),
            poisoned: false,
        });

        for segment in segments {
            let length = self.segments.get(*segment).length;

            self.link_before(id, None, *segment);
            self.document_mut(id).data_length.add_assign(length);
        }

        let document = self.document_mut(id);

        document.synced_pointer = DataPointer {
            position: 0,
            segment: document.head,
        };

        id
    }

    /// Creates a document covering the whole current content of `source`.
    pub(crate) fn create_file_document(&mut self, source: FileSourceId) -> DeltaResult<DocumentId> {
        let length = self.file_sources.get(source).source.file_length()?;
        let segments = if length > 0 {
            vec![self.create_file_segment(source, 0, length)]
        } else {
            Vec::new()
        };

        Ok(self.create_document_with(&segments, Some(source)))
    }

    /// Drops every segment of the document and forgets it.
    pub(crate) fn drop_document(&mut self, id: DocumentId) {
        for segment in self.document_segments(id) {
            self.drop_segment(segment);
        }

        self.documents.remove(id);

        log::trace!("dropped {id:?}");
    }

    /// Segment handles of a document in list order.
    pub(crate) fn document_segments(&self, id: DocumentId) -> Vec<SegmentId> {
        std::iter::successors(self.document(id).head, |segment| self.segments.get(*segment).next).collect()
    }

    /// Restarts every window of the document at its first segment.
    pub(crate) fn reset_document_pointer(&mut self, id: DocumentId) {
        let document = self.document_mut(id);

        document.revision.add_assign(1);
        document.synced_pointer = DataPointer {
            position: 0,
            segment: document.head,
        };
    }

    /// Links unlinked `segment` in front of `before`, or at the end for `None`.
    /// The document length is left to the caller.
    pub(crate) fn link_before(&mut self, document: DocumentId, before: Option<SegmentId>, segment: SegmentId) {
        let prev = match before {
            Some(before) => self.segments.get(before).prev,
            None => self.document(document).tail,
        };

        {
            let linked = self.segments.get_mut(segment);

            linked.prev = prev;
            linked.next = before;
        }

        match prev {
            Some(prev) => self.segments.get_mut(prev).next = Some(segment),
            None => self.document_mut(document).head = Some(segment),
        }

        match before {
            Some(before) => self.segments.get_mut(before).prev = Some(segment),
            None => self.document_mut(document).tail = Some(segment),
        }
    }

    pub(crate) fn unlink(&mut self, document: DocumentId, segment: SegmentId) {
        let (prev, next) = {
            let unlinked = self.segments.get_mut(segment);

            (unlinked.prev.take(), unlinked.next.take())
        };

        match prev {
            Some(prev) => self.segments.get_mut(prev).next = next,
            None => self.document_mut(document).head = next,
        }

        match next {
            Some(next) => self.segments.get_mut(next).prev = prev,
            None => self.document_mut(document).tail = prev,
        }
    }

    /// Checks links, cached length and every index of the repository.
    pub(crate) fn validate_document(&self, id: DocumentId) -> DeltaResult<()> {
        let document = self.document(id);
        let mut prev = None;
        let mut total = 0u64;

        for segment in self.document_segments(id) {
            let data = self.segments.get(segment);

            if data.prev != prev {
                return Err(DeltaError::Integrity(format!("{segment:?} has a broken back link")));
            }

            total.add_assign(data.length);
            prev = Some(segment);
        }

        if document.tail != prev {
            return Err(DeltaError::Integrity(format!("{id:?} tail is not its last segment")));
        }

        if total != document.data_length {
            return Err(DeltaError::Integrity(format!(
                "{id:?} caches length {} but its segments hold {total}",
                document.data_length
            )));
        }

        Ok(())
    }

    pub(crate) fn validate_indexes(&self) -> DeltaResult<()> {
        for (source, entry) in self.file_sources.iter() {
            entry
                .map
                .validate()
                .map_err(|err| DeltaError::Integrity(format!("{source:?}: {err}")))?;
        }

        for (source, entry) in self.memory_sources.iter() {
            entry
                .map
                .validate()
                .map_err(|err| DeltaError::Integrity(format!("{source:?}: {err}")))?;

            if entry.map.is_empty() {
                return Err(DeltaError::Integrity(format!("{source:?} is not referenced")));
            }

            for (segment, start, length) in entry.map.iter() {
                if start + length > entry.source.data_size() {
                    return Err(DeltaError::Integrity(format!(
                        "{segment:?} reaches past the end of {source:?}"
                    )));
                }
            }
        }

        for (id, segment) in self.segments.iter() {
            let indexed = match segment.kind {
                SegmentKind::File(source) => self.file_sources.get(source).map.iter().find(|(s, ..)| *s == id),
                SegmentKind::Memory(source) => self.memory_sources.get(source).map.iter().find(|(s, ..)| *s == id),
                SegmentKind::Space => continue,
            };

            if indexed != Some((id, segment.start_position, segment.length)) {
                return Err(DeltaError::Integrity(format!("{id:?} does not match its index record")));
            }
        }

        Ok(())
    }
}

/*

====================================
=========== FILE SOURCES ===========
====================================

*/

impl RepositoryState {
    /// Moves every segment on `source` into private memory.
    pub(crate) fn detach_file_source(&mut self, source: FileSourceId) -> DeltaResult<()> {
        let segments: Vec<SegmentId> = self
            .file_sources
            .get(source)
            .map
            .iter()
            .map(|(segment, ..)| segment)
            .collect();
        let count = segments.len();

        for segment in segments {
            self.detach_segment(segment)?;
        }

        log::debug!(
            "detached {count} segments from {}",
            self.file_sources.get(source).source.path().display()
        );

        Ok(())
    }
}

/// Shared registry of sources, segments and documents.
///
/// Cloning the handle shares the repository. Documents keep a handle too,
/// so the repository lives as long as any of them.
#[derive(Debug, Clone, Default)]
pub struct SegmentsRepository {
    pub(crate) state: Rc<RefCell<RepositoryState>>,
}

/*

====================================
========= CREATION METHOD ==========
====================================

*/

impl SegmentsRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// - [`DeltaError::Config`] if the configuration does not validate.
    pub fn with_config(config: crate::config::RepositoryConfig) -> DeltaResult<Self> {
        config.validate()?;

        Ok(Self {
            state: Rc::new(RefCell::new(RepositoryState {
                config,
                ..RepositoryState::default()
            })),
        })
    }

    /// Repository configured from the `DELTA__*` environment variables.
    ///
    /// # Errors
    ///
    /// - [`DeltaError::Config`] if a variable is unknown or does not parse.
    pub fn from_env() -> DeltaResult<Self> {
        Self::with_config(crate::config::RepositoryConfig::from_env()?)
    }
}

/*

====================================
========= INLINE METHODS  ==========
====================================

*/

impl SegmentsRepository {
    #[inline]
    #[must_use]
    pub fn config(&self) -> crate::config::RepositoryConfig {
        self.state.borrow().config
    }

    #[inline]
    #[must_use]
    pub(crate) fn same_as(&self, other: &SegmentsRepository) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    #[inline]
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.state.borrow().documents.len()
    }

    /// Number of live memory sources, shared buffers counted once.
    #[inline]
    #[must_use]
    pub fn memory_source_count(&self) -> usize {
        self.state.borrow().memory_sources.len()
    }

    #[inline]
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.state.borrow().segments.len()
    }
}

/*

====================================
=========== FILE LIFECYCLE =========
====================================

*/

impl SegmentsRepository {
    /// # Errors
    ///
    /// - [`DeltaError::Source`] if the file cannot be opened.
    pub fn open_file_source(
        &self,
        path: impl AsRef<std::path::Path>,
        mode: io::access_mode::AccessMode,
    ) -> DeltaResult<FileSourceId> {
        let source = io::file_source::FileDataSource::open(path, mode)?;

        Ok(self.state.borrow_mut().file_sources.insert(FileSourceEntry {
            source,
            map: DataSegmentsMap::default(),
        }))
    }

    /// # Errors
    ///
    /// Fails if the source is closed.
    pub fn file_length(&self, source: FileSourceId) -> DeltaResult<u64> {
        Ok(self.state.borrow().file_sources.get(source).source.file_length()?)
    }

    /// Moves every segment referring to `source`, in any document, into memory.
    /// Documents stay attached to the source and can still be saved into it.
    ///
    /// # Errors
    ///
    /// Fails if the bytes cannot be read.
    pub fn detach_file_source(&self, source: FileSourceId) -> DeltaResult<()> {
        self.state.borrow_mut().detach_file_source(source)
    }

    /// Detaches the source and closes it. Documents created for it become
    /// plain memory documents.
    ///
    /// # Errors
    ///
    /// Fails if the bytes cannot be read or the source was already closed.
    pub fn close_file_source(&self, source: FileSourceId) -> DeltaResult<()> {
        let mut state = self.state.borrow_mut();

        state.detach_file_source(source)?;
        state.file_sources.get_mut(source).source.close()?;

        for id in state.documents.ids() {
            let document = state.document_mut(id);

            if document.file_source == Some(source) {
                document.file_source = None;
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn create_document(&self) -> crate::document::DeltaDocument {
        let id = self.state.borrow_mut().create_document_with(&[], None);

        crate::document::DeltaDocument::new(self.clone(), id)
    }

    /// Document showing the current content of `source`.
    ///
    /// # Errors
    ///
    /// Fails if the source is closed or its length cannot be read.
    pub fn create_document_for(&self, source: FileSourceId) -> DeltaResult<crate::document::DeltaDocument> {
        let id = self.state.borrow_mut().create_file_document(source)?;

        Ok(crate::document::DeltaDocument::new(self.clone(), id))
    }

    /// Writes the document into its file source in place.
    ///
    /// Other documents on the same source keep their content: their segments
    /// are moved to the new layout or copied into memory first.
    ///
    /// # Errors
    ///
    /// - [`DeltaError::NoFileSource`] for a document without file source.
    /// - [`DeltaError::Source`] if the source is closed or read-only.
    /// - Any I/O error while rewriting. The document is then poisoned.
    ///
    /// # Panics
    ///
    /// Panics if the document belongs to another repository.
    pub fn save_document(&self, document: &mut crate::document::DeltaDocument) -> DeltaResult<()> {
        assert!(
            self.same_as(document.repository()),
            "document belongs to another repository"
        );

        self.state.borrow_mut().save_document(document.id())
    }

    /// Checks every interval index against the segments.
    ///
    /// # Errors
    ///
    /// [`DeltaError::Integrity`] describing the first mismatch.
    pub fn validate(&self) -> DeltaResult<()> {
        self.state.borrow().validate_indexes()
    }
}
