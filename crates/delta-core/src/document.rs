use std::cell::RefCell;
use std::ops::AddAssign;

use crate::arena::{DocumentId, FileSourceId};
use crate::binary_data::{BinaryData, EditableBinaryData};
use crate::errors::{DeltaError, DeltaResult};
use crate::repository::{Payload, RepositoryState, SegmentsRepository};
use crate::segment::SegmentInfo;
use crate::window::DeltaDocumentWindow;

/// Editable byte document stored as a list of segments of file and memory
/// sources.
///
/// - Edits only touch the segment list and memory buffers, the file stays
///   untouched until [`DeltaDocument::save`].
/// - Several documents of one repository may show the same file. Saving one
///   of them keeps the others' content.
/// - Dropping the document releases its segments.
#[derive(Debug)]
pub struct DeltaDocument {
    repository: SegmentsRepository,
    id: DocumentId,
    window: RefCell<DeltaDocumentWindow>,
}

/*

====================================
========= CREATION METHOD ==========
====================================

*/

impl DeltaDocument {
    pub(crate) fn new(repository: SegmentsRepository, id: DocumentId) -> Self {
        let window = DeltaDocumentWindow::new(&repository.state.borrow(), id);

        Self {
            repository,
            id,
            window: RefCell::new(window),
        }
    }

    /// Independent document with the same content. Sources are shared until
    /// either side writes into them. The copy has no file source.
    ///
    /// # Errors
    ///
    /// [`DeltaError::Poisoned`] if a save of this document failed.
    pub fn copy(&self) -> DeltaResult<DeltaDocument> {
        self.copy_range(0, self.data_size())
    }

    /// Independent document holding `length` bytes from `position`.
    ///
    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if the range is outside of the document.
    pub fn copy_range(&self, position: u64, length: u64) -> DeltaResult<DeltaDocument> {
        let id = self.read(|window, state| {
            let segments = window.copy_segments(state, position, length)?;

            Ok(state.create_document_with(&segments, None))
        })?;

        Ok(DeltaDocument::new(self.repository.clone(), id))
    }
}

/*

====================================
========= INLINE METHODS  ==========
====================================

*/

impl DeltaDocument {
    #[inline]
    #[must_use]
    pub fn repository(&self) -> &SegmentsRepository {
        &self.repository
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> DocumentId {
        self.id
    }

    /// File the document was opened from and is saved into.
    #[inline]
    #[must_use]
    pub fn file_source(&self) -> Option<FileSourceId> {
        self.repository.state.borrow().document(self.id).file_source
    }

    /// Whether a failed save left the document unusable.
    #[inline]
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.repository.state.borrow().document(self.id).poisoned
    }

    /// Runs `op` on the synced window of the document.
    fn read<R>(
        &self,
        op: impl FnOnce(&mut DeltaDocumentWindow, &mut RepositoryState) -> DeltaResult<R>,
    ) -> DeltaResult<R> {
        let mut state = self.repository.state.borrow_mut();
        let mut window = self.window.borrow_mut();

        state.check_document(self.id)?;
        window.sync(&state);

        op(&mut *window, &mut *state)
    }

    /// Like [`DeltaDocument::read`], publishing the window afterwards.
    fn edit<R>(
        &mut self,
        op: impl FnOnce(&mut DeltaDocumentWindow, &mut RepositoryState) -> DeltaResult<R>,
    ) -> DeltaResult<R> {
        self.read(|window, state| {
            let res = op(&mut *window, &mut *state);

            window.publish(state);

            res
        })
    }
}

/*

====================================
============ SEGMENTS ==============
====================================

*/

impl DeltaDocument {
    /// Snapshot of the segment list.
    #[must_use]
    pub fn segments(&self) -> Vec<SegmentInfo> {
        let state = self.repository.state.borrow();

        state
            .document_segments(self.id)
            .into_iter()
            .map(|segment| state.segments.get(segment).info())
            .collect()
    }

    /// Segment containing `position` with the document offset it starts at.
    /// `None` at the end of the document.
    ///
    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if `position` is past the data size.
    pub fn segment_at(&self, position: u64) -> DeltaResult<Option<(u64, SegmentInfo)>> {
        self.read(|window, state| {
            let segment = window.focus_segment(state, position)?;

            Ok(segment.map(|segment| (window.pointer().position, state.segments.get(segment).info())))
        })
    }
}

/*

====================================
======== SAVE AND LIFECYCLE ========
====================================

*/

impl DeltaDocument {
    /// Writes the content into [`DeltaDocument::file_source`].
    ///
    /// # Errors
    ///
    /// See [`SegmentsRepository::save_document`].
    pub fn save(&mut self) -> DeltaResult<()> {
        let repository = self.repository.clone();

        repository.save_document(self)
    }

    /// Releases the document and its segments.
    pub fn dispose(self) {
        drop(self);
    }

    #[must_use]
    pub fn reader(&self) -> crate::stream::DeltaDocumentReader<'_> {
        crate::stream::DeltaDocumentReader::new(self)
    }

    #[must_use]
    pub fn writer(&mut self) -> crate::stream::DeltaDocumentWriter<'_> {
        crate::stream::DeltaDocumentWriter::new(self)
    }

    pub(crate) fn new_window(&self) -> DeltaDocumentWindow {
        DeltaDocumentWindow::new(&self.repository.state.borrow(), self.id)
    }
}

/*

====================================
============ VALIDATION ============
====================================

*/

impl DeltaDocument {
    /// Checks the cached window position against the segment list.
    ///
    /// # Errors
    ///
    /// [`DeltaError::Integrity`] on a mismatch.
    pub fn validate_pointer_position(&self) -> DeltaResult<()> {
        let state = self.repository.state.borrow();
        let mut window = self.window.borrow_mut();

        window.sync(&state);
        window.validate_pointer_position(&state)
    }

    /// Checks the cached data size against the segment lengths.
    ///
    /// # Errors
    ///
    /// [`DeltaError::Integrity`] on a mismatch.
    pub fn validate_document_size(&self) -> DeltaResult<()> {
        let state = self.repository.state.borrow();
        let mut total = 0u64;

        for segment in state.document_segments(self.id) {
            total.add_assign(state.segments.get(segment).length);
        }

        let cached = state.document(self.id).data_length;

        if total != cached {
            return Err(DeltaError::Integrity(format!(
                "data size is {cached} but segments hold {total} bytes"
            )));
        }

        Ok(())
    }

    /// Full integrity check: links, size, pointer and the interval indexes.
    ///
    /// # Errors
    ///
    /// [`DeltaError::Integrity`] describing the first violation.
    pub fn validate(&self) -> DeltaResult<()> {
        self.validate_document_size()?;
        self.validate_pointer_position()?;

        let state = self.repository.state.borrow();

        state.validate_document(self.id)?;
        state.validate_indexes()
    }
}

impl DeltaDocument {
    /// Id of `data` when it is another document of this repository.
    fn sibling_of(&self, data: &dyn BinaryData) -> Option<DocumentId> {
        data.as_delta_document()
            .filter(|other| other.repository.same_as(&self.repository))
            .map(|other| other.id)
    }
}

/// Unlinked copies of the segments covering `[offset, offset + length)` of `source`.
fn aliased_segments(
    state: &mut RepositoryState,
    source: DocumentId,
    offset: u64,
    length: u64,
) -> DeltaResult<Vec<crate::arena::SegmentId>> {
    state.check_document(source)?;

    DeltaDocumentWindow::new(state, source).copy_segments(state, offset, length)
}

impl Drop for DeltaDocument {
    fn drop(&mut self) {
        match self.repository.state.try_borrow_mut() {
            Ok(mut state) => state.drop_document(self.id),
            Err(_) => {
                log::warn!("{:?} dropped while its repository is busy, its segments stay registered", self.id);
                debug_assert!(
                    std::thread::panicking(),
                    "{:?} dropped while its repository is borrowed",
                    self.id
                );
            }
        }
    }
}

/*

====================================
=========== BINARY DATA ============
====================================

*/

impl BinaryData for DeltaDocument {
    #[inline]
    fn data_size(&self) -> u64 {
        self.repository.state.borrow().document(self.id).data_length
    }

    fn get_byte(&self, position: u64) -> DeltaResult<u8> {
        self.read(|window, state| window.get_byte(state, position))
    }

    fn copy_to_slice(&self, position: u64, target: &mut [u8]) -> DeltaResult<()> {
        self.read(|window, state| window.copy_to_slice(state, position, target))
    }

    #[inline]
    fn as_delta_document(&self) -> Option<&DeltaDocument> {
        Some(self)
    }
}

impl EditableBinaryData for DeltaDocument {
    fn set_data_size(&mut self, size: u64) -> DeltaResult<()> {
        self.edit(|window, state| window.set_data_size(state, size))
    }

    fn set_byte(&mut self, position: u64, value: u8) -> DeltaResult<()> {
        self.edit(|window, state| window.set_byte(state, position, value))
    }

    fn insert_zeroed(&mut self, position: u64, length: u64) -> DeltaResult<()> {
        self.edit(|window, state| window.insert(state, position, Payload::Zeroed(length)))
    }

    fn insert(&mut self, position: u64, data: &[u8]) -> DeltaResult<()> {
        self.edit(|window, state| window.insert(state, position, Payload::Bytes(data)))
    }

    /// Documents of the same repository are inserted by aliasing their
    /// segments, without copying any byte.
    fn insert_data_range(
        &mut self,
        position: u64,
        data: &dyn BinaryData,
        offset: u64,
        length: u64,
    ) -> DeltaResult<()> {
        let Some(source) = self.sibling_of(data) else {
            return crate::binary_data::insert_data_chunked(self, position, data, offset, length);
        };

        self.edit(|window, state| {
            window.check_position(state, position)?;

            let segments = aliased_segments(state, source, offset, length)?;

            window.insert_segments(state, position, &segments)
        })
    }

    /// Same aliasing as [`DeltaDocument::insert_data_range`].
    fn replace_data_range(
        &mut self,
        position: u64,
        data: &dyn BinaryData,
        offset: u64,
        length: u64,
    ) -> DeltaResult<()> {
        let Some(source) = self.sibling_of(data) else {
            crate::binary_data::check_position(position, self.data_size())?;
            crate::binary_data::check_data_range(data, offset, length)?;

            let overlap = std::cmp::min(length, self.data_size() - position);

            self.remove(position, overlap)?;

            return crate::binary_data::insert_data_chunked(self, position, data, offset, length);
        };

        self.edit(|window, state| {
            window.check_position(state, position)?;

            let segments = aliased_segments(state, source, offset, length)?;

            window.replace_segments(state, position, &segments)
        })
    }

    fn remove(&mut self, position: u64, length: u64) -> DeltaResult<()> {
        self.edit(|window, state| window.remove(state, position, length))
    }

    fn clear(&mut self) {
        let res = self.edit(|window, state| {
            window.clear(state);

            Ok(())
        });

        if let Err(err) = res {
            log::warn!("clearing {:?} failed: {err}", self.id);
        }
    }
}

#[cfg(test)]
mod document_tests {
    use crate::binary_data::{BinaryData, EditableBinaryData};
    use crate::errors::DeltaError;
    use crate::repository::SegmentsRepository;

    #[test]
    fn copy_shares_sources_until_written() {
        let repository = SegmentsRepository::new();
        let mut document = repository.create_document();

        document.insert(0, b"abcdef").unwrap();

        let mut copy = document.copy().unwrap();

        assert_eq!(repository.memory_source_count(), 1);
        assert_eq!(copy.to_bytes().unwrap(), b"abcdef");

        copy.set_byte(2, b'C').unwrap();

        assert_eq!(copy.to_bytes().unwrap(), b"abCdef");
        assert_eq!(document.to_bytes().unwrap(), b"abcdef");
        document.validate().unwrap();
        copy.validate().unwrap();
    }

    #[test]
    fn insert_data_aliases_same_repository_documents() {
        let repository = SegmentsRepository::new();
        let mut target = repository.create_document();
        let mut source = repository.create_document();

        target.insert(0, b"[]").unwrap();
        source.insert(0, b"0123456789").unwrap();

        let segments_before = repository.segment_count();

        target.insert_data_range(1, &source, 2, 5).unwrap();

        assert_eq!(target.to_bytes().unwrap(), b"[23456]");
        assert_eq!(repository.memory_source_count(), 2);
        assert!(repository.segment_count() > segments_before);

        source.remove(0, 10).unwrap();

        assert_eq!(target.to_bytes().unwrap(), b"[23456]");
        target.validate().unwrap();
        source.validate().unwrap();
    }

    #[test]
    fn replace_data_aliases_same_repository_documents() {
        let repository = SegmentsRepository::new();
        let mut target = repository.create_document();
        let mut source = repository.create_document();

        target.insert(0, b"0123456789").unwrap();
        source.insert(0, b"abcdef").unwrap();

        let memory_sources = repository.memory_source_count();

        target.replace_data_range(2, &source, 1, 3).unwrap();
        assert_eq!(target.to_bytes().unwrap(), b"01bcd56789");

        target.replace_data(8, &source).unwrap();
        assert_eq!(target.to_bytes().unwrap(), b"01bcd567abcdef");
        assert_eq!(repository.memory_source_count(), memory_sources);

        source.set_byte(0, b'#').unwrap();

        assert_eq!(target.to_bytes().unwrap(), b"01bcd567abcdef");
        assert_eq!(source.to_bytes().unwrap(), b"#bcdef");
        assert!(target.replace_data_range(15, &source, 0, 1).is_err());
        assert!(target.replace_data_range(0, &source, 4, 3).is_err());
        assert_eq!(target.to_bytes().unwrap(), b"01bcd567abcdef");
        target.validate().unwrap();
        source.validate().unwrap();
    }

    #[test]
    fn replace_data_from_other_repository_copies_bytes() {
        let mut target = SegmentsRepository::new().create_document();
        let source = b"xyz".to_vec();

        target.insert(0, b"abcd").unwrap();
        target.replace_data_range(3, &source, 0, 3).unwrap();

        assert_eq!(target.to_bytes().unwrap(), b"abcxyz");
        target.validate().unwrap();
    }

    #[test]
    fn insert_data_from_other_repository_copies_bytes() {
        let mut target = SegmentsRepository::new().create_document();
        let mut source = SegmentsRepository::new().create_document();

        source.insert(0, b"xyz").unwrap();
        target.insert_data(0, &source).unwrap();

        assert_eq!(target.to_bytes().unwrap(), b"xyz");
        assert_eq!(target.repository().memory_source_count(), 1);
    }

    #[test]
    fn segment_at_reports_document_offsets() {
        let repository = SegmentsRepository::new();
        let mut document = repository.create_document();
        let other = {
            let mut other = repository.create_document();

            other.insert(0, b"----").unwrap();
            other
        };

        document.insert(0, b"ab").unwrap();
        document.insert_data(2, &other).unwrap();

        let (start, info) = document.segment_at(3).unwrap().unwrap();

        assert_eq!(start, 2);
        assert_eq!(info.length, 4);
        assert!(info.is_memory());
        assert!(document.segment_at(6).unwrap().is_none());
        assert!(document.segment_at(7).is_err());
    }

    #[test]
    fn dropping_documents_releases_everything() {
        let repository = SegmentsRepository::new();
        let mut document = repository.create_document();

        document.insert(0, b"abc").unwrap();

        let copy = document.copy_range(1, 2).unwrap();

        assert_eq!(repository.document_count(), 2);

        document.dispose();
        assert_eq!(copy.to_bytes().unwrap(), b"bc");

        drop(copy);
        assert_eq!(repository.document_count(), 0);
        assert_eq!(repository.segment_count(), 0);
        assert_eq!(repository.memory_source_count(), 0);
    }

    #[test]
    fn poisoned_document_refuses_work() {
        let repository = SegmentsRepository::new();
        let mut document = repository.create_document();

        document.insert(0, b"abc").unwrap();
        repository
            .state
            .borrow_mut()
            .document_mut(document.id())
            .poisoned = true;

        assert!(document.is_poisoned());
        assert!(matches!(document.get_byte(0), Err(DeltaError::Poisoned)));
        assert!(matches!(document.insert(0, b"x"), Err(DeltaError::Poisoned)));
        assert!(matches!(document.copy(), Err(DeltaError::Poisoned)));
        assert!(matches!(document.save(), Err(DeltaError::Poisoned)));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "dropped while its repository is borrowed")]
    fn dropping_during_a_repository_borrow_is_reported() {
        let repository = SegmentsRepository::new();
        let document = repository.create_document();
        let _state = repository.state.borrow();

        drop(document);
    }

    #[test]
    fn fill_is_unsupported() {
        let mut document = SegmentsRepository::new().create_document();

        document.insert_zeroed(0, 4).unwrap();

        assert!(document.fill_data(0, 4).is_err());
        assert!(document.fill_data_with(0, 4, 1).is_err());
        assert_eq!(document.to_bytes().unwrap(), [0, 0, 0, 0]);
    }
}
