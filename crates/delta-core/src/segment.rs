use crate::arena::{FileSourceId, MemorySourceId, SegmentId};

/// What a segment's interval points into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    File(FileSourceId),
    Memory(MemorySourceId),
    /// Length-only placeholder, only present inside a running save.
    Space,
}

/// Key of the interval index a segment is registered in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum SourceKey {
    File(FileSourceId),
    Memory(MemorySourceId),
}

/// Interval `[start_position, start_position + length)` of a source, linked
/// into one document's segment list.
#[derive(Debug, Clone)]
pub(crate) struct DataSegment {
    pub(crate) kind: SegmentKind,
    /// Offset into the source, not into the document.
    pub(crate) start_position: u64,
    pub(crate) length: u64,
    pub(crate) prev: Option<SegmentId>,
    pub(crate) next: Option<SegmentId>,
}

impl DataSegment {
    #[must_use]
    pub(crate) fn new(kind: SegmentKind, start_position: u64, length: u64) -> Self {
        Self {
            kind,
            start_position,
            length,
            prev: None,
            next: None,
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn end_position(&self) -> u64 {
        self.start_position + self.length
    }

    #[inline]
    #[must_use]
    pub(crate) fn source_key(&self) -> Option<SourceKey> {
        match self.kind {
            SegmentKind::File(source) => Some(SourceKey::File(source)),
            SegmentKind::Memory(source) => Some(SourceKey::Memory(source)),
            SegmentKind::Space => None,
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn info(&self) -> SegmentInfo {
        SegmentInfo {
            kind: self.kind,
            start_position: self.start_position,
            length: self.length,
        }
    }
}

/// Read-only snapshot of one segment of a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentInfo {
    pub kind: SegmentKind,
    pub start_position: u64,
    pub length: u64,
}

impl SegmentInfo {
    #[inline]
    #[must_use]
    pub fn is_file(&self) -> bool {
        matches!(self.kind, SegmentKind::File(_))
    }

    #[inline]
    #[must_use]
    pub fn is_memory(&self) -> bool {
        matches!(self.kind, SegmentKind::Memory(_))
    }
}
