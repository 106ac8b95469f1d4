//! `std::io` views over a [`DeltaDocument`].

use std::ops::AddAssign;

use crate::binary_data::{BinaryData, EditableBinaryData};
use crate::document::DeltaDocument;
use crate::window::DeltaDocumentWindow;

/// Resolves a seek request against the current position and the stream size.
fn seek_target(current: u64, size: u64, pos: std::io::SeekFrom) -> std::io::Result<u64> {
    let target = match pos {
        std::io::SeekFrom::Start(offset) => Some(offset),
        std::io::SeekFrom::End(delta) => size.checked_add_signed(delta),
        std::io::SeekFrom::Current(delta) => current.checked_add_signed(delta),
    };

    target.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "seek to a negative or overflowing position",
        )
    })
}

/*

====================================
============== READER ==============
====================================

*/

/// Sequential reader with its own window, so reading does not move the
/// document's cached position.
#[derive(Debug)]
pub struct DeltaDocumentReader<'a> {
    document: &'a DeltaDocument,
    window: DeltaDocumentWindow,
    position: u64,
}

impl<'a> DeltaDocumentReader<'a> {
    pub(crate) fn new(document: &'a DeltaDocument) -> Self {
        Self {
            document,
            window: document.new_window(),
            position: 0,
        }
    }

    /// Skips to the end of the document and returns the new position.
    pub fn finish(&mut self) -> u64 {
        self.position = self.stream_size();

        self.position
    }

    #[inline]
    #[must_use]
    pub fn stream_size(&self) -> u64 {
        self.document.data_size()
    }

    /// Number of bytes consumed so far.
    #[inline]
    #[must_use]
    pub fn length(&self) -> u64 {
        self.position
    }
}

impl std::io::Read for DeltaDocumentReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.document.repository().state.borrow_mut();

        state
            .check_document(self.document.id())
            .map_err(std::io::Error::from)?;
        self.window.sync(&state);

        let remaining = self.window.data_size(&state).saturating_sub(self.position);
        let take = std::cmp::min(buf.len() as u64, remaining) as usize;

        if take == 0 {
            return Ok(0);
        }

        self.window
            .copy_to_slice(&mut state, self.position, &mut buf[..take])
            .map_err(std::io::Error::from)?;
        self.position.add_assign(take as u64);

        Ok(take)
    }
}

impl std::io::Seek for DeltaDocumentReader<'_> {
    /// Positions past the end are allowed, reading there yields nothing.
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.position = seek_target(self.position, self.stream_size(), pos)?;

        Ok(self.position)
    }
}

/*

====================================
============== WRITER ==============
====================================

*/

/// Writer overwriting the document from its position on.
///
/// Bytes written past the end extend the document. Writing after seeking
/// past the end fills the gap with zeros first.
#[derive(Debug)]
pub struct DeltaDocumentWriter<'a> {
    document: &'a mut DeltaDocument,
    position: u64,
}

impl<'a> DeltaDocumentWriter<'a> {
    pub(crate) fn new(document: &'a mut DeltaDocument) -> Self {
        Self {
            document,
            position: 0,
        }
    }

    /// Moves to the end of the document and returns the new position.
    pub fn finish(&mut self) -> u64 {
        self.position = self.stream_size();

        self.position
    }

    #[inline]
    #[must_use]
    pub fn stream_size(&self) -> u64 {
        self.document.data_size()
    }

    /// Current write position.
    #[inline]
    #[must_use]
    pub fn length(&self) -> u64 {
        self.position
    }
}

impl std::io::Write for DeltaDocumentWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let size = self.document.data_size();

        if self.position > size {
            self.document
                .set_data_size(self.position)
                .map_err(std::io::Error::from)?;
        }

        self.document
            .replace(self.position, buf)
            .map_err(std::io::Error::from)?;
        self.position.add_assign(buf.len() as u64);

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl std::io::Seek for DeltaDocumentWriter<'_> {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.position = seek_target(self.position, self.stream_size(), pos)?;

        Ok(self.position)
    }
}
