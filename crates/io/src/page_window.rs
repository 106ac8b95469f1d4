use std::io::{Read, Seek};

/// Size of a single cached page in bytes.
pub const PAGE_SIZE: usize = 1024;

const NO_PAGE: u64 = u64::MAX;

#[derive(Debug)]
struct DataPage {
    page_index: u64,
    /// Number of valid bytes, less than [`PAGE_SIZE`] only for the page holding EOF.
    filled: usize,
    page: Box<[u8; PAGE_SIZE]>,
}

impl Default for DataPage {
    fn default() -> Self {
        Self {
            page_index: NO_PAGE,
            filled: 0,
            page: Box::new([0; PAGE_SIZE]),
        }
    }
}

/// Two-page cache in front of a file.
///
/// Pages are refilled round robin: a miss evicts the slot that was filled
/// least recently. Sequential and local access patterns hit the cache almost
/// always, which turns per-byte reads into one seek + read per [`PAGE_SIZE`].
///
/// A window is only valid as long as the bytes of the file it caches do not
/// change behind its back. Windows created outside of their
/// [`crate::file_source::FileDataSource`] remember the source's cache
/// generation and drop their pages when it moves on.
#[derive(Debug, Default)]
pub struct DataPageWindow {
    pages: [DataPage; 2],
    active_data_page: usize,
    generation: u64,
}

/*

====================================
========= CREATION METHOD ==========
====================================

*/

impl DataPageWindow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a window bound to the current cache generation of `source`.
    #[must_use]
    pub fn for_source(source: &crate::file_source::FileDataSource) -> Self {
        Self {
            generation: source.cache_generation(),
            ..Self::default()
        }
    }
}

/*

====================================
============= READING ==============
====================================

*/

impl DataPageWindow {
    /// Reads one byte of `source` through this window.
    ///
    /// # Errors
    ///
    /// - [`crate::errors::SourceError::Closed`] if the source was closed.
    /// - [`crate::errors::SourceError::Io`] if the page cannot be loaded or
    ///   `position` lies past the end of the file.
    pub fn get_byte(
        &mut self,
        source: &mut crate::file_source::FileDataSource,
        position: u64,
    ) -> crate::errors::SourceResult<u8> {
        let generation = source.cache_generation();

        if self.generation != generation {
            self.clear_cache();
            self.generation = generation;
        }

        self.read_byte(source.file_mut()?, position)
    }

    pub(crate) fn read_byte(
        &mut self,
        file: &mut std::fs::File,
        position: u64,
    ) -> crate::errors::SourceResult<u8> {
        let target_page_index = position / PAGE_SIZE as u64;
        // Always below PAGE_SIZE, so the narrowing is lossless.
        let offset = (position % PAGE_SIZE as u64) as usize;

        let index = match self
            .pages
            .iter()
            .position(|page| page.page_index == target_page_index)
        {
            Some(index) => index,
            None => {
                let index = self.active_data_page;

                self.load_page(file, index, target_page_index)?;
                self.active_data_page = (self.active_data_page + 1) & 1;

                index
            }
        };

        let page = &self.pages[index];

        if offset >= page.filled {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("position {position} is past the end of the file"),
            )
            .into());
        }

        Ok(page.page[offset])
    }

    fn load_page(
        &mut self,
        file: &mut std::fs::File,
        index: usize,
        page_index: u64,
    ) -> crate::errors::SourceResult<()> {
        let data_page = &mut self.pages[index];
        let page_position = page_index
            .checked_mul(PAGE_SIZE as u64)
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
        let file_length = file.metadata()?.len();

        // Mark the slot empty first so a failed read never leaves a half-valid page behind.
        data_page.page_index = NO_PAGE;
        data_page.filled = 0;

        if page_position >= file_length {
            data_page.page_index = page_index;

            return Ok(());
        }

        let to_read = std::cmp::min(PAGE_SIZE as u64, file_length - page_position) as usize;

        file.seek(std::io::SeekFrom::Start(page_position))?;
        file.read_exact(&mut data_page.page[..to_read])?;

        data_page.page_index = page_index;
        data_page.filled = to_read;

        log::trace!("loaded page {page_index} ({to_read} bytes) into slot {index}");

        Ok(())
    }

    /// Invalidates both cached pages.
    pub fn clear_cache(&mut self) {
        for page in &mut self.pages {
            page.page_index = NO_PAGE;
            page.filled = 0;
        }
    }

    /// Whether the page covering `position` is currently cached.
    #[inline]
    #[must_use]
    pub fn is_cached(&self, position: u64) -> bool {
        let page_index = position / PAGE_SIZE as u64;

        self.pages.iter().any(|page| page.page_index == page_index)
    }
}
