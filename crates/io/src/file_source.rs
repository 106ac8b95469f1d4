use std::io::{Read, Seek, Write};

/// Exclusive-access wrapper around one on-disk file.
///
/// - Single bytes are read through an internal [`crate::page_window::DataPageWindow`].
/// - Bulk reads and writes go straight to the file (`read_at` / `write_at`) and
///   are what the save algorithm uses.
/// - Every write bumps the cache generation so that no window keeps serving
///   stale pages.
///
/// [`FileDataSource::close`] drops the OS handle. Every later operation fails
/// with [`crate::errors::SourceError::Closed`].
#[derive(Debug)]
pub struct FileDataSource {
    path: std::path::PathBuf,
    mode: crate::access_mode::AccessMode,
    file: Option<std::fs::File>,
    window: crate::page_window::DataPageWindow,
    cache_generation: u64,
}

/*

====================================
========= CREATION METHOD ==========
====================================

*/

impl FileDataSource {
    /// # Errors
    ///
    /// - [`crate::errors::SourceError::Io`] if the file cannot be opened in the requested mode.
    pub fn open(
        path: impl AsRef<std::path::Path>,
        mode: crate::access_mode::AccessMode,
    ) -> crate::errors::SourceResult<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let file = mode.open_options().open(&path_buf)?;

        log::debug!("opened {} ({})", path_buf.display(), mode.as_str());

        Ok(Self {
            path: path_buf,
            mode,
            file: Some(file),
            window: crate::page_window::DataPageWindow::new(),
            cache_generation: 0,
        })
    }
}

/*

====================================
========= INLINE METHODS  ==========
====================================

*/

impl FileDataSource {
    #[inline]
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> crate::access_mode::AccessMode {
        self.mode
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Counter bumped by every [`FileDataSource::clear_cache`].
    #[inline]
    #[must_use]
    pub fn cache_generation(&self) -> u64 {
        self.cache_generation
    }

    #[inline]
    fn file(&self) -> crate::errors::SourceResult<&std::fs::File> {
        self.file.as_ref().ok_or(crate::errors::SourceError::Closed)
    }

    #[inline]
    pub(crate) fn file_mut(&mut self) -> crate::errors::SourceResult<&mut std::fs::File> {
        self.file.as_mut().ok_or(crate::errors::SourceError::Closed)
    }

    #[inline]
    fn writable_file(&mut self) -> crate::errors::SourceResult<&mut std::fs::File> {
        if !self.mode.is_writable() {
            self.file()?;

            return Err(crate::errors::SourceError::ReadOnly);
        }

        self.file_mut()
    }
}

/*

====================================
========== READ / WRITE ============
====================================

*/

impl FileDataSource {
    /// # Errors
    ///
    /// - [`crate::errors::SourceError::Closed`] if the source was closed.
    /// - [`crate::errors::SourceError::Io`] if the metadata cannot be read.
    pub fn file_length(&self) -> crate::errors::SourceResult<u64> {
        Ok(self.file()?.metadata()?.len())
    }

    /// Truncates or extends the file.
    ///
    /// # Errors
    ///
    /// Fails on a closed or read-only source, or if the OS refuses the resize.
    pub fn set_file_length(&mut self, length: u64) -> crate::errors::SourceResult<()> {
        self.writable_file()?.set_len(length)?;
        self.clear_cache();

        Ok(())
    }

    /// Reads the byte at `position` through the page cache.
    ///
    /// # Errors
    ///
    /// Fails on a closed source, on I/O errors, and when `position` is past EOF.
    pub fn get_byte(&mut self, position: u64) -> crate::errors::SourceResult<u8> {
        let file = self.file.as_mut().ok_or(crate::errors::SourceError::Closed)?;

        self.window.read_byte(file, position)
    }

    /// Fills `buf` with the bytes starting at `position`, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Fails on a closed source or if fewer than `buf.len()` bytes are available.
    pub fn read_at(&mut self, position: u64, buf: &mut [u8]) -> crate::errors::SourceResult<()> {
        let file = self.file_mut()?;

        file.seek(std::io::SeekFrom::Start(position))?;
        file.read_exact(buf)?;

        Ok(())
    }

    /// Writes `buf` at `position`, growing the file if needed.
    ///
    /// # Errors
    ///
    /// Fails on a closed or read-only source, or on I/O errors.
    pub fn write_at(&mut self, position: u64, buf: &[u8]) -> crate::errors::SourceResult<()> {
        let file = self.writable_file()?;

        file.seek(std::io::SeekFrom::Start(position))?;
        file.write_all(buf)?;
        self.clear_cache();

        Ok(())
    }

    /// Flushes written data to the storage device.
    ///
    /// # Errors
    ///
    /// Fails on a closed source or if the OS reports a sync failure.
    pub fn sync(&mut self) -> crate::errors::SourceResult<()> {
        self.file()?.sync_all()?;

        Ok(())
    }

    /// Invalidates the internal window and, through the generation counter,
    /// every external [`crate::page_window::DataPageWindow`] of this source.
    pub fn clear_cache(&mut self) {
        self.window.clear_cache();
        self.cache_generation = self.cache_generation.wrapping_add(1);
    }

    /// Closes the source and releases the OS handle.
    ///
    /// # Errors
    ///
    /// - [`crate::errors::SourceError::Closed`] if it was already closed.
    pub fn close(&mut self) -> crate::errors::SourceResult<()> {
        let mut file = self.file.take().ok_or(crate::errors::SourceError::Closed)?;

        if self.mode.is_writable() {
            file.flush()?;
        }

        drop(file);
        self.clear_cache();

        log::debug!("closed {}", self.path.display());

        Ok(())
    }
}
