/// How a [`crate::file_source::FileDataSource`] opens its file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccessMode {
    /// Equivalent of `"rw"`: the file is opened for reading and in-place writing.
    #[default]
    ReadWrite,
    /// Equivalent of `"r"`.
    ReadOnly,
}

impl AccessMode {
    #[inline]
    #[must_use]
    pub fn is_writable(self) -> bool {
        self == AccessMode::ReadWrite
    }

    /// Short mode string in the `"rw"` / `"r"` convention.
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::ReadWrite => "rw",
            AccessMode::ReadOnly => "r",
        }
    }

    #[must_use]
    pub fn open_options(self) -> std::fs::OpenOptions {
        let mut options = std::fs::OpenOptions::new();

        options.read(true);

        if self.is_writable() {
            options.write(true);
        }

        options
    }
}

#[cfg(test)]
mod access_mode_tests {
    use std::io::Write;

    #[test]
    fn read_only_rejects_writes() {
        let mut temp = tempfile::NamedTempFile::new().unwrap();

        temp.write_all(b"abc").unwrap();

        let mut file = crate::access_mode::AccessMode::ReadOnly
            .open_options()
            .open(temp.path())
            .unwrap();

        assert!(file.write_all(b"x").is_err());
    }

    #[test]
    fn mode_strings() {
        assert_eq!(crate::access_mode::AccessMode::ReadWrite.as_str(), "rw");
        assert_eq!(crate::access_mode::AccessMode::ReadOnly.as_str(), "r");
        assert!(crate::access_mode::AccessMode::default().is_writable());
    }
}
