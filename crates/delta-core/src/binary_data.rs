use std::ops::AddAssign;

use crate::errors::{DeltaError, DeltaResult};

/// Read access to a sequence of bytes.
pub trait BinaryData {
    fn data_size(&self) -> u64;

    #[inline]
    fn is_empty(&self) -> bool {
        self.data_size() == 0
    }

    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if `position` is not below the data size.
    fn get_byte(&self, position: u64) -> DeltaResult<u8>;

    /// Fills `target` with the bytes starting at `position`.
    ///
    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if the range does not fit into the data.
    fn copy_to_slice(&self, position: u64, target: &mut [u8]) -> DeltaResult<()>;

    /// # Errors
    ///
    /// Fails if the data does not fit into memory or cannot be read.
    fn to_bytes(&self) -> DeltaResult<Vec<u8>> {
        let mut res = vec![0; usize::try_from(self.data_size())?];

        self.copy_to_slice(0, &mut res)?;

        Ok(res)
    }

    /// Lets structural operations recognise documents of the same repository.
    fn as_delta_document(&self) -> Option<&crate::document::DeltaDocument> {
        None
    }
}

/// Byte sequence that can be resized and edited in place.
///
/// Positions may be equal to the data size wherever data is inserted, which
/// appends it.
pub trait EditableBinaryData: BinaryData {
    /// Grows with zeros or truncates.
    ///
    /// # Errors
    ///
    /// Fails if the new data cannot be stored.
    fn set_data_size(&mut self, size: u64) -> DeltaResult<()>;

    /// Overwrites one byte. Writing at the data size appends it.
    ///
    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if `position` is past the data size.
    fn set_byte(&mut self, position: u64, value: u8) -> DeltaResult<()>;

    /// Inserts `length` zero bytes.
    ///
    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if `position` is past the data size.
    fn insert_zeroed(&mut self, position: u64, length: u64) -> DeltaResult<()>;

    /// Makes room for `length` bytes. The new bytes are zero.
    ///
    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if `position` is past the data size.
    fn insert_uninitialized(&mut self, position: u64, length: u64) -> DeltaResult<()> {
        self.insert_zeroed(position, length)
    }

    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if `position` is past the data size.
    fn insert(&mut self, position: u64, data: &[u8]) -> DeltaResult<()>;

    /// Inserts `data[offset..offset + length]`.
    ///
    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if either range is invalid.
    fn insert_range(&mut self, position: u64, data: &[u8], offset: usize, length: usize) -> DeltaResult<()> {
        let part = slice_range(data, offset, length)?;

        self.insert(position, part)
    }

    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if `position` is past the data size.
    fn insert_data(&mut self, position: u64, data: &dyn BinaryData) -> DeltaResult<()> {
        self.insert_data_range(position, data, 0, data.data_size())
    }

    /// Inserts `length` bytes of `data` starting at `offset`.
    ///
    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if either range is invalid.
    fn insert_data_range(
        &mut self,
        position: u64,
        data: &dyn BinaryData,
        offset: u64,
        length: u64,
    ) -> DeltaResult<()> {
        insert_data_chunked(self, position, data, offset, length)
    }

    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if the range does not fit into the data.
    fn remove(&mut self, position: u64, length: u64) -> DeltaResult<()>;

    /// Overwrites the bytes at `position` with `data`. Bytes reaching past
    /// the end extend the data.
    ///
    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if `position` is past the data size.
    fn replace(&mut self, position: u64, data: &[u8]) -> DeltaResult<()> {
        check_position(position, self.data_size())?;

        let overlap = std::cmp::min(data.len() as u64, self.data_size() - position);

        self.remove(position, overlap)?;
        self.insert(position, data)
    }

    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if either range is invalid.
    fn replace_range(&mut self, position: u64, data: &[u8], offset: usize, length: usize) -> DeltaResult<()> {
        let part = slice_range(data, offset, length)?;

        self.replace(position, part)
    }

    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if `position` is past the data size.
    fn replace_data(&mut self, position: u64, data: &dyn BinaryData) -> DeltaResult<()> {
        self.replace_data_range(position, data, 0, data.data_size())
    }

    /// # Errors
    ///
    /// [`DeltaError::OutOfBounds`] if either range is invalid.
    fn replace_data_range(
        &mut self,
        position: u64,
        data: &dyn BinaryData,
        offset: u64,
        length: u64,
    ) -> DeltaResult<()> {
        check_position(position, self.data_size())?;
        check_data_range(data, offset, length)?;

        let overlap = std::cmp::min(length, self.data_size() - position);

        self.remove(position, overlap)?;
        self.insert_data_range(position, data, offset, length)
    }

    /// # Errors
    ///
    /// [`DeltaError::Unsupported`] unless the implementation overrides it.
    fn fill_data(&mut self, _position: u64, _length: u64) -> DeltaResult<()> {
        Err(DeltaError::Unsupported("fill_data"))
    }

    /// # Errors
    ///
    /// [`DeltaError::Unsupported`] unless the implementation overrides it.
    fn fill_data_with(&mut self, _position: u64, _length: u64, _value: u8) -> DeltaResult<()> {
        Err(DeltaError::Unsupported("fill_data_with"))
    }

    fn clear(&mut self);

    /// # Errors
    ///
    /// [`DeltaError::Unsupported`] unless the implementation overrides it.
    fn load_from_stream(&mut self, _stream: &mut dyn std::io::Read) -> DeltaResult<()> {
        Err(DeltaError::Unsupported("load_from_stream"))
    }

    /// # Errors
    ///
    /// [`DeltaError::Unsupported`] unless the implementation overrides it.
    fn save_to_stream(&self, _stream: &mut dyn std::io::Write) -> DeltaResult<()> {
        Err(DeltaError::Unsupported("save_to_stream"))
    }
}

/*

====================================
============= HELPERS ==============
====================================

*/

#[inline]
pub(crate) fn check_position(position: u64, size: u64) -> DeltaResult<()> {
    if position > size {
        return Err(DeltaError::OutOfBounds { position, size });
    }

    Ok(())
}

#[inline]
pub(crate) fn check_data_range(data: &dyn BinaryData, offset: u64, length: u64) -> DeltaResult<()> {
    let size = data.data_size();

    if offset.checked_add(length).is_none_or(|end| end > size) {
        return Err(DeltaError::OutOfBounds { position: offset, size });
    }

    Ok(())
}

fn slice_range(data: &[u8], offset: usize, length: usize) -> DeltaResult<&[u8]> {
    offset
        .checked_add(length)
        .and_then(|end| data.get(offset..end))
        .ok_or(DeltaError::OutOfBounds {
            position: offset as u64,
            size: data.len() as u64,
        })
}

/// Copies `data[offset..offset + length]` into `target` section by section.
pub(crate) fn insert_data_chunked<T: EditableBinaryData + ?Sized>(
    target: &mut T,
    position: u64,
    data: &dyn BinaryData,
    offset: u64,
    length: u64,
) -> DeltaResult<()> {
    check_position(position, target.data_size())?;
    check_data_range(data, offset, length)?;

    let section = std::cmp::min(length, crate::config::DEFAULT_PROCESSING_LIMIT as u64);
    let mut buf = vec![0; usize::try_from(section)?];
    let mut copied = 0;

    while copied < length {
        let take = std::cmp::min(section, length - copied) as usize;

        data.copy_to_slice(offset + copied, &mut buf[..take])?;
        target.insert(position + copied, &buf[..take])?;
        copied.add_assign(take as u64);
    }

    Ok(())
}

/*

====================================
========== PLAIN BUFFERS ===========
====================================

*/

impl BinaryData for [u8] {
    #[inline]
    fn data_size(&self) -> u64 {
        self.len() as u64
    }

    fn get_byte(&self, position: u64) -> DeltaResult<u8> {
        usize::try_from(position)
            .ok()
            .and_then(|idx| self.get(idx).copied())
            .ok_or(DeltaError::OutOfBounds {
                position,
                size: self.data_size(),
            })
    }

    fn copy_to_slice(&self, position: u64, target: &mut [u8]) -> DeltaResult<()> {
        let out_of_bounds = DeltaError::OutOfBounds {
            position,
            size: self.data_size(),
        };
        let start = usize::try_from(position).map_err(|_| out_of_bounds)?;
        let source = start
            .checked_add(target.len())
            .and_then(|end| self.get(start..end))
            .ok_or(DeltaError::OutOfBounds {
                position,
                size: self.data_size(),
            })?;

        target.copy_from_slice(source);

        Ok(())
    }
}

impl BinaryData for Vec<u8> {
    #[inline]
    fn data_size(&self) -> u64 {
        self.as_slice().data_size()
    }

    #[inline]
    fn get_byte(&self, position: u64) -> DeltaResult<u8> {
        self.as_slice().get_byte(position)
    }

    #[inline]
    fn copy_to_slice(&self, position: u64, target: &mut [u8]) -> DeltaResult<()> {
        self.as_slice().copy_to_slice(position, target)
    }
}

impl EditableBinaryData for Vec<u8> {
    fn set_data_size(&mut self, size: u64) -> DeltaResult<()> {
        self.resize(usize::try_from(size)?, 0);

        Ok(())
    }

    fn set_byte(&mut self, position: u64, value: u8) -> DeltaResult<()> {
        check_position(position, self.data_size())?;

        let idx = usize::try_from(position)?;

        match self.get_mut(idx) {
            Some(byte) => *byte = value,
            None => self.push(value),
        }

        Ok(())
    }

    fn insert_zeroed(&mut self, position: u64, length: u64) -> DeltaResult<()> {
        check_position(position, self.data_size())?;

        let idx = usize::try_from(position)?;

        self.splice(idx..idx, std::iter::repeat_n(0, usize::try_from(length)?));

        Ok(())
    }

    fn insert(&mut self, position: u64, data: &[u8]) -> DeltaResult<()> {
        check_position(position, self.data_size())?;

        let idx = usize::try_from(position)?;

        self.splice(idx..idx, data.iter().copied());

        Ok(())
    }

    fn remove(&mut self, position: u64, length: u64) -> DeltaResult<()> {
        let size = self.data_size();

        if position.checked_add(length).is_none_or(|end| end > size) {
            return Err(DeltaError::OutOfBounds { position, size });
        }

        let start = usize::try_from(position)?;

        self.drain(start..start + usize::try_from(length)?);

        Ok(())
    }

    fn fill_data_with(&mut self, position: u64, length: u64, value: u8) -> DeltaResult<()> {
        let size = self.data_size();

        if position.checked_add(length).is_none_or(|end| end > size) {
            return Err(DeltaError::OutOfBounds { position, size });
        }

        let start = usize::try_from(position)?;

        self[start..start + usize::try_from(length)?].fill(value);

        Ok(())
    }

    fn fill_data(&mut self, position: u64, length: u64) -> DeltaResult<()> {
        self.fill_data_with(position, length, 0)
    }

    fn clear(&mut self) {
        Vec::clear(self);
    }
}

#[cfg(test)]
mod binary_data_tests {
    use crate::binary_data::{BinaryData, EditableBinaryData};
    use crate::errors::DeltaError;

    #[test]
    fn slice_reads_check_bounds() {
        let data: &[u8] = b"abc";
        let mut buf = [0u8; 2];

        assert_eq!(data.get_byte(2).unwrap(), b'c');
        assert!(matches!(
            data.get_byte(3),
            Err(DeltaError::OutOfBounds { position: 3, size: 3 })
        ));

        data.copy_to_slice(1, &mut buf).unwrap();
        assert_eq!(&buf, b"bc");
        assert!(data.copy_to_slice(2, &mut buf).is_err());
    }

    #[test]
    fn vec_edits() {
        let mut data = b"hello".to_vec();

        EditableBinaryData::insert(&mut data, 5, b" world").unwrap();
        data.replace(0, b"J").unwrap();
        data.set_byte(data.data_size(), b'!').unwrap();
        EditableBinaryData::remove(&mut data, 5, 6).unwrap();

        assert_eq!(data, b"Jello!");
        assert!(EditableBinaryData::insert(&mut data, 100, b"x").is_err());
        assert!(EditableBinaryData::remove(&mut data, 4, 3).is_err());
    }

    #[test]
    fn replace_past_end_extends() {
        let mut data = b"abc".to_vec();

        data.replace_range(2, b"__XYZ__", 2, 3).unwrap();

        assert_eq!(data, b"abXYZ");
        assert!(data.replace_range(0, b"ab", 1, 2).is_err());
    }

    #[test]
    fn insert_data_range_copies_in_sections() {
        let source: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut target = b"<>".to_vec();

        target
            .insert_data_range(1, &source, 100, 9_000)
            .unwrap();

        assert_eq!(target.len(), 9_002);
        assert_eq!(&target[1..9_001], &source[100..9_100]);
        assert_eq!(target[9_001], b'>');
        assert!(target.insert_data_range(0, &source, 9_999, 2).is_err());
    }

    #[test]
    fn stream_operations_are_unsupported_by_default() {
        let mut data = Vec::new();
        let mut input: &[u8] = b"abc";

        assert!(matches!(
            data.load_from_stream(&mut input),
            Err(DeltaError::Unsupported(_))
        ));
    }
}
