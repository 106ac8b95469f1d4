mod common;

use std::io::{Read, Seek, SeekFrom, Write};

use common::{contents, file_contents, init_logging, open_document, temp_with, validate_all};
use delta_core::binary_data::EditableBinaryData;
use delta_core::errors::DeltaError;
use delta_core::repository::SegmentsRepository;

#[test]
fn detached_documents_survive_external_changes() {
    init_logging();

    let temp = temp_with(b"0123456789");
    let repository = SegmentsRepository::new();
    let mut document = open_document(&repository, &temp);
    let source = document.file_source().unwrap();

    document.insert(5, b"--").unwrap();
    repository.detach_file_source(source).unwrap();

    assert!(document.segments().iter().all(|segment| segment.is_memory()));
    assert_eq!(document.file_source(), Some(source));

    std::fs::write(temp.path(), b"changed").unwrap();

    assert_eq!(contents(&document), b"01234--56789");
    validate_all(&[&document]);

    document.save().unwrap();

    assert_eq!(file_contents(&temp), b"01234--56789");
    validate_all(&[&document]);
}

#[test]
fn closing_a_source_turns_documents_into_memory_documents() {
    init_logging();

    let temp = temp_with(b"abcdef");
    let repository = SegmentsRepository::new();
    let mut document = open_document(&repository, &temp);
    let source = document.file_source().unwrap();
    let copy = document.copy_range(2, 3).unwrap();

    repository.close_file_source(source).unwrap();

    assert_eq!(document.file_source(), None);
    assert_eq!(contents(&document), b"abcdef");
    assert_eq!(contents(&copy), b"cde");
    assert!(matches!(document.save(), Err(DeltaError::NoFileSource)));
    assert!(matches!(
        repository.file_length(source),
        Err(DeltaError::Source(io::errors::SourceError::Closed))
    ));
    assert!(repository.create_document_for(source).is_err());
    assert!(repository.close_file_source(source).is_err());

    document.set_byte(0, b'A').unwrap();

    assert_eq!(contents(&document), b"Abcdef");
    validate_all(&[&document, &copy]);
}

#[cfg(target_os = "linux")]
#[test]
fn closing_a_source_releases_its_handle() {
    fn open_handles() -> usize {
        std::fs::read_dir("/proc/self/fd").unwrap().count()
    }

    let temp = temp_with(b"abc");
    let repository = SegmentsRepository::new();
    let before = open_handles();

    for _ in 0..200 {
        let document = open_document(&repository, &temp);
        let source = document.file_source().unwrap();

        drop(document);
        repository.close_file_source(source).unwrap();
    }

    let after = open_handles();

    assert!(after < before + 50, "{before} handles before, {after} after");
    assert_eq!(repository.document_count(), 0);
}

#[test]
fn empty_file_document() {
    let temp = temp_with(b"");
    let repository = SegmentsRepository::new();
    let mut document = open_document(&repository, &temp);

    assert!(document.segments().is_empty());

    document.insert(0, b"new").unwrap();
    document.save().unwrap();

    assert_eq!(file_contents(&temp), b"new");
    assert_eq!(repository.file_length(document.file_source().unwrap()).unwrap(), 3);
}

#[test]
fn streams_over_a_file_document() {
    init_logging();

    let temp = temp_with(b"0123456789");
    let repository = SegmentsRepository::new();
    let mut document = open_document(&repository, &temp);

    {
        let mut writer = document.writer();

        writer.seek(SeekFrom::Start(8)).unwrap();
        writer.write_all(b"ABCD").unwrap();
        assert_eq!(writer.finish(), 12);
    }

    let mut text = String::new();
    let mut reader = document.reader();

    reader.seek(SeekFrom::End(-6)).unwrap();
    reader.read_to_string(&mut text).unwrap();

    assert_eq!(text, "67ABCD");
    assert_eq!(reader.stream_size(), 12);
    assert_eq!(reader.length(), 12);

    drop(reader);
    document.save().unwrap();

    assert_eq!(file_contents(&temp), b"01234567ABCD");
}
