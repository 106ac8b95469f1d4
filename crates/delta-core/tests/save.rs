mod common;

use common::{contents, file_contents, init_logging, open_document, temp_with, validate_all};
use delta_core::binary_data::{BinaryData, EditableBinaryData};
use delta_core::config::RepositoryConfig;
use delta_core::errors::DeltaError;
use delta_core::repository::SegmentsRepository;
use delta_core::segment::{SegmentInfo, SegmentKind};
use io::access_mode::AccessMode;

fn pattern(length: usize) -> Vec<u8> {
    (0..length).map(|i| (i % 251) as u8).collect()
}

fn small_sections(limit: usize) -> SegmentsRepository {
    SegmentsRepository::with_config(
        RepositoryConfig::default()
            .with_processing_limit(limit)
            .with_sync_on_save(false),
    )
    .unwrap()
}

fn assert_saved(document: &delta_core::document::DeltaDocument, temp: &tempfile::NamedTempFile, expected: &[u8]) {
    assert_eq!(file_contents(temp), expected);
    assert_eq!(contents(document), expected);

    let segments = document.segments();

    if expected.is_empty() {
        assert!(segments.is_empty());
    } else {
        assert_eq!(
            segments,
            vec![SegmentInfo {
                kind: SegmentKind::File(document.file_source().unwrap()),
                start_position: 0,
                length: expected.len() as u64,
            }]
        );
    }

    validate_all(&[document]);
}

#[test]
fn save_without_edits_is_idempotent() {
    init_logging();

    let temp = temp_with(b"0123456789");
    let repository = SegmentsRepository::new();
    let mut document = open_document(&repository, &temp);

    document.save().unwrap();
    document.save().unwrap();

    assert_saved(&document, &temp, b"0123456789");
}

#[test]
fn insert_at_start_moves_content_forward() {
    init_logging();

    let original = pattern(10_000);
    let temp = temp_with(&original);
    let repository = small_sections(256);
    let mut document = open_document(&repository, &temp);
    let mut expected = original.clone();

    document.insert(0, &[0xAA; 100]).unwrap();
    expected.splice(0..0, [0xAA; 100]);

    document.save().unwrap();

    assert_saved(&document, &temp, &expected);
}

#[test]
fn remove_at_start_moves_content_backward() {
    init_logging();

    let original = pattern(5_000);
    let temp = temp_with(&original);
    let repository = small_sections(100);
    let mut document = open_document(&repository, &temp);

    document.remove(0, 1_234).unwrap();
    document.save().unwrap();

    assert_saved(&document, &temp, &original[1_234..]);
}

#[test]
fn swapped_halves_are_preloaded() {
    init_logging();

    for limit in [2, 3, 4096] {
        let temp = temp_with(b"abcdefghij");
        let repository = small_sections(limit);
        let mut document = open_document(&repository, &temp);
        let head = document.copy_range(0, 5).unwrap();

        document.remove(0, 5).unwrap();
        document.insert_data(5, &head).unwrap();
        assert_eq!(contents(&document), b"fghijabcde");

        document.save().unwrap();

        assert_saved(&document, &temp, b"fghijabcde");
        assert_eq!(contents(&head), b"abcde");
        validate_all(&[&head]);
    }
}

#[test]
fn reversed_blocks_with_tiny_sections() {
    init_logging();

    let original = pattern(64);
    let temp = temp_with(&original);
    let repository = small_sections(3);
    let mut document = open_document(&repository, &temp);
    let blocks: Vec<_> = (0..8)
        .map(|idx| document.copy_range(idx * 8, 8).unwrap())
        .collect();
    let mut expected = Vec::new();

    document.clear();

    for block in &blocks {
        document.insert_data(0, block).unwrap();
    }

    for block in blocks.iter().rev() {
        expected.extend(contents(block));
    }

    assert_eq!(contents(&document), expected);

    document.save().unwrap();

    assert_saved(&document, &temp, &expected);

    for (idx, block) in blocks.iter().enumerate() {
        assert_eq!(contents(block), &original[idx * 8..idx * 8 + 8]);
    }
}

#[test]
fn growth_and_truncation() {
    init_logging();

    let temp = temp_with(b"0123456789");
    let repository = SegmentsRepository::new();
    let mut document = open_document(&repository, &temp);

    document.insert(10, b"abc").unwrap();
    document.set_byte(0, b'#').unwrap();
    document.save().unwrap();

    assert_saved(&document, &temp, b"#123456789abc");

    document.remove(2, 9).unwrap();
    document.save().unwrap();

    assert_saved(&document, &temp, b"#1bc");

    document.clear();
    document.save().unwrap();

    assert_saved(&document, &temp, b"");
}

#[test]
fn sibling_documents_keep_their_content() {
    init_logging();

    let temp = temp_with(b"0123456789");
    let repository = small_sections(2);
    let mut first = open_document(&repository, &temp);
    let source = first.file_source().unwrap();
    let mut second = repository.create_document_for(source).unwrap();

    second.remove(2, 3).unwrap();
    second.insert(0, b"<").unwrap();
    assert_eq!(contents(&second), b"<0156789");

    first.remove(0, 4).unwrap();
    first.insert(6, b"XYZ").unwrap();
    first.save().unwrap();

    assert_saved(&first, &temp, b"456789XYZ");
    assert_eq!(contents(&second), b"<0156789");
    validate_all(&[&second]);

    second.save().unwrap();

    assert_saved(&second, &temp, b"<0156789");
    assert_eq!(contents(&first), b"456789XYZ");
    validate_all(&[&first]);
}

#[test]
fn documents_on_other_files_are_not_touched() {
    init_logging();

    let saved = temp_with(b"aaaa");
    let other = temp_with(b"bbbb");
    let repository = SegmentsRepository::new();
    let mut document = open_document(&repository, &saved);
    let mut foreign = open_document(&repository, &other);

    document.insert_data(2, &foreign).unwrap();
    foreign.set_byte(0, b'B').unwrap();
    document.save().unwrap();

    assert_saved(&document, &saved, b"aabbbbaa");
    assert_eq!(contents(&foreign), b"Bbbb");
    assert_eq!(file_contents(&other), b"bbbb");
    validate_all(&[&foreign]);
}

#[test]
fn save_errors() {
    init_logging();

    let temp = temp_with(b"abc");
    let repository = SegmentsRepository::new();
    let mut memory = repository.create_document();

    assert!(matches!(memory.save(), Err(DeltaError::NoFileSource)));

    let source = repository
        .open_file_source(temp.path(), AccessMode::ReadOnly)
        .unwrap();
    let mut read_only = repository.create_document_for(source).unwrap();

    read_only.insert(0, b"x").unwrap();

    assert!(matches!(
        read_only.save(),
        Err(DeltaError::Source(io::errors::SourceError::ReadOnly))
    ));
    assert!(!read_only.is_poisoned());
    assert_eq!(contents(&read_only), b"xabc");
    assert_eq!(file_contents(&temp), b"abc");
}

#[test]
fn zero_processing_limit_is_rejected() {
    let config = RepositoryConfig {
        processing_limit: 0,
        ..RepositoryConfig::default()
    };

    assert!(matches!(
        SegmentsRepository::with_config(config),
        Err(DeltaError::Config(_))
    ));
}

#[test]
fn failed_save_poisons_the_document() {
    init_logging();

    let saved = temp_with(b"aaaa");
    let other = temp_with(b"bbbbbbbb");
    let repository = SegmentsRepository::new();
    let mut document = open_document(&repository, &saved);
    let foreign = open_document(&repository, &other);

    document.insert_data(4, &foreign).unwrap();
    assert_eq!(contents(&document), b"aaaabbbbbbbb");

    other.as_file().set_len(0).unwrap();

    assert!(matches!(
        document.save(),
        Err(DeltaError::Source(io::errors::SourceError::Io(_)))
    ));
    assert!(document.is_poisoned());
    assert!(!foreign.is_poisoned());
    assert!(matches!(document.get_byte(0), Err(DeltaError::Poisoned)));
    assert!(matches!(document.insert(0, b"x"), Err(DeltaError::Poisoned)));
    assert!(matches!(document.copy(), Err(DeltaError::Poisoned)));
    assert!(matches!(document.save(), Err(DeltaError::Poisoned)));
}
