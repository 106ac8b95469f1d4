//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::io::Write;

use delta_core::binary_data::BinaryData;
use delta_core::document::DeltaDocument;
use delta_core::repository::SegmentsRepository;
use io::access_mode::AccessMode;
use rand::SeedableRng;
use rand::rngs::StdRng;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, Copy)]
pub struct FuzzParams {
    pub seed: u64,
    pub steps: usize,
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse::<u64>().ok()
}

fn mix_seed(mut seed: u64, tag: &str) -> u64 {
    for (i, b) in tag.as_bytes().iter().enumerate() {
        seed ^= u64::from(*b) << ((i % 8) * 8);
        seed = seed.rotate_left(13).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    }

    seed
}

/// Seed and step count, overridable through `DELTA_FUZZ_SEED` / `DELTA_FUZZ_STEPS`.
pub fn params(test_tag: &str, default_steps: usize) -> FuzzParams {
    let base_seed = env_u64("DELTA_FUZZ_SEED").unwrap_or(0x5EED_0F_DE17A);
    let steps = env_u64("DELTA_FUZZ_STEPS").map_or(default_steps, |steps| steps as usize);

    FuzzParams {
        seed: mix_seed(base_seed, test_tag),
        steps,
    }
}

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn temp_with(content: &[u8]) -> tempfile::NamedTempFile {
    let mut temp = tempfile::NamedTempFile::new().unwrap();

    temp.write_all(content).unwrap();
    temp.as_file().sync_all().unwrap();

    temp
}

/// Opens `temp` read-write and returns a document showing its content.
pub fn open_document(repository: &SegmentsRepository, temp: &tempfile::NamedTempFile) -> DeltaDocument {
    let source = repository
        .open_file_source(temp.path(), AccessMode::ReadWrite)
        .unwrap();

    repository.create_document_for(source).unwrap()
}

pub fn contents(document: &DeltaDocument) -> Vec<u8> {
    document.to_bytes().unwrap()
}

pub fn file_contents(temp: &tempfile::NamedTempFile) -> Vec<u8> {
    std::fs::read(temp.path()).unwrap()
}

/// Runs every integrity check on the documents and the repository.
pub fn validate_all(documents: &[&DeltaDocument]) {
    for document in documents {
        document.validate().unwrap();
        document.repository().validate().unwrap();
    }
}
