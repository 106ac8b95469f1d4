//! Random edit sequences checked against plain `Vec<u8>` models.

mod common;

use common::{contents, file_contents, init_logging, open_document, params, rng, temp_with, validate_all};
use delta_core::binary_data::{BinaryData, EditableBinaryData};
use delta_core::config::RepositoryConfig;
use delta_core::document::DeltaDocument;
use delta_core::repository::SegmentsRepository;
use rand::Rng;
use rand::rngs::StdRng;

fn random_bytes(rng: &mut StdRng, max: usize) -> Vec<u8> {
    let length = rng.gen_range(1..=max);

    (0..length).map(|_| rng.gen_range(b'a'..=b'z')).collect()
}

/// Applies one random edit to `document` and the same edit to `model`.
fn random_edit(rng: &mut StdRng, document: &mut DeltaDocument, model: &mut Vec<u8>, other: &DeltaDocument, other_model: &[u8]) {
    let size = model.len() as u64;

    match rng.gen_range(0..8) {
        0 | 1 => {
            let position = rng.gen_range(0..=size);
            let bytes = random_bytes(rng, 40);

            document.insert(position, &bytes).unwrap();
            EditableBinaryData::insert(model, position, &bytes).unwrap();
        }
        2 if size > 0 => {
            let position = rng.gen_range(0..size);
            let length = rng.gen_range(0..=(size - position).min(50));

            document.remove(position, length).unwrap();
            EditableBinaryData::remove(model, position, length).unwrap();
        }
        3 => {
            let position = rng.gen_range(0..=size);
            let value = rng.gen_range(0..=255u8);

            document.set_byte(position, value).unwrap();
            model.set_byte(position, value).unwrap();
        }
        4 => {
            let position = rng.gen_range(0..=size);
            let bytes = random_bytes(rng, 20);

            document.replace(position, &bytes).unwrap();
            model.replace(position, &bytes).unwrap();
        }
        5 if !other_model.is_empty() => {
            let other_size = other_model.len() as u64;
            let position = rng.gen_range(0..=size);
            let offset = rng.gen_range(0..other_size);
            let length = rng.gen_range(0..=other_size - offset);

            document.insert_data_range(position, other, offset, length).unwrap();
            EditableBinaryData::insert(model, position, &other_model[offset as usize..(offset + length) as usize])
                .unwrap();
        }
        6 => {
            let position = rng.gen_range(0..=size);
            let length = rng.gen_range(0..10);

            document.insert_zeroed(position, length).unwrap();
            model.insert_zeroed(position, length).unwrap();
        }
        _ => {
            let new_size = rng.gen_range(0..=size + 8);

            document.set_data_size(new_size).unwrap();
            model.set_data_size(new_size).unwrap();
        }
    }
}

#[test]
fn memory_documents_follow_their_models() {
    init_logging();

    let params = params("memory_documents", 400);
    let mut rng = rng(params.seed);
    let repository = SegmentsRepository::new();
    let mut first = repository.create_document();
    let mut second = repository.create_document();
    let mut first_model = Vec::new();
    let mut second_model = Vec::new();

    for step in 0..params.steps {
        if rng.gen_bool(0.5) {
            random_edit(&mut rng, &mut first, &mut first_model, &second, &second_model);
        } else {
            random_edit(&mut rng, &mut second, &mut second_model, &first, &first_model);
        }

        assert_eq!(contents(&first), first_model, "seed {:#x} step {step}", params.seed);
        assert_eq!(contents(&second), second_model, "seed {:#x} step {step}", params.seed);
        validate_all(&[&first, &second]);

        if step % 25 == 0 {
            let bytes: Vec<u8> = (0..first.data_size())
                .map(|position| first.get_byte(position).unwrap())
                .collect();

            assert_eq!(bytes, first_model, "seed {:#x} step {step}", params.seed);
        }
    }
}

#[test]
fn file_documents_survive_interleaved_saves() {
    init_logging();

    let params = params("file_documents", 300);
    let mut rng = rng(params.seed);
    let initial: Vec<u8> = (0..600u32).map(|i| b'A' + (i % 26) as u8).collect();
    let temp = temp_with(&initial);
    let repository = SegmentsRepository::with_config(
        RepositoryConfig::default()
            .with_processing_limit(7)
            .with_sync_on_save(false),
    )
    .unwrap();
    let mut first = open_document(&repository, &temp);
    let source = first.file_source().unwrap();
    let mut second = repository.create_document_for(source).unwrap();
    let mut first_model = initial.clone();
    let mut second_model = initial;
    let mut snapshot: Option<(DeltaDocument, Vec<u8>)> = None;

    for step in 0..params.steps {
        let context = format!("seed {:#x} step {step}", params.seed);

        match rng.gen_range(0..10) {
            0 => {
                first.save().unwrap();
                assert_eq!(file_contents(&temp), first_model, "{context}");
            }
            1 => {
                second.save().unwrap();
                assert_eq!(file_contents(&temp), second_model, "{context}");
            }
            2 if first.data_size() > 0 => {
                let position = rng.gen_range(0..first.data_size());
                let length = rng.gen_range(0..=first.data_size() - position);
                let start = position as usize;

                snapshot = Some((
                    first.copy_range(position, length).unwrap(),
                    first_model[start..start + length as usize].to_vec(),
                ));
            }
            3..=6 => random_edit(&mut rng, &mut first, &mut first_model, &second, &second_model),
            _ => random_edit(&mut rng, &mut second, &mut second_model, &first, &first_model),
        }

        assert_eq!(contents(&first), first_model, "{context}");
        assert_eq!(contents(&second), second_model, "{context}");
        validate_all(&[&first, &second]);

        if let Some((copy, model)) = &snapshot {
            assert_eq!(&contents(copy), model, "{context}");
            copy.validate().unwrap();
        }
    }
}
