//! Integration tests for balanced sampling and endless loaders.

use augpipe::data::{
    compute_balanced_class_weights, get_train_sampler_and_shuffler, CyclicIterator, DataLoader,
    DataSource, Dataset, InMemorySource, LabeledImage, SamplerError,
};
use augpipe::data::{ClassificationDataset, Compose};
use ndarray::{Array1, Array2, Array3};
use std::sync::Arc;

/// Three classes with 6, 2 and 1 positives, plus two unlabeled samples.
fn skewed_source() -> InMemorySource {
    let mut source = InMemorySource::new(vec!["a".into(), "b".into(), "c".into()]);
    let rows: [[f32; 3]; 10] = [
        [1.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 1.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0],
    ];
    for (i, row) in rows.iter().enumerate() {
        let image = Array3::from_elem((4, 4, 3), i as f32);
        source
            .push(format!("s{i}"), image, Array1::from(row.to_vec()))
            .unwrap();
    }
    source
}

#[test]
fn default_sampler_shuffles_without_weights() {
    let sampling = get_train_sampler_and_shuffler("default", None, Some(3), 10.0).unwrap();
    assert!(sampling.sampler().is_none());
    assert!(sampling.shuffle());
}

#[test]
fn unknown_sampler_is_named_in_the_error() {
    let err = get_train_sampler_and_shuffler("uniform", None, None, 10.0).unwrap_err();
    assert!(matches!(err, SamplerError::UnknownSampler { .. }));
    assert!(err.to_string().contains("uniform"));
}

#[test]
fn balanced_modes_need_a_source() {
    let err = get_train_sampler_and_shuffler("balanced-class", None, None, 10.0).unwrap_err();
    assert!(matches!(err, SamplerError::MissingSource(_)));
}

#[test]
fn balanced_class_weights_respect_the_clip() {
    let source = skewed_source();
    let labels: Array2<f32> = source.label_matrix().unwrap();
    let weights = compute_balanced_class_weights(&labels, 4.0);

    for (row, &w) in labels.outer_iter().zip(weights.iter()) {
        assert!(w <= 4.0);
        if row.sum() > 0.0 {
            assert!(w >= 1.0);
        } else {
            assert_eq!(w, 0.0);
        }
    }
    // Class "c" is six times rarer than "a" and gets clipped.
    assert_eq!(weights[7], 4.0);
    assert_eq!(weights[0], 1.0);
    assert_eq!(weights[6], 3.0);
}

#[test]
fn weighted_loader_never_draws_unlabeled_samples() {
    let source: Arc<dyn DataSource> = Arc::new(skewed_source());
    let sampling =
        get_train_sampler_and_shuffler("balanced-class", Some(source.as_ref()), Some(11), 10.0)
            .unwrap();
    assert!(!sampling.shuffle());
    assert_eq!(sampling.sampler().unwrap().weights().len(), 10);

    let dataset = ClassificationDataset::new(source, Compose::new());
    let loader = DataLoader::new(dataset, 4).sampling(sampling);
    let mut seen = 0;
    for batch in &loader {
        let batch = batch.unwrap();
        for &index in &batch.indices {
            assert!(index < 8, "unlabeled sample {index} was drawn");
        }
        seen += batch.len();
    }
    assert_eq!(seen, 10);
}

#[test]
fn cyclic_iterator_restarts_after_one_pass() {
    let dataset = ClassificationDataset::new(Arc::new(skewed_source()), Compose::new());
    let loader = DataLoader::new(dataset, 3);
    let batches_per_pass = loader.num_batches();
    assert_eq!(batches_per_pass, 4);

    let mut cyclic = CyclicIterator::new(&loader);
    let first = cyclic.get().unwrap().unwrap();
    for _ in 1..batches_per_pass {
        cyclic.get().unwrap().unwrap();
    }
    let wrapped = cyclic.get().unwrap().unwrap();

    assert_eq!(cyclic.passes(), 2);
    assert_eq!(wrapped.indices, first.indices);
    let restarted: &LabeledImage = &wrapped.items[0];
    assert_eq!(restarted.image, first.items[0].image);
}

#[test]
fn shuffled_loader_visits_every_index_once() {
    let dataset = ClassificationDataset::new(Arc::new(skewed_source()), Compose::new());
    assert_eq!(dataset.len(), 10);
    let loader = DataLoader::new(dataset, 4).shuffle(true).seed(5);

    let mut indices: Vec<usize> = loader
        .iter()
        .flat_map(|batch| batch.unwrap().indices)
        .collect();
    indices.sort();
    assert_eq!(indices, (0..10).collect::<Vec<_>>());
}
