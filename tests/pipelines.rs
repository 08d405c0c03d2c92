//! End-to-end tests: folder on disk -> config -> chains -> loader batches.

use augpipe::config::{PipelineConfig, Task};
use augpipe::data::{
    apply_augmentation, custom_data_source, get_segmentation_transforms, BoxedDataset,
    ClassificationDataset, DataError, DataLoader, DataSource, Dataset, ImageFolderSource,
    InMemorySource, SegmentationDataset,
};
use image::{Rgb, RgbImage};
use ndarray::{Array1, Array3, ArrayD, IxDyn};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const IGNORE: f32 = 255.0;

fn write_image(path: &Path, w: u32, h: u32, shade: u8) {
    let img = RgbImage::from_fn(w, h, |x, y| {
        Rgb([shade, (x * 7 % 256) as u8, (y * 5 % 256) as u8])
    });
    img.save(path).unwrap();
}

/// `train/cat` holds three images, `train/dog` two, plus a stray text file.
fn image_folder() -> TempDir {
    let dir = TempDir::new().unwrap();
    for (class, count, shade) in [("cat", 3, 40u8), ("dog", 2, 200u8)] {
        let class_dir = dir.path().join("train").join(class);
        std::fs::create_dir_all(&class_dir).unwrap();
        for i in 0..count {
            write_image(&class_dir.join(format!("{i}.png")), 30 + i * 4, 26, shade);
        }
    }
    std::fs::write(dir.path().join("train/cat/notes.txt"), "not an image").unwrap();
    dir
}

#[test]
fn folder_source_lists_classes_and_decodes_images() {
    let dir = image_folder();
    let source = ImageFolderSource::open(dir.path().join("train")).unwrap();

    assert_eq!(source.classes(), ["cat".to_string(), "dog".to_string()]);
    assert_eq!(source.len(), 5);
    assert!(source.sample_ids().iter().all(|id| id.ends_with(".png")));

    let id = source.sample_ids()[3].clone();
    assert!(id.starts_with("dog/"));
    assert_eq!(source.get_label(&id).unwrap(), Array1::from(vec![0.0, 1.0]));

    let image = source.get_image(&id).unwrap();
    assert_eq!(image.shape(), &[26, 30, 3]);
    assert_eq!(image[[0, 0, 0]], 200.0);
}

#[test]
fn registry_resolves_split_directory() {
    let dir = image_folder();
    let source = custom_data_source("folder", dir.path(), None, Some("train")).unwrap();
    assert_eq!(source.num_classes(), 2);

    match custom_data_source("voc", dir.path(), None, None) {
        Err(DataError::UnknownSource { name, known }) => {
            assert_eq!(name, "voc");
            assert_eq!(known, vec!["folder".to_string()]);
        }
        other => panic!("expected UnknownSource, got {:?}", other.map(|s| s.len())),
    }
    assert!(matches!(
        custom_data_source("folder", dir.path(), None, Some("val")),
        Err(DataError::DirectoryNotFound(_))
    ));
}

#[test]
fn config_file_drives_a_cutmix_training_loader() {
    let dir = image_folder();
    let config_path = dir.path().join("pipeline.json");
    let json = format!(
        r#"{{
            "data_dir": {:?},
            "split": "train",
            "augment": "flip_cutmix",
            "min_size": 40,
            "max_size": 40,
            "crop_size": 32,
            "sampler": "balanced-class",
            "seed": 9,
            "batch_size": 2
        }}"#,
        dir.path().to_string_lossy()
    );
    std::fs::write(&config_path, json).unwrap();

    let config = PipelineConfig::load(&config_path).unwrap();
    let source: Arc<dyn DataSource> = Arc::from(config.source().unwrap());
    let sampling = config.train_sampling(Some(source.as_ref())).unwrap();

    let mut chains = config.transforms(Task::Classification).unwrap();
    let (name, train) = chains.remove(0);
    assert_eq!(name, "train");
    assert!(!train.contains("RandomCrop"));

    let dataset: BoxedDataset = Box::new(ClassificationDataset::new(source, train).with_seed(9));
    let dataset = apply_augmentation(
        dataset,
        &config.augment,
        config.crop_size,
        config.cutmix_prob,
        config.mixup_prob,
        config.seed,
    )
    .unwrap();

    let loader = DataLoader::new(dataset, config.batch_size).sampling(sampling);
    assert_eq!(loader.num_batches(), 3);
    for batch in &loader {
        let (images, labels) = batch.unwrap().stack().unwrap();
        assert_eq!(&images.shape()[1..], &[3, 32, 32]);
        assert_eq!(labels.ncols(), 2);
        for row in labels.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-4);
        }
    }
}

#[test]
fn segmentation_pads_masks_with_ignore_index() {
    let mut source = InMemorySource::new(vec!["fg".into()]);
    let image = Array3::from_shape_fn((20, 24, 3), |(y, x, _)| ((x + y) * 5) as f32);
    let mask = ArrayD::from_shape_fn(IxDyn(&[20, 24]), |ix| if ix[1] < 12 { 0.0 } else { 1.0 });
    source
        .push_with_mask("only", image, Array1::from(vec![1.0]), mask)
        .unwrap();

    let (train, eval) = get_segmentation_transforms(16, 16, 32, "", false, None).unwrap();
    let source: Arc<dyn DataSource> = Arc::new(source);

    let dataset = SegmentationDataset::new(source.clone(), train).with_seed(4);
    let sample = dataset.get(0).unwrap();
    assert_eq!(sample.image.shape(), &[3, 32, 32]);
    let mask = sample.mask.unwrap();
    assert_eq!(mask.shape(), &[32, 32]);
    assert!(mask.iter().all(|&v| v == 0.0 || v == 1.0 || v == IGNORE));
    assert!(mask.iter().any(|&v| v == IGNORE));

    let eval = SegmentationDataset::new(source, eval).get(0).unwrap();
    assert_eq!(eval.image.shape(), &[3, 32, 32]);
}

#[test]
fn segmentation_requires_masks() {
    let mut source = InMemorySource::new(vec!["fg".into()]);
    source
        .push("bare", Array3::zeros((8, 8, 3)), Array1::from(vec![1.0]))
        .unwrap();
    let (_, eval) = get_segmentation_transforms(8, 8, 8, "", false, None).unwrap();
    let dataset = SegmentationDataset::new(Arc::new(source), eval);
    assert!(matches!(dataset.get(0), Err(DataError::MissingMask(id)) if id == "bare"));
}
