// --- File: src/data/dataset.rs ---

//! Data sources, the `Dataset` trait and the datasets built on top of them.
//!
//! A [`DataSource`] knows *what* the samples are: their ids, labels and
//! decoded images. A [`Dataset`] turns a source into training items by
//! running a transform chain over it.

use super::transforms::{Compose, Sample, Transform, TransformError};
use ndarray::{Array1, Array2, Array3, ArrayD, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// File extensions picked up by [`ImageFolderSource`].
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Errors raised by sources, datasets and loaders.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("image decoding error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("unknown data source '{name}'. Known data sources are: {known:?}")]
    UnknownSource { name: String, known: Vec<String> },

    #[error("unknown sample id '{0}'")]
    UnknownSample(String),

    #[error("index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("sample '{0}' has no mask")]
    MissingMask(String),

    #[error("the loader is empty, there is nothing to cycle over")]
    EmptyLoader,

    #[error("source is inconsistent: {0}")]
    Inconsistent(String),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Transform(#[from] TransformError),
}

pub type DataResult<T> = std::result::Result<T, DataError>;

/// Indexable collection of training items.
pub trait Dataset: Send + Sync {
    type Item;

    /// Number of items in the dataset.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the item at `index`.
    fn get(&self, index: usize) -> DataResult<Self::Item>;
}

impl<D: Dataset + ?Sized> Dataset for Arc<D> {
    type Item = D::Item;

    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> DataResult<Self::Item> {
        (**self).get(index)
    }
}

impl<D: Dataset + ?Sized> Dataset for Box<D> {
    type Item = D::Item;

    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> DataResult<Self::Item> {
        (**self).get(index)
    }
}

/// A collection of labelled images addressed by string ids.
pub trait DataSource: Send + Sync {
    /// Ids of every sample, in a stable order.
    fn sample_ids(&self) -> &[String];

    /// Names of the classes, indexed like the label vectors.
    fn classes(&self) -> &[String];

    /// Multi-hot label vector of a sample.
    fn get_label(&self, id: &str) -> DataResult<Array1<f32>>;

    /// Decoded HWC image with values in `0..=255`.
    fn get_image(&self, id: &str) -> DataResult<Array3<f32>>;

    /// Dense target map of a sample, if the source has one.
    fn get_mask(&self, _id: &str) -> DataResult<Option<ArrayD<f32>>> {
        Ok(None)
    }

    fn len(&self) -> usize {
        self.sample_ids().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn num_classes(&self) -> usize {
        self.classes().len()
    }

    /// Labels of every sample stacked into a `(samples, classes)` matrix.
    fn label_matrix(&self) -> DataResult<Array2<f32>> {
        let mut matrix = Array2::zeros((self.len(), self.num_classes()));
        for (mut row, id) in matrix.axis_iter_mut(Axis(0)).zip(self.sample_ids()) {
            let label = self.get_label(id)?;
            if label.len() != row.len() {
                return Err(DataError::Inconsistent(format!(
                    "label of '{id}' has {} entries, expected {}",
                    label.len(),
                    row.len()
                )));
            }
            row.assign(&label);
        }
        Ok(matrix)
    }
}

/// One in-memory record.
#[derive(Debug, Clone)]
struct Record {
    image: Array3<f32>,
    label: Array1<f32>,
    mask: Option<ArrayD<f32>>,
}

/// Source whose images and labels are held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    ids: Vec<String>,
    classes: Vec<String>,
    records: HashMap<String, Record>,
}

impl InMemorySource {
    pub fn new(classes: Vec<String>) -> Self {
        Self {
            classes,
            ..Self::default()
        }
    }

    /// Adds a sample. Re-using an id replaces the earlier sample.
    pub fn push(
        &mut self,
        id: impl Into<String>,
        image: Array3<f32>,
        label: Array1<f32>,
    ) -> DataResult<()> {
        self.insert(id.into(), image, label, None)
    }

    /// Adds a sample together with its target map.
    pub fn push_with_mask(
        &mut self,
        id: impl Into<String>,
        image: Array3<f32>,
        label: Array1<f32>,
        mask: ArrayD<f32>,
    ) -> DataResult<()> {
        self.insert(id.into(), image, label, Some(mask))
    }

    fn insert(
        &mut self,
        id: String,
        image: Array3<f32>,
        label: Array1<f32>,
        mask: Option<ArrayD<f32>>,
    ) -> DataResult<()> {
        if label.len() != self.classes.len() {
            return Err(DataError::Inconsistent(format!(
                "label of '{id}' has {} entries for {} classes",
                label.len(),
                self.classes.len()
            )));
        }
        if !self.records.contains_key(&id) {
            self.ids.push(id.clone());
        }
        self.records.insert(id, Record { image, label, mask });
        Ok(())
    }

    fn record(&self, id: &str) -> DataResult<&Record> {
        self.records
            .get(id)
            .ok_or_else(|| DataError::UnknownSample(id.to_string()))
    }
}

impl DataSource for InMemorySource {
    fn sample_ids(&self) -> &[String] {
        &self.ids
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn get_label(&self, id: &str) -> DataResult<Array1<f32>> {
        Ok(self.record(id)?.label.clone())
    }

    fn get_image(&self, id: &str) -> DataResult<Array3<f32>> {
        Ok(self.record(id)?.image.clone())
    }

    fn get_mask(&self, id: &str) -> DataResult<Option<ArrayD<f32>>> {
        Ok(self.record(id)?.mask.clone())
    }
}

/// Source laid out as `root/<class>/<image>`.
///
/// Classes are the sorted sub-directory names; every image gets the one-hot
/// label of its directory. Sample ids are `<class>/<file name>`.
#[derive(Debug, Clone)]
pub struct ImageFolderSource {
    root: PathBuf,
    classes: Vec<String>,
    ids: Vec<String>,
    class_of: HashMap<String, usize>,
}

impl ImageFolderSource {
    pub fn open(root: impl AsRef<Path>) -> DataResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(DataError::DirectoryNotFound(root));
        }

        let mut classes = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                classes.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        classes.sort();

        let mut ids = Vec::new();
        let mut class_of = HashMap::new();
        for (class_idx, class) in classes.iter().enumerate() {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(root.join(class))? {
                let path = entry?.path();
                let is_image = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
                if is_image && path.is_file() {
                    if let Some(name) = path.file_name() {
                        files.push(name.to_string_lossy().into_owned());
                    }
                }
            }
            files.sort();
            for file in files {
                let id = format!("{class}/{file}");
                class_of.insert(id.clone(), class_idx);
                ids.push(id);
            }
        }

        tracing::debug!(
            root = %root.display(),
            classes = classes.len(),
            samples = ids.len(),
            "opened image folder"
        );
        Ok(Self {
            root,
            classes,
            ids,
            class_of,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn class_index(&self, id: &str) -> DataResult<usize> {
        self.class_of
            .get(id)
            .copied()
            .ok_or_else(|| DataError::UnknownSample(id.to_string()))
    }
}

impl DataSource for ImageFolderSource {
    fn sample_ids(&self) -> &[String] {
        &self.ids
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn get_label(&self, id: &str) -> DataResult<Array1<f32>> {
        let mut label = Array1::zeros(self.classes.len());
        label[self.class_index(id)?] = 1.0;
        Ok(label)
    }

    fn get_image(&self, id: &str) -> DataResult<Array3<f32>> {
        self.class_index(id)?;
        let rgb = image::open(self.root.join(id))?.to_rgb8();
        let (w, h) = rgb.dimensions();
        let values = rgb.into_raw().into_iter().map(f32::from).collect();
        Ok(Array3::from_shape_vec((h as usize, w as usize, 3), values)?)
    }
}

/// Where a registered source finds its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOptions {
    pub data_dir: PathBuf,
    pub domain: Option<String>,
    pub split: Option<String>,
}

impl SourceOptions {
    /// Directory the source reads: `data_dir/<domain>` when a domain is set,
    /// else `data_dir/<split>`, else `data_dir`.
    pub fn root(&self) -> PathBuf {
        match self.domain.as_deref().or(self.split.as_deref()) {
            Some(sub) => self.data_dir.join(sub),
            None => self.data_dir.clone(),
        }
    }
}

/// Constructor of a registered source.
pub type SourceFactory = fn(&SourceOptions) -> DataResult<Box<dyn DataSource>>;

fn open_image_folder(options: &SourceOptions) -> DataResult<Box<dyn DataSource>> {
    Ok(Box::new(ImageFolderSource::open(options.root())?))
}

/// Name-keyed constructors for data sources.
#[derive(Clone)]
pub struct DataSourceRegistry {
    factories: BTreeMap<String, SourceFactory>,
}

impl DataSourceRegistry {
    /// Registry without any source.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registers (or replaces) a source constructor.
    pub fn register(&mut self, name: impl Into<String>, factory: SourceFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn create(&self, name: &str, options: &SourceOptions) -> DataResult<Box<dyn DataSource>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DataError::UnknownSource {
                name: name.to_string(),
                known: self.names(),
            })?;
        factory(options)
    }
}

impl Default for DataSourceRegistry {
    /// Registry with the built-in `"folder"` source.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("folder", open_image_folder);
        registry
    }
}

impl fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

/// Builds a source from the default registry.
pub fn custom_data_source(
    name: &str,
    data_dir: impl AsRef<Path>,
    domain: Option<&str>,
    split: Option<&str>,
) -> DataResult<Box<dyn DataSource>> {
    let options = SourceOptions {
        data_dir: data_dir.as_ref().to_path_buf(),
        domain: domain.map(str::to_string),
        split: split.map(str::to_string),
    };
    DataSourceRegistry::default().create(name, &options)
}

/// Per-draw RNG. Seeded datasets derive one generator per draw from the seed
/// and a draw counter, so a sequential pass is reproducible.
#[derive(Debug)]
pub(crate) struct DrawRng {
    seed: Option<u64>,
    draws: AtomicU64,
}

impl DrawRng {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            seed,
            draws: AtomicU64::new(0),
        }
    }

    pub fn draw(&self) -> StdRng {
        match self.seed {
            Some(seed) => {
                let draw = self.draws.fetch_add(1, Ordering::Relaxed);
                StdRng::seed_from_u64(seed ^ draw.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            }
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }
}

impl Clone for DrawRng {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            draws: AtomicU64::new(self.draws.load(Ordering::Relaxed)),
        }
    }
}

/// A transformed image with its label vector.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledImage {
    pub image: Array3<f32>,
    pub label: Array1<f32>,
}

/// Classification view of a source: transformed image plus multi-hot label.
#[derive(Clone)]
pub struct ClassificationDataset {
    source: Arc<dyn DataSource>,
    transform: Arc<Compose>,
    rng: DrawRng,
}

impl ClassificationDataset {
    pub fn new(source: Arc<dyn DataSource>, transform: Compose) -> Self {
        Self {
            source,
            transform: Arc::new(transform),
            rng: DrawRng::new(None),
        }
    }

    /// Makes the random transforms reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = DrawRng::new(Some(seed));
        self
    }

    pub fn source(&self) -> &dyn DataSource {
        self.source.as_ref()
    }

    pub fn transform(&self) -> &Compose {
        &self.transform
    }

    fn id(&self, index: usize) -> DataResult<&str> {
        self.source
            .sample_ids()
            .get(index)
            .map(String::as_str)
            .ok_or(DataError::IndexOutOfRange {
                index,
                len: self.source.len(),
            })
    }
}

impl Dataset for ClassificationDataset {
    type Item = LabeledImage;

    fn len(&self) -> usize {
        self.source.len()
    }

    fn get(&self, index: usize) -> DataResult<LabeledImage> {
        let id = self.id(index)?;
        let image = self.source.get_image(id)?;
        let label = self.source.get_label(id)?;
        let sample = self.transform.apply(Sample::new(image), &mut self.rng.draw())?;
        Ok(LabeledImage {
            image: sample.image,
            label,
        })
    }
}

impl fmt::Debug for ClassificationDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassificationDataset")
            .field("len", &self.source.len())
            .field("transform", &self.transform)
            .finish()
    }
}

/// Segmentation view of a source: transformed image and mask.
#[derive(Clone)]
pub struct SegmentationDataset {
    source: Arc<dyn DataSource>,
    transform: Arc<Compose>,
    rng: DrawRng,
}

impl SegmentationDataset {
    pub fn new(source: Arc<dyn DataSource>, transform: Compose) -> Self {
        Self {
            source,
            transform: Arc::new(transform),
            rng: DrawRng::new(None),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = DrawRng::new(Some(seed));
        self
    }
}

impl Dataset for SegmentationDataset {
    type Item = Sample;

    fn len(&self) -> usize {
        self.source.len()
    }

    fn get(&self, index: usize) -> DataResult<Sample> {
        let id = self
            .source
            .sample_ids()
            .get(index)
            .ok_or(DataError::IndexOutOfRange {
                index,
                len: self.source.len(),
            })?;
        let image = self.source.get_image(id)?;
        let mask = self
            .source
            .get_mask(id)?
            .ok_or_else(|| DataError::MissingMask(id.clone()))?;
        Ok(self
            .transform
            .apply(Sample::with_mask(image, mask), &mut self.rng.draw())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::transforms::{Normalize, Transpose};
    use ndarray::{array, IxDyn};

    fn tiny_source() -> InMemorySource {
        let mut source = InMemorySource::new(vec!["a".into(), "b".into()]);
        for (i, label) in [array![1.0, 0.0], array![0.0, 1.0], array![1.0, 1.0]]
            .into_iter()
            .enumerate()
        {
            let image = Array3::from_elem((4, 4, 3), i as f32 * 10.0);
            source.push(format!("s{i}"), image, label).unwrap();
        }
        source
    }

    #[test]
    fn test_in_memory_source() {
        let source = tiny_source();
        assert_eq!(source.len(), 3);
        assert_eq!(source.num_classes(), 2);
        assert_eq!(source.sample_ids(), &["s0", "s1", "s2"]);
        assert_eq!(source.get_label("s2").unwrap(), array![1.0, 1.0]);
        assert!(matches!(
            source.get_image("nope"),
            Err(DataError::UnknownSample(_))
        ));
    }

    #[test]
    fn test_push_rejects_wrong_label_width() {
        let mut source = InMemorySource::new(vec!["a".into()]);
        let result = source.push("x", Array3::zeros((2, 2, 3)), array![1.0, 0.0]);
        assert!(matches!(result, Err(DataError::Inconsistent(_))));
        assert!(source.is_empty());
    }

    #[test]
    fn test_label_matrix() {
        let matrix = tiny_source().label_matrix().unwrap();
        assert_eq!(matrix, array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]);
    }

    #[test]
    fn test_classification_dataset() {
        let chain = Compose::new().add(Normalize::imagenet()).add(Transpose);
        let dataset = ClassificationDataset::new(Arc::new(tiny_source()), chain);
        assert_eq!(dataset.len(), 3);

        let item = dataset.get(1).unwrap();
        assert_eq!(item.image.shape(), &[3, 4, 4]);
        assert_eq!(item.label, array![0.0, 1.0]);
        assert!(matches!(
            dataset.get(3),
            Err(DataError::IndexOutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_segmentation_dataset_needs_masks() {
        let mut source = tiny_source();
        source
            .push_with_mask(
                "m",
                Array3::zeros((4, 4, 3)),
                array![0.0, 1.0],
                ArrayD::zeros(IxDyn(&[4, 4])),
            )
            .unwrap();
        let dataset = SegmentationDataset::new(Arc::new(source), Compose::new().add(Transpose));

        assert!(matches!(dataset.get(0), Err(DataError::MissingMask(_))));
        let sample = dataset.get(3).unwrap();
        assert_eq!(sample.mask.unwrap().shape(), &[4, 4]);
    }

    #[test]
    fn test_draw_rng_is_reproducible() {
        use rand::Rng;
        let a = DrawRng::new(Some(3));
        let b = DrawRng::new(Some(3));
        let xs: Vec<u32> = (0..4).map(|_| a.draw().random()).collect();
        let ys: Vec<u32> = (0..4).map(|_| b.draw().random()).collect();
        assert_eq!(xs, ys);
        assert_ne!(xs[0], xs[1]);
    }

    #[test]
    fn test_registry_rejects_unknown_names() {
        match custom_data_source("hpa", "/nonexistent", None, Some("train")) {
            Ok(_) => panic!("an unregistered name must not resolve"),
            Err(DataError::UnknownSource { name, known }) => {
                assert_eq!(name, "hpa");
                assert_eq!(known, vec!["folder".to_string()]);
            }
            Err(other) => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_source_options_root() {
        let mut options = SourceOptions {
            data_dir: PathBuf::from("/data"),
            domain: None,
            split: Some("train".into()),
        };
        assert_eq!(options.root(), PathBuf::from("/data/train"));
        options.domain = Some("painting".into());
        assert_eq!(options.root(), PathBuf::from("/data/painting"));
    }
}
