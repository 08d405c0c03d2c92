// --- File: src/config.rs ---

//! JSON configuration of a data pipeline.

use crate::data::pipelines::{
    get_affinity_transforms, get_ccam_transforms, get_classification_transforms,
    get_inference_transforms, get_segmentation_transforms, NormalizeStats,
};
use crate::data::sampler::{
    get_train_sampler_and_shuffler, SamplerError, SamplerKind, TrainSampling, DEFAULT_CLIP_VALUE,
};
use crate::data::transforms::{Compose, TransformError};
use crate::data::{custom_data_source, DataError, DataSource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Sampler(#[from] SamplerError),

    #[error(transparent)]
    Data(#[from] DataError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Kind of training a chain is assembled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Classification,
    Inference,
    Affinity,
    Segmentation,
    Ccam,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Task::Classification => "classification",
            Task::Inference => "inference",
            Task::Affinity => "affinity",
            Task::Segmentation => "segmentation",
            Task::Ccam => "ccam",
        };
        f.write_str(name)
    }
}

/// Everything needed to build sources, chains and samplers.
///
/// Missing keys take their default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Registered data source name.
    pub dataset: String,
    pub data_dir: PathBuf,
    pub domain: Option<String>,
    pub split: Option<String>,
    /// Augmentation flags, matched by substring (`"flip_colorjitter_cutmix"`).
    pub augment: String,
    pub min_size: usize,
    pub max_size: usize,
    pub crop_size: usize,
    /// Resize target of the class-activation-map chains.
    pub image_size: usize,
    pub overcrop: bool,
    /// Channel statistics; ImageNet when absent.
    pub normalize_stats: Option<NormalizeStats>,
    pub sampler: String,
    pub seed: Option<u64>,
    pub clip_value: f32,
    pub cutmix_prob: f32,
    pub mixup_prob: f32,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset: "folder".to_string(),
            data_dir: PathBuf::from("data"),
            domain: None,
            split: Some("train".to_string()),
            augment: String::new(),
            min_size: 256,
            max_size: 256,
            crop_size: 224,
            image_size: 512,
            overcrop: true,
            normalize_stats: None,
            sampler: SamplerKind::Default.to_string(),
            seed: None,
            clip_value: DEFAULT_CLIP_VALUE,
            cutmix_prob: 1.0,
            mixup_prob: 1.0,
            batch_size: 32,
        }
    }
}

impl PipelineConfig {
    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.as_ref().display(), "loaded pipeline config");
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks sizes, probabilities, statistics and the sampler name.
    pub fn validate(&self) -> Result<()> {
        if self.min_size == 0 || self.crop_size == 0 || self.image_size == 0 {
            return Err(ConfigError::Invalid(
                "min_size, crop_size and image_size must be greater than 0".to_string(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::Invalid(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be greater than 0".to_string()));
        }
        for (name, p) in [("cutmix_prob", self.cutmix_prob), ("mixup_prob", self.mixup_prob)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Invalid(format!("{name} must lie in [0, 1], got {p}")));
            }
        }
        if self.clip_value.is_nan() || self.clip_value <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "clip_value must be positive, got {}",
                self.clip_value
            )));
        }
        if let Some(stats) = &self.normalize_stats {
            stats.to_transform()?;
        }
        self.sampler_kind()?;
        Ok(())
    }

    pub fn sampler_kind(&self) -> Result<SamplerKind> {
        Ok(self.sampler.parse()?)
    }

    /// Named chains of a task: `train`/`eval` pairs, or a single chain for
    /// inference and affinity.
    pub fn transforms(&self, task: Task) -> Result<Vec<(&'static str, Compose)>> {
        let stats = self.normalize_stats.as_ref();
        let chains = match task {
            Task::Classification => {
                let (train, eval) = get_classification_transforms(
                    self.min_size,
                    self.max_size,
                    self.crop_size,
                    &self.augment,
                    stats,
                )?;
                vec![("train", train), ("eval", eval)]
            }
            Task::Inference => vec![("inference", get_inference_transforms(&self.augment, stats)?)],
            Task::Affinity => vec![(
                "train",
                get_affinity_transforms(
                    self.min_size,
                    self.max_size,
                    self.crop_size,
                    self.overcrop,
                    stats,
                )?,
            )],
            Task::Segmentation => {
                let (train, eval) = get_segmentation_transforms(
                    self.min_size,
                    self.max_size,
                    self.crop_size,
                    &self.augment,
                    self.overcrop,
                    stats,
                )?;
                vec![("train", train), ("eval", eval)]
            }
            Task::Ccam => {
                let (train, eval) = get_ccam_transforms(self.image_size, self.crop_size, stats)?;
                vec![("train", train), ("eval", eval)]
            }
        };
        Ok(chains)
    }

    /// Opens the configured data source.
    pub fn source(&self) -> Result<Box<dyn DataSource>> {
        Ok(custom_data_source(
            &self.dataset,
            &self.data_dir,
            self.domain.as_deref(),
            self.split.as_deref(),
        )?)
    }

    /// Resolves the configured sampler against `source`.
    pub fn train_sampling(&self, source: Option<&dyn DataSource>) -> Result<TrainSampling> {
        Ok(get_train_sampler_and_shuffler(
            &self.sampler,
            source,
            self.seed,
            self.clip_value,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = PipelineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.sampler_kind().unwrap(), SamplerKind::Default);
    }

    #[test]
    fn test_partial_json() {
        let config = PipelineConfig::from_json_str(
            r#"{"augment": "flip_cutmix", "min_size": 32, "max_size": 48, "crop_size": 32,
                "sampler": "balanced-class", "seed": 7}"#,
        )
        .unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.batch_size, 32);

        let chains = config.transforms(Task::Classification).unwrap();
        assert_eq!(chains.len(), 2);
        assert!(!chains[0].1.contains("RandomCrop"));
    }

    #[test]
    fn test_round_trip_through_json() {
        let config = PipelineConfig {
            augment: "qnorm".into(),
            normalize_stats: Some(NormalizeStats {
                mean: vec![0.5],
                std: vec![0.25],
            }),
            ..PipelineConfig::default()
        };
        let text = config.to_json_string().unwrap();
        assert_eq!(PipelineConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            r#"{"sampler": "uniform"}"#,
            r#"{"min_size": 300, "max_size": 200}"#,
            r#"{"crop_size": 0}"#,
            r#"{"cutmix_prob": 1.5}"#,
            r#"{"clip_value": 0}"#,
            r#"{"normalize_stats": {"mean": [0.5], "std": [0.0]}}"#,
        ];
        for case in cases {
            assert!(PipelineConfig::from_json_str(case).is_err(), "{case} should be rejected");
        }
        assert!(matches!(
            PipelineConfig::from_json_str("{not json"),
            Err(ConfigError::JsonError(_))
        ));
    }

    #[test]
    fn test_every_task_builds() {
        let config = PipelineConfig::default();
        for task in [
            Task::Classification,
            Task::Inference,
            Task::Affinity,
            Task::Segmentation,
            Task::Ccam,
        ] {
            let chains = config.transforms(task).unwrap();
            assert!(!chains.is_empty(), "{task}");
            for (_, chain) in chains {
                assert!(chain.contains("Normalize"));
                assert!(chain.contains("Transpose"));
            }
        }
    }

    #[test]
    fn test_task_serde_names() {
        let task: Task = serde_json::from_str("\"ccam\"").unwrap();
        assert_eq!(task, Task::Ccam);
        assert_eq!(Task::Segmentation.to_string(), "segmentation");
    }
}
