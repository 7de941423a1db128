//! BERT-backed scoring model loaded with Candle
//!
//! Expects the usual Hugging Face layout: `config.json`, `tokenizer.json`,
//! `model.safetensors`, plus a `reverse_label_mapping.json` mapping output
//! indices (as strings) to category labels.

use crate::model::{ModelLoader, ScoringModel};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{Linear, Module, VarBuilder, VarMap};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use hf_hub::{api::sync::Api, Repo, RepoType};
use medtriage_core::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::{info, warn};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const LABEL_MAPPING_FILE: &str = "reverse_label_mapping.json";

/// Source location for model files
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// Directory on the local file system
    LocalDir(PathBuf),

    /// Download from Hugging Face Hub
    HuggingFace {
        repo_id: String,
        revision: Option<String>,
    },
}

/// Device type for inference
#[derive(Debug, Clone, Copy, Default)]
pub enum DeviceType {
    /// CPU inference (always available)
    #[default]
    Cpu,
    /// CUDA GPU inference (if available)
    Cuda(usize),
    /// Metal (Apple Silicon)
    Metal(usize),
}

impl DeviceType {
    /// Parse "cpu", "cuda", "cuda:1", "metal"
    pub fn parse(device: &str) -> Result<Self> {
        let (kind, index) = match device.split_once(':') {
            Some((kind, idx)) => {
                let idx = idx
                    .parse()
                    .map_err(|_| Error::config(format!("Invalid device index in '{}'", device)))?;
                (kind, idx)
            }
            None => (device, 0),
        };

        match kind.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda(index)),
            "metal" | "mps" => Ok(Self::Metal(index)),
            other => Err(Error::config(format!("Unknown device '{}'", other))),
        }
    }

    fn create(self) -> Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda(idx) => Device::new_cuda(idx)
                .map_err(|e| Error::model(format!("Failed to create CUDA device: {}", e))),
            Self::Metal(idx) => Device::new_metal(idx)
                .map_err(|e| Error::model(format!("Failed to create Metal device: {}", e))),
        }
    }
}

/// Configuration for loading the BERT classifier
#[derive(Debug, Clone)]
pub struct BertModelConfig {
    pub source: ModelSource,

    /// Overrides the label mapping shipped with the model
    pub label_mapping: Option<PathBuf>,

    pub device: DeviceType,

    /// Token limit; longer inputs are truncated
    pub max_sequence_length: usize,
}

impl BertModelConfig {
    pub fn from_local(dir: impl Into<PathBuf>) -> Self {
        Self {
            source: ModelSource::LocalDir(dir.into()),
            label_mapping: None,
            device: DeviceType::Cpu,
            max_sequence_length: 512,
        }
    }

    pub fn from_hf(repo_id: impl Into<String>, revision: Option<String>) -> Self {
        Self {
            source: ModelSource::HuggingFace {
                repo_id: repo_id.into(),
                revision,
            },
            label_mapping: None,
            device: DeviceType::Cpu,
            max_sequence_length: 512,
        }
    }

    pub fn with_label_mapping(mut self, path: impl Into<PathBuf>) -> Self {
        self.label_mapping = Some(path.into());
        self
    }

    pub fn with_device(mut self, device: DeviceType) -> Self {
        self.device = device;
        self
    }

    pub fn with_max_sequence_length(mut self, max: usize) -> Self {
        self.max_sequence_length = max;
        self
    }
}

/// Local paths of every file needed to build the model
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
    label_mapping: PathBuf,
}

impl ModelFiles {
    fn resolve(config: &BertModelConfig) -> Result<Self> {
        let mut files = match &config.source {
            ModelSource::LocalDir(dir) => {
                let file = |name: &str| -> Result<PathBuf> {
                    let path = dir.join(name);
                    if path.exists() {
                        Ok(path)
                    } else {
                        Err(Error::model(format!("Model file not found: {}", path.display())))
                    }
                };
                Self {
                    config: file(CONFIG_FILE)?,
                    tokenizer: file(TOKENIZER_FILE)?,
                    weights: file(WEIGHTS_FILE)?,
                    label_mapping: dir.join(LABEL_MAPPING_FILE),
                }
            }
            ModelSource::HuggingFace { repo_id, revision } => {
                let api = Api::new()
                    .map_err(|e| Error::model(format!("Failed to initialize HF API: {}", e)))?;
                let repo = api.repo(Repo::with_revision(
                    repo_id.clone(),
                    RepoType::Model,
                    revision.clone().unwrap_or_else(|| "main".to_string()),
                ));
                let file = |name: &str| -> Result<PathBuf> {
                    repo.get(name).map_err(|e| {
                        Error::model(format!("Failed to download {} from {}: {}", name, repo_id, e))
                    })
                };
                Self {
                    config: file(CONFIG_FILE)?,
                    tokenizer: file(TOKENIZER_FILE)?,
                    weights: file(WEIGHTS_FILE)?,
                    label_mapping: match &config.label_mapping {
                        Some(path) => path.clone(),
                        None => file(LABEL_MAPPING_FILE)?,
                    },
                }
            }
        };

        if let Some(path) = &config.label_mapping {
            files.label_mapping = path.clone();
        }
        if !files.label_mapping.exists() {
            return Err(Error::model(format!(
                "Label mapping not found: {}",
                files.label_mapping.display()
            )));
        }

        Ok(files)
    }
}

/// Read `{"0": "Cancers", "1": ...}` into labels ordered by index
pub fn load_label_mapping(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)?;
    let mapping: HashMap<String, String> = serde_json::from_str(&raw)?;

    (0..mapping.len())
        .map(|idx| {
            mapping.get(&idx.to_string()).cloned().ok_or_else(|| {
                Error::model(format!("Label mapping has no entry for index {}", idx))
            })
        })
        .collect()
}

struct BertInner {
    tokenizer: Tokenizer,
    encoder: BertModel,
    head: Linear,
    device: Device,
    labels: Vec<String>,
    max_sequence_length: usize,
}

impl BertInner {
    fn forward(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| Error::model(format!("Tokenization failed: {}", e)))?;

        let len = encoding.get_ids().len().min(self.max_sequence_length);
        self.probabilities(
            &encoding.get_ids()[..len],
            &encoding.get_type_ids()[..len],
            &encoding.get_attention_mask()[..len],
        )
        .map_err(|e| Error::model(format!("Model forward pass failed: {}", e)))
    }

    fn probabilities(
        &self,
        ids: &[u32],
        type_ids: &[u32],
        mask: &[u32],
    ) -> candle_core::Result<Vec<f32>> {
        let input_ids = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(type_ids, &self.device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(mask, &self.device)?.unsqueeze(0)?;

        let hidden = self
            .encoder
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // [CLS] embedding -> classification head
        let cls = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        let logits = self.head.forward(&cls)?;

        candle_nn::ops::softmax(&logits, D::Minus1)?
            .squeeze(0)?
            .to_vec1::<f32>()
    }
}

/// BERT encoder with a linear classification head over the [CLS] token
pub struct BertScoringModel {
    name: String,
    inner: Arc<BertInner>,
}

impl BertScoringModel {
    /// Load every component; any failure leaves nothing behind
    pub fn load(config: &BertModelConfig) -> Result<Self> {
        let files = ModelFiles::resolve(config)?;
        let device = config.device.create()?;

        let labels = load_label_mapping(&files.label_mapping)?;
        info!("Loaded label mapping with {} classes", labels.len());

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| Error::model(format!("Failed to load tokenizer: {}", e)))?;

        let raw_config = std::fs::read_to_string(&files.config)?;
        let bert_config: BertConfig = serde_json::from_str(&raw_config)?;
        let hidden_size = serde_json::from_str::<serde_json::Value>(&raw_config)?
            .get("hidden_size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::model("config.json has no hidden_size"))?
            as usize;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, &device)
                .map_err(|e| Error::model(format!("Failed to load weights: {}", e)))?
        };

        let encoder = BertModel::load(vb.clone(), &bert_config)
            .map_err(|e| Error::model(format!("Failed to load BERT model: {}", e)))?;

        let head = match candle_nn::linear(hidden_size, labels.len(), vb.pp("classifier")) {
            Ok(head) => head,
            Err(e) => {
                warn!(
                    error = %e,
                    "Checkpoint has no classification head, using an untrained one"
                );
                let varmap = VarMap::new();
                let fresh = VarBuilder::from_varmap(&varmap, DType::F32, &device);
                candle_nn::linear(hidden_size, labels.len(), fresh.pp("classifier"))
                    .map_err(|e| Error::model(format!("Failed to build classifier head: {}", e)))?
            }
        };

        let name = match &config.source {
            ModelSource::LocalDir(dir) => dir.display().to_string(),
            ModelSource::HuggingFace { repo_id, .. } => repo_id.clone(),
        };

        Ok(Self {
            name,
            inner: Arc::new(BertInner {
                tokenizer,
                encoder,
                head,
                device,
                labels,
                max_sequence_length: config.max_sequence_length,
            }),
        })
    }
}

#[async_trait]
impl ScoringModel for BertScoringModel {
    async fn score(&self, text: &str) -> Result<Vec<(String, f32)>> {
        let inner = self.inner.clone();
        let text = text.to_string();

        let probabilities = tokio::task::spawn_blocking(move || inner.forward(&text))
            .await
            .map_err(|e| Error::internal(format!("Inference task failed: {}", e)))??;

        if probabilities.len() != self.inner.labels.len() {
            return Err(Error::model(format!(
                "Model produced {} scores for {} labels",
                probabilities.len(),
                self.inner.labels.len()
            )));
        }

        Ok(self.inner.labels.iter().cloned().zip(probabilities).collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// [`ModelLoader`] for [`BertScoringModel`]
pub struct BertModelLoader {
    config: BertModelConfig,
}

impl BertModelLoader {
    pub fn new(config: BertModelConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for BertModelLoader {
    fn load(&self) -> Result<Arc<dyn ScoringModel>> {
        info!("Loading BERT classifier from {}", self.describe());
        let model = BertScoringModel::load(&self.config)?;
        Ok(Arc::new(model))
    }

    fn describe(&self) -> String {
        match &self.config.source {
            ModelSource::LocalDir(dir) => format!("local:{}", dir.display()),
            ModelSource::HuggingFace { repo_id, revision } => format!(
                "hf:{}@{}",
                repo_id,
                revision.as_deref().unwrap_or("main")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_device_parse() {
        assert!(matches!(DeviceType::parse("cpu"), Ok(DeviceType::Cpu)));
        assert!(matches!(DeviceType::parse("cuda:1"), Ok(DeviceType::Cuda(1))));
        assert!(matches!(DeviceType::parse("mps"), Ok(DeviceType::Metal(0))));
        assert!(DeviceType::parse("tpu").is_err());
        assert!(DeviceType::parse("cuda:x").is_err());
    }

    #[test]
    fn test_label_mapping_ordered_by_index() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"1": "Cancers", "0": "Cardiovascular Diseases"}}"#).unwrap();

        let labels = load_label_mapping(file.path()).unwrap();
        assert_eq!(labels, vec!["Cardiovascular Diseases", "Cancers"]);
    }

    #[test]
    fn test_label_mapping_with_gap_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"0": "Cancers", "2": "Cardiovascular Diseases"}}"#).unwrap();

        assert!(load_label_mapping(file.path()).is_err());
    }

    #[test]
    fn test_missing_local_model_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let loader = BertModelLoader::new(BertModelConfig::from_local(dir.path()));

        assert!(loader.load().is_err());
        assert!(loader.describe().starts_with("local:"));
    }
}
