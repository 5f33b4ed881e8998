//! Llama-family causal LM runtime backed by candle.
//!
//! Only checkpoints whose `config.json` parses as a Llama config load here;
//! other architectures fail with `ModelUnavailable`.
//!
//! Weights, config and tokenizer are fetched from the Hugging Face Hub (or
//! its local cache) once, at construction.

use crate::config::LocalSettings;
use crate::local::{CausalLm, Token};
use crate::model::{ComputeDevice, ModelError};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks};
use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tokenizers::Tokenizer;

fn unavailable(e: impl std::fmt::Display) -> ModelError {
    ModelError::ModelUnavailable(e.to_string())
}

/// Resolve the requested compute device.
///
/// `Accelerated` tries CUDA, then Metal (each only when compiled in), then
/// falls back to CPU with a warning.
#[must_use]
pub fn select_device(preference: ComputeDevice) -> Device {
    if preference == ComputeDevice::Default {
        return Device::Cpu;
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            tracing::info!("Using CUDA device 0");
            return device;
        }
        tracing::warn!("CUDA feature enabled but no GPU available, falling back");
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            tracing::info!("Using Metal device 0");
            return device;
        }
        tracing::warn!("Metal feature enabled but no device available, falling back");
    }

    tracing::warn!("No accelerated device available, using CPU");
    Device::Cpu
}

/// Loaded model, tokenizer and device
pub struct CandleRuntime {
    model: Llama,
    config: Config,
    tokenizer: Tokenizer,
    device: Device,
    dtype: DType,
    bos: Option<u32>,
    eos: Vec<u32>,
}

impl CandleRuntime {
    /// Download (or reuse cached) files for `model_id` and load them.
    ///
    /// # Errors
    ///
    /// Returns `ModelUnavailable` if any file cannot be fetched or parsed.
    pub fn load(model_id: &str, settings: &LocalSettings) -> Result<Self, ModelError> {
        let device = select_device(settings.device);

        let mut builder = ApiBuilder::new();
        if let Some(dir) = &settings.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        let api = builder.build().map_err(unavailable)?;
        let repo = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            settings.revision.clone(),
        ));

        let config_path = repo.get("config.json").map_err(unavailable)?;
        let tokenizer_path = repo.get("tokenizer.json").map_err(unavailable)?;
        let weights = weight_files(&repo)?;

        let raw = std::fs::read(&config_path).map_err(unavailable)?;
        let llama_config: LlamaConfig = serde_json::from_slice(&raw).map_err(|e| {
            ModelError::ModelUnavailable(format!("{model_id} is not a Llama-family checkpoint: {e}"))
        })?;
        let config = llama_config.into_config(false);

        let dtype = if device.is_cpu() { DType::F32 } else { DType::F16 };

        // SAFETY: the safetensors files are read-only hub cache entries that
        // outlive the VarBuilder.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&weights, dtype, &device).map_err(unavailable)?
        };
        let model = Llama::load(vb, &config).map_err(unavailable)?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(unavailable)?;

        let bos = config.bos_token_id;
        let eos = match &config.eos_token_id {
            Some(LlamaEosToks::Single(id)) => vec![*id],
            Some(LlamaEosToks::Multiple(ids)) => ids.clone(),
            None => Vec::new(),
        };

        tracing::info!(
            model = %model_id,
            revision = %settings.revision,
            device = ?device,
            shards = weights.len(),
            "Loaded local model"
        );

        Ok(Self {
            model,
            config,
            tokenizer,
            device,
            dtype,
            bos,
            eos,
        })
    }

    fn forward(&self, ids: &[u32], index_pos: usize, cache: &mut Cache) -> Result<Vec<f32>, ModelError> {
        let input = Tensor::new(ids, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(unavailable)?;
        let logits = self
            .model
            .forward(&input, index_pos, cache)
            .and_then(|l| l.squeeze(0))
            .and_then(|l| l.to_dtype(DType::F32))
            .and_then(|l| l.to_vec1::<f32>())
            .map_err(unavailable)?;
        Ok(logits)
    }

    fn new_cache(&self) -> Result<Cache, ModelError> {
        Cache::new(true, self.dtype, &self.config, &self.device).map_err(unavailable)
    }
}

/// Sharded checkpoints list their files in an index; single-file ones don't.
fn weight_files(repo: &ApiRepo) -> Result<Vec<PathBuf>, ModelError> {
    let Ok(index_path) = repo.get("model.safetensors.index.json") else {
        return Ok(vec![repo.get("model.safetensors").map_err(unavailable)?]);
    };

    let raw = std::fs::read(&index_path).map_err(unavailable)?;
    let index: serde_json::Value = serde_json::from_slice(&raw).map_err(unavailable)?;
    let shards: BTreeSet<&str> = index
        .get("weight_map")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| ModelError::ModelUnavailable("index has no weight_map".to_string()))?
        .values()
        .filter_map(serde_json::Value::as_str)
        .collect();

    shards
        .into_iter()
        .map(|name| repo.get(name).map_err(unavailable))
        .collect()
}

impl CausalLm for CandleRuntime {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, ModelError> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| ModelError::TokenizationError(e.to_string()))?;
        Ok(encoding
            .get_ids()
            .iter()
            .zip(encoding.get_tokens())
            .map(|(&id, text)| Token {
                id,
                text: text.clone(),
            })
            .collect())
    }

    fn bos_token_id(&self) -> Option<u32> {
        self.bos
    }

    fn eos_token_ids(&self) -> &[u32] {
        &self.eos
    }

    fn logits(&self, ids: &[u32]) -> Result<Vec<Vec<f32>>, ModelError> {
        // The model returns last-position logits only, so step through the
        // sequence one token at a time on a shared KV cache.
        let mut cache = self.new_cache()?;
        let mut rows = Vec::with_capacity(ids.len());
        for (pos, id) in ids.iter().enumerate() {
            rows.push(self.forward(std::slice::from_ref(id), pos, &mut cache)?);
        }
        Ok(rows)
    }

    fn last_logits(&self, ids: &[u32]) -> Result<Vec<f32>, ModelError> {
        let mut cache = self.new_cache()?;
        self.forward(ids, 0, &mut cache)
    }

    fn decode(&self, ids: &[u32]) -> Result<String, ModelError> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| ModelError::TokenizationError(e.to_string()))
    }
}
