use anyhow::{Context, Result};
use burn::prelude::*;
use burn::record::{CompactRecorder, Recorder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::model::{ModelConfig, ModelFamily, OutputActivation};

/// Metadata stored next to saved weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Crate version that wrote the checkpoint
    pub version: String,
    /// Architecture of the saved weights
    pub family: ModelFamily,
    /// Model configuration
    pub model_config: ModelConfig,
    /// Output activation applied on top of the raw scores
    pub activation: OutputActivation,
    /// Learning rate the model was trained with
    pub learning_rate: f64,
    /// Search trial that produced the model, if any
    pub trial: Option<usize>,
    /// Best validation loss, absent when training never produced a finite one
    pub val_loss: Option<f64>,
    /// Mean validation ROC-AUC, absent when undefined
    pub val_mean_roc_auc: Option<f64>,
}

impl CheckpointMetadata {
    pub fn new(
        family: ModelFamily,
        model_config: ModelConfig,
        activation: OutputActivation,
        learning_rate: f64,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            family,
            model_config,
            activation,
            learning_rate,
            trial: None,
            val_loss: None,
            val_mean_roc_auc: None,
        }
    }
}

/// Weights plus JSON metadata on disk
pub struct ModelSaver;

impl ModelSaver {
    /// Save weights to `path` (`.mpk`) and metadata to the sibling `.json`
    pub fn save<B: Backend, M: Module<B>, P: AsRef<Path>>(
        model: &M,
        path: P,
        metadata: &CheckpointMetadata,
    ) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            crate::utils::ensure_dir(parent)?;
        }

        let record = model.clone().into_record();
        CompactRecorder::new()
            .record(record, path.to_path_buf())
            .context("Failed to save model")?;

        let metadata_path = path.with_extension("json");
        let metadata_json = serde_json::to_string_pretty(metadata)
            .context("Failed to serialize metadata")?;
        fs::write(&metadata_path, metadata_json)
            .context("Failed to write metadata file")?;

        info!("Saved model: {:?}", path);
        Ok(())
    }

    /// Read the metadata stored next to `path`
    pub fn load_metadata<P: AsRef<Path>>(path: P) -> Result<CheckpointMetadata> {
        let metadata_path = path.as_ref().with_extension("json");
        let metadata_json = fs::read_to_string(&metadata_path)
            .with_context(|| format!("Failed to read metadata file {:?}", metadata_path))?;
        serde_json::from_str(&metadata_json).context("Failed to parse metadata")
    }
}
