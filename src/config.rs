use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

fn default_max_seq_len() -> usize {
    2048
}

/// Construction-time sizing of a sampling layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LayerConfig {
    /// Maximum number of concurrently live sequences (slots).
    pub max_batch_size: usize,
    /// Width of each logits row.
    pub vocab_size: usize,
    /// Row length of the per-slot output id buffer.
    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,
}

impl LayerConfig {
    pub fn new(max_batch_size: usize, vocab_size: usize) -> Self {
        Self {
            max_batch_size,
            vocab_size,
            max_seq_len: default_max_seq_len(),
        }
    }

    pub fn with_max_seq_len(mut self, max_seq_len: usize) -> Self {
        self.max_seq_len = max_seq_len;
        self
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: LayerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig("max_batch_size must be > 0".into()));
        }
        if self.vocab_size == 0 {
            return Err(Error::InvalidConfig("vocab_size must be > 0".into()));
        }
        if self.max_seq_len == 0 {
            return Err(Error::InvalidConfig("max_seq_len must be > 0".into()));
        }
        if i32::try_from(self.max_seq_len).is_err() {
            return Err(Error::InvalidConfig(format!(
                "max_seq_len {} does not fit sequence length counters",
                self.max_seq_len
            )));
        }
        Ok(())
    }
}
