//! The top-K sampling layer instance.
//!
//! Two phases share one persistent per-slot table:
//! - `setup()` (see `setup.rs`) resolves request parameters into the table;
//! - `forward()` (see `dispatch.rs`) decides whether the kernel runs this step
//!   and, if so, launches it once for the whole batch.

use log::info;

use crate::config::LayerConfig;
use crate::error::Result;
use crate::kernel;
use crate::params::{SlotParameters, TOP_K_MAX};
use crate::parameter_table::{HostSkipMirror, ParameterTable};
use crate::tensor::Accelerator;

pub struct TopKSamplingLayer<A: Accelerator> {
    pub(crate) device: A,
    pub(crate) config: LayerConfig,
    pub(crate) table: ParameterTable<A>,
    /// Largest `top_k` ever resolved by this instance. Only grows.
    pub(crate) runtime_max_top_k: i32,
    pub(crate) normalize_log_probs: bool,
}

impl<A: Accelerator> TopKSamplingLayer<A> {
    pub fn new(device: A, config: LayerConfig) -> Result<Self> {
        config.validate()?;
        let table = ParameterTable::new(&device, config.max_batch_size)?;
        info!(
            "TopK sampling layer on {}: max_batch_size={}, vocab_size={}, workspace_bytes={}",
            device.name(),
            config.max_batch_size,
            config.vocab_size,
            kernel::workspace_size(config.max_batch_size, config.vocab_size, TOP_K_MAX as usize)
        );
        Ok(Self {
            device,
            config,
            table,
            runtime_max_top_k: 0,
            normalize_log_probs: false,
        })
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn device(&self) -> &A {
        &self.device
    }

    pub fn runtime_max_top_k(&self) -> i32 {
        self.runtime_max_top_k
    }

    pub fn normalize_log_probs(&self) -> bool {
        self.normalize_log_probs
    }

    pub fn skip_mirror(&self) -> &HostSkipMirror {
        self.table.skip_mirror()
    }

    /// Synchronous copy of every slot's resolved parameters.
    pub fn slot_parameters(&self) -> Result<Vec<SlotParameters>> {
        self.table.snapshot(&self.device)
    }

    /// Scratch bytes a forward call's workspace must provide.
    pub fn workspace_size(&self) -> usize {
        kernel::workspace_size(
            self.config.max_batch_size,
            self.config.vocab_size,
            TOP_K_MAX as usize,
        )
    }
}
