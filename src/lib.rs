//! Batched top-K sampling layer for continuous-batching LLM inference.
//!
//! Every decode step, each active sequence sits at some batch position but
//! owns a permanent slot. `TopKSamplingLayer::setup` resolves per-request
//! `top_k`/`top_p` into a per-slot table; `TopKSamplingLayer::forward` skips
//! the step entirely when no active slot uses top-K, and otherwise hands one
//! `TopKKernelParams` bundle to a `SamplingKernel`.

pub mod config;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod dispatch;
pub mod error;
pub mod kernel;
pub mod layer;
pub mod logging;
pub mod parameter_table;
pub mod params;
pub mod sampler;
pub mod setup;
pub mod slots;
pub mod tensor;
pub mod trace_reporter;

pub use config::LayerConfig;
pub use dispatch::{DispatchOutcome, ForwardInputs, ForwardOutputs};
pub use error::{Error, Result};
pub use kernel::{SamplingKernel, TopKKernelParams, workspace_size};
pub use layer::TopKSamplingLayer;
pub use params::{SlotParameters, TOP_K_MAX};
pub use sampler::{HostTopKSampler, init_rng_states};
pub use setup::SetupParams;
pub use slots::{BatchSlots, PerSlot};
pub use tensor::{Accelerator, HostDevice};
