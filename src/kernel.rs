//! Contract between the layer and the batched top-K sampling kernel.
//!
//! The layer decides *whether* to sample and with which per-slot bounds; the
//! kernel decides *how*. Per-slot buffers (`top_ks`, `top_ps`, `skip_decode`,
//! `end_ids`, RNG states, sequence lengths, finished flags, log-probs) are
//! indexed by slot. `logits` rows are indexed by batch position.

use crate::error::Result;
use crate::slots::BatchSlots;
use crate::tensor::Accelerator;

/// Partial top-K blocks each sequence is split into by the kernel's first
/// stage.
pub const BLOCKS_PER_BEAM: usize = 8;

/// Alignment of every workspace region, in bytes.
pub const WORKSPACE_ALIGNMENT: usize = 256;

/// Everything one kernel launch reads and writes.
pub struct TopKKernelParams<'a, A: Accelerator> {
    /// `[batch_size, vocab_size]` logits (or probabilities).
    pub logits: &'a A::Buffer<f32>,
    /// `logits` already hold probabilities, no softmax needed.
    pub logits_has_probs: bool,
    pub end_ids: &'a A::Buffer<i32>,
    pub batch_slots: BatchSlots<'a>,

    pub top_ks: &'a A::Buffer<i32>,
    pub top_ps: &'a A::Buffer<f32>,
    /// Watermark of every `top_k` the layer has resolved; bounds scratch use.
    pub max_top_k: i32,
    pub max_top_p: f32,
    pub skip_decode: &'a A::Buffer<bool>,

    pub rng_states: &'a mut A::Buffer<u64>,
    pub workspace: &'a mut A::Buffer<u8>,

    /// `[max_batch_size, max_seq_len]`, row per slot.
    pub output_ids: &'a mut A::Buffer<i32>,
    pub sequence_lengths: &'a mut A::Buffer<i32>,
    pub finished_input: Option<&'a A::Buffer<bool>>,
    pub finished_output: Option<&'a mut A::Buffer<bool>>,
    pub cum_log_probs: Option<&'a mut A::Buffer<f32>>,
    pub output_log_probs: Option<&'a mut A::Buffer<f32>>,
    pub normalize_log_probs: bool,

    pub batch_size: usize,
    pub max_batch_size: usize,
    pub vocab_size: usize,
    pub max_seq_len: usize,
}

/// Batched top-K/top-P token sampler.
///
/// Implementations must leave every slot with `skip_decode[slot] == true`
/// byte-for-byte unmodified, and write at most one token per other slot.
pub trait SamplingKernel<A: Accelerator> {
    fn sample(&mut self, device: &A, params: TopKKernelParams<'_, A>) -> Result<()>;
}

fn align_up(bytes: usize) -> usize {
    bytes.div_ceil(WORKSPACE_ALIGNMENT) * WORKSPACE_ALIGNMENT
}

/// Worst-case scratch bytes for a kernel sampling `max_batch_size` rows of
/// `vocab_size` with `max_top_k` candidates per row.
pub fn workspace_size(max_batch_size: usize, vocab_size: usize, max_top_k: usize) -> usize {
    let temp_log_probs = std::mem::size_of::<f32>() * max_batch_size * vocab_size;
    let topk_tmp_ids =
        std::mem::size_of::<i32>() * max_batch_size * max_top_k * BLOCKS_PER_BEAM;
    let topk_tmp_vals =
        std::mem::size_of::<f32>() * max_batch_size * max_top_k * BLOCKS_PER_BEAM;
    [temp_log_probs, topk_tmp_ids, topk_tmp_vals]
        .into_iter()
        .map(align_up)
        .sum()
}
