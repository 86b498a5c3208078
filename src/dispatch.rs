//! Forward phase: skip the kernel when no active slot needs it, otherwise
//! launch it once for the whole batch.

use fastrace::local::LocalSpan;
use log::debug;

use crate::error::{Error, Result};
use crate::kernel::{SamplingKernel, TopKKernelParams};
use crate::layer::TopKSamplingLayer;
use crate::params::MAX_TOP_P;
use crate::slots::BatchSlots;
use crate::tensor::Accelerator;

/// Buffers the decode driver lends to one forward call.
pub struct ForwardInputs<'a, A: Accelerator> {
    /// Number of active sequences this step.
    pub batch_size: usize,
    /// `[batch_size, vocab_size]`, row per batch position.
    pub logits: &'a A::Buffer<f32>,
    pub logits_has_probs: bool,
    /// End-of-sequence token per slot.
    pub end_ids: &'a A::Buffer<i32>,
    pub batch_slots: BatchSlots<'a>,
    /// RNG state per slot. Required whenever the kernel runs.
    pub rng_states: Option<&'a mut A::Buffer<u64>>,
    pub finished: Option<&'a A::Buffer<bool>>,
}

/// Buffers a forward call may write.
pub struct ForwardOutputs<'a, A: Accelerator> {
    /// `[max_batch_size, max_seq_len]`, row per slot.
    pub output_ids: &'a mut A::Buffer<i32>,
    pub sequence_lengths: &'a mut A::Buffer<i32>,
    pub finished: Option<&'a mut A::Buffer<bool>>,
    pub cum_log_probs: Option<&'a mut A::Buffer<f32>>,
    pub output_log_probs: Option<&'a mut A::Buffer<f32>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every active slot is skipped; nothing was launched or written.
    Skipped,
    /// One kernel launch was enqueued.
    Launched,
}

impl<A: Accelerator> TopKSamplingLayer<A> {
    /// Sample one token for every non-skipped slot of the batch.
    ///
    /// The all-skip test reads only the host mirror. Missing RNG states or
    /// workspace are only an error when the kernel actually has to run.
    pub fn forward<K: SamplingKernel<A>>(
        &mut self,
        kernel: &mut K,
        inputs: ForwardInputs<'_, A>,
        outputs: ForwardOutputs<'_, A>,
        workspace: Option<&mut A::Buffer<u8>>,
    ) -> Result<DispatchOutcome> {
        let ForwardInputs {
            batch_size,
            logits,
            logits_has_probs,
            end_ids,
            batch_slots,
            rng_states,
            finished: finished_input,
        } = inputs;

        batch_slots.validate(batch_size, self.config.max_batch_size)?;

        if self.table.skip_mirror().all_skipped(batch_slots, batch_size) {
            debug!("TopK forward skipped: all {} active slots skip", batch_size);
            return Ok(DispatchOutcome::Skipped);
        }

        let rng_states = rng_states.ok_or(Error::MissingRngStates)?;
        let workspace = workspace.ok_or(Error::MissingWorkspace)?;
        let required = self.workspace_size();
        let available = self.device.buffer_len(workspace);
        if available < required {
            return Err(Error::WorkspaceTooSmall {
                got: available,
                required,
            });
        }

        let _span = LocalSpan::enter_with_local_parent("topk_dispatch").with_properties(|| {
            [
                ("batch_size", batch_size.to_string()),
                ("max_top_k", self.runtime_max_top_k.to_string()),
            ]
        });

        let params = TopKKernelParams {
            logits,
            logits_has_probs,
            end_ids,
            batch_slots,
            top_ks: &self.table.top_ks,
            top_ps: &self.table.top_ps,
            max_top_k: self.runtime_max_top_k,
            max_top_p: MAX_TOP_P,
            skip_decode: &self.table.skip_decode,
            rng_states,
            workspace,
            output_ids: outputs.output_ids,
            sequence_lengths: outputs.sequence_lengths,
            finished_input,
            finished_output: outputs.finished,
            cum_log_probs: outputs.cum_log_probs,
            output_log_probs: outputs.output_log_probs,
            normalize_log_probs: self.normalize_log_probs,
            batch_size,
            max_batch_size: self.config.max_batch_size,
            vocab_size: self.config.vocab_size,
            max_seq_len: self.config.max_seq_len,
        };

        kernel.sample(&self.device, params)?;
        Ok(DispatchOutcome::Launched)
    }
}
