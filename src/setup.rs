//! Setup phase: resolve request parameters into the per-slot table.

use fastrace::local::LocalSpan;
use log::debug;

use crate::error::{Error, Result};
use crate::layer::TopKSamplingLayer;
use crate::params::{DEFAULT_TOP_K, DEFAULT_TOP_P, SlotParameters, clamp_top_k, clamp_top_p};
use crate::slots::{BatchSlots, PerSlot};
use crate::tensor::Accelerator;

/// Inputs of one setup call.
#[derive(Clone, Debug, Default)]
pub struct SetupParams<'a> {
    pub batch_size: usize,
    pub batch_slots: BatchSlots<'a>,
    /// `None` means `DEFAULT_TOP_K` for the whole batch.
    pub top_k: Option<PerSlot<i32>>,
    /// `None` (or empty) means `DEFAULT_TOP_P` for the whole batch.
    pub top_p: Option<PerSlot<f32>>,
    /// Renormalize log-probs in later forwards. `None` means off.
    pub normalize_log_probs: Option<bool>,
}

impl<'a> SetupParams<'a> {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }

    pub fn batch_slots(mut self, batch_slots: BatchSlots<'a>) -> Self {
        self.batch_slots = batch_slots;
        self
    }

    pub fn top_k(mut self, top_k: impl Into<PerSlot<i32>>) -> Self {
        self.top_k = Some(top_k.into());
        self
    }

    pub fn top_p(mut self, top_p: impl Into<PerSlot<f32>>) -> Self {
        self.top_p = Some(top_p.into());
        self
    }

    pub fn normalize_log_probs(mut self, normalize: bool) -> Self {
        self.normalize_log_probs = Some(normalize);
        self
    }
}

impl<A: Accelerator> TopKSamplingLayer<A> {
    /// Resolve `params` into the slots of this batch.
    ///
    /// Length and slot violations fail before anything is written.
    /// Out-of-range `top_k`/`top_p` values are clamped with a warning. Ends
    /// with two synchronous read-backs: the host skip mirror and the `top_k`
    /// column used to raise the runtime max top-K.
    pub fn setup(&mut self, params: SetupParams<'_>) -> Result<()> {
        let SetupParams {
            batch_size,
            batch_slots,
            top_k,
            top_p,
            normalize_log_probs,
        } = params;

        let _span = LocalSpan::enter_with_local_parent("topk_setup")
            .with_property(|| ("batch_size", batch_size.to_string()));

        batch_slots.validate(batch_size, self.config.max_batch_size)?;
        let normalize_log_probs = normalize_log_probs.unwrap_or(false);
        if batch_size == 0 {
            self.normalize_log_probs = normalize_log_probs;
            debug!("TopK setup with empty batch, only the normalize flag is stored");
            return Ok(());
        }

        let top_k = top_k.unwrap_or_else(|| PerSlot::broadcast(DEFAULT_TOP_K));
        if top_k.is_empty() {
            return Err(Error::LengthMismatch {
                name: "top_k",
                got: 0,
                batch_size,
            });
        }
        top_k.check_len("top_k", batch_size)?;
        let top_p = top_p.unwrap_or_else(|| PerSlot::each(Vec::new()));
        top_p.check_len("top_p", batch_size)?;

        let top_ks: Vec<i32> = top_k.as_slice().iter().copied().map(clamp_top_k).collect();
        let top_ps: Vec<f32> = top_p.as_slice().iter().copied().map(clamp_top_p).collect();

        // Broadcast values for whichever side was not given per slot.
        let default_k = top_ks.iter().copied().max().unwrap_or(DEFAULT_TOP_K);
        let default_p = top_ps.first().copied().unwrap_or(DEFAULT_TOP_P);
        let per_slot_k = top_ks.len() > 1;
        let per_slot_p = top_ps.len() > 1;

        for (bi, slot) in batch_slots.iter(batch_size) {
            let k = if per_slot_k { top_ks[bi] } else { default_k };
            let p = if per_slot_p { top_ps[bi] } else { default_p };
            let resolved = SlotParameters::resolve(k, p);
            self.table.write_slot(&self.device, slot, resolved)?;
        }

        self.table.refresh_skip_mirror(&self.device)?;

        let resolved_top_ks = self.table.read_top_ks(&self.device)?;
        let batch_max_top_k = batch_slots
            .iter(batch_size)
            .map(|(_, slot)| resolved_top_ks[slot])
            .max()
            .unwrap_or(0);
        self.runtime_max_top_k = self.runtime_max_top_k.max(batch_max_top_k);
        self.normalize_log_probs = normalize_log_probs;

        debug!(
            "TopK setup: batch_size={}, batch_max_top_k={}, runtime_max_top_k={}, normalize_log_probs={}",
            batch_size, batch_max_top_k, self.runtime_max_top_k, self.normalize_log_probs
        );
        Ok(())
    }
}
