//! CPU reference kernel: batched top-k + top-p sampling on the host.
//!
//! Per slot: softmax → top-k truncate → top-p truncate (relative to the
//! top-k mass) → multinomial draw with the slot's RNG state.

use fastrace::local::LocalSpan;
use rand::rngs::StdRng;
use rand::{Rng, RngExt, SeedableRng};

use crate::error::{Error, Result};
use crate::kernel::{SamplingKernel, TopKKernelParams};
use crate::tensor::HostDevice;

/// One independent RNG state per slot, derived from `seed`.
pub fn init_rng_states(seed: u64, len: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.next_u64()).collect()
}

/// Host implementation of the batched top-K kernel contract.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostTopKSampler;

impl HostTopKSampler {
    pub fn new() -> Self {
        Self
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut probs: Vec<f32> = logits.iter().map(|&l| (l - max_logit).exp()).collect();
    let sum: f32 = probs.iter().sum();
    for p in &mut probs {
        *p /= sum;
    }
    probs
}

/// The `k` most probable `(token, prob)` pairs, descending; ties keep the
/// lower token id first.
fn top_k_candidates(probs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let by_prob = |a: &(u32, f32), b: &(u32, f32)| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0));
    let mut candidates: Vec<(u32, f32)> = probs
        .iter()
        .enumerate()
        .map(|(i, &p)| (i as u32, p))
        .collect();
    if k < candidates.len() {
        candidates.select_nth_unstable_by(k - 1, by_prob);
        candidates.truncate(k);
    }
    candidates.sort_unstable_by(by_prob);
    candidates
}

/// Length of the shortest prefix whose cumulative mass reaches `threshold`.
fn top_p_cutoff(candidates: &[(u32, f32)], threshold: f32) -> usize {
    let mut cumsum = 0.0f32;
    for (i, &(_, p)) in candidates.iter().enumerate() {
        cumsum += p;
        if cumsum >= threshold {
            return i + 1;
        }
    }
    candidates.len()
}

/// Draw from `nucleus` renormalized, advancing `state`.
fn draw(nucleus: &[(u32, f32)], state: &mut u64) -> (u32, f32) {
    let mut rng = StdRng::seed_from_u64(*state);
    let r: f32 = rng.random();
    *state = rng.next_u64();

    let mass: f32 = nucleus.iter().map(|&(_, p)| p).sum();
    let mut cumsum = 0.0f32;
    for &(token, p) in nucleus {
        cumsum += p / mass;
        if r < cumsum {
            return (token, p);
        }
    }
    // Rounding left r above the last cumulative value.
    nucleus[nucleus.len() - 1]
}

impl SamplingKernel<HostDevice> for HostTopKSampler {
    fn sample(&mut self, _device: &HostDevice, params: TopKKernelParams<'_, HostDevice>) -> Result<()> {
        let TopKKernelParams {
            logits,
            logits_has_probs,
            end_ids,
            batch_slots,
            top_ks,
            top_ps,
            max_top_k,
            max_top_p,
            skip_decode,
            rng_states,
            workspace: _,
            output_ids,
            sequence_lengths,
            finished_input,
            mut finished_output,
            mut cum_log_probs,
            mut output_log_probs,
            normalize_log_probs,
            batch_size,
            max_batch_size: _,
            vocab_size,
            max_seq_len,
        } = params;

        let _span = LocalSpan::enter_with_local_parent("host_topk_sample")
            .with_property(|| ("batch_size", batch_size.to_string()));

        if logits.len() < batch_size * vocab_size {
            return Err(Error::Kernel(format!(
                "logits hold {} values, need {} x {}",
                logits.len(),
                batch_size,
                vocab_size
            )));
        }

        // Slot-indexed buffers must cover every slot of the batch.
        let mut slot_buffers: Vec<(&str, usize)> = vec![
            ("top_ks", top_ks.len()),
            ("top_ps", top_ps.len()),
            ("skip_decode", skip_decode.len()),
            ("end_ids", end_ids.len()),
            ("rng_states", rng_states.len()),
            ("sequence_lengths", sequence_lengths.len()),
            ("output_ids rows", output_ids.len() / max_seq_len.max(1)),
        ];
        let optional = [
            ("finished_input", finished_input.map(|f| f.len())),
            ("finished_output", finished_output.as_deref().map(|f| f.len())),
            ("cum_log_probs", cum_log_probs.as_deref().map(|c| c.len())),
            ("output_log_probs", output_log_probs.as_deref().map(|o| o.len())),
        ];
        slot_buffers.extend(
            optional
                .into_iter()
                .filter_map(|(name, len)| len.map(|len| (name, len))),
        );

        let is_finished = |slot: usize| finished_input.is_some_and(|f| f[slot]);

        // Check every buffer and row we are about to touch before writing.
        for (_, slot) in batch_slots.iter(batch_size) {
            if let Some(&(name, len)) = slot_buffers.iter().find(|&&(_, len)| slot >= len) {
                return Err(Error::Kernel(format!(
                    "{} covers {} slots, batch uses slot {}",
                    name, len, slot
                )));
            }
            if skip_decode[slot] || is_finished(slot) {
                continue;
            }
            let seq_len = sequence_lengths[slot];
            if seq_len < 0 || seq_len as usize >= max_seq_len {
                return Err(Error::Kernel(format!(
                    "slot {} sequence length {} outside output row of {}",
                    slot, seq_len, max_seq_len
                )));
            }
        }

        for (bi, slot) in batch_slots.iter(batch_size) {
            if skip_decode[slot] {
                continue;
            }
            if is_finished(slot) {
                if let Some(out) = finished_output.as_deref_mut() {
                    out[slot] = true;
                }
                continue;
            }

            let row = &logits[bi * vocab_size..(bi + 1) * vocab_size];
            let probs = if logits_has_probs {
                row.to_vec()
            } else {
                softmax(row)
            };

            let k = top_ks[slot].clamp(1, max_top_k.max(1)) as usize;
            let candidates = top_k_candidates(&probs, k.min(vocab_size));
            let top_k_mass: f32 = candidates.iter().map(|&(_, p)| p).sum();
            let top_p = top_ps[slot].min(max_top_p);
            let cutoff = top_p_cutoff(&candidates, top_p * top_k_mass);

            let (token, prob) = draw(&candidates[..cutoff], &mut rng_states[slot]);

            let seq_len = sequence_lengths[slot] as usize;
            output_ids[slot * max_seq_len + seq_len] = token as i32;

            let log_prob = if normalize_log_probs {
                (prob / top_k_mass).ln()
            } else {
                prob.ln()
            };
            if let Some(cum) = cum_log_probs.as_deref_mut() {
                cum[slot] += log_prob;
            }
            if let Some(out) = output_log_probs.as_deref_mut() {
                out[slot] = log_prob;
            }

            if token as i32 == end_ids[slot] {
                // EOS is recorded but never counted in the sequence length.
                if let Some(out) = finished_output.as_deref_mut() {
                    out[slot] = true;
                }
            } else {
                sequence_lengths[slot] += 1;
            }
        }

        Ok(())
    }
}
