//! Pre-allocated per-slot parameter storage.

use crate::error::Result;
use crate::params::{DEFAULT_TOP_K, DEFAULT_TOP_P, SlotParameters};
use crate::slots::BatchSlots;
use crate::tensor::Accelerator;

/// Host copy of the `skip` column, read by the forward fast path so the
/// per-step decision needs no device round-trip.
#[derive(Clone, Debug)]
pub struct HostSkipMirror {
    flags: Vec<bool>,
}

impl HostSkipMirror {
    fn new(max_batch_size: usize) -> Self {
        Self {
            flags: vec![true; max_batch_size],
        }
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.flags
    }

    /// True when every slot of the batch is skipped.
    pub fn all_skipped(&self, batch_slots: BatchSlots<'_>, batch_size: usize) -> bool {
        batch_slots.all_of(&self.flags, batch_size, &true)
    }
}

/// Device-resident per-slot `top_k`, `top_p` and `skip`, sized once for the
/// largest batch the layer was built for. Entries are never freed, only
/// overwritten by the next setup that covers their slot.
pub struct ParameterTable<A: Accelerator> {
    pub top_ks: A::Buffer<i32>,
    pub top_ps: A::Buffer<f32>,
    pub skip_decode: A::Buffer<bool>,
    skip_mirror: HostSkipMirror,
    max_batch_size: usize,
}

impl<A: Accelerator> ParameterTable<A> {
    pub fn new(device: &A, max_batch_size: usize) -> Result<Self> {
        Ok(Self {
            top_ks: device.alloc_filled(max_batch_size, DEFAULT_TOP_K)?,
            top_ps: device.alloc_filled(max_batch_size, DEFAULT_TOP_P)?,
            skip_decode: device.alloc_filled(max_batch_size, true)?,
            skip_mirror: HostSkipMirror::new(max_batch_size),
            max_batch_size,
        })
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Enqueue the writes for one slot.
    pub fn write_slot(&mut self, device: &A, slot: usize, params: SlotParameters) -> Result<()> {
        device.write_at(&mut self.top_ks, slot, params.top_k)?;
        device.write_at(&mut self.top_ps, slot, params.top_p)?;
        device.write_at(&mut self.skip_decode, slot, params.skip)?;
        Ok(())
    }

    /// Re-read the device `skip` column into the host mirror.
    #[fastrace::trace(name = "refresh_skip_mirror")]
    pub fn refresh_skip_mirror(&mut self, device: &A) -> Result<()> {
        self.skip_mirror.flags = device.download(&self.skip_decode)?;
        Ok(())
    }

    pub fn skip_mirror(&self) -> &HostSkipMirror {
        &self.skip_mirror
    }

    /// Synchronous read-back of the `top_k` column.
    pub fn read_top_ks(&self, device: &A) -> Result<Vec<i32>> {
        device.download(&self.top_ks)
    }

    /// Synchronous snapshot of every slot.
    pub fn snapshot(&self, device: &A) -> Result<Vec<SlotParameters>> {
        let top_ks = device.download(&self.top_ks)?;
        let top_ps = device.download(&self.top_ps)?;
        let skips = device.download(&self.skip_decode)?;
        Ok(top_ks
            .into_iter()
            .zip(top_ps)
            .zip(skips)
            .map(|((top_k, top_p), skip)| SlotParameters { top_k, top_p, skip })
            .collect())
    }
}
