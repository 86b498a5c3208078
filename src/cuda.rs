//! CUDA device: one context, one stream, `CudaSlice` buffers.

use std::sync::Arc;

use cudarc::driver::{CudaContext, CudaSlice, CudaStream};

use crate::error::{Error, Result};
use crate::tensor::{Accelerator, SlotElement};

/// CUDA device holding the context and the single stream all layer work
/// is issued on.
pub struct CudaDevice {
    pub ctx: Arc<CudaContext>,
    pub stream: Arc<CudaStream>,
}

impl CudaDevice {
    pub fn new(ordinal: usize) -> Result<Self> {
        let ctx = CudaContext::new(ordinal)
            .map_err(|e| Error::Device(format!("Failed to create CUDA context: {}", e)))?;

        // Single stream: no cross-stream events needed.
        // SAFETY: every buffer of this device is only touched through `stream`.
        unsafe {
            ctx.disable_event_tracking();
        }

        let stream = ctx
            .new_stream()
            .map_err(|e| Error::Device(format!("Failed to create CUDA stream: {}", e)))?;

        Ok(Self { ctx, stream })
    }
}

impl Accelerator for CudaDevice {
    type Buffer<T: SlotElement> = CudaSlice<T>;

    fn name(&self) -> &str {
        "cuda"
    }

    fn alloc_filled<T: SlotElement>(&self, len: usize, value: T) -> Result<CudaSlice<T>> {
        self.upload(&vec![value; len])
    }

    fn upload<T: SlotElement>(&self, host: &[T]) -> Result<CudaSlice<T>> {
        self.stream
            .clone_htod(host)
            .map_err(|e| Error::Device(format!("H2D copy failed: {}", e)))
    }

    fn write_at<T: SlotElement>(
        &self,
        buf: &mut CudaSlice<T>,
        index: usize,
        value: T,
    ) -> Result<()> {
        if index >= buf.len() {
            return Err(Error::Device(format!(
                "write at {} out of bounds (len {})",
                index,
                buf.len()
            )));
        }
        let mut view = buf.slice_mut(index..index + 1);
        self.stream
            .memcpy_htod(&[value], &mut view)
            .map_err(|e| Error::Device(format!("H2D element write failed: {}", e)))
    }

    fn download<T: SlotElement>(&self, buf: &CudaSlice<T>) -> Result<Vec<T>> {
        let host = self
            .stream
            .clone_dtoh(buf)
            .map_err(|e| Error::Device(format!("D2H copy failed: {}", e)))?;
        self.synchronize()?;
        Ok(host)
    }

    fn buffer_len<T: SlotElement>(&self, buf: &CudaSlice<T>) -> usize {
        buf.len()
    }

    fn synchronize(&self) -> Result<()> {
        self.stream
            .synchronize()
            .map_err(|e| Error::Device(format!("Sync failed: {}", e)))
    }
}
