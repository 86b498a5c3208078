//! Accelerator abstraction and the host (CPU) device.
//!
//! One `Accelerator` value owns exactly one ordered execution stream. Every
//! operation issued through it runs in issue order, so callers never need to
//! synchronize between two calls on the same layer.

use std::fmt::Debug;

use crate::error::{Error, Result};

/// Element types that may live in a device buffer.
#[cfg(not(feature = "cuda"))]
pub trait SlotElement: Copy + PartialEq + Debug + Send + Sync + 'static {}

/// Element types that may live in a device buffer.
#[cfg(feature = "cuda")]
pub trait SlotElement:
    Copy + PartialEq + Debug + Send + Sync + 'static + cudarc::driver::DeviceRepr
{
}

macro_rules! slot_element {
    ($($t:ty),*) => { $(impl SlotElement for $t {})* };
}

slot_element!(bool, u8, i32, u32, u64, f32);

/// A compute device driven through a single ordered stream.
///
/// `write_at` only enqueues work. `download` is a synchronous read-back and
/// is the only place a caller should expect to block.
pub trait Accelerator {
    /// Device-resident buffer of `T`.
    type Buffer<T: SlotElement>;

    /// Short device name for logs.
    fn name(&self) -> &str;

    /// Allocate `len` elements, all set to `value`.
    fn alloc_filled<T: SlotElement>(&self, len: usize, value: T) -> Result<Self::Buffer<T>>;

    /// Allocate a buffer holding a copy of `host`.
    fn upload<T: SlotElement>(&self, host: &[T]) -> Result<Self::Buffer<T>>;

    /// Enqueue a single-element write at `index`.
    fn write_at<T: SlotElement>(
        &self,
        buf: &mut Self::Buffer<T>,
        index: usize,
        value: T,
    ) -> Result<()>;

    /// Copy the whole buffer back to the host, waiting for pending work.
    fn download<T: SlotElement>(&self, buf: &Self::Buffer<T>) -> Result<Vec<T>>;

    /// Number of elements in `buf`.
    fn buffer_len<T: SlotElement>(&self, buf: &Self::Buffer<T>) -> usize;

    /// Block until all enqueued work has finished.
    fn synchronize(&self) -> Result<()>;
}

/// CPU device: buffers are plain vectors and every operation completes
/// before it returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostDevice;

impl HostDevice {
    pub fn new() -> Self {
        Self
    }
}

impl Accelerator for HostDevice {
    type Buffer<T: SlotElement> = Vec<T>;

    fn name(&self) -> &str {
        "host"
    }

    fn alloc_filled<T: SlotElement>(&self, len: usize, value: T) -> Result<Vec<T>> {
        Ok(vec![value; len])
    }

    fn upload<T: SlotElement>(&self, host: &[T]) -> Result<Vec<T>> {
        Ok(host.to_vec())
    }

    fn write_at<T: SlotElement>(&self, buf: &mut Vec<T>, index: usize, value: T) -> Result<()> {
        let len = buf.len();
        let slot = buf.get_mut(index).ok_or_else(|| {
            Error::Device(format!("write at {} out of bounds (len {})", index, len))
        })?;
        *slot = value;
        Ok(())
    }

    fn download<T: SlotElement>(&self, buf: &Vec<T>) -> Result<Vec<T>> {
        Ok(buf.clone())
    }

    fn buffer_len<T: SlotElement>(&self, buf: &Vec<T>) -> usize {
        buf.len()
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}
