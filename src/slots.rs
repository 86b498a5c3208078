//! Batch-index to slot indirection and broadcast-or-per-slot inputs.

use crate::error::{Error, Result};

/// Maps a position in this step's batch to the sequence's permanent slot.
///
/// `BatchSlots::identity()` means batch index == slot, which is what a
/// single-tenant driver or a test harness passes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSlots<'a>(Option<&'a [usize]>);

impl<'a> BatchSlots<'a> {
    pub fn identity() -> Self {
        Self(None)
    }

    pub fn mapped(slots: &'a [usize]) -> Self {
        Self(Some(slots))
    }

    pub fn as_slice(&self) -> Option<&'a [usize]> {
        self.0
    }

    /// Slot of `batch_index`. Callers validate the mapping first.
    pub fn slot(&self, batch_index: usize) -> usize {
        match self.0 {
            Some(slots) => slots[batch_index],
            None => batch_index,
        }
    }

    /// `(batch_index, slot)` pairs for the first `batch_size` positions.
    pub fn iter(&self, batch_size: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..batch_size).map(move |bi| (bi, self.slot(bi)))
    }

    /// Check the mapping covers `batch_size` positions, every slot fits in a
    /// table of `max_batch_size` entries, and no slot appears twice.
    pub fn validate(&self, batch_size: usize, max_batch_size: usize) -> Result<()> {
        if batch_size > max_batch_size {
            return Err(Error::BatchTooLarge {
                batch_size,
                max_batch_size,
            });
        }
        if let Some(slots) = self.0 {
            if slots.len() != batch_size {
                return Err(Error::SlotMappingLength {
                    got: slots.len(),
                    batch_size,
                });
            }
            let mut seen = vec![false; max_batch_size];
            for (batch_index, &slot) in slots.iter().enumerate() {
                if slot >= max_batch_size {
                    return Err(Error::SlotOutOfRange {
                        batch_index,
                        slot,
                        max_batch_size,
                    });
                }
                // Two positions on one slot would sample it twice per step.
                if std::mem::replace(&mut seen[slot], true) {
                    return Err(Error::DuplicateSlot { batch_index, slot });
                }
            }
        }
        Ok(())
    }

    /// True when `data[slot] == value` for every slot of the batch.
    pub fn all_of<T: PartialEq>(&self, data: &[T], batch_size: usize, value: &T) -> bool {
        self.iter(batch_size).all(|(_, slot)| data[slot] == *value)
    }
}

/// A setup value given either once for the whole batch or once per batch
/// position. Length 1 always broadcasts.
#[derive(Clone, Debug, PartialEq)]
pub struct PerSlot<T>(Vec<T>);

impl<T> PerSlot<T> {
    pub fn broadcast(value: T) -> Self {
        Self(vec![value])
    }

    pub fn each(values: Vec<T>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_per_slot(&self) -> bool {
        self.0.len() > 1
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<T> {
        self.0
    }

    /// Anything longer than one entry must match the batch exactly.
    pub fn check_len(&self, name: &'static str, batch_size: usize) -> Result<()> {
        if self.0.len() > 1 && self.0.len() != batch_size {
            return Err(Error::LengthMismatch {
                name,
                got: self.0.len(),
                batch_size,
            });
        }
        Ok(())
    }
}

impl<T> From<T> for PerSlot<T> {
    fn from(value: T) -> Self {
        Self::broadcast(value)
    }
}

impl<T> From<Vec<T>> for PerSlot<T> {
    fn from(values: Vec<T>) -> Self {
        Self::each(values)
    }
}
