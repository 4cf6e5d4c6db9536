//! Ring-buffer sample store with crash-aware persistence.
//!
//! The dataset is a fixed-capacity circular buffer of (landmark features,
//! gaze target) pairs: once full, the oldest frame is overwritten. Capacity
//! is deliberately small so training tracks changing poses and lighting.
//!
//! Persistence is a single JSON write of `{capacity, cursor, full, slots}`
//! with empty slots as explicit nulls. Loading merges a stored dataset into
//! the current one with a three-way capacity-migration policy (see
//! [`RingBufferDataset::load`]); a missing or corrupt file is logged and
//! leaves the dataset untouched.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GazeError, Result};

/// A single labeled frame. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Flattened landmark features
    pub features: Vec<f32>,
    /// Normalized screen coordinates, -1..1 with origin at screen center
    pub target: [f32; 2],
}

/// On-disk form of the dataset.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDataset {
    capacity: usize,
    cursor: usize,
    full: bool,
    slots: Vec<Option<Sample>>,
}

/// Fixed-capacity circular store of labeled samples.
#[derive(Debug, Clone)]
pub struct RingBufferDataset {
    capacity: usize,
    cursor: usize,
    full: bool,
    feature_len: usize,
    slots: Vec<Option<Sample>>,
}

impl RingBufferDataset {
    /// Create an empty dataset.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `capacity` is zero.
    pub fn new(capacity: usize, feature_len: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(GazeError::config("dataset capacity must be positive"));
        }
        if feature_len == 0 {
            return Err(GazeError::config("feature length must be positive"));
        }
        Ok(Self {
            capacity,
            cursor: 0,
            full: false,
            feature_len,
            slots: vec![None; capacity],
        })
    }

    /// Number of retained samples: `capacity` once full, `cursor` before.
    pub fn len(&self) -> usize {
        if self.full {
            self.capacity
        } else {
            self.cursor
        }
    }

    /// Whether no samples are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Next write position.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether the buffer has wrapped at least once.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Expected flattened feature length per sample.
    pub fn feature_len(&self) -> usize {
        self.feature_len
    }

    /// Append a sample at the cursor, overwriting the oldest entry once full.
    ///
    /// O(1). The cursor wraps to 0 and sets `full` exactly when it would
    /// reach `capacity`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the feature shape does not match the
    /// dataset's established shape; no state is mutated in that case.
    pub fn add_item(&mut self, features: Vec<f32>, target: [f32; 2]) -> Result<()> {
        if features.len() != self.feature_len {
            return Err(GazeError::validation(
                format!("{} features", self.feature_len),
                format!("{} features", features.len()),
            ));
        }
        self.slots[self.cursor] = Some(Sample { features, target });
        self.cursor += 1;
        if self.cursor == self.capacity {
            self.cursor = 0;
            self.full = true;
        }
        Ok(())
    }

    /// Get the sample stored at `index` (slot order).
    ///
    /// # Errors
    ///
    /// Returns a data error if the slot is empty or its stored shape
    /// violates the dataset invariant (defense against a torn write).
    pub fn get(&self, index: usize) -> Result<&Sample> {
        if index >= self.len() {
            return Err(GazeError::data(format!(
                "index {index} out of range for dataset of {}",
                self.len()
            )));
        }
        let sample = self.slots[index]
            .as_ref()
            .ok_or_else(|| GazeError::data(format!("slot {index} is empty")))?;
        if sample.features.len() != self.feature_len {
            return Err(GazeError::data(format!(
                "slot {index} holds {} features, expected {}",
                sample.features.len(),
                self.feature_len
            )));
        }
        Ok(sample)
    }

    /// Iterate retained samples in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.slots.iter().take(self.len()).filter_map(Option::as_ref)
    }

    /// Drop all samples, keeping capacity and feature shape.
    pub fn clear(&mut self) {
        self.cursor = 0;
        self.full = false;
        self.slots = vec![None; self.capacity];
    }

    /// Serialize the whole dataset in one operation.
    ///
    /// # Errors
    ///
    /// Propagates I/O and serialization failures; this call is rare and
    /// caller-supervised. The write is not atomic with respect to a process
    /// crash mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = StoredDataset {
            capacity: self.capacity,
            cursor: self.cursor,
            full: self.full,
            slots: self.slots.clone(),
        };
        let text = serde_json::to_string(&stored)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Merge a persisted dataset into this one.
    ///
    /// Three cases, keyed on how the current capacity compares to the stored
    /// one:
    ///
    /// 1. current ≤ stored and `expand_to_fit`: the stored dataset replaces
    ///    this one wholesale (capacity becomes the stored capacity,
    ///    cursor/full copied verbatim).
    /// 2. current ≤ stored, not `expand_to_fit`: the stored backing array is
    ///    truncated to the current capacity; if entries were actually
    ///    dropped, `full = true` and `cursor = stored_cursor % capacity`,
    ///    otherwise cursor/full are copied unchanged.
    /// 3. stored < current: the stored slots fill the front of the buffer,
    ///    `cursor = stored_capacity`, `full = false`.
    ///
    /// A missing file, parse failure, or invariant violation in the stored
    /// data is logged as a warning and leaves the dataset in its prior
    /// state; this method never fails.
    pub fn load(&mut self, path: impl AsRef<Path>, expand_to_fit: bool) {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("dataset {} not loaded: {err}", path.display());
                return;
            }
        };
        let stored: StoredDataset = match serde_json::from_str(&text) {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!("dataset {} is corrupt: {err}", path.display());
                return;
            }
        };
        if let Err(err) = self.check_stored(&stored) {
            tracing::warn!("dataset {} rejected: {err}", path.display());
            return;
        }

        if self.capacity <= stored.capacity {
            if expand_to_fit {
                self.capacity = stored.capacity;
                self.slots = stored.slots;
                self.cursor = stored.cursor;
                self.full = stored.full;
            } else {
                let truncated = stored.capacity > self.capacity;
                self.slots = stored.slots.into_iter().take(self.capacity).collect();
                self.full = if truncated { true } else { stored.full };
                self.cursor = if truncated {
                    stored.cursor % self.capacity
                } else {
                    stored.cursor
                };
            }
        } else {
            for (slot, stored_slot) in self.slots.iter_mut().zip(stored.slots) {
                *slot = stored_slot;
            }
            self.cursor = stored.capacity;
            self.full = false;
        }
        tracing::info!(
            "loaded dataset {}: capacity {}, full {}, cursor {}, len {}",
            path.display(),
            self.capacity,
            self.full,
            self.cursor,
            self.len()
        );
    }

    /// Validate a deserialized dataset against structural invariants and the
    /// established feature shape.
    fn check_stored(&self, stored: &StoredDataset) -> Result<()> {
        if stored.capacity == 0 {
            return Err(GazeError::data("stored capacity is zero"));
        }
        if stored.slots.len() != stored.capacity {
            return Err(GazeError::data(format!(
                "stored backing array has {} slots, capacity {}",
                stored.slots.len(),
                stored.capacity
            )));
        }
        if stored.cursor >= stored.capacity {
            return Err(GazeError::data(format!(
                "stored cursor {} out of range for capacity {}",
                stored.cursor, stored.capacity
            )));
        }
        for (i, slot) in stored.slots.iter().enumerate() {
            if let Some(sample) = slot {
                if sample.features.len() != self.feature_len {
                    return Err(GazeError::data(format!(
                        "stored slot {i} holds {} features, expected {}",
                        sample.features.len(),
                        self.feature_len
                    )));
                }
            }
        }
        Ok(())
    }
}
