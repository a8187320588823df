use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// A box constraint `min <= u[index] <= max` on one scalar component of the
/// control-and-constraints vector, reformulated by the solver as an equality
/// via a dummy variable. `weight` is the cost placed on the dummy variable
/// and must be positive so the dummy stays away from zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlInputSaturation {
    pub index: usize,
    pub min: f64,
    pub max: f64,
    pub weight: f64,
}

impl ControlInputSaturation {
    /// Midpoint of the admissible interval.
    pub fn mid(&self) -> f64 {
        0.5 * (self.min + self.max)
    }

    /// Half the width of the admissible interval.
    pub fn half_range(&self) -> f64 {
        0.5 * (self.max - self.min)
    }
}

/// The ordered list of saturations enforced by the solver. Immutable once
/// handed to a controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaturationList {
    entries: Vec<ControlInputSaturation>,
}

impl SaturationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a saturation after validating its bounds and weight.
    pub fn append(&mut self, index: usize, min: f64, max: f64, weight: f64) -> Result<()> {
        if !(min < max) {
            bail!("Saturation bounds must satisfy min < max (got [{min}, {max}]).");
        }
        if !(weight > 0.0) {
            bail!("Saturation weight must be positive (got {weight}).");
        }
        self.entries.push(ControlInputSaturation {
            index,
            min,
            max,
            weight,
        });
        Ok(())
    }

    /// Number of saturated components.
    pub fn dim_saturation(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ControlInputSaturation] {
        &self.entries
    }

    pub fn index(&self, j: usize) -> usize {
        self.entries[j].index
    }

    pub fn min(&self, j: usize) -> f64 {
        self.entries[j].min
    }

    pub fn max(&self, j: usize) -> f64 {
        self.entries[j].max
    }

    pub fn weight(&self, j: usize) -> f64 {
        self.entries[j].weight
    }

    /// Largest referenced component index, used for dimension validation.
    pub fn max_index(&self) -> Option<usize> {
        self.entries.iter().map(|s| s.index).max()
    }
}
