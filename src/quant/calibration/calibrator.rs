//! Encoding analyzer
//!
//! Accumulates statistics over any number of batches and turns them into an
//! [`Encoding`] once. After [`EncodingAnalyzer::compute`] the statistics are
//! frozen until [`EncodingAnalyzer::reset`].

use tracing::debug;

use super::histogram::{finite_range, Histogram, DEFAULT_NUM_BINS};
use super::search::search_range;
use super::types::{QuantScheme, DEFAULT_PERCENTILE};
use crate::error::{Error, Result};
use crate::quant::encoding::{Encoding, EncodingSettings};

/// Statistics collector for one tensor (or one channel of a tensor)
#[derive(Clone, Debug)]
pub struct EncodingAnalyzer {
    scheme: QuantScheme,
    /// Clipping percentile for the percentile scheme
    percentile: f32,
    running_min: Option<f32>,
    running_max: Option<f32>,
    /// Value histogram (histogram-based schemes only)
    histogram: Option<Histogram>,
    num_batches: usize,
    frozen: bool,
}

impl EncodingAnalyzer {
    pub fn new(scheme: QuantScheme) -> Self {
        Self {
            scheme,
            percentile: DEFAULT_PERCENTILE,
            running_min: None,
            running_max: None,
            histogram: None,
            num_batches: 0,
            frozen: false,
        }
    }

    /// Min-max analyzer
    pub fn min_max() -> Self {
        Self::new(QuantScheme::PostTrainingTf)
    }

    /// Histogram search analyzer
    pub fn tf_enhanced() -> Self {
        Self::new(QuantScheme::PostTrainingTfEnhanced)
    }

    /// Percentile analyzer keeping `percentile` percent of the mass (50..=100)
    pub fn percentile(percentile: f32) -> Self {
        Self::new(QuantScheme::PostTrainingPercentile).with_percentile(percentile)
    }

    pub fn with_percentile(mut self, percentile: f32) -> Self {
        self.percentile = percentile.clamp(50.0, 100.0);
        self
    }

    /// Fold a batch into the statistics; non-finite values are ignored
    pub fn update(&mut self, data: &[f32]) {
        if self.frozen {
            debug!(scheme = %self.scheme, "analyzer is frozen, ignoring batch");
            return;
        }
        let Some((batch_min, batch_max)) = finite_range(data) else {
            return;
        };

        self.running_min = Some(self.running_min.map_or(batch_min, |m| m.min(batch_min)));
        self.running_max = Some(self.running_max.map_or(batch_max, |m| m.max(batch_max)));

        if self.scheme.uses_histogram() {
            match self.histogram.as_mut() {
                Some(hist) => hist.add(data),
                None => self.histogram = Histogram::from_values(data, DEFAULT_NUM_BINS),
            }
        }
        self.num_batches += 1;
    }

    /// Derive the encoding and freeze the statistics
    pub fn compute(&mut self, settings: EncodingSettings) -> Result<Encoding> {
        let (Some(min), Some(max)) = (self.running_min, self.running_max) else {
            return Err(Error::NotCalibrated);
        };

        let (lo, hi) = match (self.scheme, self.histogram.as_ref()) {
            (QuantScheme::PostTrainingTfEnhanced, Some(hist)) => search_range(hist, settings),
            (QuantScheme::PostTrainingPercentile, Some(hist)) => {
                let lower = hist.percentile(100.0 - self.percentile);
                let upper = hist.percentile(self.percentile);
                (lower.max(min), upper.min(max))
            }
            _ => (min, max),
        };

        self.frozen = true;
        Ok(Encoding::from_range(lo, hi, settings))
    }

    /// Observed `(min, max)` over all batches
    pub fn observed_range(&self) -> Option<(f32, f32)> {
        self.running_min.zip(self.running_max)
    }

    pub fn scheme(&self) -> QuantScheme {
        self.scheme
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    pub fn has_data(&self) -> bool {
        self.num_batches > 0
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Drop all statistics and unfreeze
    pub fn reset(&mut self) {
        self.running_min = None;
        self.running_max = None;
        self.histogram = None;
        self.num_batches = 0;
        self.frozen = false;
    }
}
