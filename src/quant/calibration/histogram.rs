//! Fixed-bin value histogram that grows its range across batches

/// Bins used by histogram-based schemes
pub const DEFAULT_NUM_BINS: usize = 512;

/// Histogram over `[min, max]` with equal-width bins
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    min: f32,
    max: f32,
    counts: Vec<f64>,
}

impl Histogram {
    /// Empty histogram over a fixed range
    pub fn new(min: f32, max: f32, num_bins: usize) -> Self {
        Self { min, max: max.max(min), counts: vec![0.0; num_bins.max(1)] }
    }

    /// Histogram of the finite values in `values`; `None` if there are none
    pub fn from_values(values: &[f32], num_bins: usize) -> Option<Self> {
        let (min, max) = finite_range(values)?;
        let mut hist = Self::new(min, max, num_bins);
        hist.insert(values);
        Some(hist)
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn num_bins(&self) -> usize {
        self.counts.len()
    }

    pub fn bin_width(&self) -> f32 {
        (self.max - self.min) / self.counts.len() as f32
    }

    /// Total number of recorded values
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// `(bin centre, count)` for every bin
    pub fn bins(&self) -> impl Iterator<Item = (f32, f64)> + '_ {
        let width = self.bin_width();
        self.counts
            .iter()
            .enumerate()
            .map(move |(i, &count)| (self.min + (i as f32 + 0.5) * width, count))
    }

    /// Record a batch, widening the range first if needed
    pub fn add(&mut self, values: &[f32]) {
        let Some((lo, hi)) = finite_range(values) else {
            return;
        };
        if lo < self.min || hi > self.max {
            *self = self.rebin(lo.min(self.min), hi.max(self.max));
        }
        self.insert(values);
    }

    /// Value below which `p` percent of the mass lies
    pub fn percentile(&self, p: f32) -> f32 {
        let total = self.total();
        if total <= 0.0 {
            return self.min;
        }
        let target = total * f64::from(p.clamp(0.0, 100.0)) / 100.0;
        let width = self.bin_width();
        let mut cumulative = 0.0;
        for (i, &count) in self.counts.iter().enumerate() {
            if count > 0.0 && cumulative + count >= target {
                let fraction = ((target - cumulative) / count) as f32;
                return self.min + (i as f32 + fraction) * width;
            }
            cumulative += count;
        }
        self.max
    }

    fn bin_index(&self, value: f32) -> usize {
        let last = self.counts.len() - 1;
        let width = self.bin_width();
        if width <= 0.0 {
            return 0;
        }
        (((value - self.min) / width) as usize).min(last)
    }

    fn insert(&mut self, values: &[f32]) {
        for &v in values.iter().filter(|v| v.is_finite()) {
            let idx = self.bin_index(v.clamp(self.min, self.max));
            self.counts[idx] += 1.0;
        }
    }

    /// Redistribute counts onto a wider range by bin centre
    fn rebin(&self, min: f32, max: f32) -> Self {
        let mut wider = Self::new(min, max, self.counts.len());
        for (centre, count) in self.bins().filter(|(_, c)| *c > 0.0) {
            let idx = wider.bin_index(centre.clamp(min, max));
            wider.counts[idx] += count;
        }
        wider
    }
}

/// Min and max over finite values
pub(crate) fn finite_range(values: &[f32]) -> Option<(f32, f32)> {
    values.iter().copied().filter(|v| v.is_finite()).fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}
