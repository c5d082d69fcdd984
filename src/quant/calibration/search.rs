//! Clipping-range search for the enhanced scheme
//!
//! Candidate ranges are shrunk from the observed range towards zero and
//! scored on the histogram. Values inside a candidate range contribute the
//! uniform rounding noise `scale^2 / 12`; values outside contribute their
//! squared clipping error. The lowest expected error (highest SQNR) wins.

use super::histogram::Histogram;
use crate::quant::encoding::{Encoding, EncodingSettings};

/// Candidates per side of the range
const SYMMETRIC_CANDIDATES: usize = 128;
const ASYMMETRIC_CANDIDATES: usize = 32;

/// Expected squared quantize-dequantize error over the histogram
pub(crate) fn expected_error(hist: &Histogram, encoding: &Encoding, strict: bool) -> f64 {
    let rounding_noise = f64::from(encoding.scale).powi(2) / 12.0;
    hist.bins()
        .filter(|(_, count)| *count > 0.0)
        .map(|(centre, count)| {
            if centre >= encoding.min && centre <= encoding.max {
                count * rounding_noise
            } else {
                let err = f64::from(centre - encoding.quantize_dequantize(centre, strict));
                count * err * err
            }
        })
        .sum()
}

/// Range with the lowest expected error for the given settings
pub(crate) fn search_range(hist: &Histogram, settings: EncodingSettings) -> (f32, f32) {
    let strict = settings.strict_symmetric;
    let mut best = (hist.min(), hist.max());
    let mut best_cost = f64::INFINITY;
    let mut consider = |lo: f32, hi: f32| {
        let cost = expected_error(hist, &Encoding::from_range(lo, hi, settings), strict);
        if cost < best_cost {
            best_cost = cost;
            best = (lo, hi);
        }
    };

    if settings.symmetric {
        let abs_max = hist.min().abs().max(hist.max().abs());
        let unsigned = settings.unsigned_symmetric && hist.min() >= 0.0;
        for k in 1..=SYMMETRIC_CANDIDATES {
            let a = abs_max * k as f32 / SYMMETRIC_CANDIDATES as f32;
            if unsigned {
                consider(0.0, a);
            } else {
                consider(-a, a);
            }
        }
    } else {
        let lo = hist.min().min(0.0);
        let hi = hist.max().max(0.0);
        let n = ASYMMETRIC_CANDIDATES as f32;
        for i in 1..=ASYMMETRIC_CANDIDATES {
            for j in 1..=ASYMMETRIC_CANDIDATES {
                consider(lo * i as f32 / n, hi * j as f32 / n);
            }
        }
    }
    best
}
