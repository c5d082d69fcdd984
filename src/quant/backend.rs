//! Quantize-dequantize back-ends
//!
//! Each inserted quantize node carries a domain naming the back-end that
//! executes it. The CPU back-end maps elements sequentially; the accelerated
//! back-end splits the map across the rayon thread pool.

use ndarray::ArrayViewMutD;
use rayon::prelude::*;

use crate::graph::Device;

/// Domain of quantize nodes executed on the CPU
pub const CPU_DOMAIN: &str = "quantsim.customop.cpu";
/// Domain of quantize nodes executed on the accelerated back-end
pub const ACCELERATED_DOMAIN: &str = "quantsim.customop.accelerated";

const PAR_CHUNK: usize = 4096;

/// Element-wise execution strategy for quantize-dequantize
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Cpu,
    Accelerated,
}

impl Backend {
    /// Back-end serving nodes placed on `device`
    pub fn for_device(device: Device) -> Self {
        match device {
            Device::Cpu => Backend::Cpu,
            Device::Accelerator => Backend::Accelerated,
        }
    }

    /// Operator domain string for inserted nodes
    pub fn domain(&self) -> &'static str {
        match self {
            Backend::Cpu => CPU_DOMAIN,
            Backend::Accelerated => ACCELERATED_DOMAIN,
        }
    }

    /// Back-end named by an operator domain; unknown domains run on CPU
    pub fn from_domain(domain: &str) -> Self {
        if domain == ACCELERATED_DOMAIN {
            Backend::Accelerated
        } else {
            Backend::Cpu
        }
    }

    /// Apply `f` to every element of `view` in place
    pub fn map_inplace<F>(&self, mut view: ArrayViewMutD<'_, f32>, f: F)
    where
        F: Fn(f32) -> f32 + Sync + Send,
    {
        match self {
            Backend::Cpu => view.mapv_inplace(f),
            Backend::Accelerated => match view.as_slice_memory_order_mut() {
                Some(slice) => slice
                    .par_chunks_mut(PAR_CHUNK)
                    .for_each(|chunk| chunk.iter_mut().for_each(|v| *v = f(*v))),
                None => view.par_mapv_inplace(f),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    #[test]
    fn test_domain_round_trip() {
        for backend in [Backend::Cpu, Backend::Accelerated] {
            assert_eq!(Backend::from_domain(backend.domain()), backend);
        }
        assert_eq!(Backend::from_domain("ai.onnx"), Backend::Cpu);
    }

    #[test]
    fn test_backends_agree() {
        let data = Array::from_shape_fn(IxDyn(&[16, 33]), |d| (d[0] * 33 + d[1]) as f32 * 0.37 - 50.0);
        let mut cpu = data.clone();
        let mut par = data.clone();
        let f = |v: f32| (v * 0.5).round() * 2.0;
        Backend::Cpu.map_inplace(cpu.view_mut(), f);
        Backend::Accelerated.map_inplace(par.view_mut(), f);
        assert_eq!(cpu, par);
    }
}
