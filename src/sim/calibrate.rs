//! Calibration driver

use tracing::{debug, info, warn};

use super::QuantSimModel;
use crate::error::{Error, Result};
use crate::graph::Session;
use crate::quant::Backend;

impl QuantSimModel {
    /// Calibrate every enabled quantizer
    ///
    /// Parameter quantizers are encoded from their initializers up front;
    /// activation quantizers collect statistics while `forward_fn` runs
    /// forward passes through the session it is handed. Previous encodings
    /// are discarded, so calling this again recalibrates from scratch.
    ///
    /// On failure every quantizer is reset to passthrough and the error is
    /// returned; enabled quantizers that saw no data are reported together
    /// as [`Error::Uncalibrated`].
    pub fn compute_encodings<A, F>(&mut self, forward_fn: F, args: &A) -> Result<()>
    where
        A: ?Sized,
        F: FnOnce(&mut Session<'_>, &A) -> Result<()>,
    {
        info!(quantizers = self.quantizers.0.len(), "calibration started");
        match self.calibrate(forward_fn, args) {
            Ok(()) => {
                let calibrated = self.quantizers.0.values().filter(|q| q.is_encoding_valid()).count();
                info!(calibrated, "calibration finished");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "calibration failed, resetting quantizers");
                for quantizer in self.quantizers.0.values_mut() {
                    quantizer.reset_encodings();
                }
                Err(e)
            }
        }
    }

    fn calibrate<A, F>(&mut self, forward_fn: F, args: &A) -> Result<()>
    where
        A: ?Sized,
        F: FnOnce(&mut Session<'_>, &A) -> Result<()>,
    {
        for quantizer in self.quantizers.0.values_mut() {
            quantizer.start_calibration();
        }

        for (name, quantizer) in self.quantizers.0.iter_mut() {
            if !quantizer.enabled() || !quantizer.role().is_param() {
                continue;
            }
            if let Some(value) = self.graph.initializers.get(name) {
                quantizer.forward(value, Backend::Cpu)?;
                debug!(param = %name, "parameter encoded");
            }
        }

        forward_fn(&mut self.session(), args)?;

        let mut uncalibrated = Vec::new();
        for (name, quantizer) in self.quantizers.0.iter_mut() {
            match quantizer.finalize_calibration() {
                Ok(()) => {}
                Err(Error::NotCalibrated) => uncalibrated.push(name.clone()),
                Err(e) => return Err(e),
            }
        }
        if uncalibrated.is_empty() {
            Ok(())
        } else {
            Err(Error::Uncalibrated { tensors: uncalibrated })
        }
    }
}
