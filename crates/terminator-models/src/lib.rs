//! terminator-models
//!
//! TERM condenser, energy heads and the energy table interpreter.
//!
//! ```ignore
//! use candle_nn::{VarBuilder, VarMap};
//! use terminator_models::{device, Terminator, TerminatorConfig};
//!
//! let device = device(false)?;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//! let model = Terminator::load(vb, &TerminatorConfig::default())?;
//! let loss = model.forward(&batch, true)?;
//! ```
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{Device, Result};

pub mod attention;
pub mod condenser;
pub mod config;
pub mod energies;
pub mod layers;
pub mod model;
pub mod potts;
pub mod sparse;
pub mod utilities;

pub use condenser::CondenseMsa;
pub use config::TerminatorConfig;
pub use energies::{EnergyHead, PairEnergies};
pub use model::Terminator;
pub use potts::{decode, neighbor_energies, nlpl, opt_sequence};
pub use sparse::SparseEtab;

pub fn device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            tracing::info!("running on CPU, build with `--features metal` to use the GPU");
        }
        #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
        {
            tracing::info!("running on CPU, build with `--features cuda` to use the GPU");
        }
        Ok(Device::Cpu)
    }
}
