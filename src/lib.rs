/*!
# Speckle tracking data container

Holds the measured frames of a scanning speckle-tracking experiment together with the
detector and sample geometry, and derives from them the quantities needed to recover
the lens wavefront: whitefield, bad pixel mask, pixel mapping, sample translations in
detector pixels, phase and pixel aberrations.

## Usage

```rust,no_run
use speckle_data::{loader::NpzLoader, RefMethod, Tracking, TrackingOptions};

let data = NpzLoader::default().load_data(&["scan.npz"])?;
let data = data.crop_data([10, 500, 20, 1980])?.update_defocus(1.5e-4, None)?;
let mut st = data.get_st(TrackingOptions::default())?;
st.update_reference(1.0, RefMethod::KernelRegression)?;
let mut data = data;
data.update_phase(&st)?;
# Ok::<(), Box<dyn std::error::Error>>(())
```

Every transform returns a new [`ExperimentData`], the source is left untouched and
unmodified arrays are shared between the two.
*/

pub mod data;
mod error;
pub mod fit;
pub mod geometry;
pub mod integrate;
pub mod loader;
pub mod numeric;
pub mod protocol;
pub mod record;
pub mod tracking;

#[cfg(test)]
pub(crate) mod testing;

pub use data::{
    Attribute, Attributes, ExperimentData, FlatfieldMethod, MaskMethod, MaskUpdate, Patch,
    SweepOptions, SweepResult, Value,
};
pub use error::{Error, Result};
pub use fit::{AberrationsFit, FitInput, FitResult, Loss};
pub use protocol::{DType, Protocol};
pub use record::{Field, Initializer, Record};
pub use tracking::{RefMethod, SpeckleTracking, Tracking, TrackingOptions};

/// Maximum number of worker threads a container may use
pub const MAX_THREADS: usize = 64;
