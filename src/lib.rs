/*
  Copyright© 2022 Raúl Wolters(1)

  This file is part of rustronomy-core.

  rustronomy is free software: you can redistribute it and/or modify it under
  the terms of the European Union Public License version 1.2 or later, as
  published by the European Commission.

  rustronomy is distributed in the hope that it will be useful, but WITHOUT ANY
  WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
  A PARTICULAR PURPOSE. See the European Union Public License for more details.

  You should have received a copy of the EUPL in an/all official language(s) of
  the European Union along with rustronomy.  If not, see
  <https://ec.europa.eu/info/european-union-public-licence_en/>.

  (1) Resident of the Kingdom of the Netherlands; agreement between licensor and
  licensee subject to Dutch law as per article 15 of the EUPL.
*/

//! `hq-watershed` is a pure-rust implementation of the watershed family of
//! segmentation algorithms, built around a hierarchical (bucket) queue.
//!
//! # Features
//! Three flavours of the watershed transform are included in this crate.
//! 1. The watershed by *immersion* (Vincent & Soille, 1991[^1]), which finds
//! the regional minima of a relief by itself and separates the basins that grow
//! from them with watershed lines.
//! 2. The *marker-based* watershed (Meyer, 1991[^2]), which grows a set of
//! user-supplied markers in order of increasing relief intensity. Multi-band
//! reliefs can be flooded band by band or all at once.
//! 3. The *geodesic* watershed, which grows the markers along the paths of least
//! spectral change rather than by raw intensity.
//!
//! On top of these, the `kmeans` module clusters an image by repeatedly flooding
//! it from `k` seeds and moving every seed to the centre of its region.
//!
//! Reliefs are `u8` arrays of up to five axes, one of which may be a band axis.
//! Any numeric array can be turned into a relief with
//! `WatershedUtils::pre_processor`.
//!
//! ## Short example: segmenting a random field
//! `hq-watershed` uses the commonly used "builder pattern" to configure the
//! watershed transform before executing it. To configure a transform, create
//! an instance of the `TransformBuilder` struct. Once you are done specifying
//! options, call `build()` to generate a (`Sync`&`Send`) watershed transform
//! object, which you can now use to execute the configured transform.
//! ```rust
//! use hq_watershed::prelude::*;
//! use ndarray_rand::{rand_distr::Uniform, RandomExt};
//!
//! //Create a random uniform distribution
//! let rf = nd::Array2::<u8>::random((128, 128), Uniform::new(0, 254)).into_dyn();
//! //Set-up the watershed transform
//! let watershed = TransformBuilder::new_marker_based().build().unwrap();
//! //Find minima of the random field (to be used as seeds)
//! let rf_mins = watershed.find_local_minima(rf.view(), Connectivity::Full);
//! //Execute the watershed transform
//! let output = watershed.transform(rf.view(), Markers::Points(&rf_mins)).unwrap();
//! assert_eq!(output.nb_regions, rf_mins.len());
//! ```
//! [^1]: L. Vincent and P. Soille. **Watersheds in digital spaces: an efficient algorithm based on immersion simulations.** *IEEE Transactions on Pattern Analysis and Machine Intelligence*, 13(6), 1991.
//!
//! [^2]: F. Meyer. **Un algorithme optimal de ligne de partage des eaux.** *Actes du 8ème Congrès AFCET*, 1991.
//!
//! # Cargo feature gates
//! *By default, all features behind cargo feature gates are **disabled***
//! - `jemalloc`: this feature enables the [jemalloc allocator](https://jemalloc.net).
//! Jemalloc is enabled though usage of the `jemallocator` crate, which
//! increases compile times considerably. However, enabling this feature can also
//! greatly improve run-time performance when many bands are flooded in
//! parallel. To compile `hq-watershed` with the `jemalloc` feature,
//! jemalloc must be installed on the host system.
//! - `progress`: this feature enables progress bars for the floods and the
//! k-means loop. Enabling this feature adds the `indicatif` crate as a
//! dependency. Floods running on rayon worker threads (independent bands) do
//! not draw a bar.
//! - `debug`: this feature enables performance monitoring output, reported
//! through `tracing` at the debug level. Enabling this feature does not add
//! additional dependencies.
//!
//! # Logging
//! Diagnostics (marker counts, markers hidden by the mask, vanishing k-means
//! regions, unresolved watershed pixels) are emitted with the `tracing` crate.
//! Install any `tracing` subscriber to see them.

//Unconditional imports
use ndarray as nd;

//Set Jemalloc as the global allocator for this crate
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

pub mod error;
mod flood;
mod grid;
mod immersion;
pub mod kmeans;
pub mod labelling;
mod markers;
pub mod merge_lines;
pub mod queue;
mod relief;
mod transform;

pub use error::{Result, WatershedError};
pub use grid::Connectivity;
pub use markers::Markers;
pub use transform::{
  BandMode, GeodesicWatershed, ImmersionWatershed, MarkerWatershed, Segmentation, TransformBuilder,
  Watershed, WatershedUtils,
};

/// Value type of label images
pub type Label = i32;
/// Label of watershed pixels, and of pixels no marker could reach
pub const WSHED: Label = 0;
/// Label of pixels outside of the processing mask
pub const IGNORE: Label = -1;
//Pixels that have not been reached by the flood (yet)
pub(crate) const UNLABELLED: Label = WSHED;

//Constants for the relief levels produced by the pre-processor
const NORMAL_MAX: u8 = u8::MAX - 1;
const ALWAYS_FILL: u8 = u8::MIN;
const NEVER_FILL: u8 = u8::MAX;

//Utility prelude for batch import
pub mod prelude {
  pub use crate::kmeans::{KMeansBuilder, KMeansResult, StopReason};
  pub use crate::{
    BandMode, Connectivity, Markers, Segmentation, TransformBuilder, Watershed, WatershedError,
    WatershedUtils, IGNORE, WSHED,
  };
  pub use ndarray as nd;
}

////////////////////////////////////////////////////////////////////////////////
//                              HELPER FUNCTIONS                              //
////////////////////////////////////////////////////////////////////////////////

#[cfg(feature = "progress")]
pub(crate) fn set_up_bar(len: u64, what: &str) -> indicatif::ProgressBar {
  //Bars drawn from parallel floods would fight over the terminal
  if rayon::current_thread_index().is_some() {
    return indicatif::ProgressBar::hidden();
  }
  let template = format!("{{spinner}}[{{elapsed}}/{{duration}}] {what} {{pos}}/{{len}}{{bar:60}}");
  let bar = indicatif::ProgressBar::new(len);
  if let Ok(style) = indicatif::ProgressStyle::with_template(&template) {
    bar.set_style(style);
  }
  bar
}

/// Returns a copy of `labels` in which every region id is replaced by the
/// number of pixels in that region. Watershed and ignored pixels map to zero.
pub fn region_size_map(labels: nd::ArrayViewD<Label>) -> nd::ArrayD<usize> {
  let nb_regions = labels.iter().copied().max().unwrap_or(0).max(0) as usize;
  let sizes = labelling::region_sizes(labels.view(), nb_regions);
  labels.mapv(|label| if label > WSHED { sizes[label as usize] } else { 0 })
}

////////////////////////////////////////////////////////////////////////////////
//                             OPTIONAL MODULES                               //
////////////////////////////////////////////////////////////////////////////////
#[cfg(feature = "debug")]
mod performance_monitoring {

  #[derive(Clone, Debug, Default)]
  pub struct PerfReport {
    pub transform: &'static str,
    pub regions: usize,
    pub popped: usize,
    pub marker_ms: usize,
    pub flood_ms: usize,
    pub merge_ms: usize,
    pub total_ms: usize,
  }

  impl PerfReport {
    pub fn new(transform: &'static str) -> Self {
      PerfReport { transform, ..Default::default() }
    }
  }

  impl std::fmt::Display for PerfReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      writeln!(f, ">---------[Performance Summary]---------")?;
      writeln!(f, ">  Transform: {}", self.transform)?;
      writeln!(f, ">  Regions: {}; queue entries processed: {}", self.regions, self.popped)?;
      writeln!(f, ">  Markers: {}ms", self.marker_ms)?;
      writeln!(f, ">  Flooding: {}ms", self.flood_ms)?;
      writeln!(f, ">  Merging: {}ms", self.merge_ms)?;
      writeln!(f, ">--------------------------------+ total")?;
      writeln!(
        f,
        ">  {}ms with {}ms overhead (Δt)",
        self.total_ms,
        self.total_ms.saturating_sub(self.marker_ms + self.flood_ms + self.merge_ms)
      )
    }
  }
}
