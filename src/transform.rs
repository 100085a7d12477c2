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

//! Configuration and execution of the watershed transforms.

use ndarray as nd;
use num_traits::ToPrimitive;
use rayon::prelude::*;

use crate::{
  error::{Result, WatershedError},
  flood::{self, GeodesicRule},
  grid::{Connectivity, Grid},
  immersion, labelling,
  markers::{Markers, Seeds},
  merge_lines,
  relief::{from_flat, Relief},
  Label, ALWAYS_FILL, IGNORE, NEVER_FILL, NORMAL_MAX, WSHED,
};

/// How a relief with several bands is flooded by the marker transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BandMode {
  /// Flood every band on its own. The output has the same shape as the
  /// relief, band axis included.
  Independent,
  /// Flood all bands at once into a single label image. Every pixel is
  /// queued once per band, and the band it was reached through is recorded
  /// in `Segmentation::source_band`.
  #[default]
  Joint,
}

/// Output of a watershed transform
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
  /// Region ids `1..=nb_regions`, `WSHED` (0) for watershed pixels and for
  /// pixels no marker could reach, `IGNORE` (-1) outside of the mask
  pub labels: nd::ArrayD<Label>,
  /// Highest region id in use. When bands are flooded independently this is
  /// the maximum over all bands.
  pub nb_regions: usize,
  /// Band through which every pixel was flooded (joint multi-band floods only)
  pub source_band: Option<nd::ArrayD<usize>>,
}

impl Segmentation {
  /// Pixel count per label; index 0 counts watershed / unreached pixels
  pub fn region_sizes(&self) -> Vec<usize> {
    labelling::region_sizes(self.labels.view(), self.nb_regions)
  }

  pub fn watershed_pixel_count(&self) -> usize {
    self.labels.iter().filter(|&&label| label == WSHED).count()
  }

  pub fn ignored_pixel_count(&self) -> usize {
    self.labels.iter().filter(|&&label| label == IGNORE).count()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
  Immersion,
  Marker,
  Geodesic,
}

impl Kind {
  fn name(self) -> &'static str {
    match self {
      Kind::Immersion => "immersion",
      Kind::Marker => "marker-based",
      Kind::Geodesic => "geodesic",
    }
  }
}

/// Builder for configuring a watershed transform.
///
/// Use `new_immersion()`, `new_marker_based()` or `new_geodesic()` to pick the
/// flavour of the transform, configure it with the `set_*` methods and call
/// `build()` to obtain a `Box<dyn Watershed + Send + Sync>`. Options that do
/// not apply to the selected flavour make `build()` fail rather than being
/// silently ignored.
///
/// | option                        | immersion | marker | geodesic |
/// |-------------------------------|-----------|--------|----------|
/// | `set_connectivity`            | ✓         | ✓      | ✓        |
/// | `set_band_axis`               | ✓         | ✓      | ✓        |
/// | `set_min_marker_size`         |           | ✓      | ✓        |
/// | `set_merge_watershed_lines`   | ✓         |        |          |
/// | `set_band_mode`               |           | ✓      |          |
/// | `set_true_geodesic_distance`  |           |        | ✓        |
/// | `set_hue_distance`            |           |        | ✓        |
/// | `set_geodesic_scale`          |           |        | ✓        |
#[derive(Debug, Clone)]
pub struct TransformBuilder {
  kind: Kind,
  connectivity: Connectivity,
  band_axis: Option<usize>,
  min_marker_size: Option<usize>,
  merge_watershed_lines: bool,
  band_mode: Option<BandMode>,
  true_distance: Option<bool>,
  hue_distance: Option<bool>,
  geodesic_scale: Option<f64>,
}

impl TransformBuilder {
  fn new(kind: Kind) -> Self {
    TransformBuilder {
      kind,
      connectivity: Connectivity::Full,
      band_axis: None,
      min_marker_size: None,
      merge_watershed_lines: false,
      band_mode: None,
      true_distance: None,
      hue_distance: None,
      geodesic_scale: None,
    }
  }

  /// creates a new `TransformBuilder` configured for a watershed by immersion,
  /// which finds its own minima and separates basins with watershed lines
  pub fn new_immersion() -> Self {
    Self::new(Kind::Immersion)
  }

  /// creates a new `TransformBuilder` configured for a marker-based flood
  /// ordered by relief intensity
  pub fn new_marker_based() -> Self {
    Self::new(Kind::Marker)
  }

  /// creates a new `TransformBuilder` configured for a marker-based flood
  /// ordered by geodesic distance over the relief
  pub fn new_geodesic() -> Self {
    Self::new(Kind::Geodesic)
  }

  /// Set the neighbourhood used for labelling markers and for flooding.
  /// Defaults to `Connectivity::Full`.
  pub fn set_connectivity(mut self, connectivity: Connectivity) -> Self {
    self.connectivity = connectivity;
    self
  }

  /// Treat `axis` of the relief as a band axis rather than a spatial axis
  pub fn set_band_axis(mut self, axis: usize) -> Self {
    self.band_axis = Some(axis);
    self
  }

  /// Discard marker regions with fewer than `min_size` pixels before flooding
  pub fn set_min_marker_size(mut self, min_size: usize) -> Self {
    self.min_marker_size = Some(min_size);
    self
  }

  /// Hand every watershed pixel to the neighbouring region closest to it in
  /// intensity once the flood is done
  pub fn set_merge_watershed_lines(mut self, merge: bool) -> Self {
    self.merge_watershed_lines = merge;
    self
  }

  /// Flood the bands of a multi-band relief independently or jointly
  pub fn set_band_mode(mut self, mode: BandMode) -> Self {
    self.band_mode = Some(mode);
    self
  }

  /// Accumulate the local distances along the flooding path (default), or
  /// flood on the largest local distance met along the path
  pub fn set_true_geodesic_distance(mut self, true_distance: bool) -> Self {
    self.true_distance = Some(true_distance);
    self
  }

  /// Interpret the bands as hue angles and measure local distances around the
  /// colour circle
  pub fn set_hue_distance(mut self, hue: bool) -> Self {
    self.hue_distance = Some(hue);
    self
  }

  /// Multiplier that turns RMS band distances (in `[0, 1]`) into queue
  /// priorities. Defaults to 255.
  pub fn set_geodesic_scale(mut self, scale: f64) -> Self {
    self.geodesic_scale = Some(scale);
    self
  }

  /// Build a `Box<dyn Watershed + Send + Sync>` from the current builder
  /// configuration. This function returns an `Err` result if the builder
  /// was configured with options that do not apply to the chosen transform.
  pub fn build(self) -> Result<Box<dyn Watershed + Send + Sync>> {
    let kind = self.kind;
    let reject = |option: &str| -> Result<Box<dyn Watershed + Send + Sync>> {
      Err(WatershedError::InvalidConfig(format!(
        "the {} transform does not support `{option}`",
        kind.name()
      )))
    };
    let geodesic_options =
      self.true_distance.is_some() || self.hue_distance.is_some() || self.geodesic_scale.is_some();

    match kind {
      Kind::Immersion => {
        if self.min_marker_size.is_some() {
          return reject("min_marker_size");
        }
        if self.band_mode == Some(BandMode::Joint) {
          return reject("band_mode = Joint");
        }
        if geodesic_options {
          return reject("geodesic distance options");
        }
        Ok(Box::new(ImmersionWatershed {
          connectivity: self.connectivity,
          band_axis: self.band_axis,
          merge_watershed_lines: self.merge_watershed_lines,
        }))
      }
      Kind::Marker => {
        if self.merge_watershed_lines {
          return reject("merge_watershed_lines");
        }
        if geodesic_options {
          return reject("geodesic distance options");
        }
        Ok(Box::new(MarkerWatershed {
          connectivity: self.connectivity,
          band_axis: self.band_axis,
          min_marker_size: self.min_marker_size.unwrap_or(0),
          band_mode: self.band_mode.unwrap_or_default(),
        }))
      }
      Kind::Geodesic => {
        if self.merge_watershed_lines {
          return reject("merge_watershed_lines");
        }
        if self.band_mode == Some(BandMode::Independent) {
          return reject("band_mode = Independent");
        }
        let scale = self.geodesic_scale.unwrap_or(u8::MAX as f64);
        if !scale.is_finite() || scale <= 0.0 {
          return Err(WatershedError::InvalidConfig(format!(
            "geodesic scale must be a positive, finite number, found {scale}"
          )));
        }
        Ok(Box::new(GeodesicWatershed {
          connectivity: self.connectivity,
          band_axis: self.band_axis,
          min_marker_size: self.min_marker_size.unwrap_or(0),
          rule: GeodesicRule {
            true_distance: self.true_distance.unwrap_or(true),
            hue: self.hue_distance.unwrap_or(false),
            scale,
          },
        }))
      }
    }
  }
}

/// This trait contains useful functions for preparing images to be used as input
/// for a watershed transform
pub trait WatershedUtils {
  /// The `pre_processor` function can convert an array of any numeric data-type
  /// `T` into an array of `u8` that can be used as a relief.
  ///
  /// Finite values are mapped linearly onto `0..=254`. `NaN` and positive
  /// infinity are mapped onto 255, the very last level to be flooded, and
  /// negative infinity onto 0.
  fn pre_processor<T, D>(&self, img: nd::ArrayView<T, D>) -> nd::Array<u8, D>
  where
    T: ToPrimitive + Copy,
    D: nd::Dimension,
  {
    let (min, max) = img
      .iter()
      .filter_map(|x| x.to_f64().filter(|f| f.is_finite()))
      .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), f| (lo.min(f), hi.max(f)));
    let range = max - min;

    img.mapv(|x| -> u8 {
      let float = x.to_f64().unwrap_or(f64::NAN);
      if float.is_finite() {
        if range > 0.0 {
          ((float - min) / range * NORMAL_MAX as f64).round() as u8
        } else {
          ALWAYS_FILL
        }
      } else if float == f64::NEG_INFINITY {
        ALWAYS_FILL
      } else {
        NEVER_FILL
      }
    })
  }

  /// returns the coordinates of all the pixels that are strictly lower than
  /// all their neighbours. Useful for generating seeds for the marker-based
  /// transforms.
  fn find_local_minima(&self, relief: nd::ArrayViewD<u8>, connectivity: Connectivity) -> Vec<Vec<usize>> {
    let grid = Grid::new(relief.shape());
    let values: Vec<u8> = relief.iter().copied().collect();

    (0..grid.len())
      .into_par_iter()
      .map_init(
        || grid.walker(connectivity),
        |walker, px| {
          let own = values[px];
          if walker.neighbours(px).iter().all(|&neigh| values[neigh] > own) {
            Some(grid.coords_of(px))
          } else {
            None
          }
        },
      )
      .flatten()
      .collect()
  }
}

/// Actual trait for performing the watershed transform. It is implemented in
/// different ways by different versions of the algorithm. This trait is dyn-safe,
/// which means that trait objects may be constructed from it.
pub trait Watershed {
  /// Returns the watershed transform of `relief`, flooding only the pixels
  /// where `mask` is `true`. Pixels outside of the mask are labelled `IGNORE`.
  fn transform_masked(
    &self,
    relief: nd::ArrayViewD<u8>,
    markers: Markers,
    mask: Option<nd::ArrayViewD<bool>>,
  ) -> Result<Segmentation>;

  /// Returns the watershed transform of `relief`
  fn transform(&self, relief: nd::ArrayViewD<u8>, markers: Markers) -> Result<Segmentation> {
    self.transform_masked(relief, markers, None)
  }

  /// Human-readable name of the transform
  fn name(&self) -> &'static str;
}

impl WatershedUtils for dyn Watershed {}
impl WatershedUtils for dyn Watershed + Send + Sync {}

//Runs `job` for every band, in parallel if there is more than one
fn per_band<T, F>(bands: usize, job: F) -> Vec<T>
where
  T: Send,
  F: Fn(usize) -> T + Sync + Send,
{
  if bands == 1 {
    vec![job(0)]
  } else {
    (0..bands).into_par_iter().map(job).collect()
  }
}

/// Implementation of the watershed by immersion.
///
/// The relief is flooded level by level starting from its regional minima,
/// each of which becomes a region. Where two basins meet, the pixels
/// equidistant to both become watershed pixels (`WSHED`), unless the
/// transform is configured to merge watershed lines away afterwards.
///
/// Only `Markers::Auto` is accepted. Bands are always flooded independently.
pub struct ImmersionWatershed {
  connectivity: Connectivity,
  band_axis: Option<usize>,
  merge_watershed_lines: bool,
}

impl Watershed for ImmersionWatershed {
  fn name(&self) -> &'static str {
    Kind::Immersion.name()
  }

  fn transform_masked(
    &self,
    relief: nd::ArrayViewD<u8>,
    markers: Markers,
    mask: Option<nd::ArrayViewD<bool>>,
  ) -> Result<Segmentation> {
    if !matches!(markers, Markers::Auto) {
      return Err(WatershedError::UnsupportedMarkers {
        transform: self.name(),
        markers: markers.kind(),
      });
    }

    #[cfg(feature = "debug")]
    let mut perf = crate::performance_monitoring::PerfReport::new(self.name());
    #[cfg(feature = "debug")]
    let start = std::time::Instant::now();

    let relief = Relief::new(relief, self.band_axis)?;
    let ignore: Vec<bool> = relief.base_labels(mask)?.into_iter().map(|l| l == IGNORE).collect();
    let grid = &relief.grid;

    //(1) Flood every band
    let mut flooded = per_band(relief.bands, |band| {
      immersion::immerse(&relief.band(band), &ignore, grid, self.connectivity)
    });

    #[cfg(feature = "debug")]
    {
      perf.flood_ms = start.elapsed().as_millis() as usize;
    }

    //(2) Optionally get rid of the watershed lines
    if self.merge_watershed_lines {
      #[cfg(feature = "debug")]
      let merge_start = std::time::Instant::now();

      let unresolved: usize = if relief.bands == 1 {
        merge_lines::merge_flat(&relief.band(0), grid, self.connectivity, &mut flooded[0].labels)
      } else {
        flooded
          .par_iter_mut()
          .enumerate()
          .map(|(band, immersed)| {
            merge_lines::merge_flat(&relief.band(band), grid, self.connectivity, &mut immersed.labels)
          })
          .sum()
      };
      if unresolved > 0 {
        tracing::debug!("{unresolved} watershed pixel(s) survived merging");
      }

      #[cfg(feature = "debug")]
      {
        perf.merge_ms = merge_start.elapsed().as_millis() as usize;
      }
    }

    let nb_regions = flooded.iter().map(|immersed| immersed.nb_regions).max().unwrap_or(0);
    let labels = relief.restore_bands(flooded.into_iter().map(|immersed| immersed.labels).collect())?;
    tracing::debug!(
      "immersion found {nb_regions} basin(s) in {} band(s) of shape {:?}",
      relief.bands,
      relief.spatial_shape()
    );

    #[cfg(feature = "debug")]
    {
      perf.regions = nb_regions;
      perf.total_ms = start.elapsed().as_millis() as usize;
      tracing::debug!("{perf}");
    }

    Ok(Segmentation { labels, nb_regions, source_band: None })
  }
}

/// Implementation of the marker-based watershed.
///
/// Every marker region is grown in order of increasing relief intensity:
/// the lowest unflooded pixel bordering any region is always the next one to
/// be flooded, and it joins the region that reached it first. All pixels
/// that can be reached from a marker end up in a region, so no watershed
/// lines are produced.
pub struct MarkerWatershed {
  connectivity: Connectivity,
  band_axis: Option<usize>,
  min_marker_size: usize,
  band_mode: BandMode,
}

impl Watershed for MarkerWatershed {
  fn name(&self) -> &'static str {
    Kind::Marker.name()
  }

  fn transform_masked(
    &self,
    relief: nd::ArrayViewD<u8>,
    markers: Markers,
    mask: Option<nd::ArrayViewD<bool>>,
  ) -> Result<Segmentation> {
    #[cfg(feature = "debug")]
    let mut perf = crate::performance_monitoring::PerfReport::new(self.name());
    #[cfg(feature = "debug")]
    let start = std::time::Instant::now();

    let relief = Relief::new(relief, self.band_axis)?;
    let base = relief.base_labels(mask)?;
    let grid = &relief.grid;

    let segmentation = match self.band_mode {
      BandMode::Joint => {
        let seeds =
          Seeds::resolve(&markers, grid, self.connectivity, self.min_marker_size, || relief.zero_pixels())?;
        let start_labels = seeds.overlay(&base)?;
        let flooded =
          flood::flood_intensity(&relief.data, relief.bands, grid, self.connectivity, start_labels);
        tracing::debug!("marker flood processed {} queue entries", flooded.popped);

        #[cfg(feature = "debug")]
        {
          perf.popped = flooded.popped;
        }

        let source_band = if relief.bands > 1 {
          Some(from_flat(relief.spatial_shape(), flooded.source_band)?)
        } else {
          None
        };
        Segmentation {
          labels: from_flat(relief.spatial_shape(), flooded.labels)?,
          nb_regions: seeds.nb_regions,
          source_band,
        }
      }
      BandMode::Independent => {
        let flooded = per_band(relief.bands, |band| -> Result<(Vec<Label>, usize)> {
          let values = relief.band(band);
          let seeds = Seeds::resolve(&markers, grid, self.connectivity, self.min_marker_size, || {
            values.iter().map(|&v| v == 0).collect()
          })?;
          let start_labels = seeds.overlay(&base)?;
          let flooded = flood::flood_intensity(&values, 1, grid, self.connectivity, start_labels);
          Ok((flooded.labels, seeds.nb_regions))
        })
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        let nb_regions = flooded.iter().map(|(_, nb)| *nb).max().unwrap_or(0);
        let labels = relief.restore_bands(flooded.into_iter().map(|(labels, _)| labels).collect())?;
        Segmentation { labels, nb_regions, source_band: None }
      }
    };

    tracing::debug!(
      "marker-based flood of {} band(s) produced {} region(s)",
      relief.bands,
      segmentation.nb_regions
    );

    #[cfg(feature = "debug")]
    {
      perf.regions = segmentation.nb_regions;
      perf.total_ms = start.elapsed().as_millis() as usize;
      perf.flood_ms = perf.total_ms;
      tracing::debug!("{perf}");
    }

    Ok(segmentation)
  }
}

/// Implementation of the geodesic-distance watershed.
///
/// Instead of flooding by raw intensity, every marker region grows along the
/// paths of least spectral change: the cost of stepping between two
/// neighbouring pixels is their (RMS or hue) distance, and a pixel joins the
/// region from which it can be reached most cheaply. All bands contribute to
/// the local distance, so the output has no band axis.
pub struct GeodesicWatershed {
  connectivity: Connectivity,
  band_axis: Option<usize>,
  min_marker_size: usize,
  rule: GeodesicRule,
}

impl Watershed for GeodesicWatershed {
  fn name(&self) -> &'static str {
    Kind::Geodesic.name()
  }

  fn transform_masked(
    &self,
    relief: nd::ArrayViewD<u8>,
    markers: Markers,
    mask: Option<nd::ArrayViewD<bool>>,
  ) -> Result<Segmentation> {
    #[cfg(feature = "debug")]
    let mut perf = crate::performance_monitoring::PerfReport::new(self.name());
    #[cfg(feature = "debug")]
    let start = std::time::Instant::now();

    let relief = Relief::new(relief, self.band_axis)?;
    let base = relief.base_labels(mask)?;
    let seeds = Seeds::resolve(&markers, &relief.grid, self.connectivity, self.min_marker_size, || {
      relief.zero_pixels()
    })?;
    let start_labels = seeds.overlay(&base)?;

    #[cfg(feature = "debug")]
    {
      perf.marker_ms = start.elapsed().as_millis() as usize;
    }

    let flooded = flood::flood_geodesic(&relief, self.connectivity, self.rule, start_labels);
    tracing::debug!("geodesic flood processed {} queue entries", flooded.popped);

    #[cfg(feature = "debug")]
    {
      perf.popped = flooded.popped;
      perf.regions = seeds.nb_regions;
      perf.total_ms = start.elapsed().as_millis() as usize;
      perf.flood_ms = perf.total_ms - perf.marker_ms;
      tracing::debug!("{perf}");
    }

    Ok(Segmentation {
      labels: from_flat(relief.spatial_shape(), flooded.labels)?,
      nb_regions: seeds.nb_regions,
      source_band: None,
    })
  }
}
