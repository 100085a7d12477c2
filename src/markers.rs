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

//! The seed regions a flood starts from.

use ndarray as nd;

use crate::{
  error::{Result, WatershedError},
  grid::{Connectivity, Grid},
  labelling::{compact_flat, filter_flat, label_flat},
  Label, IGNORE, UNLABELLED,
};

/// Where the flood originates.
///
/// All marker arrays describe the *spatial* axes of the relief: if the
/// relief has a band axis, the markers must not have one.
#[derive(Debug, Clone)]
pub enum Markers<'a> {
  /// Let the transform find its own markers. The immersion transform starts
  /// a new basin in every regional minimum; the marker and geodesic
  /// transforms use the connected regions where the relief is zero in every
  /// band.
  Auto,
  /// Binary marker mask. Every connected component becomes one region.
  Mask(nd::ArrayViewD<'a, bool>),
  /// Pre-labelled markers: positive values are region ids, `0` is unlabelled.
  /// The distinct ids are renumbered `1..=n` in increasing order.
  Labels(nd::ArrayViewD<'a, Label>),
  /// One single-pixel marker per coordinate; point `i` becomes region `i + 1`.
  Points(&'a [Vec<usize>]),
}

impl Markers<'_> {
  pub fn kind(&self) -> &'static str {
    match self {
      Markers::Auto => "automatic",
      Markers::Mask(_) => "mask",
      Markers::Labels(_) => "labelled",
      Markers::Points(_) => "point",
    }
  }
}

/// Marker labels on the spatial grid, before the processing mask is applied
#[derive(Debug, Clone)]
pub(crate) struct Seeds {
  pub labels: Vec<Label>,
  pub nb_regions: usize,
}

impl Seeds {
  /// Turns the user-facing marker description into a flat label buffer.
  ///
  /// `auto` is only evaluated for `Markers::Auto` and must return the pixels
  /// that count as automatic markers.
  pub fn resolve(
    markers: &Markers,
    grid: &Grid,
    connectivity: Connectivity,
    min_size: usize,
    auto: impl FnOnce() -> Vec<bool>,
  ) -> Result<Self> {
    let (mut labels, nb_regions) = match markers {
      Markers::Auto => label_flat(&auto(), grid, connectivity),
      Markers::Mask(mask) => {
        check_shape(grid, mask.shape())?;
        let flat: Vec<bool> = mask.iter().copied().collect();
        label_flat(&flat, grid, connectivity)
      }
      Markers::Labels(labels) => {
        check_shape(grid, labels.shape())?;
        if let Some(bad) = labels.iter().find(|&&l| l < 0) {
          return Err(WatershedError::InvalidMarker(format!(
            "marker labels must be non-negative, found {bad}"
          )));
        }
        let mut flat: Vec<Label> = labels.iter().copied().collect();
        let nb_regions = compact_flat(&mut flat);
        (flat, nb_regions)
      }
      Markers::Points(points) => points_to_labels(points, grid)?,
    };

    let nb_regions = if min_size > 1 { filter_flat(&mut labels, nb_regions, min_size) } else { nb_regions };
    if nb_regions == 0 {
      return Err(WatershedError::EmptyMarkers { min_size });
    }

    tracing::debug!("resolved {} {} marker region(s)", nb_regions, markers.kind());
    Ok(Seeds { labels, nb_regions })
  }

  /// Combines the seeds with the starting labels of a flood. The processing
  /// mask wins over the markers.
  pub fn overlay(&self, base: &[Label]) -> Result<Vec<Label>> {
    let mut hidden = 0usize;
    let labels: Vec<Label> = base
      .iter()
      .zip(self.labels.iter())
      .map(|(&base, &seed)| {
        if base == IGNORE {
          if seed != UNLABELLED {
            hidden += 1;
          }
          IGNORE
        } else {
          seed
        }
      })
      .collect();

    if hidden > 0 {
      tracing::warn!("{hidden} marker pixel(s) lie outside of the processing mask and were ignored");
      if !labels.iter().any(|&l| l > 0) {
        return Err(WatershedError::EmptyMarkers { min_size: 0 });
      }
    }
    Ok(labels)
  }
}

fn check_shape(grid: &Grid, shape: &[usize]) -> Result<()> {
  if grid.shape() != shape {
    return Err(WatershedError::DimensionMismatch {
      expected: grid.shape().to_vec(),
      found: shape.to_vec(),
    });
  }
  Ok(())
}

fn points_to_labels(points: &[Vec<usize>], grid: &Grid) -> Result<(Vec<Label>, usize)> {
  let mut labels = vec![UNLABELLED; grid.len()];
  for (region, point) in points.iter().enumerate() {
    let idx = grid.ravel(point).ok_or_else(|| {
      WatershedError::InvalidMarker(format!(
        "seed point {point:?} does not lie inside an image of shape {:?}",
        grid.shape()
      ))
    })?;
    if labels[idx] != UNLABELLED {
      return Err(WatershedError::OverlappingMarkers {
        first: labels[idx] as usize,
        second: region + 1,
        index: point.clone(),
      });
    }
    labels[idx] = (region + 1) as Label;
  }
  Ok((labels, points.len()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn points_become_numbered_regions() {
    let grid = Grid::new(&[4, 4]);
    let points = vec![vec![0, 0], vec![3, 2]];
    let seeds =
      Seeds::resolve(&Markers::Points(&points), &grid, Connectivity::Full, 0, Vec::new).unwrap();
    assert_eq!(seeds.nb_regions, 2);
    assert_eq!(seeds.labels[0], 1);
    assert_eq!(seeds.labels[14], 2);
    assert_eq!(seeds.labels.iter().filter(|&&l| l == 0).count(), 14);
  }

  #[test]
  fn sparse_label_ids_are_renumbered() {
    let grid = Grid::new(&[4, 4]);
    let mut markers = nd::Array2::<Label>::zeros((4, 4));
    markers[[0, 0]] = 1;
    markers[[3, 3]] = 7;
    markers[[3, 2]] = 7;
    let markers = markers.into_dyn();
    let seeds =
      Seeds::resolve(&Markers::Labels(markers.view()), &grid, Connectivity::Full, 0, Vec::new).unwrap();
    assert_eq!(seeds.nb_regions, 2);
    assert_eq!(seeds.labels[0], 1);
    assert_eq!(seeds.labels[14], 2);
    assert_eq!(seeds.labels[15], 2);
    assert_eq!(seeds.labels.iter().filter(|&&l| l == 0).count(), 13);
  }

  #[test]
  fn bad_points_are_rejected() {
    let grid = Grid::new(&[4, 4]);
    let outside = vec![vec![4, 0]];
    assert!(matches!(
      Seeds::resolve(&Markers::Points(&outside), &grid, Connectivity::Full, 0, Vec::new),
      Err(WatershedError::InvalidMarker(_))
    ));

    let twice = vec![vec![1, 1], vec![2, 2], vec![1, 1]];
    assert_eq!(
      Seeds::resolve(&Markers::Points(&twice), &grid, Connectivity::Full, 0, Vec::new).unwrap_err(),
      WatershedError::OverlappingMarkers { first: 1, second: 3, index: vec![1, 1] }
    );
  }

  #[test]
  fn filtering_everything_away_is_an_error() {
    let grid = Grid::new(&[3, 3]);
    let auto = || vec![true, false, false, false, false, false, false, false, true];
    assert_eq!(
      Seeds::resolve(&Markers::Auto, &grid, Connectivity::Full, 2, auto).unwrap_err(),
      WatershedError::EmptyMarkers { min_size: 2 }
    );
  }

  #[test]
  fn mask_hides_markers() {
    let grid = Grid::new(&[1, 4]);
    let points = vec![vec![0, 0], vec![0, 3]];
    let seeds =
      Seeds::resolve(&Markers::Points(&points), &grid, Connectivity::Full, 0, Vec::new).unwrap();
    let labels = seeds.overlay(&[IGNORE, 0, 0, 0]).unwrap();
    assert_eq!(labels, vec![IGNORE, 0, 0, 2]);
    assert!(seeds.overlay(&[IGNORE, 0, 0, IGNORE]).is_err());
  }
}
