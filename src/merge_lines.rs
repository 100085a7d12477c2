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

//! Removes watershed lines by handing every watershed pixel to the
//! neighbouring region that is closest to it in intensity.

use ndarray as nd;

use crate::{
  error::{Result, WatershedError},
  grid::{Connectivity, Grid, NeighbourWalker},
  Label, WSHED,
};

/// Reassigns all `WSHED` pixels of `labels` to a neighbouring region.
///
/// Every watershed pixel joins the labelled neighbour whose relief value is
/// closest to its own (the first such neighbour wins ties). Watershed pixels
/// that only touch other watershed pixels are resolved in later passes, once
/// their neighbours have been resolved. Returns the number of watershed
/// pixels that could not be resolved, which is only non-zero when a
/// connected group of watershed pixels touches no region at all (for
/// instance an image that is entirely `WSHED`).
pub fn merge_watershed_lines(
  labels: &mut nd::ArrayD<Label>,
  relief: nd::ArrayViewD<u8>,
  connectivity: Connectivity,
) -> Result<usize> {
  if labels.shape() != relief.shape() {
    return Err(WatershedError::DimensionMismatch {
      expected: labels.shape().to_vec(),
      found: relief.shape().to_vec(),
    });
  }
  let grid = Grid::new(relief.shape());
  let values: Vec<u8> = relief.iter().copied().collect();
  let mut flat: Vec<Label> = labels.iter().copied().collect();
  let left = merge_flat(&values, &grid, connectivity, &mut flat);
  labels.iter_mut().zip(flat).for_each(|(label, merged)| *label = merged);
  Ok(left)
}

pub(crate) fn merge_flat(
  values: &[u8],
  grid: &Grid,
  connectivity: Connectivity,
  labels: &mut [Label],
) -> usize {
  let mut walker = grid.walker(connectivity);
  let mut passes = 0usize;

  loop {
    let unresolved: Vec<usize> = (0..labels.len()).filter(|&px| labels[px] == WSHED).collect();
    if unresolved.is_empty() {
      tracing::debug!("merged watershed lines in {passes} pass(es)");
      return 0;
    }

    //Resolve against the labels at the start of the pass first, so the order
    //in which the pixels are visited does not matter. Only pixels surrounded
    //by watershed fall back on values resolved earlier in this pass.
    let snapshot = labels.to_vec();
    let mut progress = false;
    for &px in &unresolved {
      let merged = closest_region(px, values, &snapshot, &mut walker)
        .or_else(|| closest_region(px, values, labels, &mut walker));
      if let Some(label) = merged {
        labels[px] = label;
        progress = true;
      }
    }
    passes += 1;

    if !progress {
      tracing::warn!(
        "{} watershed pixel(s) do not touch any region and were left unresolved",
        unresolved.len()
      );
      return unresolved.len();
    }
  }
}

fn closest_region(
  px: usize,
  values: &[u8],
  labels: &[Label],
  walker: &mut NeighbourWalker,
) -> Option<Label> {
  let own = values[px];
  walker
    .neighbours(px)
    .iter()
    .filter(|&&neigh| labels[neigh] > WSHED)
    .fold(None, |best: Option<(u8, Label)>, &neigh| {
      let diff = own.abs_diff(values[neigh]);
      match best {
        Some((best_diff, _)) if best_diff <= diff => best,
        _ => Some((diff, labels[neigh])),
      }
    })
    .map(|(_, label)| label)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn line_pixels_join_the_closest_region() {
    let relief = nd::arr2(&[[10u8, 40, 42, 90], [10, 40, 50, 90]]).into_dyn();
    let mut labels = nd::arr2(&[[1, 0, 0, 2], [1, 0, 0, 2]]).into_dyn();

    let left = merge_watershed_lines(&mut labels, relief.view(), Connectivity::Restricted).unwrap();
    assert_eq!(left, 0);
    //Column 1 only touches region 1 at first; column 2 only touches region 2
    assert_eq!(labels, nd::arr2(&[[1, 1, 2, 2], [1, 1, 2, 2]]).into_dyn());
  }

  #[test]
  fn thick_lines_take_several_passes() {
    let relief = nd::arr2(&[[0u8, 5, 5, 5, 5, 9]]).into_dyn();
    let mut labels = nd::arr2(&[[1, 0, 0, 0, 0, 2]]).into_dyn();
    let left = merge_watershed_lines(&mut labels, relief.view(), Connectivity::Full).unwrap();
    assert_eq!(left, 0);
    assert!(labels.iter().all(|&l| l > 0));
  }

  #[test]
  fn all_watershed_image_is_left_alone() {
    let relief = nd::ArrayD::<u8>::zeros(nd::IxDyn(&[3, 3]));
    let mut labels = nd::ArrayD::<Label>::zeros(nd::IxDyn(&[3, 3]));
    let left = merge_watershed_lines(&mut labels, relief.view(), Connectivity::Full).unwrap();
    assert_eq!(left, 9);
  }
}
