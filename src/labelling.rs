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

//! Connected-component labelling and region-size filtering.

use std::collections::VecDeque;

use ndarray as nd;
use rayon::prelude::*;

use crate::{
  error::{Result, WatershedError},
  grid::{Connectivity, Grid},
  relief::{from_flat, MAX_AXES},
  Label, UNLABELLED,
};

/// Label image of the connected components of a binary mask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labelling {
  /// `0` for background, `1..=nb_regions` for the components
  pub labels: nd::ArrayD<Label>,
  pub nb_regions: usize,
}

/// Labels the connected `true` regions of `mask`.
///
/// Regions are numbered `1..=nb_regions` in the order in which a raster scan
/// first meets them. Background pixels are labelled `0`. An all-`false` mask
/// gives `nb_regions == 0`.
pub fn label_components(mask: nd::ArrayViewD<bool>, connectivity: Connectivity) -> Result<Labelling> {
  if mask.ndim() > MAX_AXES {
    return Err(WatershedError::TooManyAxes { max: MAX_AXES, found: mask.ndim() });
  }
  let grid = Grid::new(mask.shape());
  let flat: Vec<bool> = mask.iter().copied().collect();
  let (labels, nb_regions) = label_flat(&flat, &grid, connectivity);
  Ok(Labelling { labels: from_flat(mask.shape(), labels)?, nb_regions })
}

/// Number of pixels carrying each label. Index `0` counts the unlabelled /
/// watershed pixels; negative labels and labels above `nb_regions` are not
/// counted.
pub fn region_sizes(labels: nd::ArrayViewD<Label>, nb_regions: usize) -> Vec<usize> {
  match labels.as_slice() {
    Some(flat) => sizes_flat(flat, nb_regions),
    None => sizes_flat(&labels.iter().copied().collect::<Vec<_>>(), nb_regions),
  }
}

/// Removes all regions with fewer than `min_size` pixels and renumbers the
/// survivors `1..` in their original order.
pub fn filter_small_regions(labelling: Labelling, min_size: usize) -> Labelling {
  let Labelling { mut labels, nb_regions } = labelling;
  let sizes = region_sizes(labels.view(), nb_regions);
  let (remap, survivors) = survivor_map(&sizes, min_size);
  labels.par_mapv_inplace(|label| relabel(&remap, label));
  Labelling { labels, nb_regions: survivors }
}

////////////////////////////////////////////////////////////////////////////////
//                         FLAT BUFFER IMPLEMENTATIONS                        //
////////////////////////////////////////////////////////////////////////////////

pub(crate) fn label_flat(mask: &[bool], grid: &Grid, connectivity: Connectivity) -> (Vec<Label>, usize) {
  let mut labels = vec![UNLABELLED; grid.len()];
  let mut walker = grid.walker(connectivity);
  let mut fifo = VecDeque::new();
  let mut nb_regions = 0;

  for start in 0..grid.len() {
    if !mask[start] || labels[start] != UNLABELLED {
      continue;
    }
    nb_regions += 1;
    let label = nb_regions as Label;
    labels[start] = label;
    fifo.push_back(start);

    //Breadth-first flood fill of the component
    while let Some(px) = fifo.pop_front() {
      for &neigh in walker.neighbours(px) {
        if mask[neigh] && labels[neigh] == UNLABELLED {
          labels[neigh] = label;
          fifo.push_back(neigh);
        }
      }
    }
  }

  (labels, nb_regions)
}

pub(crate) fn sizes_flat(labels: &[Label], nb_regions: usize) -> Vec<usize> {
  labels
    .par_iter()
    .fold(
      || vec![0usize; nb_regions + 1],
      |mut sizes, &label| {
        if label >= 0 && (label as usize) <= nb_regions {
          sizes[label as usize] += 1;
        }
        sizes
      },
    )
    .reduce(|| vec![0usize; nb_regions + 1], add_counts)
}

/// In-place version of `filter_small_regions`. Returns the new region count.
pub(crate) fn filter_flat(labels: &mut [Label], nb_regions: usize, min_size: usize) -> usize {
  let sizes = sizes_flat(labels, nb_regions);
  let (remap, survivors) = survivor_map(&sizes, min_size);
  labels.par_iter_mut().for_each(|label| *label = relabel(&remap, *label));
  survivors
}

/// Renumbers the distinct positive labels `1..=n` in increasing order of
/// their old value. Returns `n`.
pub(crate) fn compact_flat(labels: &mut [Label]) -> usize {
  let mut ids: Vec<Label> = labels.iter().copied().filter(|&label| label > 0).collect();
  ids.par_sort_unstable();
  ids.dedup();
  labels.par_iter_mut().filter(|label| **label > 0).for_each(|label| {
    if let Ok(position) = ids.binary_search(label) {
      *label = position as Label + 1;
    }
  });
  ids.len()
}

fn add_counts(mut a: Vec<usize>, b: Vec<usize>) -> Vec<usize> {
  a.iter_mut().zip(b).for_each(|(a, b)| *a += b);
  a
}

//Maps old labels onto new ones. The zeroth entry always maps to UNLABELLED
fn survivor_map(sizes: &[usize], min_size: usize) -> (Vec<Label>, usize) {
  let mut remap = vec![UNLABELLED; sizes.len()];
  let mut survivors = 0;
  for (label, &size) in sizes.iter().enumerate().skip(1) {
    if size >= min_size && size > 0 {
      survivors += 1;
      remap[label] = survivors as Label;
    }
  }
  (remap, survivors)
}

#[inline]
fn relabel(remap: &[Label], label: Label) -> Label {
  if label > 0 {
    remap.get(label as usize).copied().unwrap_or(UNLABELLED)
  } else {
    label
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn mask(rows: &[&str]) -> nd::ArrayD<bool> {
    let shape = (rows.len(), rows[0].len());
    nd::Array2::from_shape_fn(shape, |(y, x)| rows[y].as_bytes()[x] == b'#').into_dyn()
  }

  #[test]
  fn diagonal_touching_depends_on_connectivity() {
    let img = mask(&["#..##", ".##..", ".....", "....#"]);

    let four = label_components(img.view(), Connectivity::Restricted).unwrap();
    assert_eq!(four.nb_regions, 4);

    let eight = label_components(img.view(), Connectivity::Full).unwrap();
    assert_eq!(eight.nb_regions, 2);
    assert_eq!(eight.labels[[0, 0]], 1);
    assert_eq!(eight.labels[[0, 4]], 1);
    assert_eq!(eight.labels[[3, 4]], 2);
    assert_eq!(eight.labels[[2, 2]], 0);
  }

  #[test]
  fn empty_mask_has_no_regions() {
    let img = mask(&["...", "..."]);
    let labelling = label_components(img.view(), Connectivity::Full).unwrap();
    assert_eq!(labelling.nb_regions, 0);
    assert!(labelling.labels.iter().all(|&l| l == 0));
  }

  #[test]
  fn small_regions_are_dropped_and_renumbered() {
    let img = mask(&["#...###", "....###", "##.....", "##....#"]);
    let labelling = label_components(img.view(), Connectivity::Full).unwrap();
    assert_eq!(labelling.nb_regions, 4);
    assert_eq!(region_sizes(labelling.labels.view(), 4), vec![16, 1, 6, 4, 1]);

    let filtered = filter_small_regions(labelling, 2);
    assert_eq!(filtered.nb_regions, 2);
    assert_eq!(filtered.labels[[0, 0]], 0);
    assert_eq!(filtered.labels[[0, 5]], 1);
    assert_eq!(filtered.labels[[3, 1]], 2);
    assert_eq!(filtered.labels[[3, 6]], 0);
    let sizes = region_sizes(filtered.labels.view(), filtered.nb_regions);
    assert!(sizes[1..].iter().all(|&s| s >= 2));
  }
}
