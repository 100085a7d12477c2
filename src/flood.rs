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

//! Marker-driven flooding on the hierarchical queue.
//!
//! Both floods in this module start from labelled marker regions and grow
//! them in order of increasing priority until every reachable pixel carries
//! the label of the region that reached it first. Neither produces watershed
//! lines; see the `immersion` module for that.

use crate::{
  grid::{Connectivity, Grid, NeighbourWalker},
  queue::HierarchicalQueue,
  relief::Relief,
  Label, IGNORE, UNLABELLED,
};

//Number of queue levels for byte reliefs
pub(crate) const BYTE_LEVELS: usize = 256;

/// Result of one flood
#[derive(Debug, Clone)]
pub(crate) struct Flooded {
  pub labels: Vec<Label>,
  /// Band through which every pixel was reached (joint multi-band floods)
  pub source_band: Vec<usize>,
  /// Number of queue entries processed
  pub popped: usize,
}

/// How the geodesic flood turns spectral differences into queue priorities
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GeodesicRule {
  /// Accumulate steps along the path (`true`) or flood on the largest step
  /// encountered so far (`false`)
  pub true_distance: bool,
  /// Use the circular hue distance instead of the RMS band distance
  pub hue: bool,
  /// Multiplier applied to the normalised RMS distance
  pub scale: f64,
}

impl GeodesicRule {
  /// Priority increment for a step between two pixels at distance
  /// `distance` (normalised to `[0, 1]`).
  ///
  /// RMS steps cost at least one level, so that flat areas are still flooded
  /// in order of path length. Hue steps are rounded up onto the byte range.
  #[inline]
  pub fn step(&self, distance: f64) -> usize {
    if self.hue {
      (u8::MAX as f64 * distance).ceil() as usize
    } else {
      (self.scale * distance) as usize + 1
    }
  }

  #[inline]
  pub fn combine(&self, from: usize, step: usize) -> usize {
    if self.true_distance {
      from + step
    } else {
      from.max(step)
    }
  }
}

/// Adds every marker pixel that borders an unlabelled pixel to the queue at
/// priority zero, once per band.
fn seed_queue(
  labels: &[Label],
  bands: usize,
  walker: &mut NeighbourWalker,
  queue: &mut HierarchicalQueue<usize>,
) {
  for (px, &label) in labels.iter().enumerate() {
    if label <= UNLABELLED {
      continue;
    }
    if walker.neighbours(px).iter().any(|&neigh| labels[neigh] == UNLABELLED) {
      (0..bands).for_each(|band| {
        queue.add(px * bands + band, 0);
      });
    }
  }
}

/// Meyer-style flooding where a pixel's priority is its own relief value.
///
/// `values` holds `bands` values per pixel. With more than one band every
/// pixel is queued once per band at that band's value, and the pixel
/// inherits the label of whichever neighbour's band entry reached it first.
/// The band of that entry is recorded as the pixel's source band. For a
/// single band this is the classic marker-based watershed.
///
/// A pixel is labelled when it is first queued. Because it is queued at its
/// own value, the order in which its neighbours are processed already
/// respects flooding order, and no pixel ever has to be relabelled.
pub(crate) fn flood_intensity(
  values: &[u8],
  bands: usize,
  grid: &Grid,
  connectivity: Connectivity,
  mut labels: Vec<Label>,
) -> Flooded {
  let mut walker = grid.walker(connectivity);
  let mut queue = HierarchicalQueue::new(BYTE_LEVELS);
  let mut source_band = vec![0usize; grid.len()];
  let mut popped = 0usize;

  #[cfg(feature = "progress")]
  let bar = crate::set_up_bar(grid.len() as u64, "flooded");

  seed_queue(&labels, bands, &mut walker, &mut queue);

  while let Some((entry, _level)) = queue.pop() {
    popped += 1;
    let (px, band) = (entry / bands, entry % bands);
    let label = labels[px];
    for &neigh in walker.neighbours(px) {
      if labels[neigh] != UNLABELLED {
        continue;
      }
      labels[neigh] = label;
      source_band[neigh] = band;
      for b in 0..bands {
        queue.add(neigh * bands + b, values[neigh * bands + b] as usize);
      }
      #[cfg(feature = "progress")]
      {
        bar.inc(1);
      }
    }
  }

  #[cfg(feature = "progress")]
  {
    bar.finish_and_clear();
  }

  Flooded { labels, source_band, popped }
}

/// Flooding by geodesic distance over the relief.
///
/// The priority of a pixel is the cost of the cheapest path from any marker,
/// where every step between neighbours costs `rule.step(local_distance)`.
/// Labels are tentative until a pixel is popped: a pixel that is offered a
/// strictly cheaper path before that moment switches to the cheaper region.
pub(crate) fn flood_geodesic(
  relief: &Relief,
  connectivity: Connectivity,
  rule: GeodesicRule,
  mut labels: Vec<Label>,
) -> Flooded {
  let grid = &relief.grid;
  let mut walker = grid.walker(connectivity);
  let mut queue = HierarchicalQueue::new(BYTE_LEVELS);
  let mut cost = vec![usize::MAX; grid.len()];
  let mut done = vec![false; grid.len()];
  let mut popped = 0usize;

  #[cfg(feature = "progress")]
  let bar = crate::set_up_bar(grid.len() as u64, "flooded");

  for (px, &label) in labels.iter().enumerate() {
    if label > UNLABELLED {
      cost[px] = 0;
    }
  }
  seed_queue(&labels, 1, &mut walker, &mut queue);

  while let Some((px, _level)) = queue.pop() {
    if done[px] {
      //Stale entry, this pixel was reached more cheaply before
      continue;
    }
    done[px] = true;
    popped += 1;

    #[cfg(feature = "progress")]
    {
      bar.inc(1);
    }

    for &neigh in walker.neighbours(px) {
      if done[neigh] || labels[neigh] == IGNORE {
        continue;
      }
      let step = rule.step(relief.local_distance(px, neigh, rule.hue));
      let offer = rule.combine(cost[px], step);
      if offer < cost[neigh] {
        cost[neigh] = offer;
        labels[neigh] = labels[px];
        queue.add(neigh, offer);
      }
    }
  }

  #[cfg(feature = "progress")]
  {
    bar.finish_and_clear();
  }

  tracing::debug!("geodesic flood used {} queue levels", queue.levels());
  Flooded { labels, source_band: vec![0; grid.len()], popped }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray as nd;

  #[test]
  fn flat_relief_splits_by_chessboard_distance() {
    let grid = Grid::new(&[5, 5]);
    let values = vec![7u8; 25];
    let mut labels = vec![UNLABELLED; 25];
    labels[0] = 1;
    labels[24] = 2;

    let out = flood_intensity(&values, 1, &grid, Connectivity::Full, labels);
    assert!(out.labels.iter().all(|&l| l == 1 || l == 2));
    //(0,4) is equally far from both markers; the lower label wins ties
    assert_eq!(out.labels[4], 1);
    assert_eq!(out.labels[6], 1);
    assert_eq!(out.labels[18], 2);
  }

  #[test]
  fn ignored_pixels_block_the_flood() {
    let grid = Grid::new(&[1, 5]);
    let values = vec![0u8, 1, 1, 1, 1];
    let labels = vec![1, UNLABELLED, IGNORE, UNLABELLED, UNLABELLED];
    let out = flood_intensity(&values, 1, &grid, Connectivity::Full, labels);
    assert_eq!(out.labels, vec![1, 1, IGNORE, UNLABELLED, UNLABELLED]);
  }

  #[test]
  fn joint_flood_records_the_source_band() {
    //Band 1 is low on the right, band 0 is low on the left
    let band0 = [0u8, 10, 10, 200, 200];
    let band1 = [0u8, 200, 200, 10, 10];
    let values: Vec<u8> = band0.iter().zip(band1.iter()).flat_map(|(&a, &b)| [a, b]).collect();
    let grid = Grid::new(&[5]);
    let labels = vec![1, UNLABELLED, UNLABELLED, UNLABELLED, UNLABELLED];
    let out = flood_intensity(&values, 2, &grid, Connectivity::Full, labels);
    assert!(out.labels.iter().all(|&l| l == 1));
    assert_eq!(out.source_band[1], 0);
    assert_eq!(out.source_band[2], 0);
    //Pixel 3 is reached when pixel 2 is expanded through band 0 (value 10)
    assert_eq!(out.source_band[3], 0);
    //Pixel 4 is reached when pixel 3 is expanded through band 1 (value 10)
    assert_eq!(out.source_band[4], 1);
  }

  #[test]
  fn geodesic_steps() {
    let rule = GeodesicRule { true_distance: true, hue: false, scale: 255.0 };
    assert_eq!(rule.step(0.0), 1);
    assert_eq!(rule.combine(10, 5), 15);
    let rule = GeodesicRule { true_distance: false, hue: true, scale: 255.0 };
    assert_eq!(rule.step(0.0), 0);
    assert_eq!(rule.step(0.5), 128);
    assert_eq!(rule.combine(10, 5), 10);
    assert_eq!(rule.combine(10, 50), 50);
  }

  #[test]
  fn geodesic_flood_prefers_the_cheaper_path() {
    //One marker at each end. The left marker has to climb a steep step.
    let img = nd::arr1(&[0u8, 250, 250, 250, 240, 240]).into_dyn();
    let relief = Relief::new(img.view(), None).unwrap();
    let labels = vec![1, UNLABELLED, UNLABELLED, UNLABELLED, UNLABELLED, 2];
    let rule = GeodesicRule { true_distance: true, hue: false, scale: 255.0 };
    let out = flood_geodesic(&relief, Connectivity::Full, rule, labels);
    assert_eq!(out.labels, vec![1, 2, 2, 2, 2, 2]);
  }
}
