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

//! Watershed by immersion (Vincent & Soille, 1991[^1]).
//!
//! The relief is flooded one grey level at a time. At every level the
//! existing basins are first grown into the newly submerged pixels in order
//! of their (geodesic) distance to the basins, and any submerged pixels that
//! are left over afterwards must be new regional minima, so they start new
//! basins. Pixels that are reached from two different basins at the same
//! distance become watershed pixels.
//!
//! [^1]: L. Vincent and P. Soille. **Watersheds in digital spaces: an
//! efficient algorithm based on immersion simulations.** *IEEE Transactions on
//! Pattern Analysis and Machine Intelligence*, 13(6):583–598, 1991.

use std::collections::VecDeque;

use crate::{
  flood::BYTE_LEVELS,
  grid::{Connectivity, Grid},
  Label, IGNORE, WSHED,
};

//Transient pixel states. These never leave this module.
const INIT: Label = -2;
const MASK: Label = -3;

/// Result of an immersion flood
#[derive(Debug, Clone)]
pub(crate) struct Immersed {
  pub labels: Vec<Label>,
  pub nb_regions: usize,
}

/// Floods `values` by immersion. `ignore[px]` excludes a pixel from the
/// flood; it is labelled `IGNORE` in the output.
pub(crate) fn immerse(values: &[u8], ignore: &[bool], grid: &Grid, connectivity: Connectivity) -> Immersed {
  let mut labels: Vec<Label> =
    ignore.iter().map(|&ignored| if ignored { IGNORE } else { INIT }).collect();
  let mut dist = vec![0usize; grid.len()];
  let mut walker = grid.walker(connectivity);
  //`None` is the fictitious pixel that separates distance shells
  let mut fifo: VecDeque<Option<usize>> = VecDeque::new();
  let mut current_label: Label = 0;

  //(1) Sort the pixels by grey level
  let mut levels: Vec<Vec<usize>> = vec![Vec::new(); BYTE_LEVELS];
  for (px, &value) in values.iter().enumerate() {
    if !ignore[px] {
      levels[value as usize].push(px);
    }
  }

  #[cfg(feature = "progress")]
  let bar = crate::set_up_bar(BYTE_LEVELS as u64, "water level");

  for level in levels.iter().filter(|level| !level.is_empty()) {
    //(2) Submerge this level. Pixels next to an existing basin or watershed
    //pixel are the starting shell of the basin extension.
    for &px in level {
      labels[px] = MASK;
      if walker.neighbours(px).iter().any(|&neigh| labels[neigh] >= WSHED) {
        dist[px] = 1;
        fifo.push_back(Some(px));
      }
    }

    //(3) Grow the basins shell by shell
    let mut current_dist = 1;
    fifo.push_back(None);
    loop {
      let px = match fifo.pop_front() {
        Some(Some(px)) => px,
        Some(None) if fifo.is_empty() => break,
        Some(None) => {
          fifo.push_back(None);
          current_dist += 1;
          continue;
        }
        None => break,
      };

      //Set when `px` became a watershed pixel because of a watershed neighbour
      //rather than because two basins met in it
      let mut by_watershed = false;
      for &neigh in walker.neighbours(px) {
        let neigh_label = labels[neigh];
        if dist[neigh] < current_dist && neigh_label >= WSHED {
          if neigh_label > WSHED {
            if labels[px] == MASK || (labels[px] == WSHED && by_watershed) {
              labels[px] = neigh_label;
            } else if labels[px] > WSHED && labels[px] != neigh_label {
              labels[px] = WSHED;
              by_watershed = false;
            }
          } else if labels[px] == MASK {
            labels[px] = WSHED;
            by_watershed = true;
          }
        } else if neigh_label == MASK && dist[neigh] == 0 {
          dist[neigh] = current_dist + 1;
          fifo.push_back(Some(neigh));
        }
      }
    }

    //(4) Whatever is still masked belongs to a new minimum
    for &px in level {
      dist[px] = 0;
      if labels[px] != MASK {
        continue;
      }
      current_label += 1;
      labels[px] = current_label;
      fifo.push_back(Some(px));
      while let Some(Some(member)) = fifo.pop_front() {
        for &neigh in walker.neighbours(member) {
          if labels[neigh] == MASK {
            labels[neigh] = current_label;
            fifo.push_back(Some(neigh));
          }
        }
      }
    }

    #[cfg(feature = "progress")]
    {
      bar.inc(1);
    }
  }

  #[cfg(feature = "progress")]
  {
    bar.finish_and_clear();
  }

  Immersed { labels, nb_regions: current_label as usize }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn run(rows: &[&[u8]], connectivity: Connectivity) -> Vec<Vec<Label>> {
    let shape = [rows.len(), rows[0].len()];
    let values: Vec<u8> = rows.iter().flat_map(|row| row.iter().copied()).collect();
    let ignore = vec![false; values.len()];
    let out = immerse(&values, &ignore, &Grid::new(&shape), connectivity);
    out.labels.chunks(shape[1]).map(|row| row.to_vec()).collect()
  }

  #[test]
  fn two_valleys_are_separated_by_a_ridge() {
    let labels = run(&[&[0, 1, 5, 1, 0], &[0, 1, 5, 1, 0], &[0, 1, 5, 1, 0]], Connectivity::Restricted);
    for row in labels {
      assert_eq!(row, vec![1, 1, WSHED, 2, 2]);
    }
  }

  #[test]
  fn equidistant_plateau_pixel_becomes_watershed() {
    let labels = run(&[&[0, 3, 3, 3, 0]], Connectivity::Full);
    assert_eq!(labels[0], vec![1, 1, WSHED, 2, 2]);
  }

  #[test]
  fn even_plateau_is_split_without_watershed() {
    let labels = run(&[&[0, 3, 3, 3, 3, 0]], Connectivity::Full);
    assert_eq!(labels[0], vec![1, 1, 1, 2, 2, 2]);
  }

  #[test]
  fn no_transient_states_survive() {
    let labels = run(&[&[9, 2, 9, 9], &[4, 4, 7, 1], &[3, 8, 8, 0], &[0, 5, 6, 2]], Connectivity::Full);
    assert!(labels.iter().flatten().all(|&l| l >= WSHED));
  }
}
