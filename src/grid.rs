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

//! Dimension-agnostic pixel indexing.
//!
//! Every transform in this crate works on flat, standard-layout buffers. A
//! pixel is identified by its linear index into such a buffer, and the
//! `Grid` converts between linear indices and coordinates. Neighbourhoods are
//! precomputed once per (shape, connectivity) pair as a table of coordinate
//! offsets, so the same flooding code serves 1D up to 4D images.

/// Which pixels count as neighbours of a pixel.
///
/// | dimensions | `Restricted` | `Full` |
/// |------------|--------------|--------|
/// | 2D         | 4            | 8      |
/// | 3D         | 6            | 26     |
/// | 4D         | 8            | 80     |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
  /// Only pixels that share a face (differ by one along a single axis)
  Restricted,
  /// All pixels in the surrounding 3^n block
  #[default]
  Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Grid {
  shape: Vec<usize>,
  strides: Vec<usize>,
  len: usize,
}

impl Grid {
  pub fn new(shape: &[usize]) -> Self {
    let mut strides = vec![1usize; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
      strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    Grid { shape: shape.to_vec(), strides, len: shape.iter().product() }
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.len
  }

  #[inline]
  pub fn ndim(&self) -> usize {
    self.shape.len()
  }

  #[inline]
  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  /// Writes the coordinates of `idx` into `coords`
  #[inline]
  pub fn unravel(&self, mut idx: usize, coords: &mut [usize]) {
    for (axis, stride) in self.strides.iter().enumerate() {
      coords[axis] = idx / stride;
      idx %= stride;
    }
  }

  pub fn coords_of(&self, idx: usize) -> Vec<usize> {
    let mut coords = vec![0; self.ndim()];
    self.unravel(idx, &mut coords);
    coords
  }

  /// Linear index of `coords`, or `None` if they fall outside the grid
  pub fn ravel(&self, coords: &[usize]) -> Option<usize> {
    if coords.len() != self.ndim() {
      return None;
    }
    coords.iter().zip(self.shape.iter()).zip(self.strides.iter()).try_fold(
      0usize,
      |acc, ((&c, &extent), &stride)| if c < extent { Some(acc + c * stride) } else { None },
    )
  }

  /// True if the pixel touches the edge of the image along any axis
  pub fn is_on_edge(&self, idx: usize, coords: &mut [usize]) -> bool {
    self.unravel(idx, coords);
    coords.iter().zip(self.shape.iter()).any(|(&c, &extent)| c == 0 || c + 1 == extent)
  }

  pub fn walker(&self, connectivity: Connectivity) -> NeighbourWalker<'_> {
    NeighbourWalker::new(self, connectivity)
  }
}

/// Precomputed neighbourhood of a grid, with scratch space for the lookups.
pub(crate) struct NeighbourWalker<'a> {
  grid: &'a Grid,
  deltas: Vec<Vec<isize>>,
  linear: Vec<isize>,
  coords: Vec<usize>,
  found: Vec<usize>,
}

impl<'a> NeighbourWalker<'a> {
  fn new(grid: &'a Grid, connectivity: Connectivity) -> Self {
    let deltas = offset_table(grid.ndim(), connectivity);
    let linear = deltas
      .iter()
      .map(|delta| {
        delta.iter().zip(grid.strides.iter()).map(|(&d, &stride)| d * stride as isize).sum()
      })
      .collect();
    NeighbourWalker {
      grid,
      found: Vec::with_capacity(deltas.len()),
      deltas,
      linear,
      coords: vec![0; grid.ndim()],
    }
  }

  /// In-bounds neighbours of `idx`, in offset-table order
  pub fn neighbours(&mut self, idx: usize) -> &[usize] {
    self.grid.unravel(idx, &mut self.coords);
    self.found.clear();
    'offsets: for (delta, &jump) in self.deltas.iter().zip(self.linear.iter()) {
      for ((&c, &d), &extent) in self.coords.iter().zip(delta.iter()).zip(self.grid.shape.iter()) {
        let moved = c as isize + d;
        if moved < 0 || moved >= extent as isize {
          continue 'offsets;
        }
      }
      self.found.push((idx as isize + jump) as usize);
    }
    &self.found
  }
}

/// All coordinate offsets of the requested connectivity in `ndim` dimensions,
/// in lexicographic order of the offsets themselves.
fn offset_table(ndim: usize, connectivity: Connectivity) -> Vec<Vec<isize>> {
  let mut table: Vec<Vec<isize>> = vec![Vec::new()];
  for _ in 0..ndim {
    table = table
      .into_iter()
      .flat_map(|prefix| {
        [-1isize, 0, 1].into_iter().map(move |d| {
          let mut next = prefix.clone();
          next.push(d);
          next
        })
      })
      .collect();
  }
  table
    .into_iter()
    .filter(|delta| {
      let moved = delta.iter().filter(|&&d| d != 0).count();
      match connectivity {
        Connectivity::Restricted => moved == 1,
        Connectivity::Full => moved > 0,
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn neighbourhood_sizes() {
    for (ndim, restricted, full) in [(1, 2, 2), (2, 4, 8), (3, 6, 26), (4, 8, 80)] {
      assert_eq!(offset_table(ndim, Connectivity::Restricted).len(), restricted);
      assert_eq!(offset_table(ndim, Connectivity::Full).len(), full);
    }
  }

  #[test]
  fn ravel_and_unravel_agree() {
    let grid = Grid::new(&[3, 4, 5]);
    assert_eq!(grid.len(), 60);
    assert_eq!(grid.ravel(&[2, 3, 4]), Some(59));
    assert_eq!(grid.ravel(&[1, 0, 2]), Some(22));
    assert_eq!(grid.ravel(&[3, 0, 0]), None);
    assert_eq!(grid.coords_of(22), vec![1, 0, 2]);
  }

  #[test]
  fn corner_pixels_have_fewer_neighbours() {
    let grid = Grid::new(&[4, 4]);
    let mut walker = grid.walker(Connectivity::Full);
    assert_eq!(walker.neighbours(0), &[1, 4, 5]);
    assert_eq!(walker.neighbours(5).len(), 8);

    let mut walker = grid.walker(Connectivity::Restricted);
    let mut corner = walker.neighbours(15).to_vec();
    corner.sort();
    assert_eq!(corner, vec![11, 14]);
  }

  #[test]
  fn edge_detection() {
    let grid = Grid::new(&[3, 3]);
    let mut scratch = [0; 2];
    assert!(grid.is_on_edge(0, &mut scratch));
    assert!(!grid.is_on_edge(4, &mut scratch));
  }
}
