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

//! Adaptor between `ndarray` images and the flat buffers the flooding code
//! works on.
//!
//! A relief may carry one axis of spectral bands. The band axis is moved to
//! the back and the result is stored pixel-major: all bands of pixel 0, then
//! all bands of pixel 1 and so on. The remaining (spatial) axes form the
//! `Grid` that neighbourhoods are computed on.

use ndarray as nd;

use crate::{
  error::{Result, WatershedError},
  grid::Grid,
  Label, IGNORE, UNLABELLED,
};

/// X, Y, Z, T and one band axis
pub(crate) const MAX_AXES: usize = 5;

//Normalisation constant for byte reliefs
const BYTE_RANGE: f64 = u8::MAX as f64;
//Number of distinct hues on the colour circle
const HUE_STEPS: f64 = 256.0;

#[derive(Debug, Clone)]
pub(crate) struct Relief {
  pub grid: Grid,
  pub bands: usize,
  pub data: Vec<u8>,
  band_axis: Option<usize>,
  full_shape: Vec<usize>,
}

impl Relief {
  pub fn new(relief: nd::ArrayViewD<u8>, band_axis: Option<usize>) -> Result<Self> {
    let ndim = relief.ndim();
    if ndim > MAX_AXES {
      return Err(WatershedError::TooManyAxes { max: MAX_AXES, found: ndim });
    }
    if ndim == 0 {
      return Err(WatershedError::InvalidConfig("cannot flood a zero-dimensional relief".into()));
    }
    let full_shape = relief.shape().to_vec();

    match band_axis {
      None => Ok(Relief {
        grid: Grid::new(&full_shape),
        bands: 1,
        data: relief.iter().copied().collect(),
        band_axis,
        full_shape,
      }),
      Some(axis) if axis >= ndim => Err(WatershedError::InvalidBandAxis { axis, ndim }),
      Some(axis) if full_shape[axis] == 0 => Err(WatershedError::EmptyBandAxis { axis }),
      Some(axis) => {
        //Move the band axis to the back, iteration then yields pixel-major data
        let order: Vec<usize> = (0..ndim).filter(|&ax| ax != axis).chain([axis]).collect();
        let spatial: Vec<usize> = order[..ndim - 1].iter().map(|&ax| full_shape[ax]).collect();
        let data = relief.permuted_axes(order).iter().copied().collect();
        Ok(Relief {
          grid: Grid::new(&spatial),
          bands: full_shape[axis],
          data,
          band_axis,
          full_shape,
        })
      }
    }
  }

  #[inline]
  pub fn value(&self, idx: usize, band: usize) -> u8 {
    self.data[idx * self.bands + band]
  }

  /// Values of a single band, indexed by pixel
  pub fn band(&self, band: usize) -> Vec<u8> {
    (0..self.grid.len()).map(|idx| self.value(idx, band)).collect()
  }

  /// True where every band of the pixel is zero
  pub fn zero_pixels(&self) -> Vec<bool> {
    self.data.chunks(self.bands).map(|px| px.iter().all(|&v| v == 0)).collect()
  }

  pub fn spatial_shape(&self) -> &[usize] {
    self.grid.shape()
  }

  /// Errors if `shape` does not describe the spatial axes of this relief
  pub fn check_spatial(&self, shape: &[usize]) -> Result<()> {
    if shape != self.spatial_shape() {
      return Err(WatershedError::DimensionMismatch {
        expected: self.spatial_shape().to_vec(),
        found: shape.to_vec(),
      });
    }
    Ok(())
  }

  /// Starting labels of a flood: `IGNORE` outside of the mask, unlabelled
  /// everywhere else
  pub fn base_labels(&self, mask: Option<nd::ArrayViewD<bool>>) -> Result<Vec<Label>> {
    match mask {
      None => Ok(vec![UNLABELLED; self.grid.len()]),
      Some(mask) => {
        self.check_spatial(mask.shape())?;
        Ok(mask.iter().map(|&present| if present { UNLABELLED } else { IGNORE }).collect())
      }
    }
  }

  /// Distance between the spectra of two pixels, normalised to `[0, 1]`.
  ///
  /// The default metric is the root-mean-square difference over all bands.
  /// With `hue` set, every band is treated as an angle on the colour circle,
  /// with the 256 byte values spread evenly around it, and the shortest way
  /// around the circle is used instead.
  pub fn local_distance(&self, p: usize, q: usize, hue: bool) -> f64 {
    let (a, b) = (
      &self.data[p * self.bands..(p + 1) * self.bands],
      &self.data[q * self.bands..(q + 1) * self.bands],
    );
    let sum_sq: f64 = a
      .iter()
      .zip(b.iter())
      .map(|(&va, &vb)| {
        let diff = (va as f64 - vb as f64).abs();
        //Hues 0 and 256 are the same angle, 255 is one step short of it
        let diff = if hue {
          let turn = diff / HUE_STEPS;
          2.0 * turn.min(1.0 - turn)
        } else {
          diff / BYTE_RANGE
        };
        diff * diff
      })
      .sum();
    (sum_sq / self.bands as f64).sqrt()
  }

  /// Turns one flat buffer per band back into an array with the band axis in
  /// its original position.
  pub fn restore_bands<T: Copy>(&self, per_band: Vec<Vec<T>>) -> Result<nd::ArrayD<T>> {
    let Some(axis) = self.band_axis else {
      let flat = per_band.into_iter().next().unwrap_or_default();
      return from_flat(&self.full_shape, flat);
    };

    //Interleave the bands into pixel-major order
    let pixels = self.grid.len();
    let mut data = Vec::with_capacity(pixels * self.bands);
    for idx in 0..pixels {
      data.extend(per_band.iter().map(|band| band[idx]));
    }
    let mut moved_shape = self.spatial_shape().to_vec();
    moved_shape.push(self.bands);
    let moved = from_flat(&moved_shape, data)?;

    //Undo the permutation done in `Relief::new`
    let ndim = self.full_shape.len();
    let order: Vec<usize> = (0..ndim).filter(|&ax| ax != axis).chain([axis]).collect();
    let mut inverse = vec![0; ndim];
    for (position, &ax) in order.iter().enumerate() {
      inverse[ax] = position;
    }
    Ok(moved.permuted_axes(inverse).as_standard_layout().into_owned())
  }
}

/// Wraps a flat, standard-layout buffer in an array of the given shape
pub(crate) fn from_flat<T>(shape: &[usize], data: Vec<T>) -> Result<nd::ArrayD<T>> {
  let found = data.len();
  nd::ArrayD::from_shape_vec(nd::IxDyn(shape), data).map_err(|_| WatershedError::DimensionMismatch {
    expected: shape.to_vec(),
    found: vec![found],
  })
}
