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

//! Error type shared by all transforms in this crate.
//!
//! Only precondition violations are errors. Degenerate topology (an image
//! pixel that no marker can reach, a k-means region that disappears) is part
//! of the normal output of a transform and is reported through `tracing`.

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, WatershedError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatershedError {
  /// Two arrays that should describe the same pixels have different shapes
  #[error("dimension mismatch: expected shape {expected:?}, found {found:?}")]
  DimensionMismatch { expected: Vec<usize>, found: Vec<usize> },

  /// Images may have at most five axes (X, Y, Z, T and a band axis)
  #[error("images may have at most {max} axes, found {found}")]
  TooManyAxes { max: usize, found: usize },

  /// The configured band axis does not exist in the relief
  #[error("band axis {axis} does not exist in a relief with {ndim} axes")]
  InvalidBandAxis { axis: usize, ndim: usize },

  /// The band axis exists but holds no bands
  #[error("band axis {axis} has extent zero")]
  EmptyBandAxis { axis: usize },

  /// Flooding needs at least one marker region (after size filtering)
  #[error("no marker regions left to flood from (minimum marker size: {min_size}px)")]
  EmptyMarkers { min_size: usize },

  /// A marker lies outside the image or carries a negative label
  #[error("invalid marker: {0}")]
  InvalidMarker(String),

  /// Two seed points were placed on the same pixel
  #[error("marker regions {first} and {second} overlap at pixel {index:?}")]
  OverlappingMarkers { first: usize, second: usize, index: Vec<usize> },

  /// The selected transform does not know how to use the supplied markers
  #[error("the {transform} transform does not accept {markers} markers")]
  UnsupportedMarkers { transform: &'static str, markers: &'static str },

  /// A builder was configured with options that cannot work together
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
}
