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

//! K-means clustering on top of the marker-based and geodesic floods.
//!
//! Every iteration floods the relief from one seed per cluster, then moves
//! each seed to the most central pixel of its region: the pixel furthest away
//! from anything that is not part of the region. The loop stops once the
//! seeds settle, start jumping back and forth between two positions, or after
//! a fixed number of iterations.

use ndarray as nd;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::{
  error::{Result, WatershedError},
  flood::{GeodesicRule, BYTE_LEVELS},
  grid::{Connectivity, Grid},
  markers::Markers,
  queue::HierarchicalQueue,
  relief::Relief,
  transform::{Segmentation, TransformBuilder, Watershed},
  Label, IGNORE,
};

/// Why the k-means loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  /// Total seed displacement dropped to the convergence threshold
  Converged,
  /// The seeds returned to where they were two iterations ago
  Oscillating,
  /// The iteration limit was reached first
  MaxIterations,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
  /// Segmentation produced by the last flood
  pub segmentation: Segmentation,
  /// Centre of every region of `segmentation`, region `i + 1` at index `i`
  pub centroids: Vec<Vec<usize>>,
  /// Number of floods performed
  pub iterations: usize,
  pub stop: StopReason,
}

/// Distance measure used to find the most central pixel of a region
#[derive(Debug, Clone)]
pub enum CentroidDistance<'a> {
  /// Number of steps between neighbouring pixels
  Hops,
  /// Geodesic distance over a relief, using the same local distance as the
  /// geodesic flood
  Geodesic {
    relief: nd::ArrayViewD<'a, u8>,
    band_axis: Option<usize>,
    hue: bool,
  },
}

/// Returns the most central pixel of every region of `labels`, or `None` for
/// region ids that have no pixels.
///
/// The centre of a region is the pixel with the largest distance to the
/// region's complement, where pixels on the edge of the image count as
/// bordering the complement. Ties go to the pixel that comes first in
/// standard (row-major) order.
pub fn recompute_centroids(
  labels: nd::ArrayViewD<Label>,
  distance: CentroidDistance,
  connectivity: Connectivity,
) -> Result<Vec<Option<Vec<usize>>>> {
  let grid = Grid::new(labels.shape());
  let flat: Vec<Label> = labels.iter().copied().collect();
  let nb_regions = flat.iter().copied().max().unwrap_or(0).max(0) as usize;

  let centres = match distance {
    CentroidDistance::Hops => centres_flat(&flat, nb_regions, &grid, connectivity, |_, _| 1),
    CentroidDistance::Geodesic { relief, band_axis, hue } => {
      let relief = Relief::new(relief, band_axis)?;
      relief.check_spatial(labels.shape())?;
      let rule = geodesic_rule(hue);
      centres_flat(&flat, nb_regions, &grid, connectivity, |p, q| {
        rule.step(relief.local_distance(p, q, hue))
      })
    }
  };
  Ok(centres.into_iter().map(|centre| centre.map(|px| grid.coords_of(px))).collect())
}

fn geodesic_rule(hue: bool) -> GeodesicRule {
  GeodesicRule { true_distance: true, hue, scale: u8::MAX as f64 }
}

//Multi-source shortest paths from the boundary of every region inwards.
//`step(p, q)` is the cost of moving from `p` to its neighbour `q`.
pub(crate) fn centres_flat(
  labels: &[Label],
  nb_regions: usize,
  grid: &Grid,
  connectivity: Connectivity,
  step: impl Fn(usize, usize) -> usize,
) -> Vec<Option<usize>> {
  let mut walker = grid.walker(connectivity);
  let mut coords = vec![0; grid.ndim()];
  let mut queue = HierarchicalQueue::new(BYTE_LEVELS);
  let mut cost = vec![usize::MAX; grid.len()];
  let mut done = vec![false; grid.len()];

  //(1) Region pixels touching the complement start at zero
  for (px, &label) in labels.iter().enumerate() {
    if label <= 0 {
      continue;
    }
    if grid.is_on_edge(px, &mut coords) || walker.neighbours(px).iter().any(|&neigh| labels[neigh] != label) {
      cost[px] = 0;
      queue.add(px, 0);
    }
  }

  //(2) Dijkstra, never leaving the region
  while let Some((px, _)) = queue.pop() {
    if done[px] {
      continue;
    }
    done[px] = true;
    let label = labels[px];
    for &neigh in walker.neighbours(px) {
      if done[neigh] || labels[neigh] != label {
        continue;
      }
      let offer = cost[px] + step(px, neigh);
      if offer < cost[neigh] {
        cost[neigh] = offer;
        queue.add(neigh, offer);
      }
    }
  }

  //(3) Furthest pixel per region, first one wins ties
  let mut centres: Vec<Option<(usize, usize)>> = vec![None; nb_regions];
  for (px, &label) in labels.iter().enumerate() {
    if label <= 0 {
      continue;
    }
    let region = label as usize - 1;
    let further = match centres[region] {
      Some((_, best)) => cost[px] > best,
      None => true,
    };
    if further {
      centres[region] = Some((px, cost[px]));
    }
  }
  centres.into_iter().map(|centre| centre.map(|(px, _)| px)).collect()
}

/// Builder for the k-means segmentation.
///
/// `new_watershed(k)` floods by relief intensity and places centres by hop
/// distance. `new_geodesic(k)` floods by geodesic distance and places centres
/// by geodesic distance over the same relief.
#[derive(Debug, Clone)]
pub struct KMeansBuilder {
  k: usize,
  geodesic: bool,
  max_iterations: usize,
  min_distance: f64,
  seeds: Option<Vec<Vec<usize>>>,
  rng_seed: Option<u64>,
  connectivity: Connectivity,
  band_axis: Option<usize>,
  hue_distance: Option<bool>,
  true_distance: Option<bool>,
}

impl KMeansBuilder {
  fn new(k: usize, geodesic: bool) -> Self {
    KMeansBuilder {
      k,
      geodesic,
      max_iterations: 100,
      min_distance: 1.0,
      seeds: None,
      rng_seed: None,
      connectivity: Connectivity::Full,
      band_axis: None,
      hue_distance: None,
      true_distance: None,
    }
  }

  pub fn new_watershed(k: usize) -> Self {
    Self::new(k, false)
  }

  pub fn new_geodesic(k: usize) -> Self {
    Self::new(k, true)
  }

  /// Maximum number of floods. Defaults to 100.
  pub fn set_max_iterations(mut self, max_iterations: usize) -> Self {
    self.max_iterations = max_iterations;
    self
  }

  /// Average distance (in pixels) a seed may still move between two
  /// iterations for the clustering to count as converged. Defaults to 1.
  pub fn set_min_distance(mut self, min_distance: f64) -> Self {
    self.min_distance = min_distance;
    self
  }

  /// Start from these seeds instead of `k` random pixels
  pub fn set_seeds(mut self, seeds: Vec<Vec<usize>>) -> Self {
    self.seeds = Some(seeds);
    self
  }

  /// Seed for the random number generator used to place the initial seeds
  pub fn set_rng_seed(mut self, seed: u64) -> Self {
    self.rng_seed = Some(seed);
    self
  }

  pub fn set_connectivity(mut self, connectivity: Connectivity) -> Self {
    self.connectivity = connectivity;
    self
  }

  pub fn set_band_axis(mut self, axis: usize) -> Self {
    self.band_axis = Some(axis);
    self
  }

  pub fn set_hue_distance(mut self, hue: bool) -> Self {
    self.hue_distance = Some(hue);
    self
  }

  pub fn set_true_geodesic_distance(mut self, true_distance: bool) -> Self {
    self.true_distance = Some(true_distance);
    self
  }

  pub fn build(self) -> Result<WatershedKMeans> {
    if self.k == 0 {
      return Err(WatershedError::InvalidConfig("k-means needs at least one cluster".into()));
    }
    if self.max_iterations == 0 {
      return Err(WatershedError::InvalidConfig("k-means needs at least one iteration".into()));
    }
    if !self.min_distance.is_finite() || self.min_distance < 0.0 {
      return Err(WatershedError::InvalidConfig(format!(
        "minimum distance must be a non-negative, finite number, found {}",
        self.min_distance
      )));
    }
    if let Some(seeds) = &self.seeds {
      if seeds.len() != self.k {
        return Err(WatershedError::InvalidConfig(format!(
          "expected {} seeds, found {}",
          self.k,
          seeds.len()
        )));
      }
    }

    let mut transform = if self.geodesic {
      let mut builder = TransformBuilder::new_geodesic();
      if let Some(hue) = self.hue_distance {
        builder = builder.set_hue_distance(hue);
      }
      if let Some(true_distance) = self.true_distance {
        builder = builder.set_true_geodesic_distance(true_distance);
      }
      builder
    } else {
      if self.hue_distance.is_some() || self.true_distance.is_some() {
        return Err(WatershedError::InvalidConfig(
          "geodesic distance options require `KMeansBuilder::new_geodesic`".into(),
        ));
      }
      TransformBuilder::new_marker_based()
    };
    transform = transform.set_connectivity(self.connectivity);
    if let Some(axis) = self.band_axis {
      transform = transform.set_band_axis(axis);
    }

    Ok(WatershedKMeans {
      k: self.k,
      max_iterations: self.max_iterations,
      min_distance: self.min_distance,
      seeds: self.seeds,
      rng_seed: self.rng_seed,
      connectivity: self.connectivity,
      band_axis: self.band_axis,
      geodesic_centres: self.geodesic.then(|| self.hue_distance.unwrap_or(false)),
      transform: transform.build()?,
    })
  }
}

/// K-means segmentation driven by a watershed flood. Build one with
/// `KMeansBuilder`.
pub struct WatershedKMeans {
  k: usize,
  max_iterations: usize,
  min_distance: f64,
  seeds: Option<Vec<Vec<usize>>>,
  rng_seed: Option<u64>,
  connectivity: Connectivity,
  band_axis: Option<usize>,
  //Some(hue) when centres are placed by geodesic distance
  geodesic_centres: Option<bool>,
  transform: Box<dyn Watershed + Send + Sync>,
}

impl WatershedKMeans {
  pub fn segment(&self, relief: nd::ArrayViewD<u8>) -> Result<KMeansResult> {
    self.segment_masked(relief, None)
  }

  /// Runs the k-means loop on the pixels of `relief` where `mask` is `true`
  pub fn segment_masked(
    &self,
    relief: nd::ArrayViewD<u8>,
    mask: Option<nd::ArrayViewD<bool>>,
  ) -> Result<KMeansResult> {
    let spectral = Relief::new(relief.view(), self.band_axis)?;
    let base = spectral.base_labels(mask.clone())?;
    let grid = &spectral.grid;

    let mut seeds = match &self.seeds {
      Some(seeds) => seeds.clone(),
      None => self.random_seeds(grid, &base)?,
    };
    let mut k = seeds.len();
    let mut two_back: Option<Vec<Vec<usize>>> = None;

    #[cfg(feature = "progress")]
    let bar = crate::set_up_bar(self.max_iterations as u64, "k-means iteration");

    let mut iteration = 0;
    loop {
      iteration += 1;

      //(1) Flood from the current seeds
      let mut segmentation =
        self.transform.transform_masked(relief.view(), Markers::Points(&seeds), mask.clone())?;

      //(2) Regions that were swallowed up take their seeds with them
      let kept = compact_regions(&mut segmentation);
      if kept.len() < k {
        tracing::warn!(
          "{} of {k} region(s) vanished in iteration {iteration}, continuing with k = {}",
          k - kept.len(),
          kept.len()
        );
        seeds = kept.iter().map(|&id| seeds[id - 1].clone()).collect();
        k = kept.len();
        two_back = None;
      }

      //(3) Move every seed to the centre of its region
      let labels: Vec<Label> = segmentation.labels.iter().copied().collect();
      let centres = match self.geodesic_centres {
        None => centres_flat(&labels, k, grid, self.connectivity, |_, _| 1),
        Some(hue) => {
          let rule = geodesic_rule(hue);
          centres_flat(&labels, k, grid, self.connectivity, |p, q| {
            rule.step(spectral.local_distance(p, q, hue))
          })
        }
      };
      let centroids: Vec<Vec<usize>> = centres
        .into_iter()
        .zip(seeds.iter())
        .map(|(centre, seed)| centre.map_or_else(|| seed.clone(), |px| grid.coords_of(px)))
        .collect();

      //(4) Decide whether to go on
      let stop = self.stop_reason(iteration, &seeds, two_back.as_deref(), &centroids);

      #[cfg(feature = "progress")]
      {
        bar.inc(1);
      }

      two_back = Some(std::mem::replace(&mut seeds, centroids));
      if let Some(stop) = stop {
        #[cfg(feature = "progress")]
        {
          bar.finish_and_clear();
        }
        tracing::debug!("k-means stopped after {iteration} iteration(s): {stop:?}");
        return Ok(KMeansResult { segmentation, centroids: seeds, iterations: iteration, stop });
      }
    }
  }

  /// Largest total seed displacement that still counts as converged for `k`
  /// clusters
  pub fn convergence_threshold(&self, k: usize) -> f64 {
    self.min_distance * k as f64
  }

  //`seeds` started the flood of this iteration, `two_back` the one before.
  //The number of clusters is taken from `centroids`, so a reduced k also
  //lowers the threshold.
  fn stop_reason(
    &self,
    iteration: usize,
    seeds: &[Vec<usize>],
    two_back: Option<&[Vec<usize>]>,
    centroids: &[Vec<usize>],
  ) -> Option<StopReason> {
    let threshold = self.convergence_threshold(centroids.len());
    let moved = displacement(seeds, centroids);
    tracing::debug!("k-means iteration {iteration}: seeds moved {moved:.2} pixel(s) in total");

    if moved <= threshold {
      Some(StopReason::Converged)
    } else if two_back.map_or(false, |old| {
      old.len() == centroids.len() && displacement(old, centroids) <= threshold
    }) {
      Some(StopReason::Oscillating)
    } else if iteration >= self.max_iterations {
      Some(StopReason::MaxIterations)
    } else {
      None
    }
  }

  fn random_seeds(&self, grid: &Grid, base: &[Label]) -> Result<Vec<Vec<usize>>> {
    let candidates: Vec<usize> = (0..grid.len()).filter(|&px| base[px] != IGNORE).collect();
    if candidates.len() < self.k {
      return Err(WatershedError::InvalidConfig(format!(
        "cannot place {} seeds on {} pixel(s)",
        self.k,
        candidates.len()
      )));
    }

    let mut rng = match self.rng_seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_entropy(),
    };
    let mut picked: Vec<usize> = candidates.choose_multiple(&mut rng, self.k).copied().collect();
    picked.sort_unstable();
    Ok(picked.into_iter().map(|px| grid.coords_of(px)).collect())
  }
}

//Renumbers the regions that still have pixels as 1..=n and returns their
//old ids in order
fn compact_regions(segmentation: &mut Segmentation) -> Vec<usize> {
  let sizes = segmentation.region_sizes();
  let kept: Vec<usize> = (1..sizes.len()).filter(|&id| sizes[id] > 0).collect();
  if kept.len() == segmentation.nb_regions {
    return kept;
  }

  let mut map = vec![0 as Label; sizes.len()];
  for (new, &old) in kept.iter().enumerate() {
    map[old] = new as Label + 1;
  }
  segmentation.labels.mapv_inplace(|label| if label > 0 { map[label as usize] } else { label });
  segmentation.nb_regions = kept.len();
  kept
}

//Sum of the euclidean distances between matching seeds
fn displacement(from: &[Vec<usize>], to: &[Vec<usize>]) -> f64 {
  from
    .iter()
    .zip(to.iter())
    .map(|(a, b)| {
      a.iter().zip(b.iter()).map(|(&x, &y)| (x as f64 - y as f64).powi(2)).sum::<f64>().sqrt()
    })
    .sum()
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn centre_of_square_region() {
    let mut labels = nd::Array2::<Label>::zeros((7, 7));
    labels.slice_mut(nd::s![1..6, 1..6]).fill(1);
    let centres = recompute_centroids(labels.view().into_dyn(), CentroidDistance::Hops, Connectivity::Restricted)
      .unwrap();
    assert_eq!(centres, vec![Some(vec![3, 3])]);
  }

  #[test]
  fn image_edge_counts_as_complement() {
    let labels = nd::Array2::<Label>::ones((5, 5));
    let centres =
      recompute_centroids(labels.view().into_dyn(), CentroidDistance::Hops, Connectivity::Full).unwrap();
    assert_eq!(centres, vec![Some(vec![2, 2])]);
  }

  #[test]
  fn ties_go_to_first_pixel() {
    //The four interior pixels are all one step away from the edge
    let labels = nd::Array2::<Label>::ones((4, 4));
    let centres =
      recompute_centroids(labels.view().into_dyn(), CentroidDistance::Hops, Connectivity::Full).unwrap();
    assert_eq!(centres, vec![Some(vec![1, 1])]);
  }

  #[test]
  fn empty_regions_have_no_centre() {
    let labels = nd::array![[1, 1, 3], [1, 1, 3]].into_dyn();
    let centres = recompute_centroids(labels.view(), CentroidDistance::Hops, Connectivity::Full).unwrap();
    assert_eq!(centres.len(), 3);
    assert!(centres[0].is_some());
    assert_eq!(centres[1], None);
    assert!(centres[2].is_some());
  }

  #[test]
  fn geodesic_centre_sits_behind_steep_edges() {
    //The only dark pixel can only be reached by a very expensive step
    let labels = nd::Array2::<Label>::ones((7, 7)).into_dyn();
    let mut relief = nd::Array2::<u8>::from_elem((7, 7), 255);
    relief[[2, 2]] = 0;
    let relief = relief.into_dyn();

    let hops = recompute_centroids(labels.view(), CentroidDistance::Hops, Connectivity::Restricted).unwrap();
    let geodesic = recompute_centroids(
      labels.view(),
      CentroidDistance::Geodesic { relief: relief.view(), band_axis: None, hue: false },
      Connectivity::Restricted,
    )
    .unwrap();
    assert_eq!(hops, vec![Some(vec![3, 3])]);
    assert_eq!(geodesic, vec![Some(vec![2, 2])]);
  }

  #[test]
  fn geodesic_relief_must_match_labels() {
    let labels = nd::Array2::<Label>::ones((3, 3)).into_dyn();
    let relief = nd::Array2::<u8>::zeros((3, 4)).into_dyn();
    let result = recompute_centroids(
      labels.view(),
      CentroidDistance::Geodesic { relief: relief.view(), band_axis: None, hue: false },
      Connectivity::Full,
    );
    assert!(matches!(result, Err(WatershedError::DimensionMismatch { .. })));
  }

  #[test]
  fn builder_rejects_bad_config() {
    assert!(KMeansBuilder::new_watershed(0).build().is_err());
    assert!(KMeansBuilder::new_watershed(2).set_max_iterations(0).build().is_err());
    assert!(KMeansBuilder::new_watershed(2).set_min_distance(f64::NAN).build().is_err());
    assert!(KMeansBuilder::new_watershed(2).set_seeds(vec![vec![0, 0]]).build().is_err());
    assert!(KMeansBuilder::new_watershed(2).set_hue_distance(true).build().is_err());
    assert!(KMeansBuilder::new_geodesic(2).set_hue_distance(true).build().is_ok());
  }

  #[test]
  fn random_seeds_are_reproducible() {
    let relief = nd::Array2::<u8>::from_elem((8, 8), 50).into_dyn();
    let kmeans = KMeansBuilder::new_watershed(4).set_rng_seed(42).set_max_iterations(3).build().unwrap();
    let first = kmeans.segment(relief.view()).unwrap();
    let second = kmeans.segment(relief.view()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.segmentation.nb_regions, 4);
  }

  #[test]
  fn seeds_in_ignored_area_reduce_k() {
    let relief = nd::Array2::<u8>::from_elem((6, 6), 10).into_dyn();
    let mut mask = nd::Array2::from_elem((6, 6), true);
    mask[[5, 5]] = false;
    let kmeans = KMeansBuilder::new_watershed(3)
      .set_seeds(vec![vec![0, 0], vec![5, 5], vec![0, 5]])
      .set_max_iterations(2)
      .build()
      .unwrap();
    let result = kmeans.segment_masked(relief.view(), Some(mask.view().into_dyn())).unwrap();
    assert_eq!(result.segmentation.nb_regions, 2);
    assert_eq!(result.centroids.len(), 2);
    assert!(result.segmentation.labels.iter().all(|&l| l == IGNORE || (1..=2).contains(&l)));
  }

  #[test]
  fn flat_image_converges() {
    let relief = nd::Array2::<u8>::from_elem((10, 10), 100).into_dyn();
    let kmeans = KMeansBuilder::new_watershed(2).set_seeds(vec![vec![0, 0], vec![9, 9]]).build().unwrap();
    let result = kmeans.segment(relief.view()).unwrap();
    assert_eq!(result.stop, StopReason::Converged);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.centroids, vec![vec![2, 2], vec![7, 7]]);
  }

  #[test]
  fn seeds_jumping_back_are_oscillating() {
    let kmeans = KMeansBuilder::new_watershed(2).set_min_distance(0.5).build().unwrap();
    let a = vec![vec![2, 2], vec![7, 7]];
    let b = vec![vec![2, 6], vec![7, 3]];

    //First iteration has nothing to compare with two steps back
    assert_eq!(kmeans.stop_reason(1, &a, None, &b), None);
    //Back where the seeds were two iterations ago
    assert_eq!(kmeans.stop_reason(2, &b, Some(a.as_slice()), &a), Some(StopReason::Oscillating));
    //Standing still wins over oscillating
    assert_eq!(kmeans.stop_reason(3, &a, Some(b.as_slice()), &a), Some(StopReason::Converged));
    //Two steps back with a different k cannot be compared
    assert_eq!(kmeans.stop_reason(4, &b, Some(&a[..1]), &a), None);
  }

  #[test]
  fn iteration_limit_stops_the_loop() {
    let kmeans = KMeansBuilder::new_watershed(2).set_max_iterations(3).build().unwrap();
    let a = vec![vec![0, 0], vec![9, 9]];
    let b = vec![vec![0, 9], vec![9, 0]];
    assert_eq!(kmeans.stop_reason(2, &a, None, &b), None);
    assert_eq!(kmeans.stop_reason(3, &a, None, &b), Some(StopReason::MaxIterations));
  }

  #[test]
  fn threshold_follows_reduced_k() {
    let kmeans = KMeansBuilder::new_watershed(3).set_min_distance(1.5).build().unwrap();
    assert_eq!(kmeans.convergence_threshold(3), 4.5);
    assert_eq!(kmeans.convergence_threshold(2), 3.0);

    //Both seeds move two pixels: converged for three clusters, not for two
    let seeds = vec![vec![0, 0], vec![5, 5]];
    let centroids = vec![vec![0, 2], vec![5, 3]];
    assert_eq!(kmeans.stop_reason(1, &seeds, None, &centroids), None);
    let three = vec![vec![0, 0], vec![5, 5], vec![9, 9]];
    let moved = vec![vec![0, 2], vec![5, 3], vec![9, 9]];
    assert_eq!(kmeans.stop_reason(1, &three, None, &moved), Some(StopReason::Converged));
  }

  #[test]
  fn too_few_pixels_for_seeds() {
    let relief = nd::Array2::<u8>::zeros((1, 2)).into_dyn();
    let kmeans = KMeansBuilder::new_watershed(3).build().unwrap();
    assert!(matches!(kmeans.segment(relief.view()), Err(WatershedError::InvalidConfig(_))));
  }
}
