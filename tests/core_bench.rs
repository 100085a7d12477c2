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

use hq_watershed::prelude::*;
use ndarray as nd;
use ndarray_rand::{rand_distr::Uniform, RandomExt};

#[test]
fn core_bench() {
  //Create a random uniform cube with eight bands along the last axis
  let rf = nd::Array3::<u8>::random((256, 256, 8), Uniform::new(0, 254)).into_dyn();

  //Set-up the watershed transform
  let watershed = TransformBuilder::new_immersion()
    .set_band_axis(2)
    .set_band_mode(BandMode::Independent)
    .set_merge_watershed_lines(true)
    .build()
    .unwrap();

  println!("Testing 1 to {} threads performance", rayon::current_num_threads());

  //Time with num cores
  let results: Vec<(f64, Segmentation)> = (1..=rayon::current_num_threads())
    .map(|num_threads| {
      //Set core count
      println!("Running algorithm with {num_threads} thread(s)");
      let pool = rayon::ThreadPoolBuilder::new().num_threads(num_threads).build().unwrap();
      //Time watershed
      let start = std::time::Instant::now();
      let output = pool.install(|| watershed.transform(rf.view(), Markers::Auto)).unwrap();
      (start.elapsed().as_secs_f64(), output)
    })
    .collect();

  //Thread count must not change the answer
  assert!(results.windows(2).all(|pair| pair[0].1 == pair[1].1));

  //Print per run results
  for (threads, time) in results.iter().enumerate().map(|(i, (t, _))| (i + 1, t)) {
    println!("{threads:02} threads = {time:000.02}s");
  }

  //Print total results
  let average = (1.0 / (results.len() as f64)) * results.iter().map(|(t, _)| t).sum::<f64>();
  println!("Average time: {average:.02}");
}
