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

//! Bucket-based priority queue used by all flooding algorithms.

use std::collections::VecDeque;

/// A hierarchical queue: one FIFO bucket per integer priority level.
///
/// Items are handed out in non-decreasing priority order, and in insertion
/// order within a level. The level currently being served never goes down:
/// an item added with a priority below the current level is served at the
/// current level instead. This is what keeps the flood from going back to
/// levels it has already drained.
///
/// The queue starts out with `levels` buckets and grows when an item with a
/// higher priority is added. Geodesic flooding produces priorities well above
/// 255, so growing on demand keeps the bucket array as small as the actual
/// priorities allow.
#[derive(Debug, Clone)]
pub struct HierarchicalQueue<T> {
  buckets: Vec<VecDeque<T>>,
  current_level: usize,
  len: usize,
}

impl<T> HierarchicalQueue<T> {
  /// Creates a queue with `levels` empty buckets (`levels = 256` for byte reliefs)
  pub fn new(levels: usize) -> Self {
    HierarchicalQueue {
      buckets: (0..levels.max(1)).map(|_| VecDeque::new()).collect(),
      current_level: 0,
      len: 0,
    }
  }

  /// Adds `item` at `priority`, or at the current level if `priority` has
  /// already been passed. Returns the level the item was actually queued at.
  pub fn add(&mut self, item: T, priority: usize) -> usize {
    let level = priority.max(self.current_level);
    if level >= self.buckets.len() {
      self.buckets.resize_with(level + 1, VecDeque::new);
    }
    self.buckets[level].push_back(item);
    self.len += 1;
    level
  }

  /// Removes the oldest item of the lowest non-empty level, together with
  /// that level. Returns `None` once the queue is exhausted.
  pub fn pop(&mut self) -> Option<(T, usize)> {
    if self.len == 0 {
      return None;
    }
    while self.buckets[self.current_level].is_empty() {
      self.current_level += 1;
    }
    let item = self.buckets[self.current_level].pop_front()?;
    self.len -= 1;
    Some((item, self.current_level))
  }

  /// True if no bucket from the current level onward holds an item
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.len
  }

  /// The level that is currently being served
  #[inline]
  pub fn current_level(&self) -> usize {
    self.current_level
  }

  /// Number of allocated buckets
  pub fn levels(&self) -> usize {
    self.buckets.len()
  }
}
