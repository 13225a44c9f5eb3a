// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stagecast Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sub-region selections over a variable's global array.
//!
//! A selection is an offset and a count per dimension, describing one access
//! (a writer's contribution or a reader's request) within a single step.
//! Validation happens at construction; boundedness against a concrete global
//! shape is checked where the variable is known.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An offset + count sub-region of a global array.
///
/// Elements are linearized row-major: the last dimension varies fastest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    offset: Vec<usize>,
    count: Vec<usize>,
}

impl Selection {
    /// Build a selection, validating its shape-independent invariants:
    /// offset and count must have the same non-zero rank, and every count
    /// must be at least one (an empty access is caller misuse, not a no-op).
    pub fn new(offset: Vec<usize>, count: Vec<usize>) -> Result<Self> {
        if offset.len() != count.len() {
            return Err(Error::InvalidSelection {
                reason: format!(
                    "offset has rank {}, count has rank {}",
                    offset.len(),
                    count.len()
                ),
            });
        }
        if offset.is_empty() {
            return Err(Error::InvalidSelection {
                reason: "selection rank must be at least 1".into(),
            });
        }
        if let Some(d) = count.iter().position(|&c| c == 0) {
            return Err(Error::InvalidSelection {
                reason: format!("count is zero in dimension {d}"),
            });
        }
        Ok(Self { offset, count })
    }

    pub fn rank(&self) -> usize {
        self.offset.len()
    }

    pub fn offset(&self) -> &[usize] {
        &self.offset
    }

    pub fn count(&self) -> &[usize] {
        &self.count
    }

    /// Exclusive upper bound in dimension `d`.
    pub fn end(&self, d: usize) -> usize {
        self.offset[d] + self.count[d]
    }

    /// Total number of selected elements.
    pub fn num_elements(&self) -> usize {
        self.count.iter().product()
    }

    /// Check that the selection fits inside `shape`.
    pub fn check_within(&self, shape: &[usize]) -> Result<()> {
        if self.rank() != shape.len() {
            return Err(Error::InvalidSelection {
                reason: format!(
                    "selection rank {} does not match variable rank {}",
                    self.rank(),
                    shape.len()
                ),
            });
        }
        for d in 0..self.rank() {
            if self.end(d) > shape[d] {
                return Err(Error::InvalidSelection {
                    reason: format!(
                        "dimension {d}: offset {} + count {} exceeds extent {}",
                        self.offset[d], self.count[d], shape[d]
                    ),
                });
            }
        }
        Ok(())
    }

    /// Per-dimension intersection with `other`, or `None` if the regions are
    /// disjoint or the ranks differ.
    pub fn intersect(&self, other: &Selection) -> Option<Selection> {
        if self.rank() != other.rank() {
            return None;
        }
        let mut offset = Vec::with_capacity(self.rank());
        let mut count = Vec::with_capacity(self.rank());
        for d in 0..self.rank() {
            let lo = self.offset[d].max(other.offset[d]);
            let hi = self.end(d).min(other.end(d));
            if hi <= lo {
                return None;
            }
            offset.push(lo);
            count.push(hi - lo);
        }
        Some(Selection { offset, count })
    }

    /// Row-major linear element index of the global coordinate `point`
    /// relative to this selection's local buffer.
    ///
    /// `point` must lie inside the selection; used by the redistribution copy
    /// to map between source-local and destination-local layouts.
    pub(crate) fn linear_index(&self, point: &[usize]) -> usize {
        debug_assert_eq!(point.len(), self.rank());
        let mut idx = 0;
        for d in 0..self.rank() {
            debug_assert!(point[d] >= self.offset[d] && point[d] < self.end(d));
            idx = idx * self.count[d] + (point[d] - self.offset[d]);
        }
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_rank_mismatch_and_zero_counts() {
        assert!(Selection::new(vec![0, 0], vec![4]).is_err());
        assert!(Selection::new(vec![], vec![]).is_err());
        assert!(Selection::new(vec![0, 0], vec![4, 0]).is_err());
        assert!(Selection::new(vec![0, 0], vec![4, 1]).is_ok());
    }

    #[test]
    fn boundedness_against_shape() {
        let sel = Selection::new(vec![50, 60], vec![50, 60]).unwrap();
        assert!(sel.check_within(&[100, 120]).is_ok());
        assert!(sel.check_within(&[100, 119]).is_err());
        assert!(sel.check_within(&[100]).is_err());
    }

    #[test]
    fn intersection_of_overlapping_blocks() {
        let a = Selection::new(vec![0, 0], vec![50, 60]).unwrap();
        let b = Selection::new(vec![25, 30], vec![50, 60]).unwrap();
        let i = a.intersect(&b).unwrap();
        assert_eq!(i.offset(), &[25, 30]);
        assert_eq!(i.count(), &[25, 30]);
        // Symmetric.
        assert_eq!(b.intersect(&a).unwrap(), i);
    }

    #[test]
    fn disjoint_blocks_do_not_intersect() {
        let a = Selection::new(vec![0, 0], vec![50, 60]).unwrap();
        let b = Selection::new(vec![50, 0], vec![50, 60]).unwrap();
        assert!(a.intersect(&b).is_none());
    }

    #[test]
    fn linear_index_is_row_major() {
        let sel = Selection::new(vec![10, 20], vec![4, 5]).unwrap();
        assert_eq!(sel.linear_index(&[10, 20]), 0);
        assert_eq!(sel.linear_index(&[10, 21]), 1);
        assert_eq!(sel.linear_index(&[11, 20]), 5);
        assert_eq!(sel.linear_index(&[13, 24]), 19);
    }

    #[test]
    fn element_count() {
        let sel = Selection::new(vec![0, 0, 0], vec![2, 3, 4]).unwrap();
        assert_eq!(sel.num_elements(), 24);
        assert_eq!(sel.rank(), 3);
    }
}
