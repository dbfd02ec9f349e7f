//! Image partition: contiguous horizontal strips, one per rank.
//!
//! `boundaries` has `size + 1` entries starting at 0 and ending at the image
//! height; rank `r` owns rows `boundaries[r]..boundaries[r + 1]`. Strips may
//! be empty, so every row has exactly one owner whatever the rank count.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePartition {
    boundaries: Vec<usize>,
}

impl ImagePartition {
    /// Equal row counts (the remainder spread over the later strips).
    pub fn uniform(height: usize, ranks: usize) -> Self {
        let ranks = ranks.max(1);
        Self {
            boundaries: (0..=ranks).map(|r| r * height / ranks).collect(),
        }
    }

    /// Strips holding roughly equal shares of `per_row` work.
    ///
    /// Cuts are made at the first row where the running total reaches the
    /// next share. No work at all falls back to [`ImagePartition::uniform`].
    pub fn balanced(per_row: &[u64], ranks: usize) -> Self {
        let ranks = ranks.max(1);
        let height = per_row.len();
        let total: u64 = per_row.iter().sum();
        if total == 0 {
            return Self::uniform(height, ranks);
        }

        let mut boundaries = Vec::with_capacity(ranks + 1);
        boundaries.push(0);
        let mut running = 0u64;
        let mut row = 0;
        for r in 1..ranks {
            // ceil(total * r / ranks) without overflow on realistic counts
            let target = (total as u128 * r as u128).div_ceil(ranks as u128) as u64;
            while row < height && running < target {
                running += per_row[row];
                row += 1;
            }
            boundaries.push(row);
        }
        boundaries.push(height);
        Self { boundaries }
    }

    pub fn from_boundaries(boundaries: Vec<usize>) -> Option<Self> {
        let valid = boundaries.len() >= 2
            && boundaries[0] == 0
            && boundaries.windows(2).all(|w| w[0] <= w[1]);
        valid.then_some(Self { boundaries })
    }

    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }

    pub fn num_partitions(&self) -> usize {
        self.boundaries.len() - 1
    }

    pub fn height(&self) -> usize {
        self.boundaries[self.boundaries.len() - 1]
    }

    /// Rows owned by `rank`; empty for out-of-range ranks.
    pub fn partition_rows(&self, rank: usize) -> Range<usize> {
        match (self.boundaries.get(rank), self.boundaries.get(rank + 1)) {
            (Some(&a), Some(&b)) => a..b,
            _ => 0..0,
        }
    }

    pub fn owner_of_row(&self, row: usize) -> Option<usize> {
        if row >= self.height() {
            return None;
        }
        // last boundary <= row; empty strips share a boundary with the owner
        Some(self.boundaries.partition_point(|&b| b <= row) - 1)
    }

    /// Ranks whose strip intersects rows `miny..=maxy` (clipped to the image).
    pub fn partitions_overlapping(&self, miny: i32, maxy: i32) -> Vec<usize> {
        let height = self.height() as i64;
        let lo = (miny as i64).max(0);
        let hi = (maxy as i64).min(height - 1);
        if lo > hi {
            return Vec::new();
        }
        let (Some(first), Some(last)) = (self.owner_of_row(lo as usize), self.owner_of_row(hi as usize))
        else {
            return Vec::new();
        };
        (first..=last)
            .filter(|&r| !self.partition_rows(r).is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_uniform() {
        let p = ImagePartition::uniform(100, 4);
        assert_eq!(p.boundaries(), &[0, 25, 50, 75, 100]);
        assert_eq!(p.partition_rows(2), 50..75);
        assert_eq!(p.owner_of_row(74), Some(2));
        assert_eq!(p.owner_of_row(100), None);
    }

    #[test]
    fn test_replication_across_boundary() {
        let p = ImagePartition::uniform(40, 2);
        assert_eq!(p.partitions_overlapping(10, 30), vec![0, 1]);
        assert_eq!(p.partitions_overlapping(20, 39), vec![1]);
        assert_eq!(p.partitions_overlapping(-5, 3), vec![0]);
        assert!(p.partitions_overlapping(45, 50).is_empty());
    }

    #[test]
    fn test_more_ranks_than_rows() {
        let p = ImagePartition::uniform(2, 5);
        assert_eq!(p.num_partitions(), 5);
        let owners: Vec<_> = (0..2).map(|r| p.owner_of_row(r).unwrap()).collect();
        assert!(p.partition_rows(owners[0]).contains(&0));
        assert!(p.partition_rows(owners[1]).contains(&1));
        assert_eq!(p.partitions_overlapping(0, 1).len(), 2);
    }

    #[test]
    fn test_balanced_follows_work() {
        let mut per_row = vec![0u64; 100];
        for row in per_row.iter_mut().skip(80) {
            *row = 10;
        }
        let p = ImagePartition::balanced(&per_row, 2);
        // half of the work is done by row 90
        assert_eq!(p.boundaries(), &[0, 90, 100]);
        assert_eq!(ImagePartition::balanced(&[0; 10], 2), ImagePartition::uniform(10, 2));
    }

    #[test]
    fn test_from_boundaries() {
        assert!(ImagePartition::from_boundaries(vec![0, 5, 5, 9]).is_some());
        assert!(ImagePartition::from_boundaries(vec![1, 5]).is_none());
        assert!(ImagePartition::from_boundaries(vec![0, 5, 3]).is_none());
    }

    fn check_complete(p: &ImagePartition, height: usize) -> Result<(), TestCaseError> {
        prop_assert_eq!(p.height(), height);
        let mut covered = vec![0u32; height];
        for r in 0..p.num_partitions() {
            for row in p.partition_rows(r) {
                covered[row] += 1;
            }
        }
        prop_assert!(covered.iter().all(|&c| c == 1));
        for row in 0..height {
            let owner = p.owner_of_row(row).unwrap();
            prop_assert!(p.partition_rows(owner).contains(&row));
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_uniform_is_complete(height in 0usize..300, ranks in 1usize..17) {
            check_complete(&ImagePartition::uniform(height, ranks), height)?;
        }

        #[test]
        fn prop_balanced_is_complete(
            per_row in prop::collection::vec(0u64..1000, 0..200),
            ranks in 1usize..17,
        ) {
            let p = ImagePartition::balanced(&per_row, ranks);
            prop_assert_eq!(p.num_partitions(), ranks);
            check_complete(&p, per_row.len())?;
        }
    }
}
