//! Usage-range partitioning.
//!
//! The range table is monotonic, contiguous and inclusive on both ends:
//!
//! | usage        | partition |
//! |--------------|-----------|
//! | 0..=100      | 1         |
//! | 101..=500    | 2         |
//! | 501..=1000   | 3         |
//! | 1001..=1500  | 4         |
//! | anything else| 0 (unclassified) |
//!
//! Moving a boundary moves records between output files, so the table lives in
//! exactly one place: [`PartitionKey::range`].

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// One of the four fixed output partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartitionKey {
    P0To100,
    P101To500,
    P501To1000,
    P1001To1500,
}

impl PartitionKey {
    /// All partitions in id order.
    pub const ALL: [PartitionKey; 4] = [
        PartitionKey::P0To100,
        PartitionKey::P101To500,
        PartitionKey::P501To1000,
        PartitionKey::P1001To1500,
    ];

    /// Numeric partition id (1..=4). Zero is reserved for unclassified records.
    pub fn id(self) -> u8 {
        match self {
            PartitionKey::P0To100 => 1,
            PartitionKey::P101To500 => 2,
            PartitionKey::P501To1000 => 3,
            PartitionKey::P1001To1500 => 4,
        }
    }

    /// Zero-based position in [`PartitionKey::ALL`].
    pub fn index(self) -> usize {
        usize::from(self.id() - 1)
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1..=4 => Some(Self::ALL[usize::from(id - 1)]),
            _ => None,
        }
    }

    /// Inclusive usage range routed to this partition.
    pub fn range(self) -> RangeInclusive<i64> {
        match self {
            PartitionKey::P0To100 => 0..=100,
            PartitionKey::P101To500 => 101..=500,
            PartitionKey::P501To1000 => 501..=1000,
            PartitionKey::P1001To1500 => 1001..=1500,
        }
    }

    /// File stem of the partition's output file (e.g. `101_500`).
    pub fn file_stem(self) -> &'static str {
        match self {
            PartitionKey::P0To100 => "0_100",
            PartitionKey::P101To500 => "101_500",
            PartitionKey::P501To1000 => "501_1000",
            PartitionKey::P1001To1500 => "1001_1500",
        }
    }

    /// File name inside the output directory.
    pub fn file_name(self) -> String {
        format!("{}.csv", self.file_stem())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// Result of classifying a usage value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Partition(PartitionKey),
    /// Usage outside every range (sentinel id 0).
    Unclassified,
}

impl Classification {
    pub fn id(self) -> u8 {
        match self {
            Classification::Partition(key) => key.id(),
            Classification::Unclassified => 0,
        }
    }

    pub fn partition(self) -> Option<PartitionKey> {
        match self {
            Classification::Partition(key) => Some(key),
            Classification::Unclassified => None,
        }
    }
}

/// Map a usage value onto its partition.
pub fn classify(usage: i64) -> Classification {
    PartitionKey::ALL
        .into_iter()
        .find(|key| key.range().contains(&usage))
        .map_or(Classification::Unclassified, Classification::Partition)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_table_matches_exactly() {
        let usages = [0, 100, 101, 500, 501, 1000, 1001, 1500, 1501];
        let ids: Vec<u8> = usages.iter().map(|u| classify(*u).id()).collect();
        assert_eq!(ids, vec![1, 1, 2, 2, 3, 3, 4, 4, 0]);
    }

    #[test]
    fn negatives_and_huge_values_are_unclassified() {
        assert_eq!(classify(-1), Classification::Unclassified);
        assert_eq!(classify(i64::MIN), Classification::Unclassified);
        assert_eq!(classify(i64::MAX), Classification::Unclassified);
    }

    #[test]
    fn ranges_are_contiguous_and_disjoint() {
        for pair in PartitionKey::ALL.windows(2) {
            assert_eq!(*pair[0].range().end() + 1, *pair[1].range().start());
        }
        for usage in 0..=1500 {
            let hits = PartitionKey::ALL
                .iter()
                .filter(|key| key.range().contains(&usage))
                .count();
            assert_eq!(hits, 1, "usage {usage} matched {hits} partitions");
        }
    }

    #[test]
    fn ids_round_trip_and_name_files() {
        for key in PartitionKey::ALL {
            assert_eq!(PartitionKey::from_id(key.id()), Some(key));
            assert_eq!(PartitionKey::ALL[key.index()], key);
        }
        assert_eq!(PartitionKey::from_id(0), None);
        assert_eq!(PartitionKey::P501To1000.file_name(), "501_1000.csv");
        assert_eq!(PartitionKey::P1001To1500.to_string(), "1001_1500");
    }
}
