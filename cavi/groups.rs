//! # Coefficient Groups
//!
//! A partition of the design columns `{0, ..., p-1}` into disjoint, non-empty groups.
//! Callers label every column with an arbitrary integer; the partition enumerates the
//! distinct labels once, in ascending order, and that order is the sweep order of the
//! coordinate ascent. Update order shapes the exact trajectory, so it must not depend
//! on anything but the labels themselves.

use itertools::Itertools;

/// One group of coefficients: its caller-facing label and its member column indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub label: i64,
    /// Member indices in ascending order.
    pub members: Vec<usize>,
}

impl Group {
    /// Number of coefficients in the group (`m_k` in the slab normalizing constant).
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Clone)]
pub struct GroupPartition {
    labels: Vec<i64>,
    groups: Vec<Group>,
}

impl GroupPartition {
    /// Builds the partition from per-column labels. Groups are ordered by ascending label.
    pub fn from_labels(labels: &[i64]) -> Self {
        let unique: Vec<i64> = labels.iter().copied().sorted_unstable().dedup().collect();

        let mut groups: Vec<Group> = unique
            .iter()
            .map(|&label| Group {
                label,
                members: Vec::new(),
            })
            .collect();

        for (column, label) in labels.iter().enumerate() {
            // `unique` is sorted and contains every label, so the search always hits.
            let position = unique.binary_search(label).unwrap_or_default();
            groups[position].members.push(column);
        }

        Self {
            labels: labels.to_vec(),
            groups,
        }
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn labels(&self) -> &[i64] {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_are_ordered_by_label_not_by_first_appearance() {
        let partition = GroupPartition::from_labels(&[7, 3, 7, -1, 3]);

        let labels: Vec<i64> = partition.groups().iter().map(|g| g.label).collect();
        assert_eq!(labels, vec![-1, 3, 7]);
        assert_eq!(partition.groups()[0].members, vec![3]);
        assert_eq!(partition.groups()[1].members, vec![1, 4]);
        assert_eq!(partition.groups()[2].members, vec![0, 2]);
    }

    #[test]
    fn labels_are_kept_in_column_order() {
        let partition = GroupPartition::from_labels(&[2, 1, 1]);

        assert_eq!(partition.num_groups(), 2);
        assert_eq!(partition.labels(), &[2, 1, 1]);
        assert_eq!(partition.groups()[0].size(), 2);
        assert_eq!(partition.groups()[1].members, vec![0]);
    }

    #[test]
    fn empty_labels_give_empty_partition() {
        let partition = GroupPartition::from_labels(&[]);
        assert_eq!(partition.num_groups(), 0);
        assert!(partition.labels().is_empty());
    }
}
