use std::collections::HashSet;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SelectionError};
use crate::schema::chain;
use crate::split::Splits;
use crate::table::ChainTable;

/// How a new split block is matched against the accumulated one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinGranularity {
    /// Rows match when every column except `split` is equal, list columns
    /// compared in stored order.
    #[default]
    FullRow,
    /// Rows match on chain `id` alone; the accumulated row values are kept.
    PrimaryKey,
}

/// Per-split tables carried across repeated split invocations.
///
/// Owned by the caller and passed into each split call, so independent
/// selections never share accumulated state.
#[derive(Debug, Clone)]
pub struct SplitAccumulator {
    join: JoinGranularity,
    splits: Vec<(String, Option<ChainTable>)>,
}

impl SplitAccumulator {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>, join: JoinGranularity) -> Self {
        Self {
            join,
            splits: names.into_iter().map(|n| (n.into(), None)).collect(),
        }
    }

    pub fn join(&self) -> JoinGranularity {
        self.join
    }

    /// Accumulated table for `name`, `None` before the first accumulation.
    pub fn get(&self, name: &str) -> Option<&ChainTable> {
        self.splits
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, table)| table.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.splits.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Fold freshly computed splits into the accumulated ones and return the
    /// accumulated tables, in the accumulator's split order.
    ///
    /// On error the accumulated tables are left as they were.
    pub fn accumulate(&mut self, fresh: Splits) -> Result<Splits> {
        let mut merged = Vec::with_capacity(fresh.len());
        for (name, block) in fresh {
            let slot = self
                .splits
                .iter()
                .position(|(n, _)| *n == name)
                .ok_or_else(|| SelectionError::Config(format!("Unknown split '{name}'")))?;

            let table = match &self.splits[slot].1 {
                Some(previous) => merge_splits(previous, &block, &name, self.join)?,
                None => block,
            };
            log::debug!("Accumulated split '{name}' holds {} rows", table.height());
            merged.push((slot, table));
        }
        for (slot, table) in merged {
            self.splits[slot].1 = Some(table);
        }

        Ok(Splits::new(
            self.splits
                .iter()
                .filter_map(|(n, t)| t.clone().map(|t| (n.clone(), t)))
                .collect(),
        ))
    }

    /// Drop every accumulated table.
    pub fn clear(&mut self) {
        for (_, table) in &mut self.splits {
            *table = None;
        }
    }
}

/// Inner join of an accumulated split with a new block of the same split.
///
/// Rows keep the order and values of `previous`; `split` is set to `split`.
pub fn merge_splits(
    previous: &ChainTable,
    fresh: &ChainTable,
    split: &str,
    join: JoinGranularity,
) -> Result<ChainTable> {
    let merged = match join {
        JoinGranularity::FullRow => {
            let fresh_keys: HashSet<String> = fresh.row_keys()?.into_iter().collect();
            let mask: Vec<bool> = previous
                .row_keys()?
                .iter()
                .map(|key| fresh_keys.contains(key))
                .collect();
            previous.filter_mask(&mask)?
        }
        JoinGranularity::PrimaryKey => {
            let fresh_ids = fresh
                .dataframe()
                .column(chain::ID)?
                .as_materialized_series()
                .clone();
            previous.filter_expr(col(chain::ID).is_in(lit(fresh_ids), false))?
        }
    };
    merged.with_split(split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ChainRecord;
    use crate::table::tests::record;

    fn table(records: &[ChainRecord]) -> ChainTable {
        ChainTable::from_records(records).unwrap()
    }

    fn ids(t: &ChainTable) -> Vec<String> {
        t.ids().unwrap()
    }

    #[test]
    fn first_accumulation_stores_the_block() {
        let mut acc = SplitAccumulator::new(["train", "test"], JoinGranularity::FullRow);
        assert!(acc.get("train").is_none());

        let fresh = Splits::new(vec![
            ("train".into(), table(&[record("1abc_A")])),
            ("test".into(), table(&[record("2abc_A")])),
        ]);
        let out = acc.accumulate(fresh).unwrap();
        assert_eq!(ids(out.get("train").unwrap()), vec!["1abc_A"]);
        assert_eq!(ids(acc.get("test").unwrap()), vec!["2abc_A"]);
    }

    #[test]
    fn later_accumulations_intersect() {
        let mut acc = SplitAccumulator::new(["train"], JoinGranularity::FullRow);
        let first = table(&[record("1abc_A"), record("2abc_A"), record("3abc_A")]);
        acc.accumulate(Splits::new(vec![("train".into(), first)])).unwrap();

        let second = table(&[record("3abc_A"), record("2abc_A"), record("9xyz_A")]);
        let out = acc.accumulate(Splits::new(vec![("train".into(), second)])).unwrap();

        assert_eq!(ids(out.get("train").unwrap()), vec!["2abc_A", "3abc_A"]);
        assert!(out
            .get("train")
            .unwrap()
            .records()
            .unwrap()
            .iter()
            .all(|r| r.split == "train"));
    }

    #[test]
    fn full_row_join_drops_rows_that_changed() {
        let before = record("1abc_A");
        let mut after = record("1abc_A");
        after.resolution = Some(2.0);

        let merged = merge_splits(
            &table(&[before, record("2abc_A")]),
            &table(&[after, record("2abc_A")]),
            "train",
            JoinGranularity::FullRow,
        )
        .unwrap();
        assert_eq!(ids(&merged), vec!["2abc_A"]);

        let mut hem_zn = record("1abc_A");
        hem_zn.ligands = vec!["HEM".into(), "ZN".into()];
        let mut zn_hem = record("1abc_A");
        zn_hem.ligands = vec!["ZN".into(), "HEM".into()];
        let same = merge_splits(
            &table(&[hem_zn.clone()]),
            &table(&[hem_zn.clone()]),
            "train",
            JoinGranularity::FullRow,
        )
        .unwrap();
        assert_eq!(same.height(), 1);
        let reordered = merge_splits(
            &table(&[hem_zn]),
            &table(&[zn_hem]),
            "train",
            JoinGranularity::FullRow,
        )
        .unwrap();
        assert!(reordered.is_empty());
    }

    #[test]
    fn primary_key_join_keeps_rows_that_changed() {
        let before = record("1abc_A");
        let mut after = record("1abc_A");
        after.resolution = Some(2.0);

        let merged = merge_splits(
            &table(&[before.clone(), record("2abc_A")]),
            &table(&[after]),
            "val",
            JoinGranularity::PrimaryKey,
        )
        .unwrap();
        let rows = merged.records().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].resolution, before.resolution);
        assert_eq!(rows[0].split, "val");
    }

    #[test]
    fn unknown_split_name_is_rejected() {
        let mut acc = SplitAccumulator::new(["train"], JoinGranularity::FullRow);
        let fresh = Splits::new(vec![("holdout".into(), table(&[record("1abc_A")]))]);
        assert!(matches!(acc.accumulate(fresh), Err(SelectionError::Config(_))));
    }

    #[test]
    fn failed_accumulation_leaves_stored_splits_untouched() {
        let mut acc = SplitAccumulator::new(["train"], JoinGranularity::FullRow);
        acc.accumulate(Splits::new(vec![(
            "train".into(),
            table(&[record("1abc_A"), record("2abc_A")]),
        )]))
        .unwrap();

        let fresh = Splits::new(vec![
            ("train".into(), table(&[record("2abc_A")])),
            ("test".into(), table(&[record("9xyz_A")])),
        ]);
        assert!(acc.accumulate(fresh).is_err());
        assert_eq!(ids(acc.get("train").unwrap()), vec!["1abc_A", "2abc_A"]);

        // The stored table still takes part in the next intersection.
        let out = acc
            .accumulate(Splits::new(vec![("train".into(), table(&[record("2abc_A")]))]))
            .unwrap();
        assert_eq!(ids(out.get("train").unwrap()), vec!["2abc_A"]);
    }

    #[test]
    fn clear_forgets_accumulated_tables() {
        let mut acc = SplitAccumulator::new(["train"], JoinGranularity::PrimaryKey);
        acc.accumulate(Splits::new(vec![("train".into(), table(&[record("1abc_A")]))]))
            .unwrap();
        acc.clear();
        assert!(acc.get("train").is_none());
    }
}
