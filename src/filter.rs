use std::collections::HashSet;
use std::str::FromStr;

use chrono::NaiveDate;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SelectionError};
use crate::schema::{alphabet, chain};
use crate::table::{date_to_days, ChainTable};

/// Comparison operator for aggregate filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    Less,
    Greater,
}

impl FromStr for Comparison {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "equal" => Ok(Self::Equal),
            "less" => Ok(Self::Less),
            "greater" => Ok(Self::Greater),
            _ => Err(SelectionError::Config(format!(
                "Comparison must be one of 'equal', 'less', or 'greater', got '{s}'"
            ))),
        }
    }
}

/// Which identifier a list of ids refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Chain ids such as `3eiy_A`.
    #[default]
    Chain,
    /// Structure ids such as `3eiy`.
    Structure,
}

impl FromStr for IndexMode {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chain" => Ok(Self::Chain),
            "pdb" | "structure" => Ok(Self::Structure),
            _ => Err(SelectionError::Config(format!(
                "Index mode must be 'chain' or 'pdb', got '{s}'"
            ))),
        }
    }
}

/// Random row sampling, by count or by fraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSpec {
    pub n: Option<usize>,
    pub frac: Option<f64>,
    pub replace: bool,
    pub seed: Option<u64>,
}

impl SampleSpec {
    pub fn n(n: usize) -> Self {
        Self {
            n: Some(n),
            ..Default::default()
        }
    }

    pub fn frac(frac: f64) -> Self {
        Self {
            frac: Some(frac),
            ..Default::default()
        }
    }

    pub fn with_replacement(mut self) -> Self {
        self.replace = true;
        self
    }

    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn amount(&self, height: usize) -> Result<usize> {
        let amount = match (self.n, self.frac) {
            (Some(n), None) => n,
            (None, Some(frac)) => {
                if !frac.is_finite() || frac < 0.0 {
                    return Err(SelectionError::Config(format!(
                        "Sampling fraction must be non-negative, got {frac}"
                    )));
                }
                (frac * height as f64).round() as usize
            }
            _ => {
                return Err(SelectionError::Config(
                    "Exactly one of n or frac must be given for sampling".into(),
                ))
            }
        };
        if !self.replace && amount > height {
            return Err(SelectionError::Config(format!(
                "Cannot take {amount} rows from {height} without replacement"
            )));
        }
        if self.replace && height == 0 && amount > 0 {
            return Err(SelectionError::Config(
                "Cannot sample with replacement from an empty table".into(),
            ));
        }
        Ok(amount)
    }
}

pub(crate) fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

// ── Column predicates ───────────────────────────────────────────────────────

pub fn by_molecule_type(table: &ChainTable, molecule_type: &str) -> Result<ChainTable> {
    table.filter_expr(col(chain::MOLECULE_TYPE).eq(lit(molecule_type.to_string())))
}

pub fn by_experiment_type(table: &ChainTable, experiment_type: &str) -> Result<ChainTable> {
    table.filter_expr(col(chain::EXPERIMENT_TYPE).eq(lit(experiment_type.to_string())))
}

/// Chains with `length > min_length`.
pub fn longer_than(table: &ChainTable, min_length: i64) -> Result<ChainTable> {
    table.filter_expr(col(chain::LENGTH).gt(lit(min_length)))
}

/// Chains with `length < max_length`.
pub fn shorter_than(table: &ChainTable, max_length: i64) -> Result<ChainTable> {
    table.filter_expr(col(chain::LENGTH).lt(lit(max_length)))
}

/// `resolution <= threshold`; lower values are better.
pub fn resolution_better_than_or_equal_to(
    table: &ChainTable,
    threshold: f64,
) -> Result<ChainTable> {
    table.filter_expr(col(chain::RESOLUTION).lt_eq(lit(threshold)))
}

/// `resolution >= threshold`.
pub fn resolution_worse_than_or_equal_to(
    table: &ChainTable,
    threshold: f64,
) -> Result<ChainTable> {
    table.filter_expr(col(chain::RESOLUTION).gt_eq(lit(threshold)))
}

/// Keep chains whose structure has `count` chains under `comparison`.
///
/// The chain count is taken over the table being filtered, not over the
/// full archive.
pub fn oligomeric(table: &ChainTable, count: usize, comparison: Comparison) -> Result<ChainTable> {
    let size = col(chain::STRUCTURE_ID)
        .count()
        .over([col(chain::STRUCTURE_ID)])
        .cast(DataType::Int64);
    let target = lit(count as i64);
    let predicate = match comparison {
        Comparison::Equal => size.eq(target),
        Comparison::Less => size.lt(target),
        Comparison::Greater => size.gt(target),
    };
    table.filter_expr(predicate)
}

/// Present deposition date strictly before `cutoff`.
pub fn deposited_before(table: &ChainTable, cutoff: NaiveDate) -> Result<ChainTable> {
    table.filter_expr(
        col(chain::DEPOSITION_DATE)
            .cast(DataType::Int32)
            .lt(lit(date_to_days(cutoff))),
    )
}

/// Rows whose chain or structure id is in `ids`.
pub fn by_ids<S: AsRef<str>>(table: &ChainTable, ids: &[S], mode: IndexMode) -> Result<ChainTable> {
    let column = match mode {
        IndexMode::Chain => chain::ID,
        IndexMode::Structure => chain::STRUCTURE_ID,
    };
    let ids: Vec<&str> = ids.iter().map(AsRef::as_ref).collect();
    let ids = Series::new("ids".into(), ids);
    table.filter_expr(col(column).is_in(lit(ids), false))
}

// ── Row predicates ──────────────────────────────────────────────────────────

/// Chains of structures bound to `ligand`; `inverse` keeps the others.
pub fn has_ligand(table: &ChainTable, ligand: &str, inverse: bool) -> Result<ChainTable> {
    let mask: Vec<bool> = table
        .ligand_lists()?
        .iter()
        .map(|codes| codes.iter().any(|c| c == ligand) != inverse)
        .collect();
    table.filter_mask(&mask)
}

/// Chains of structures bound to every ligand in `ligands`; `inverse` keeps
/// chains missing at least one of them.
pub fn has_ligands<S: AsRef<str>>(
    table: &ChainTable,
    ligands: &[S],
    inverse: bool,
) -> Result<ChainTable> {
    let wanted: HashSet<&str> = ligands.iter().map(AsRef::as_ref).collect();
    let mask: Vec<bool> = table
        .ligand_lists()?
        .iter()
        .map(|codes| {
            let present: HashSet<&str> = codes.iter().map(String::as_str).collect();
            wanted.is_subset(&present) != inverse
        })
        .collect();
    table.filter_mask(&mask)
}

/// Drop sequences containing anything but the 20 standard amino acids.
pub fn standard_alphabet(table: &ChainTable) -> Result<ChainTable> {
    let mask: Vec<bool> = table
        .sequences()?
        .iter()
        .map(|seq| {
            seq.as_deref().is_some_and(|s| {
                s.chars()
                    .all(|c| alphabet::STANDARD_AMINO_ACIDS.contains(c))
            })
        })
        .collect();
    table.filter_mask(&mask)
}

/// Random subset of rows, deterministic when `spec.seed` is set.
pub fn sample(table: &ChainTable, spec: &SampleSpec) -> Result<ChainTable> {
    let height = table.height();
    let amount = spec.amount(height)?;
    let mut rng = rng_from(spec.seed);

    let indices: Vec<IdxSize> = if spec.replace {
        (0..amount)
            .map(|_| rng.random_range(0..height) as IdxSize)
            .collect()
    } else {
        rand::seq::index::sample(&mut rng, height, amount)
            .into_iter()
            .map(|i| i as IdxSize)
            .collect()
    };
    table.take(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ChainRecord;
    use crate::table::tests::record;

    fn ids(table: &ChainTable) -> Vec<String> {
        table.ids().unwrap()
    }

    fn with_ligands(id: &str, ligands: &[&str]) -> ChainRecord {
        let mut r = record(id);
        r.ligands = ligands.iter().map(|s| s.to_string()).collect();
        r
    }

    #[test]
    fn ligand_membership_and_inverse() {
        let table = ChainTable::from_records(&[with_ligands("4hhb_A", &["HEM", "ZN"])]).unwrap();

        assert_eq!(has_ligand(&table, "HEM", false).unwrap().height(), 1);
        assert_eq!(has_ligand(&table, "HEM", true).unwrap().height(), 0);
        assert_eq!(has_ligands(&table, &["HEM", "ZN"], false).unwrap().height(), 1);
        assert_eq!(has_ligands(&table, &["HEM", "ZN"], true).unwrap().height(), 0);
        assert_eq!(has_ligands(&table, &["HEM", "ZN", "NAG"], false).unwrap().height(), 0);
        assert_eq!(has_ligands(&table, &["HEM", "ZN", "NAG"], true).unwrap().height(), 1);
    }

    #[test]
    fn oligomeric_state_counts_chains_per_structure() {
        let table = ChainTable::from_records(&[
            record("4hhb_A"),
            record("1abc_A"),
            record("4hhb_B"),
        ])
        .unwrap();

        assert_eq!(ids(&oligomeric(&table, 2, Comparison::Equal).unwrap()), vec!["4hhb_A", "4hhb_B"]);
        assert_eq!(ids(&oligomeric(&table, 1, Comparison::Equal).unwrap()), vec!["1abc_A"]);
        assert_eq!(ids(&oligomeric(&table, 2, Comparison::Less).unwrap()), vec!["1abc_A"]);
        assert_eq!(oligomeric(&table, 1, Comparison::Greater).unwrap().height(), 2);
    }

    #[test]
    fn unknown_comparison_is_a_config_error() {
        assert_eq!("less".parse::<Comparison>().unwrap(), Comparison::Less);
        assert!(matches!("between".parse::<Comparison>(), Err(SelectionError::Config(_))));
    }

    #[test]
    fn length_bounds_are_strict() {
        let mut short = record("1abc_A");
        short.length = 5;
        let mut long = record("1abc_B");
        long.length = 50;
        let table = ChainTable::from_records(&[short, long]).unwrap();

        assert_eq!(ids(&longer_than(&table, 5).unwrap()), vec!["1abc_B"]);
        assert_eq!(ids(&shorter_than(&table, 50).unwrap()), vec!["1abc_A"]);
        assert!(shorter_than(&table, 5).unwrap().is_empty());
    }

    #[test]
    fn resolution_bounds_exclude_absent_values() {
        let mut good = record("1abc_A");
        good.resolution = Some(1.5);
        let mut poor = record("2abc_A");
        poor.resolution = Some(3.0);
        let unknown = record("3abc_A");
        let table = ChainTable::from_records(&[good, poor, unknown]).unwrap();

        assert_eq!(ids(&resolution_better_than_or_equal_to(&table, 1.5).unwrap()), vec!["1abc_A"]);
        assert_eq!(ids(&resolution_worse_than_or_equal_to(&table, 1.5).unwrap()), vec!["1abc_A", "2abc_A"]);
        assert_eq!(resolution_worse_than_or_equal_to(&table, 0.0).unwrap().height(), 2);
    }

    #[test]
    fn categorical_filters() {
        let mut dna = record("1d66_D");
        dna.molecule_type = "na".to_string();
        let mut xray = record("1abc_A");
        xray.experiment_type = Some("diffraction".to_string());
        let mut nmr = record("2abc_A");
        nmr.experiment_type = Some("NMR".to_string());
        let table = ChainTable::from_records(&[dna, xray, nmr]).unwrap();

        assert_eq!(ids(&by_molecule_type(&table, "protein").unwrap()), vec!["1abc_A", "2abc_A"]);
        assert_eq!(ids(&by_experiment_type(&table, "diffraction").unwrap()), vec!["1abc_A"]);
    }

    #[test]
    fn non_standard_residues_are_dropped() {
        let mut odd = record("1abc_A");
        odd.sequence = "ACDXU".to_string();
        let table = ChainTable::from_records(&[odd, record("1abc_B")]).unwrap();
        assert_eq!(ids(&standard_alphabet(&table).unwrap()), vec!["1abc_B"]);
    }

    #[test]
    fn deposition_cutoff_is_strict_and_drops_absent_dates() {
        let mut early = record("1abc_A");
        early.deposition_date = NaiveDate::from_ymd_opt(2021, 12, 31);
        let mut on_cutoff = record("2abc_A");
        on_cutoff.deposition_date = NaiveDate::from_ymd_opt(2022, 1, 1);
        let table = ChainTable::from_records(&[early, on_cutoff, record("3abc_A")]).unwrap();

        let cutoff = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        assert_eq!(ids(&deposited_before(&table, cutoff).unwrap()), vec!["1abc_A"]);
    }

    #[test]
    fn ids_by_chain_or_structure() {
        let table = ChainTable::from_records(&[
            record("4hhb_A"),
            record("4hhb_B"),
            record("1abc_A"),
        ])
        .unwrap();

        assert_eq!(ids(&by_ids(&table, &["4hhb_B"], IndexMode::Chain).unwrap()), vec!["4hhb_B"]);
        assert_eq!(by_ids(&table, &["4hhb"], IndexMode::Structure).unwrap().height(), 2);
        assert!(by_ids(&table, &["4hhb"], IndexMode::Chain).unwrap().is_empty());
    }

    #[test]
    fn seeded_sampling_is_deterministic() {
        let records: Vec<ChainRecord> = (0..50).map(|i| record(&format!("{i:04}_A"))).collect();
        let table = ChainTable::from_records(&records).unwrap();

        let a = sample(&table, &SampleSpec::n(10).seeded(7)).unwrap();
        let b = sample(&table, &SampleSpec::n(10).seeded(7)).unwrap();
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(a.height(), 10);
        assert_eq!(ids(&a).iter().collect::<HashSet<_>>().len(), 10);

        assert_eq!(sample(&table, &SampleSpec::frac(0.5).seeded(1)).unwrap().height(), 25);
        assert_eq!(
            sample(&table, &SampleSpec::n(80).with_replacement().seeded(1)).unwrap().height(),
            80
        );
    }

    #[test]
    fn invalid_sampling_arguments() {
        let table = ChainTable::from_records(&[record("1abc_A")]).unwrap();
        assert!(sample(&table, &SampleSpec::n(2)).is_err());
        assert!(sample(&table, &SampleSpec::default()).is_err());
        let both = SampleSpec {
            n: Some(1),
            frac: Some(1.0),
            ..Default::default()
        };
        assert!(sample(&table, &both).is_err());
    }
}
