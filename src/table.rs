use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::Path;

use chrono::{Duration, NaiveDate};
use polars::prelude::*;

use crate::error::{Result, SelectionError};
use crate::record::ChainRecord;
use crate::schema::chain;

/// Days since 1970-01-01, the physical value of a polars `Date`.
pub(crate) fn date_to_days(date: NaiveDate) -> i32 {
    (date - NaiveDate::default()).num_days() as i32
}

pub(crate) fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::default().checked_add_signed(Duration::days(i64::from(days)))
}

/// A table of chain records backed by a polars `DataFrame`.
///
/// Column names and order follow [`chain::ALL`]. Absent metadata is stored
/// as null; `ligands` is a `List(String)` column.
#[derive(Debug, Clone)]
pub struct ChainTable {
    df: DataFrame,
}

impl ChainTable {
    /// Build a table from typed records.
    pub fn from_records(records: &[ChainRecord]) -> Result<Self> {
        let n = records.len();

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let structures: Vec<&str> = records.iter().map(|r| r.structure_id.as_str()).collect();
        let chains: Vec<&str> = records.iter().map(|r| r.chain_id.as_str()).collect();
        let lengths: Vec<i64> = records.iter().map(|r| r.length).collect();
        let molecule_types: Vec<&str> = records.iter().map(|r| r.molecule_type.as_str()).collect();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        let sequences: Vec<&str> = records.iter().map(|r| r.sequence.as_str()).collect();
        let sources: Vec<Option<&str>> = records.iter().map(|r| r.source.as_deref()).collect();
        let resolutions: Vec<Option<f64>> = records.iter().map(|r| r.resolution).collect();
        let dates: Vec<Option<i32>> = records
            .iter()
            .map(|r| r.deposition_date.map(date_to_days))
            .collect();
        let experiment_types: Vec<Option<&str>> = records
            .iter()
            .map(|r| r.experiment_type.as_deref())
            .collect();
        let splits: Vec<&str> = records.iter().map(|r| r.split.as_str()).collect();

        let mut ligands = ListStringChunkedBuilder::new(chain::LIGANDS.into(), n, n * 2);
        for record in records {
            ligands.append_values_iter(record.ligands.iter().map(String::as_str));
        }
        let ligands = ligands.finish().into_series();

        let df = DataFrame::new(vec![
            Column::new(chain::ID.into(), &ids),
            Column::new(chain::STRUCTURE_ID.into(), &structures),
            Column::new(chain::CHAIN_ID.into(), &chains),
            Column::new(chain::LENGTH.into(), &lengths),
            Column::new(chain::MOLECULE_TYPE.into(), &molecule_types),
            Column::new(chain::NAME.into(), &names),
            Column::new(chain::SEQUENCE.into(), &sequences),
            ligands.into(),
            Column::new(chain::SOURCE.into(), &sources),
            Column::new(chain::RESOLUTION.into(), &resolutions),
            Column::new(chain::DEPOSITION_DATE.into(), &dates).cast(&DataType::Date)?,
            Column::new(chain::EXPERIMENT_TYPE.into(), &experiment_types),
            Column::new(chain::SPLIT.into(), &splits),
        ])?;

        Ok(Self { df })
    }

    /// Wrap an existing data frame, checking the chain schema.
    /// Extra columns are dropped and the canonical column order restored.
    pub fn from_dataframe(df: DataFrame) -> Result<Self> {
        for &name in &chain::ALL {
            if df.column(name).is_err() {
                return Err(SelectionError::MissingColumn(name.to_string()));
            }
        }
        let df = df.select(chain::ALL)?;
        Ok(Self { df })
    }

    pub fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    pub fn into_dataframe(self) -> DataFrame {
        self.df
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// Materialize every row as a typed record.
    pub fn records(&self) -> Result<Vec<ChainRecord>> {
        let ids = self.df.column(chain::ID)?.str()?;
        let structures = self.df.column(chain::STRUCTURE_ID)?.str()?;
        let chains = self.df.column(chain::CHAIN_ID)?.str()?;
        let lengths = self.df.column(chain::LENGTH)?.i64()?;
        let molecule_types = self.df.column(chain::MOLECULE_TYPE)?.str()?;
        let names = self.df.column(chain::NAME)?.str()?;
        let sequences = self.df.column(chain::SEQUENCE)?.str()?;
        let sources = self.df.column(chain::SOURCE)?.str()?;
        let resolutions = self.df.column(chain::RESOLUTION)?.f64()?;
        let experiment_types = self.df.column(chain::EXPERIMENT_TYPE)?.str()?;
        let splits = self.df.column(chain::SPLIT)?.str()?;
        let ligands = self.ligand_lists()?;
        let dates = self.deposition_days()?;

        let required = |value: Option<&str>, column: &str, row: usize| {
            value.map(str::to_string).ok_or_else(|| {
                SelectionError::InvalidData(format!("Null {column} at row {row}"))
            })
        };

        let mut records = Vec::with_capacity(self.df.height());
        for (i, (ligands, date)) in ligands.into_iter().zip(dates).enumerate() {
            records.push(ChainRecord {
                id: required(ids.get(i), chain::ID, i)?,
                structure_id: required(structures.get(i), chain::STRUCTURE_ID, i)?,
                chain_id: required(chains.get(i), chain::CHAIN_ID, i)?,
                length: lengths.get(i).ok_or_else(|| {
                    SelectionError::InvalidData(format!("Null {} at row {i}", chain::LENGTH))
                })?,
                molecule_type: required(molecule_types.get(i), chain::MOLECULE_TYPE, i)?,
                name: names.get(i).unwrap_or_default().to_string(),
                sequence: required(sequences.get(i), chain::SEQUENCE, i)?,
                ligands,
                source: sources.get(i).map(str::to_string),
                resolution: resolutions.get(i),
                deposition_date: date.and_then(days_to_date),
                experiment_type: experiment_types.get(i).map(str::to_string),
                split: required(splits.get(i), chain::SPLIT, i)?,
            });
        }
        Ok(records)
    }

    /// Chain ids in row order.
    pub fn ids(&self) -> Result<Vec<String>> {
        Ok(self
            .df
            .column(chain::ID)?
            .str()?
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect())
    }

    /// Ligand codes of every row; a null list reads as empty.
    pub fn ligand_lists(&self) -> Result<Vec<Vec<String>>> {
        let lists = self.df.column(chain::LIGANDS)?.list()?;
        let mut out = Vec::with_capacity(self.df.height());
        for i in 0..self.df.height() {
            let codes = match lists.get_as_series(i) {
                Some(s) => s.str()?.into_iter().flatten().map(str::to_string).collect(),
                None => Vec::new(),
            };
            out.push(codes);
        }
        Ok(out)
    }

    /// Deposition dates as days since the epoch.
    pub(crate) fn deposition_days(&self) -> Result<Vec<Option<i32>>> {
        let days = self
            .df
            .column(chain::DEPOSITION_DATE)?
            .cast(&DataType::Int32)?;
        Ok(days.i32()?.into_iter().collect())
    }

    pub fn sequences(&self) -> Result<Vec<Option<String>>> {
        Ok(self
            .df
            .column(chain::SEQUENCE)?
            .str()?
            .into_iter()
            .map(|s| s.map(str::to_string))
            .collect())
    }

    /// Row keys for equality and duplicate checks; see [`ChainRecord::row_key`].
    pub fn row_keys(&self) -> Result<Vec<String>> {
        Ok(self.records()?.iter().map(ChainRecord::row_key).collect())
    }

    // ── Row selection ───────────────────────────────────────────────────────

    pub fn filter_expr(&self, predicate: Expr) -> Result<Self> {
        let df = self.df.clone().lazy().filter(predicate).collect()?;
        Ok(Self { df })
    }

    pub fn filter_mask(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.df.height() {
            return Err(SelectionError::InvalidData(format!(
                "Mask of length {} for table of height {}",
                mask.len(),
                self.df.height()
            )));
        }
        let mask = BooleanChunked::from_slice("mask".into(), mask);
        Ok(Self {
            df: self.df.filter(&mask)?,
        })
    }

    pub fn take(&self, indices: Vec<IdxSize>) -> Result<Self> {
        let idx = IdxCa::from_vec("idx".into(), indices);
        Ok(Self {
            df: self.df.take(&idx)?,
        })
    }

    pub fn slice(&self, offset: usize, length: usize) -> Self {
        Self {
            df: self.df.slice(offset as i64, length),
        }
    }

    /// Copy of the table with every row's `split` set to `name`.
    pub fn with_split(&self, name: &str) -> Result<Self> {
        let df = self
            .df
            .clone()
            .lazy()
            .with_column(lit(name.to_string()).alias(chain::SPLIT))
            .collect()?;
        Ok(Self { df })
    }

    /// Rows of `self` followed by rows of `other`.
    pub fn concat(&self, other: &ChainTable) -> Result<Self> {
        let mut df = self.df.clone();
        df.vstack_mut(&other.df)?;
        Ok(Self { df })
    }

    // ── Summaries ───────────────────────────────────────────────────────────

    /// Structure ids in order of first appearance.
    pub fn unique_pdbs(&self) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        Ok(self
            .df
            .column(chain::STRUCTURE_ID)?
            .str()?
            .into_iter()
            .flatten()
            .filter(|pdb| seen.insert(*pdb))
            .map(str::to_string)
            .collect())
    }

    pub fn num_unique_pdbs(&self) -> Result<usize> {
        Ok(self.unique_pdbs()?.len())
    }

    pub fn num_chains(&self) -> usize {
        self.df.height()
    }

    pub fn longest_chain(&self) -> Result<Option<i64>> {
        Ok(self.df.column(chain::LENGTH)?.i64()?.max())
    }

    pub fn shortest_chain(&self) -> Result<Option<i64>> {
        Ok(self.df.column(chain::LENGTH)?.i64()?.min())
    }

    /// Lowest resolution value present; lower is better.
    pub fn best_resolution(&self) -> Result<Option<f64>> {
        Ok(self.df.column(chain::RESOLUTION)?.f64()?.min())
    }

    pub fn worst_resolution(&self) -> Result<Option<f64>> {
        Ok(self.df.column(chain::RESOLUTION)?.f64()?.max())
    }

    pub fn earliest_deposition(&self) -> Result<Option<NaiveDate>> {
        Ok(self
            .deposition_days()?
            .into_iter()
            .flatten()
            .min()
            .and_then(days_to_date))
    }

    /// `(id, sequence)` pairs in row order.
    pub fn chain_sequences(&self) -> Result<Vec<(String, String)>> {
        let ids = self.ids()?;
        let sequences = self.sequences()?;
        Ok(ids
            .into_iter()
            .zip(sequences)
            .filter_map(|(id, seq)| seq.map(|s| (id, s)))
            .collect())
    }

    pub fn to_chain_sequence_map(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.chain_sequences()?.into_iter().collect())
    }

    /// Chain ids grouped by structure id, structures sorted.
    pub fn chains_by_structure(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let structures = self.df.column(chain::STRUCTURE_ID)?.str()?;
        let chains = self.df.column(chain::CHAIN_ID)?.str()?;
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (pdb, ch) in structures.into_iter().zip(chains.into_iter()) {
            if let (Some(pdb), Some(ch)) = (pdb, ch) {
                groups.entry(pdb.to_string()).or_default().push(ch.to_string());
            }
        }
        Ok(groups)
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    pub fn write_parquet(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        let mut df = self.df.clone();
        ParquetWriter::new(&mut file).finish(&mut df)?;
        Ok(())
    }

    pub fn read_parquet(path: &Path) -> Result<Self> {
        let df = ParquetReader::new(File::open(path)?).finish()?;
        Self::from_dataframe(df)
    }
}
