use std::path::PathBuf;

use chrono::NaiveDate;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3_polars::PyDataFrame;

use crate::accumulator::{JoinGranularity, SplitAccumulator};
use crate::cluster::{ClusterParams, Mmseqs};
use crate::filter::{Comparison, IndexMode, SampleSpec};
use crate::selection::{Selection, SelectionOutcome};
use crate::split::{SplitConfig, Splits, DEFAULT_SEED};
use crate::table::ChainTable;

fn frame(table: ChainTable) -> PyDataFrame {
    PyDataFrame(table.into_dataframe())
}

fn splits_dict<'py>(py: Python<'py>, splits: Splits) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    for (name, table) in splits {
        dict.set_item(name, frame(table))?;
    }
    Ok(dict)
}

fn outcome_object<'py>(py: Python<'py>, outcome: SelectionOutcome) -> PyResult<Bound<'py, PyAny>> {
    match outcome {
        SelectionOutcome::Table(table) => Ok(frame(table).into_pyobject(py)?.into_any()),
        SelectionOutcome::Splits(splits) => Ok(splits_dict(py, splits)?.into_any()),
    }
}

fn join_from_str(s: &str) -> PyResult<JoinGranularity> {
    match s {
        "full_row" => Ok(JoinGranularity::FullRow),
        "primary_key" => Ok(JoinGranularity::PrimaryKey),
        _ => Err(PyValueError::new_err(format!(
            "join must be 'full_row' or 'primary_key', got '{s}'"
        ))),
    }
}

/// Accumulated splits change only for committing calls unless the caller
/// asks otherwise.
fn active(
    accumulator: &mut Option<SplitAccumulator>,
    accumulate: Option<bool>,
    update: bool,
) -> Option<&mut SplitAccumulator> {
    accumulator.as_mut().filter(|_| accumulate.unwrap_or(update))
}

/// Chain selection over the wwPDB metadata in one directory.
#[pyclass]
pub struct PdbManager {
    selection: Selection,
    accumulator: Option<SplitAccumulator>,
}

#[pymethods]
impl PdbManager {
    #[new]
    #[pyo3(signature = (
        root_dir,
        splits=None,
        split_ratios=None,
        split_time_frames=None,
        leftover_split=0,
        seed=DEFAULT_SEED,
        join="full_row",
    ))]
    fn new(
        root_dir: PathBuf,
        splits: Option<Vec<String>>,
        split_ratios: Option<Vec<f64>>,
        split_time_frames: Option<Vec<NaiveDate>>,
        leftover_split: usize,
        seed: u64,
        join: &str,
    ) -> PyResult<Self> {
        let join = join_from_str(join)?;
        let config = match (splits, split_ratios, split_time_frames) {
            (None, None, None) => None,
            (Some(names), Some(ratios), None) => Some(
                SplitConfig::ratios(names, ratios)?
                    .with_leftover_split(leftover_split)?
                    .with_seed(seed)
                    .with_join(join),
            ),
            (Some(names), None, Some(frames)) => Some(
                SplitConfig::time_frames(names, frames)?
                    .with_seed(seed)
                    .with_join(join),
            ),
            _ => {
                return Err(PyValueError::new_err(
                    "splits require exactly one of split_ratios or split_time_frames",
                ))
            }
        };

        let selection = Selection::from_root_dir(&root_dir, config)?;
        let accumulator = selection.new_accumulator().ok();
        Ok(Self {
            selection,
            accumulator,
        })
    }

    // ── Data ────────────────────────────────────────────────────────────────

    #[getter]
    fn df(&self) -> PyDataFrame {
        frame(self.selection.working().clone())
    }

    #[getter]
    fn raw_df(&self) -> PyDataFrame {
        frame(self.selection.original().clone())
    }

    fn reset(&mut self) -> PyDataFrame {
        frame(self.selection.reset().clone())
    }

    /// Accumulated split tables, empty before the first split.
    fn accumulated_splits<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict = PyDict::new(py);
        if let Some(acc) = &self.accumulator {
            for name in acc.names() {
                if let Some(table) = acc.get(name) {
                    dict.set_item(name, frame(table.clone()))?;
                }
            }
        }
        Ok(dict)
    }

    fn clear_accumulated_splits(&mut self) {
        if let Some(acc) = &mut self.accumulator {
            acc.clear();
        }
    }

    // ── Filters ─────────────────────────────────────────────────────────────

    #[pyo3(signature = (n=None, frac=None, replace=false, seed=None, update=false))]
    fn sample(
        &mut self,
        n: Option<usize>,
        frac: Option<f64>,
        replace: bool,
        seed: Option<u64>,
        update: bool,
    ) -> PyResult<PyDataFrame> {
        let spec = SampleSpec {
            n,
            frac,
            replace,
            seed,
        };
        Ok(frame(self.selection.sample(&spec, update)?))
    }

    #[pyo3(signature = (molecule_type="protein", update=false))]
    fn molecule_type(&mut self, molecule_type: &str, update: bool) -> PyResult<PyDataFrame> {
        Ok(frame(self.selection.molecule_type(molecule_type, update)?))
    }

    #[pyo3(signature = (experiment_type="diffraction", update=false))]
    fn experiment_type(&mut self, experiment_type: &str, update: bool) -> PyResult<PyDataFrame> {
        Ok(frame(self.selection.experiment_type(experiment_type, update)?))
    }

    #[pyo3(signature = (length=80, update=false))]
    fn longer_than(&mut self, length: i64, update: bool) -> PyResult<PyDataFrame> {
        Ok(frame(self.selection.longer_than(length, update)?))
    }

    #[pyo3(signature = (length=80, update=false))]
    fn shorter_than(&mut self, length: i64, update: bool) -> PyResult<PyDataFrame> {
        Ok(frame(self.selection.shorter_than(length, update)?))
    }

    #[pyo3(signature = (resolution=3.0, update=false))]
    fn resolution_better_than_or_equal_to(
        &mut self,
        resolution: f64,
        update: bool,
    ) -> PyResult<PyDataFrame> {
        Ok(frame(
            self.selection
                .resolution_better_than_or_equal_to(resolution, update)?,
        ))
    }

    #[pyo3(signature = (resolution=3.0, update=false))]
    fn resolution_worse_than_or_equal_to(
        &mut self,
        resolution: f64,
        update: bool,
    ) -> PyResult<PyDataFrame> {
        Ok(frame(
            self.selection
                .resolution_worse_than_or_equal_to(resolution, update)?,
        ))
    }

    #[pyo3(signature = (oligomer=1, comparison="equal", update=false))]
    fn oligomeric(&mut self, oligomer: usize, comparison: &str, update: bool) -> PyResult<PyDataFrame> {
        let comparison: Comparison = comparison.parse()?;
        Ok(frame(self.selection.oligomeric(oligomer, comparison, update)?))
    }

    #[pyo3(signature = (ligand, inverse=false, update=false))]
    fn has_ligand(&mut self, ligand: &str, inverse: bool, update: bool) -> PyResult<PyDataFrame> {
        Ok(frame(self.selection.has_ligand(ligand, inverse, update)?))
    }

    #[pyo3(signature = (ligands, inverse=false, update=false))]
    fn has_ligands(
        &mut self,
        ligands: Vec<String>,
        inverse: bool,
        update: bool,
    ) -> PyResult<PyDataFrame> {
        Ok(frame(self.selection.has_ligands(&ligands, inverse, update)?))
    }

    #[pyo3(signature = (update=false))]
    fn remove_non_standard_alphabet_sequences(&mut self, update: bool) -> PyResult<PyDataFrame> {
        Ok(frame(
            self.selection.remove_non_standard_alphabet_sequences(update)?,
        ))
    }

    /// Returns a data frame, or a dict of split data frames when time-frame
    /// splits are configured.
    #[pyo3(signature = (max_deposition_date, update=false, accumulate=None))]
    fn filter_by_deposition_date<'py>(
        &mut self,
        py: Python<'py>,
        max_deposition_date: NaiveDate,
        update: bool,
        accumulate: Option<bool>,
    ) -> PyResult<Bound<'py, PyAny>> {
        let acc = active(&mut self.accumulator, accumulate, update);
        let outcome = self
            .selection
            .filter_by_deposition_date(max_deposition_date, update, acc)?;
        outcome_object(py, outcome)
    }

    // ── Clustering & splits ─────────────────────────────────────────────────

    /// Returns a data frame of representatives, or a dict of split data
    /// frames when ratio splits are configured.
    #[pyo3(signature = (
        min_seq_id=0.3,
        coverage=0.8,
        cov_mode=1,
        work_dir=PathBuf::from("."),
        ids="chain",
        update=false,
        accumulate=None,
        binary="mmseqs",
    ))]
    #[allow(clippy::too_many_arguments)]
    fn cluster<'py>(
        &mut self,
        py: Python<'py>,
        min_seq_id: f64,
        coverage: f64,
        cov_mode: u8,
        work_dir: PathBuf,
        ids: &str,
        update: bool,
        accumulate: Option<bool>,
        binary: &str,
    ) -> PyResult<Bound<'py, PyAny>> {
        let params = ClusterParams {
            min_seq_id,
            coverage,
            cov_mode,
            work_dir,
            index: ids.parse::<IndexMode>()?,
            ..Default::default()
        };
        let mmseqs = Mmseqs::with_binary(binary);
        let acc = active(&mut self.accumulator, accumulate, update);
        let outcome = self.selection.cluster(&mmseqs, &params, update, acc)?;
        outcome_object(py, outcome)
    }

    #[pyo3(signature = (update=false, accumulate=None))]
    fn split_clusters<'py>(
        &mut self,
        py: Python<'py>,
        update: bool,
        accumulate: Option<bool>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let table = self.selection.working().clone();
        let acc = active(&mut self.accumulator, accumulate, update);
        let splits = self.selection.split_clusters(&table, acc)?;
        splits_dict(py, splits)
    }

    // ── Sequences ───────────────────────────────────────────────────────────

    fn to_chain_sequence_map(&self) -> PyResult<std::collections::BTreeMap<String, String>> {
        Ok(self.selection.to_chain_sequence_map()?)
    }

    fn to_fasta(&self, path: PathBuf) -> PyResult<()> {
        Ok(self.selection.to_fasta(&path)?)
    }

    #[pyo3(signature = (path, ids="chain"))]
    fn from_fasta(&self, path: PathBuf, ids: &str) -> PyResult<PyDataFrame> {
        Ok(frame(self.selection.from_fasta(ids.parse()?, &path)?))
    }

    // ── Properties ──────────────────────────────────────────────────────────

    #[getter]
    fn num_unique_pdbs(&self) -> PyResult<usize> {
        Ok(self.selection.num_unique_pdbs()?)
    }

    #[getter]
    fn unique_pdbs(&self) -> PyResult<Vec<String>> {
        Ok(self.selection.unique_pdbs()?)
    }

    #[getter]
    fn num_chains(&self) -> usize {
        self.selection.num_chains()
    }

    #[getter]
    fn longest_chain(&self) -> PyResult<Option<i64>> {
        Ok(self.selection.longest_chain()?)
    }

    #[getter]
    fn shortest_chain(&self) -> PyResult<Option<i64>> {
        Ok(self.selection.shortest_chain()?)
    }

    #[getter]
    fn best_resolution(&self) -> PyResult<Option<f64>> {
        Ok(self.selection.best_resolution()?)
    }

    #[getter]
    fn worst_resolution(&self) -> PyResult<Option<f64>> {
        Ok(self.selection.worst_resolution()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulator() -> Option<SplitAccumulator> {
        Some(SplitAccumulator::new(["train", "test"], JoinGranularity::FullRow))
    }

    #[test]
    fn previews_do_not_accumulate_by_default() {
        let mut acc = accumulator();
        assert!(active(&mut acc, None, false).is_none());
        assert!(active(&mut acc, None, true).is_some());
    }

    #[test]
    fn explicit_accumulate_overrides_update() {
        let mut acc = accumulator();
        assert!(active(&mut acc, Some(true), false).is_some());
        assert!(active(&mut acc, Some(false), true).is_none());
        assert!(active(&mut None, Some(true), true).is_none());
    }
}
