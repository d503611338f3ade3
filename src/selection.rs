use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;

use crate::accumulator::SplitAccumulator;
use crate::error::{Result, SelectionError};
use crate::fasta::{read_fasta_file, write_fasta_file};
use crate::filter::{self, Comparison, IndexMode, SampleSpec};
use crate::metadata::read_root_dir;
use crate::record::{build_chain_table, MetadataMaps, SeqresEntry};
use crate::split::{self, SplitConfig, SplitMode, Splits};
use crate::table::ChainTable;

/// Result of an operation that splits when a matching split mode is
/// configured and otherwise returns the selected table.
#[derive(Debug, Clone)]
pub enum SelectionOutcome {
    Table(ChainTable),
    Splits(Splits),
}

impl SelectionOutcome {
    pub fn table(&self) -> Option<&ChainTable> {
        match self {
            Self::Table(t) => Some(t),
            Self::Splits(_) => None,
        }
    }

    pub fn splits(&self) -> Option<&Splits> {
        match self {
            Self::Splits(s) => Some(s),
            Self::Table(_) => None,
        }
    }
}

/// A working selection of chain records over an immutable original table.
///
/// Every filter returns a new table. With `update = true` the result also
/// replaces the working table; `reset` restores the original.
pub struct Selection {
    working: ChainTable,
    original: ChainTable,
    config: Option<SplitConfig>,
}

impl Selection {
    pub fn new(table: ChainTable, config: Option<SplitConfig>) -> Result<Self> {
        if let Some(config) = &config {
            config.validate()?;
        }
        Ok(Self {
            working: table.clone(),
            original: table,
            config,
        })
    }

    /// Join raw seqres entries with the lookup maps.
    pub fn from_parts(
        entries: &[SeqresEntry],
        maps: &MetadataMaps,
        config: Option<SplitConfig>,
    ) -> Result<Self> {
        Self::new(build_chain_table(entries, maps)?, config)
    }

    /// Read the wwPDB metadata files from `root` (default file names).
    pub fn from_root_dir(root: &Path, config: Option<SplitConfig>) -> Result<Self> {
        let (entries, maps) = read_root_dir(root)?;
        Self::from_parts(&entries, &maps, config)
    }

    pub fn working(&self) -> &ChainTable {
        &self.working
    }

    pub fn original(&self) -> &ChainTable {
        &self.original
    }

    pub fn split_config(&self) -> Option<&SplitConfig> {
        self.config.as_ref()
    }

    /// A fresh accumulator for the configured split names.
    pub fn new_accumulator(&self) -> Result<SplitAccumulator> {
        let config = self.require_config()?;
        Ok(SplitAccumulator::new(config.names().to_vec(), config.join()))
    }

    /// Discard all filtering and restart from the original table.
    pub fn reset(&mut self) -> &ChainTable {
        self.working = self.original.clone();
        &self.working
    }

    pub(crate) fn commit(&mut self, table: ChainTable) {
        log::debug!("Working selection now holds {} chains", table.height());
        self.working = table;
    }

    fn apply(&mut self, table: ChainTable, update: bool) -> ChainTable {
        if update {
            self.commit(table.clone());
        }
        table
    }

    fn require_config(&self) -> Result<&SplitConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| SelectionError::Config("No dataset splits configured".into()))
    }

    // ── Filtering ───────────────────────────────────────────────────────────

    pub fn sample(&mut self, spec: &SampleSpec, update: bool) -> Result<ChainTable> {
        let table = filter::sample(&self.working, spec)?;
        Ok(self.apply(table, update))
    }

    /// `protein`, `na`, ...
    pub fn molecule_type(&mut self, molecule_type: &str, update: bool) -> Result<ChainTable> {
        let table = filter::by_molecule_type(&self.working, molecule_type)?;
        Ok(self.apply(table, update))
    }

    /// `diffraction`, `NMR`, `EM`, `other`.
    pub fn experiment_type(&mut self, experiment_type: &str, update: bool) -> Result<ChainTable> {
        let table = filter::by_experiment_type(&self.working, experiment_type)?;
        Ok(self.apply(table, update))
    }

    pub fn longer_than(&mut self, length: i64, update: bool) -> Result<ChainTable> {
        let table = filter::longer_than(&self.working, length)?;
        Ok(self.apply(table, update))
    }

    pub fn shorter_than(&mut self, length: i64, update: bool) -> Result<ChainTable> {
        let table = filter::shorter_than(&self.working, length)?;
        Ok(self.apply(table, update))
    }

    pub fn resolution_better_than_or_equal_to(
        &mut self,
        resolution: f64,
        update: bool,
    ) -> Result<ChainTable> {
        let table = filter::resolution_better_than_or_equal_to(&self.working, resolution)?;
        Ok(self.apply(table, update))
    }

    pub fn resolution_worse_than_or_equal_to(
        &mut self,
        resolution: f64,
        update: bool,
    ) -> Result<ChainTable> {
        let table = filter::resolution_worse_than_or_equal_to(&self.working, resolution)?;
        Ok(self.apply(table, update))
    }

    pub fn oligomeric(
        &mut self,
        oligomer: usize,
        comparison: Comparison,
        update: bool,
    ) -> Result<ChainTable> {
        let table = filter::oligomeric(&self.working, oligomer, comparison)?;
        Ok(self.apply(table, update))
    }

    pub fn has_ligand(&mut self, ligand: &str, inverse: bool, update: bool) -> Result<ChainTable> {
        let table = filter::has_ligand(&self.working, ligand, inverse)?;
        Ok(self.apply(table, update))
    }

    pub fn has_ligands<S: AsRef<str>>(
        &mut self,
        ligands: &[S],
        inverse: bool,
        update: bool,
    ) -> Result<ChainTable> {
        let table = filter::has_ligands(&self.working, ligands, inverse)?;
        Ok(self.apply(table, update))
    }

    pub fn remove_non_standard_alphabet_sequences(&mut self, update: bool) -> Result<ChainTable> {
        let table = filter::standard_alphabet(&self.working)?;
        Ok(self.apply(table, update))
    }

    /// Keep chains deposited strictly before `max_deposition_date`; with a
    /// time-frame split configuration the result is split by date.
    pub fn filter_by_deposition_date(
        &mut self,
        max_deposition_date: NaiveDate,
        update: bool,
        accumulator: Option<&mut SplitAccumulator>,
    ) -> Result<SelectionOutcome> {
        let table = filter::deposited_before(&self.working, max_deposition_date)?;
        let table = self.apply(table, update);

        match self.config.as_ref().map(SplitConfig::mode) {
            Some(SplitMode::TimeFrames(_)) => Ok(SelectionOutcome::Splits(
                self.split_by_deposition_date(&table, accumulator)?,
            )),
            _ => Ok(SelectionOutcome::Table(table)),
        }
    }

    // ── Splitting ───────────────────────────────────────────────────────────

    /// Split `table` by the configured ratios, accumulating when an
    /// accumulator is given.
    pub fn split_clusters(
        &self,
        table: &ChainTable,
        accumulator: Option<&mut SplitAccumulator>,
    ) -> Result<Splits> {
        let config = self.require_config()?;
        let SplitMode::Ratios(ratios) = config.mode() else {
            return Err(SelectionError::Config(
                "Proportional splitting requires split ratios".into(),
            ));
        };

        log::info!(
            "Randomly splitting clusters into ratios: {}",
            ratios
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        );
        let splits = split::split_proportionally(
            table,
            config.names(),
            ratios,
            config.leftover_split(),
            config.seed(),
        )?;
        log::info!("Done splitting clusters");

        match accumulator {
            Some(acc) => acc.accumulate(splits),
            None => Ok(splits),
        }
    }

    /// Split `table` by the configured time frames, accumulating when an
    /// accumulator is given.
    pub fn split_by_deposition_date(
        &self,
        table: &ChainTable,
        accumulator: Option<&mut SplitAccumulator>,
    ) -> Result<Splits> {
        let config = self.require_config()?;
        let SplitMode::TimeFrames(frames) = config.mode() else {
            return Err(SelectionError::Config(
                "Deposition date splitting requires split time frames".into(),
            ));
        };

        log::info!("Splitting sequences into time frames: {frames:?}");
        let splits = split::split_into_time_frames(table, config.names(), frames)?;
        log::info!("Done splitting sequences");

        match accumulator {
            Some(acc) => acc.accumulate(splits),
            None => Ok(splits),
        }
    }

    // ── Sequences ───────────────────────────────────────────────────────────

    pub fn to_chain_sequence_map(&self) -> Result<BTreeMap<String, String>> {
        self.working.to_chain_sequence_map()
    }

    /// Write the working selection as FASTA, one record per chain id.
    pub fn to_fasta(&self, path: &Path) -> Result<()> {
        let pairs = self.working.chain_sequences()?;
        write_fasta_file(path, pairs.iter().map(|(id, seq)| (id.as_str(), seq.as_str())))
    }

    /// Rows of the original table whose chain or structure id appears as a
    /// record id in the FASTA file at `path`.
    pub fn from_fasta(&self, index: IndexMode, path: &Path) -> Result<ChainTable> {
        let records = read_fasta_file(path)?;
        let ids: Vec<&str> = records.iter().map(|r| r.id()).collect();
        filter::by_ids(&self.original, &ids, index)
    }

    // ── Properties ──────────────────────────────────────────────────────────

    pub fn num_unique_pdbs(&self) -> Result<usize> {
        self.working.num_unique_pdbs()
    }

    pub fn unique_pdbs(&self) -> Result<Vec<String>> {
        self.working.unique_pdbs()
    }

    pub fn num_chains(&self) -> usize {
        self.working.num_chains()
    }

    pub fn longest_chain(&self) -> Result<Option<i64>> {
        self.working.longest_chain()
    }

    pub fn shortest_chain(&self) -> Result<Option<i64>> {
        self.working.shortest_chain()
    }

    pub fn best_resolution(&self) -> Result<Option<f64>> {
        self.working.best_resolution()
    }

    pub fn worst_resolution(&self) -> Result<Option<f64>> {
        self.working.worst_resolution()
    }
}
