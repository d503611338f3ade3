use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::accumulator::SplitAccumulator;
use crate::error::{Result, SelectionError};
use crate::filter::IndexMode;
use crate::selection::{Selection, SelectionOutcome};
use crate::split::SplitMode;

/// Clustering thresholds and the files exchanged with the clusterer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    pub min_seq_id: f64,
    pub coverage: f64,
    pub cov_mode: u8,
    pub work_dir: PathBuf,
    pub fasta_name: String,
    pub output_prefix: String,
    pub tmp_dir: String,
    /// Whether representative ids select single chains or whole structures.
    pub index: IndexMode,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            min_seq_id: 0.3,
            coverage: 0.8,
            cov_mode: 1,
            work_dir: PathBuf::from("."),
            fasta_name: "pdb.fasta".to_string(),
            output_prefix: "pdb_cluster".to_string(),
            tmp_dir: "tmp".to_string(),
            index: IndexMode::Chain,
        }
    }
}

impl ClusterParams {
    pub fn input_fasta(&self) -> PathBuf {
        self.work_dir.join(&self.fasta_name)
    }

    pub fn output_prefix_path(&self) -> PathBuf {
        self.work_dir.join(&self.output_prefix)
    }

    /// `{work_dir}/{prefix}_rep_seq.fasta`
    pub fn representatives_path(&self) -> PathBuf {
        self.work_dir
            .join(format!("{}_rep_seq.fasta", self.output_prefix))
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.work_dir.join(&self.tmp_dir)
    }
}

/// An external sequence clusterer.
///
/// Implementations must leave the representative sequences at
/// `{output_prefix}_rep_seq.fasta`.
pub trait Clusterer {
    fn cluster(
        &self,
        input: &Path,
        output_prefix: &Path,
        tmp_dir: &Path,
        params: &ClusterParams,
    ) -> Result<()>;
}

/// MMseqs2 `easy-cluster`.
#[derive(Debug, Clone)]
pub struct Mmseqs {
    binary: PathBuf,
}

impl Default for Mmseqs {
    fn default() -> Self {
        Self::new()
    }
}

impl Mmseqs {
    /// `mmseqs` resolved from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("mmseqs")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn command(
        &self,
        input: &Path,
        output_prefix: &Path,
        tmp_dir: &Path,
        params: &ClusterParams,
    ) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("easy-cluster")
            .arg(input)
            .arg(output_prefix)
            .arg(tmp_dir)
            .arg("--min-seq-id")
            .arg(params.min_seq_id.to_string())
            .arg("-c")
            .arg(params.coverage.to_string())
            .arg("--cov-mode")
            .arg(params.cov_mode.to_string());
        cmd
    }
}

impl Clusterer for Mmseqs {
    fn cluster(
        &self,
        input: &Path,
        output_prefix: &Path,
        tmp_dir: &Path,
        params: &ClusterParams,
    ) -> Result<()> {
        let tool = self.binary.display().to_string();
        let mut cmd = self.command(input, output_prefix, tmp_dir, params);
        log::info!("Running {cmd:?}");

        let output = cmd.output().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SelectionError::ToolNotFound(tool.clone()),
            _ => SelectionError::Io(e),
        })?;

        if !output.status.success() {
            return Err(SelectionError::ExternalTool {
                tool,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Selection {
    /// Cluster the working selection and select the representatives from the
    /// original table.
    ///
    /// An existing representatives file in `work_dir` is reused without
    /// running the clusterer. With a ratio split configuration the
    /// representatives are split, and accumulated if `accumulator` is given.
    pub fn cluster(
        &mut self,
        clusterer: &dyn Clusterer,
        params: &ClusterParams,
        update: bool,
        accumulator: Option<&mut SplitAccumulator>,
    ) -> Result<SelectionOutcome> {
        fs::create_dir_all(&params.work_dir)?;
        let input = params.input_fasta();
        self.to_fasta(&input)?;

        let representatives = params.representatives_path();
        if representatives.exists() {
            log::info!(
                "Reusing cluster representatives at {}",
                representatives.display()
            );
        } else {
            log::info!(
                "Clustering {} chains (min-seq-id {}, coverage {}, cov-mode {})",
                self.num_chains(),
                params.min_seq_id,
                params.coverage,
                params.cov_mode
            );
            clusterer.cluster(
                &input,
                &params.output_prefix_path(),
                &params.tmp_path(),
                params,
            )?;
            if !representatives.exists() {
                return Err(SelectionError::ClusterOutputMissing(representatives));
            }
        }

        let table = self.from_fasta(params.index, &representatives)?;
        log::info!("Selected {} cluster representatives", table.height());
        if update {
            self.commit(table.clone());
        }

        match self.split_config().map(|c| c.mode()) {
            Some(SplitMode::Ratios(_)) => Ok(SelectionOutcome::Splits(
                self.split_clusters(&table, accumulator)?,
            )),
            _ => Ok(SelectionOutcome::Table(table)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::ffi::OsStr;

    use super::*;
    use crate::fasta::{read_fasta_file, write_fasta_file};
    use crate::split::SplitConfig;
    use crate::table::tests::record;
    use crate::table::ChainTable;

    /// Writes a fixed set of representative ids and counts its invocations.
    struct FakeClusterer {
        representatives: Vec<&'static str>,
        calls: Cell<usize>,
    }

    impl FakeClusterer {
        fn new(representatives: Vec<&'static str>) -> Self {
            Self {
                representatives,
                calls: Cell::new(0),
            }
        }
    }

    impl Clusterer for FakeClusterer {
        fn cluster(
            &self,
            input: &Path,
            output_prefix: &Path,
            _tmp_dir: &Path,
            _params: &ClusterParams,
        ) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            assert!(input.exists());
            let mut path = output_prefix.as_os_str().to_owned();
            path.push("_rep_seq.fasta");
            write_fasta_file(
                Path::new(&path),
                self.representatives.iter().map(|id| (*id, "ACDEFGHIKL")),
            )
        }
    }

    /// Succeeds without writing anything.
    struct SilentClusterer;

    impl Clusterer for SilentClusterer {
        fn cluster(&self, _: &Path, _: &Path, _: &Path, _: &ClusterParams) -> Result<()> {
            Ok(())
        }
    }

    fn selection(config: Option<SplitConfig>) -> Selection {
        let table = ChainTable::from_records(&[
            record("1abc_A"),
            record("1abc_B"),
            record("2xyz_A"),
            record("3def_A"),
        ])
        .unwrap();
        Selection::new(table, config).unwrap()
    }

    fn params(dir: &Path) -> ClusterParams {
        ClusterParams {
            work_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn default_paths() {
        let p = ClusterParams::default();
        assert_eq!(p.input_fasta(), Path::new("./pdb.fasta"));
        assert_eq!(
            p.representatives_path(),
            Path::new("./pdb_cluster_rep_seq.fasta")
        );
        assert_eq!(p.tmp_path(), Path::new("./tmp"));
    }

    #[test]
    fn mmseqs_command_line() {
        let p = ClusterParams::default();
        let cmd = Mmseqs::new().command(
            Path::new("in.fasta"),
            Path::new("out"),
            Path::new("tmp"),
            &p,
        );
        assert_eq!(cmd.get_program(), OsStr::new("mmseqs"));
        let args: Vec<&OsStr> = cmd.get_args().collect();
        assert_eq!(
            args,
            [
                "easy-cluster",
                "in.fasta",
                "out",
                "tmp",
                "--min-seq-id",
                "0.3",
                "-c",
                "0.8",
                "--cov-mode",
                "1"
            ]
            .map(OsStr::new)
        );
    }

    #[test]
    fn missing_binary_is_tool_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mmseqs = Mmseqs::with_binary(dir.path().join("no-such-mmseqs"));
        let p = params(dir.path());
        let err = mmseqs
            .cluster(&p.input_fasta(), &p.output_prefix_path(), &p.tmp_path(), &p)
            .unwrap_err();
        assert!(matches!(err, SelectionError::ToolNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn failing_binary_is_external_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(dir.path());
        let err = Mmseqs::with_binary("false")
            .cluster(&p.input_fasta(), &p.output_prefix_path(), &p.tmp_path(), &p)
            .unwrap_err();
        assert!(matches!(err, SelectionError::ExternalTool { .. }));
    }

    #[test]
    fn representatives_come_from_the_original_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut sel = selection(None);
        sel.longer_than(100, true).unwrap();
        assert!(sel.working().is_empty());

        let fake = FakeClusterer::new(vec!["1abc_A", "3def_A"]);
        let outcome = sel.cluster(&fake, &params(dir.path()), false, None).unwrap();
        let table = outcome.table().unwrap();
        assert_eq!(table.ids().unwrap(), vec!["1abc_A", "3def_A"]);
        assert!(sel.working().is_empty());
        assert!(dir.path().join("pdb.fasta").exists());
    }

    #[test]
    fn update_commits_representatives() {
        let dir = tempfile::tempdir().unwrap();
        let mut sel = selection(None);
        let fake = FakeClusterer::new(vec!["2xyz_A"]);
        sel.cluster(&fake, &params(dir.path()), true, None).unwrap();
        assert_eq!(sel.working().ids().unwrap(), vec!["2xyz_A"]);
    }

    #[test]
    fn structure_index_selects_every_chain_of_a_structure() {
        let dir = tempfile::tempdir().unwrap();
        let mut sel = selection(None);
        let p = ClusterParams {
            index: IndexMode::Structure,
            ..params(dir.path())
        };
        let fake = FakeClusterer::new(vec!["1abc"]);
        let outcome = sel.cluster(&fake, &p, false, None).unwrap();
        assert_eq!(
            outcome.table().unwrap().ids().unwrap(),
            vec!["1abc_A", "1abc_B"]
        );
    }

    #[test]
    fn existing_representatives_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(dir.path());
        write_fasta_file(&p.representatives_path(), [("3def_A", "ACDEFGHIKL")]).unwrap();

        let mut sel = selection(None);
        let fake = FakeClusterer::new(vec!["1abc_A"]);
        let outcome = sel.cluster(&fake, &p, false, None).unwrap();
        assert_eq!(fake.calls.get(), 0);
        assert_eq!(outcome.table().unwrap().ids().unwrap(), vec!["3def_A"]);
    }

    #[test]
    fn missing_output_after_successful_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut sel = selection(None);
        let err = sel
            .cluster(&SilentClusterer, &params(dir.path()), false, None)
            .unwrap_err();
        assert!(matches!(err, SelectionError::ClusterOutputMissing(_)));
    }

    #[test]
    fn ratio_mode_splits_representatives() {
        let dir = tempfile::tempdir().unwrap();
        let config = SplitConfig::ratios(["train", "test"], vec![0.5, 0.5]).unwrap();
        let mut sel = selection(Some(config));
        let mut acc = sel.new_accumulator().unwrap();

        let fake = FakeClusterer::new(vec!["1abc_A", "1abc_B", "2xyz_A", "3def_A"]);
        let outcome = sel
            .cluster(&fake, &params(dir.path()), false, Some(&mut acc))
            .unwrap();
        let splits = outcome.splits().unwrap();
        assert_eq!(splits.sizes(), vec![2, 2]);
        assert_eq!(acc.get("train").unwrap().height(), 2);
    }

    #[test]
    fn fasta_input_holds_the_working_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut sel = selection(None);
        sel.molecule_type("protein", true).unwrap();
        let fake = FakeClusterer::new(vec!["1abc_A"]);
        sel.cluster(&fake, &params(dir.path()), false, None).unwrap();

        let written = read_fasta_file(&dir.path().join("pdb.fasta")).unwrap();
        assert_eq!(written.len(), 4);
        assert_eq!(written[0].id(), "1abc_A");
    }
}
