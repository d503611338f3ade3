use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::selection::Selection;

/// Fetches whole-structure files into a directory as `{pdb}.{ext}`.
pub trait StructureFetcher {
    fn fetch(&self, ids: &[String], out_dir: &Path) -> Result<()>;

    /// File extension of the fetched files.
    fn extension(&self) -> &str {
        "pdb"
    }
}

/// Writes one file per requested chain of a structure file.
pub trait ChainExtractor {
    fn extract(&self, structure_file: &Path, chains: &[String], out_dir: &Path)
        -> Result<Vec<PathBuf>>;

    fn extension(&self) -> &str {
        "pdb"
    }
}

/// `{pdb}_{chain}.{ext}`
pub fn chain_file_name(pdb: &str, chain: &str, extension: &str) -> String {
    format!("{pdb}_{chain}.{extension}")
}

/// Chain extraction from PDB-format files.
///
/// Copies the `ATOM`, `HETATM`, `ANISOU` and `TER` records of the first model
/// whose chain identifier (column 22) matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdbChainExtractor;

const CHAIN_RECORDS: [&str; 4] = ["ATOM  ", "HETATM", "ANISOU", "TER   "];
const CHAIN_ID_COLUMN: usize = 21;

fn record_chain(line: &str) -> Option<&str> {
    if !CHAIN_RECORDS.iter().any(|r| line.starts_with(r)) {
        return None;
    }
    line.get(CHAIN_ID_COLUMN..CHAIN_ID_COLUMN + 1)
}

impl ChainExtractor for PdbChainExtractor {
    fn extract(
        &self,
        structure_file: &Path,
        chains: &[String],
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let pdb = structure_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut lines_by_chain: Vec<Vec<String>> = vec![Vec::new(); chains.len()];
        for line in BufReader::new(File::open(structure_file)?).lines() {
            let line = line?;
            if line.starts_with("ENDMDL") {
                break;
            }
            let Some(chain) = record_chain(&line) else {
                continue;
            };
            if let Some(i) = chains.iter().position(|c| c == chain) {
                lines_by_chain[i].push(line);
            }
        }

        let mut written = Vec::new();
        for (chain, lines) in chains.iter().zip(lines_by_chain) {
            if lines.is_empty() {
                log::warn!("Chain {chain} not found in {}", structure_file.display());
                continue;
            }
            let path = out_dir.join(chain_file_name(&pdb, chain, self.extension()));
            let mut out = BufWriter::new(File::create(&path)?);
            for line in &lines {
                writeln!(out, "{line}")?;
            }
            writeln!(out, "END")?;
            out.flush()?;
            written.push(path);
        }
        Ok(written)
    }
}

impl Selection {
    /// Fetch the structure files of every selected structure into `out_dir`.
    pub fn download(&self, fetcher: &dyn StructureFetcher, out_dir: &Path) -> Result<()> {
        fs::create_dir_all(out_dir)?;
        let ids = self.unique_pdbs()?;
        log::info!("Downloading {} structures to {}", ids.len(), out_dir.display());
        fetcher.fetch(&ids, out_dir)
    }

    /// Write one file per selected chain into `pdb_dir`, fetching only the
    /// structure files that are not there yet.
    pub fn write_chains(
        &self,
        fetcher: &dyn StructureFetcher,
        extractor: &dyn ChainExtractor,
        pdb_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(pdb_dir)?;
        let ext = fetcher.extension();

        let present: HashSet<String> = fs::read_dir(pdb_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();

        let by_structure = self.working().chains_by_structure()?;
        let missing: Vec<String> = by_structure
            .keys()
            .filter(|pdb| !present.contains(&format!("{pdb}.{ext}")))
            .cloned()
            .collect();
        if !missing.is_empty() {
            log::info!("Fetching {} missing structure files", missing.len());
            fetcher.fetch(&missing, pdb_dir)?;
        }

        log::info!("Extracting chains from {} structures", by_structure.len());
        let mut written = Vec::new();
        for (pdb, chains) in &by_structure {
            let structure_file = pdb_dir.join(format!("{pdb}.{ext}"));
            if !structure_file.exists() {
                log::warn!("No structure file for {pdb}, skipping its chains");
                continue;
            }
            written.extend(extractor.extract(&structure_file, chains, pdb_dir)?);
        }
        log::info!("Wrote {} chain files", written.len());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::table::tests::record;
    use crate::table::ChainTable;

    const STRUCTURE: &str = "\
HEADER    TEST
ATOM      1  CA  ALA A   1       1.000   2.000   3.000  1.00  0.00           C
ATOM      2  CA  ALA B   1       4.000   5.000   6.000  1.00  0.00           C
TER       3      ALA B   1
HETATM    4  O   HOH A   2       4.000   5.000   6.000  1.00  0.00           O
ENDMDL
ATOM      5  CA  ALA A   1       9.000   9.000   9.000  1.00  0.00           C
";

    /// Writes a fixed structure for every requested id and records the ids.
    #[derive(Default)]
    struct FakeFetcher {
        requested: RefCell<Vec<String>>,
    }

    impl StructureFetcher for FakeFetcher {
        fn fetch(&self, ids: &[String], out_dir: &Path) -> Result<()> {
            for id in ids {
                fs::write(out_dir.join(format!("{id}.pdb")), STRUCTURE)?;
            }
            self.requested.borrow_mut().extend(ids.iter().cloned());
            Ok(())
        }
    }

    #[test]
    fn extracts_first_model_records_per_chain() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("1abc.pdb");
        fs::write(&file, STRUCTURE).unwrap();

        let written = PdbChainExtractor
            .extract(&file, &["A".to_string(), "Z".to_string()], dir.path())
            .unwrap();
        assert_eq!(written, vec![dir.path().join("1abc_A.pdb")]);

        let text = fs::read_to_string(&written[0]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ATOM      1"));
        assert!(lines[1].starts_with("HETATM"));
        assert_eq!(lines[2], "END");
    }

    #[test]
    fn write_chains_fetches_only_missing_structures() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("1abc.pdb"), STRUCTURE).unwrap();

        let table =
            ChainTable::from_records(&[record("1abc_A"), record("1abc_B"), record("2xyz_A")])
                .unwrap();
        let sel = Selection::new(table, None).unwrap();
        let fetcher = FakeFetcher::default();

        let written = sel
            .write_chains(&fetcher, &PdbChainExtractor, dir.path())
            .unwrap();
        assert_eq!(*fetcher.requested.borrow(), vec!["2xyz".to_string()]);
        assert_eq!(
            written,
            vec![
                dir.path().join("1abc_A.pdb"),
                dir.path().join("1abc_B.pdb"),
                dir.path().join("2xyz_A.pdb"),
            ]
        );
    }

    #[test]
    fn download_requests_each_structure_once() {
        let dir = tempfile::tempdir().unwrap();
        let table =
            ChainTable::from_records(&[record("1abc_A"), record("1abc_B"), record("2xyz_A")])
                .unwrap();
        let sel = Selection::new(table, None).unwrap();
        let fetcher = FakeFetcher::default();
        sel.download(&fetcher, dir.path()).unwrap();
        assert_eq!(*fetcher.requested.borrow(), vec!["1abc", "2xyz"]);
    }
}
