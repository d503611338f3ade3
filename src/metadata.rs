use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::Result;
use crate::fasta::read_fasta;
use crate::record::{MetadataMaps, SeqresEntry};

/// Date format of the `ACCESSION DATE` column in `entries.idx`.
const ENTRIES_DATE_FORMAT: &str = "%m/%d/%y";
const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
const SOURCE_HEADER_KEYS: [&str; 3] = ["protein", "idcode", "------"];

/// Locations of the metadata files under a root directory.
#[derive(Debug, Clone)]
pub struct MetadataFiles {
    pub root: PathBuf,
    pub seqres: String,
    pub ligand_map: String,
    pub source_map: String,
    pub resolution: String,
    pub entry_type: String,
    pub entries: String,
}

impl MetadataFiles {
    /// Default wwPDB file names under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seqres: "pdb_seqres.txt".to_string(),
            ligand_map: "cc-to-pdb.tdd".to_string(),
            source_map: "source.idx".to_string(),
            resolution: "resolu.idx".to_string(),
            entry_type: "pdb_entry_type.txt".to_string(),
            entries: "entries.idx".to_string(),
        }
    }

    fn open(&self, filename: &str) -> Result<BufReader<File>> {
        Ok(BufReader::new(File::open(self.root.join(filename))?))
    }

    pub fn read_seqres(&self) -> Result<Vec<SeqresEntry>> {
        parse_seqres(self.open(&self.seqres)?)
    }

    pub fn read_maps(&self) -> Result<MetadataMaps> {
        Ok(MetadataMaps {
            ligands_by_code: parse_ligand_map(self.open(&self.ligand_map)?)?,
            source: parse_source_map(self.open(&self.source_map)?)?,
            resolution: parse_resolution_map(self.open(&self.resolution)?)?,
            experiment_type: parse_experiment_type_map(self.open(&self.entry_type)?)?,
            deposition_date: parse_deposition_dates(self.open(&self.entries)?)?,
        })
    }
}

/// `pdb_seqres.txt`: FASTA with seqres headers.
pub fn parse_seqres<R: BufRead>(reader: R) -> Result<Vec<SeqresEntry>> {
    let records = read_fasta(reader)?;
    let total = records.len();
    let entries: Vec<SeqresEntry> = records
        .iter()
        .filter_map(|r| {
            let entry = SeqresEntry::parse(&r.header, &r.sequence);
            if entry.is_none() {
                log::debug!("Skipping malformed seqres header '{}'", r.header);
            }
            entry
        })
        .collect();
    if entries.len() < total {
        log::warn!("Skipped {} malformed seqres records", total - entries.len());
    }
    Ok(entries)
}

/// `cc-to-pdb.tdd`: `LIGAND<ws>pdb1 pdb2 ...` per line.
pub fn parse_ligand_map<R: BufRead>(reader: R) -> Result<HashMap<String, Vec<String>>> {
    let mut map = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let mut params = line.split_whitespace();
        let Some(code) = params.next() else {
            continue;
        };
        let structures = params.map(str::to_lowercase).collect();
        map.insert(code.to_string(), structures);
    }
    Ok(map)
}

/// `source.idx`: `IDCODE<ws>SOURCE TEXT`, after a few header lines.
pub fn parse_source_map<R: BufRead>(reader: R) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let mut params = line.split_whitespace();
        let Some(first) = params.next() else {
            continue;
        };
        if WEEKDAYS.contains(&first) {
            continue;
        }
        let key = first.to_lowercase();
        if SOURCE_HEADER_KEYS.contains(&key.as_str()) {
            continue;
        }
        map.insert(key, params.collect::<Vec<_>>().join(" "));
    }
    Ok(map)
}

/// `resolu.idx`: `IDCODE ; RESOLUTION`.
///
/// Negative values mark entries without a resolution and are left out.
pub fn parse_resolution_map<R: BufRead>(reader: R) -> Result<HashMap<String, f64>> {
    let mut map = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let params: Vec<&str> = line.split_whitespace().collect();
        let [pdb, _, resolution] = params.as_slice() else {
            continue;
        };
        match resolution.parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => {
                map.insert(pdb.to_lowercase(), value);
            }
            Ok(_) => {}
            Err(_) => log::debug!("Skipping resolution line '{line}'"),
        }
    }
    Ok(map)
}

/// `pdb_entry_type.txt`: tab-separated `id`, polymer kind, experiment type.
pub fn parse_experiment_type_map<R: BufRead>(reader: R) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        match fields.as_slice() {
            [pdb, _, experiment, ..] if !pdb.is_empty() && !experiment.is_empty() => {
                map.insert(pdb.to_lowercase(), experiment.to_string());
            }
            _ => log::debug!("Skipping entry type line '{line}'"),
        }
    }
    Ok(map)
}

/// `entries.idx`: two header lines, then tab-separated entry rows whose
/// third field is the deposition date.
pub fn parse_deposition_dates<R: BufRead>(reader: R) -> Result<HashMap<String, NaiveDate>> {
    let mut map = HashMap::new();
    for line in reader.lines().skip(2) {
        let line = line?.replace('"', "");
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        let (Some(pdb), Some(date)) = (fields.first(), fields.get(2)) else {
            continue;
        };
        if pdb.is_empty() {
            continue;
        }
        match NaiveDate::parse_from_str(date, ENTRIES_DATE_FORMAT) {
            Ok(date) => {
                map.insert(pdb.to_lowercase(), date);
            }
            Err(_) => log::debug!("Skipping entries line with date '{date}'"),
        }
    }
    Ok(map)
}

/// Read every metadata file under `root` with default names.
pub fn read_root_dir(root: &Path) -> Result<(Vec<SeqresEntry>, MetadataMaps)> {
    let files = MetadataFiles::new(root);
    Ok((files.read_seqres()?, files.read_maps()?))
}
