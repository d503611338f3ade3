use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::split;
use crate::table::ChainTable;

/// One chain of one experimental structure.
///
/// Metadata joined from the lookup files is optional; absence is `None`,
/// never a sentinel value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub id: String,
    pub structure_id: String,
    pub chain_id: String,
    pub length: i64,
    pub molecule_type: String,
    pub name: String,
    pub sequence: String,
    pub ligands: Vec<String>,
    pub source: Option<String>,
    pub resolution: Option<f64>,
    pub deposition_date: Option<NaiveDate>,
    pub experiment_type: Option<String>,
    pub split: String,
}

impl ChainRecord {
    /// Comparable identity of the row over every column except `split`.
    ///
    /// Ligands keep their stored order, floats compare bitwise.
    pub fn row_key(&self) -> String {
        const SEP: char = '\u{1f}';
        format!(
            "{}{SEP}{}{SEP}{}{SEP}{}{SEP}{}{SEP}{}{SEP}{}{SEP}{}{SEP}{:?}{SEP}{:?}{SEP}{:?}{SEP}{:?}",
            self.id,
            self.structure_id,
            self.chain_id,
            self.length,
            self.molecule_type,
            self.name,
            self.sequence,
            self.ligands.join(" "),
            self.source,
            self.resolution.map(f64::to_bits),
            self.deposition_date,
            self.experiment_type,
        )
    }
}

/// Split a chain id such as `4hhb_A` on its first underscore.
pub fn split_chain_id(id: &str) -> Option<(&str, &str)> {
    match id.split_once('_') {
        Some((pdb, chain)) if !pdb.is_empty() && !chain.is_empty() => Some((pdb, chain)),
        _ => None,
    }
}

/// A raw entry of the wwPDB seqres collection.
///
/// Header layout: `101m_A mol:protein length:154  MYOGLOBIN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqresEntry {
    pub id: String,
    pub molecule_type: String,
    pub length: i64,
    pub name: String,
    pub sequence: String,
}

impl SeqresEntry {
    /// Parse a header (without the leading `>`) and its sequence.
    /// Returns `None` when the header does not follow the seqres layout.
    pub fn parse(header: &str, sequence: &str) -> Option<Self> {
        let mut params = header.split_whitespace();
        let id = params.next()?;
        split_chain_id(id)?;
        let molecule_type = params.next()?.strip_prefix("mol:")?;
        let length = params.next()?.strip_prefix("length:")?.parse::<i64>().ok()?;
        if length <= 0 {
            return None;
        }
        let name = params.collect::<Vec<_>>().join(" ");

        Some(Self {
            id: id.to_string(),
            molecule_type: molecule_type.to_string(),
            length,
            name,
            sequence: sequence.to_string(),
        })
    }
}

/// The five per-structure lookup tables joined onto the seqres entries.
///
/// `ligands_by_code` is keyed by ligand code, as the chemical component
/// dictionary publishes it; every other map is keyed by structure id.
#[derive(Debug, Clone, Default)]
pub struct MetadataMaps {
    pub ligands_by_code: HashMap<String, Vec<String>>,
    pub source: HashMap<String, String>,
    pub resolution: HashMap<String, f64>,
    pub experiment_type: HashMap<String, String>,
    pub deposition_date: HashMap<String, NaiveDate>,
}

/// Invert `ligand -> [structures]` into `structure -> [ligands]`.
///
/// Ligand codes per structure come out sorted and deduplicated.
pub fn invert_ligand_map(
    ligands_by_code: &HashMap<String, Vec<String>>,
) -> HashMap<String, Vec<String>> {
    let mut inverted: HashMap<String, Vec<String>> = HashMap::new();
    for (code, structures) in ligands_by_code {
        for structure in structures {
            inverted
                .entry(structure.clone())
                .or_default()
                .push(code.clone());
        }
    }
    for codes in inverted.values_mut() {
        codes.sort_unstable();
        codes.dedup();
    }
    inverted
}

/// Join seqres entries with the lookup maps into one chain table.
///
/// Missing lookups become absent values; a structure without ligands gets
/// an empty ligand list. Duplicate chain ids keep their first occurrence.
pub fn build_chain_table(entries: &[SeqresEntry], maps: &MetadataMaps) -> Result<ChainTable> {
    let ligands = invert_ligand_map(&maps.ligands_by_code);
    let mut seen: HashSet<&str> = HashSet::with_capacity(entries.len());
    let mut records = Vec::with_capacity(entries.len());

    for entry in entries {
        let Some((structure_id, chain_id)) = split_chain_id(&entry.id) else {
            log::warn!("Skipping seqres entry with malformed id '{}'", entry.id);
            continue;
        };
        if !seen.insert(entry.id.as_str()) {
            log::warn!("Skipping duplicate seqres entry '{}'", entry.id);
            continue;
        }

        records.push(ChainRecord {
            id: entry.id.clone(),
            structure_id: structure_id.to_string(),
            chain_id: chain_id.to_string(),
            length: entry.length,
            molecule_type: entry.molecule_type.clone(),
            name: entry.name.clone(),
            sequence: entry.sequence.clone(),
            ligands: ligands.get(structure_id).cloned().unwrap_or_default(),
            source: maps.source.get(structure_id).cloned(),
            resolution: maps.resolution.get(structure_id).copied(),
            deposition_date: maps.deposition_date.get(structure_id).copied(),
            experiment_type: maps.experiment_type.get(structure_id).cloned(),
            split: split::UNASSIGNED.to_string(),
        });
    }

    log::info!("Parsed {} chain records", records.len());
    ChainTable::from_records(&records)
}
