use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::Result;

/// A parsed FASTA record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    /// Header line without the leading `>`.
    pub header: String,
    pub sequence: String,
}

impl FastaRecord {
    /// First whitespace-delimited token of the header.
    pub fn id(&self) -> &str {
        self.header.split_whitespace().next().unwrap_or("")
    }
}

/// Write `>id` / sequence pairs.
pub fn write_fasta<'a, W, I>(writer: W, records: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut writer = BufWriter::new(writer);
    for (id, sequence) in records {
        writeln!(writer, ">{id}")?;
        writeln!(writer, "{sequence}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_fasta_file<'a, I>(path: &Path, records: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    write_fasta(File::create(path)?, records)
}

/// Read FASTA records. Sequence lines are concatenated; anything before
/// the first header is ignored.
pub fn read_fasta<R: BufRead>(reader: R) -> Result<Vec<FastaRecord>> {
    let mut records = Vec::new();
    let mut current: Option<FastaRecord> = None;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();
        if let Some(header) = line.strip_prefix('>') {
            if let Some(record) = current.take() {
                records.push(record);
            }
            current = Some(FastaRecord {
                header: header.trim().to_string(),
                sequence: String::new(),
            });
        } else if let Some(record) = current.as_mut() {
            record.sequence.push_str(line.trim());
        }
    }

    if let Some(record) = current {
        records.push(record);
    }
    Ok(records)
}

pub fn read_fasta_file(path: &Path) -> Result<Vec<FastaRecord>> {
    read_fasta(BufReader::new(File::open(path)?))
}
