use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::accumulator::JoinGranularity;
use crate::error::{Result, SelectionError};
use crate::schema::chain;
use crate::table::{date_to_days, ChainTable};

/// Allowed distance of the ratio sum from 1.0.
pub const RATIO_SUM_TOLERANCE: f64 = 1e-9;
pub const DEFAULT_SEED: u64 = 42;

// ── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SplitMode {
    Ratios(Vec<f64>),
    TimeFrames(Vec<NaiveDate>),
}

/// Validated split configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SplitConfigFile", into = "SplitConfigFile")]
pub struct SplitConfig {
    names: Vec<String>,
    mode: SplitMode,
    leftover_split: usize,
    seed: u64,
    join: JoinGranularity,
}

/// On-disk form of [`SplitConfig`].
///
/// ```toml
/// names = ["train", "val", "test"]
/// ratios = [0.8, 0.1, 0.1]
/// leftover_split = 0
/// seed = 42
/// join = "full_row"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SplitConfigFile {
    names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ratios: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_frames: Option<Vec<FrameDate>>,
    #[serde(default)]
    leftover_split: usize,
    #[serde(default = "default_seed")]
    seed: u64,
    #[serde(default)]
    join: JoinGranularity,
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

/// A time-frame boundary written either as a native TOML date
/// (`2022-01-01`) or as a string (`"2022-01-01"`).
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(transparent)]
struct FrameDate(NaiveDate);

impl FrameDate {
    fn parse(text: &str) -> Result<Self, String> {
        let date = text.split(['T', ' ']).next().unwrap_or(text);
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map(FrameDate)
            .map_err(|e| format!("Invalid time frame '{text}': {e}"))
    }
}

impl<'de> Deserialize<'de> for FrameDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FrameDateVisitor;

        impl<'de> de::Visitor<'de> for FrameDateVisitor {
            type Value = FrameDate;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a date such as 2022-01-01")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<FrameDate, E> {
                FrameDate::parse(v).map_err(E::custom)
            }

            // toml hands native dates over as a one-entry map holding the text.
            fn visit_map<A: de::MapAccess<'de>>(self, mut map: A) -> Result<FrameDate, A::Error> {
                match map.next_entry::<String, String>()? {
                    Some((_, text)) => FrameDate::parse(&text).map_err(de::Error::custom),
                    None => Err(de::Error::custom("empty date")),
                }
            }
        }

        deserializer.deserialize_any(FrameDateVisitor)
    }
}

impl TryFrom<SplitConfigFile> for SplitConfig {
    type Error = SelectionError;

    fn try_from(file: SplitConfigFile) -> Result<Self> {
        let mode = match (file.ratios, file.time_frames) {
            (Some(ratios), None) => SplitMode::Ratios(ratios),
            (None, Some(frames)) => {
                SplitMode::TimeFrames(frames.into_iter().map(|f| f.0).collect())
            }
            (Some(_), Some(_)) => {
                return Err(SelectionError::Config(
                    "ratios and time_frames are mutually exclusive".into(),
                ))
            }
            (None, None) => {
                return Err(SelectionError::Config(
                    "One of ratios or time_frames is required".into(),
                ))
            }
        };
        let config = SplitConfig {
            names: file.names,
            mode,
            leftover_split: file.leftover_split,
            seed: file.seed,
            join: file.join,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<SplitConfig> for SplitConfigFile {
    fn from(config: SplitConfig) -> Self {
        let (ratios, time_frames) = match config.mode {
            SplitMode::Ratios(r) => (Some(r), None),
            SplitMode::TimeFrames(f) => (None, Some(f.into_iter().map(FrameDate).collect())),
        };
        Self {
            names: config.names,
            ratios,
            time_frames,
            leftover_split: config.leftover_split,
            seed: config.seed,
            join: config.join,
        }
    }
}

impl SplitConfig {
    /// Proportional splits; leftover rows go to the first split.
    pub fn ratios<S: Into<String>>(
        names: impl IntoIterator<Item = S>,
        ratios: Vec<f64>,
    ) -> Result<Self> {
        Self::build(names, SplitMode::Ratios(ratios))
    }

    /// Sequential splits ending at each of `frames` (exclusive).
    pub fn time_frames<S: Into<String>>(
        names: impl IntoIterator<Item = S>,
        frames: Vec<NaiveDate>,
    ) -> Result<Self> {
        Self::build(names, SplitMode::TimeFrames(frames))
    }

    fn build<S: Into<String>>(names: impl IntoIterator<Item = S>, mode: SplitMode) -> Result<Self> {
        let config = Self {
            names: names.into_iter().map(Into::into).collect(),
            mode,
            leftover_split: 0,
            seed: DEFAULT_SEED,
            join: JoinGranularity::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn with_leftover_split(mut self, index: usize) -> Result<Self> {
        self.leftover_split = index;
        self.validate()?;
        Ok(self)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_join(mut self, join: JoinGranularity) -> Self {
        self.join = join;
        self
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn mode(&self) -> &SplitMode {
        &self.mode
    }

    pub fn leftover_split(&self) -> usize {
        self.leftover_split
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn join(&self) -> JoinGranularity {
        self.join
    }

    pub fn validate(&self) -> Result<()> {
        validate_names(&self.names)?;
        match &self.mode {
            SplitMode::Ratios(ratios) => {
                validate_ratios(&self.names, ratios)?;
                validate_leftover(&self.names, self.leftover_split)
            }
            SplitMode::TimeFrames(frames) => validate_time_frames(&self.names, frames),
        }
    }
}

fn validate_names(names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Err(SelectionError::Config("At least one split name is required".into()));
    }
    let unique: HashSet<&String> = names.iter().collect();
    if unique.len() != names.len() {
        return Err(SelectionError::Config(format!(
            "Split names must be unique: {names:?}"
        )));
    }
    Ok(())
}

fn validate_ratios(names: &[String], ratios: &[f64]) -> Result<()> {
    if names.len() != ratios.len() {
        return Err(SelectionError::Config(format!(
            "{} split names but {} ratios",
            names.len(),
            ratios.len()
        )));
    }
    if let Some(bad) = ratios.iter().find(|r| !r.is_finite() || **r < 0.0) {
        return Err(SelectionError::Config(format!(
            "Split ratios must be non-negative, got {bad}"
        )));
    }
    let sum: f64 = ratios.iter().sum();
    if (sum - 1.0).abs() > RATIO_SUM_TOLERANCE {
        return Err(SelectionError::Config(format!(
            "Split ratios must sum to 1.0, got {sum}"
        )));
    }
    Ok(())
}

fn validate_leftover(names: &[String], leftover_split: usize) -> Result<()> {
    if leftover_split >= names.len() {
        return Err(SelectionError::Config(format!(
            "Leftover split index {leftover_split} out of range for {} splits",
            names.len()
        )));
    }
    Ok(())
}

fn validate_time_frames(names: &[String], frames: &[NaiveDate]) -> Result<()> {
    if names.len() != frames.len() {
        return Err(SelectionError::Config(format!(
            "{} split names but {} time frames",
            names.len(),
            frames.len()
        )));
    }
    if !frames_are_sequential(frames) {
        return Err(SelectionError::Config(format!(
            "Time frames must be strictly increasing: {frames:?}"
        )));
    }
    Ok(())
}

/// Every adjacent pair satisfies `t[i] < t[i + 1]`.
pub fn frames_are_sequential(frames: &[NaiveDate]) -> bool {
    frames.windows(2).all(|pair| pair[0] < pair[1])
}

// ── Split results ───────────────────────────────────────────────────────────

/// Named split tables in configuration order.
#[derive(Debug, Clone, Default)]
pub struct Splits {
    entries: Vec<(String, ChainTable)>,
}

impl Splits {
    pub fn new(entries: Vec<(String, ChainTable)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&ChainTable> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, table)| table)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.entries.iter().map(|(_, t)| t.height()).collect()
    }

    pub fn total_rows(&self) -> usize {
        self.sizes().iter().sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ChainTable)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn into_inner(self) -> Vec<(String, ChainTable)> {
        self.entries
    }

    /// Write each split to `{dir}/{name}.parquet`.
    pub fn write_parquet(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for (name, table) in &self.entries {
            table.write_parquet(&dir.join(format!("{name}.parquet")))?;
        }
        Ok(())
    }

    fn describe_sizes(&self) -> String {
        self.sizes()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl IntoIterator for Splits {
    type Item = (String, ChainTable);
    type IntoIter = std::vec::IntoIter<(String, ChainTable)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

// ── Splitters ───────────────────────────────────────────────────────────────

/// Block sizes: `floor(R * r_i)`, remainder added to `leftover_split`.
pub fn proportional_sizes(total: usize, ratios: &[f64], leftover_split: usize) -> Result<Vec<usize>> {
    let mut sizes: Vec<usize> = ratios
        .iter()
        .map(|r| (total as f64 * r).floor() as usize)
        .collect();
    let assigned: usize = sizes.iter().sum();
    let remainder = total.checked_sub(assigned).ok_or_else(|| {
        SelectionError::DataInvariant(format!(
            "Split sizes {sizes:?} exceed the {total} available rows"
        ))
    })?;
    let slot = sizes.get_mut(leftover_split).ok_or_else(|| {
        SelectionError::Config(format!("Leftover split index {leftover_split} out of range"))
    })?;
    *slot += remainder;
    Ok(sizes)
}

/// Shuffle `table` with `seed` and cut it into contiguous blocks sized by
/// `ratios`. Each block's `split` column holds its split name.
pub fn split_proportionally(
    table: &ChainTable,
    names: &[String],
    ratios: &[f64],
    leftover_split: usize,
    seed: u64,
) -> Result<Splits> {
    validate_names(names)?;
    validate_ratios(names, ratios)?;
    validate_leftover(names, leftover_split)?;

    let total = table.height();
    let sizes = proportional_sizes(total, ratios, leftover_split)?;

    let mut order: Vec<IdxSize> = (0..total).map(|i| i as IdxSize).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let shuffled = table.take(order)?;

    let mut entries = Vec::with_capacity(names.len());
    let mut offset = 0;
    for (name, size) in names.iter().zip(sizes) {
        let block = shuffled.slice(offset, size).with_split(name)?;
        entries.push((name.clone(), block));
        offset += size;
    }
    let splits = Splits::new(entries);

    verify_partition(table, &splits, 0)?;
    log::info!(
        "Proportionally-derived dataset splits of sizes: {}",
        splits.describe_sizes()
    );
    Ok(splits)
}

/// Assign rows to consecutive date ranges `[start, t_i)`, where the first
/// start is the earliest deposition date in the table.
///
/// Rows dated on or after the last frame, and rows without a date, are left
/// out of every split.
pub fn split_into_time_frames(
    table: &ChainTable,
    names: &[String],
    frames: &[NaiveDate],
) -> Result<Splits> {
    validate_names(names)?;
    validate_time_frames(names, frames)?;

    let date = || col(chain::DEPOSITION_DATE).cast(DataType::Int32);
    let mut start = table
        .deposition_days()?
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(i32::MAX);

    let mut entries = Vec::with_capacity(names.len());
    for (name, frame) in names.iter().zip(frames) {
        let end = date_to_days(*frame);
        let block = table
            .filter_expr(date().gt_eq(lit(start)).and(date().lt(lit(end))))?
            .with_split(name)?;
        entries.push((name.clone(), block));
        start = end;
    }
    let splits = Splits::new(entries);

    let last = frames.last().map_or(i32::MIN, |f| date_to_days(*f));
    let leftover = table
        .filter_expr(date().is_null().or(date().gt_eq(lit(last))))?
        .height();

    verify_partition(table, &splits, leftover)?;
    log::info!(
        "Deposition date-derived dataset splits of sizes: {} ({} rows left over)",
        splits.describe_sizes(),
        leftover
    );
    Ok(splits)
}

/// Check that `splits` holds `input.height() - leftover` distinct rows, each
/// taken from `input`.
pub fn verify_partition(input: &ChainTable, splits: &Splits, leftover: usize) -> Result<()> {
    let expected = input.height().checked_sub(leftover).ok_or_else(|| {
        SelectionError::DataInvariant(format!(
            "{leftover} leftover rows from a table of {}",
            input.height()
        ))
    })?;
    if splits.total_rows() != expected {
        return Err(SelectionError::DataInvariant(format!(
            "Number of rows changed during split operations: {} in splits, {expected} expected",
            splits.total_rows()
        )));
    }

    let mut available: HashMap<String, usize> = HashMap::new();
    for key in input.row_keys()? {
        *available.entry(key).or_default() += 1;
    }

    let mut seen = HashSet::new();
    for (name, table) in splits.iter() {
        for key in table.row_keys()? {
            if !seen.insert(key.clone()) {
                return Err(SelectionError::DataInvariant(format!(
                    "Duplicate rows found in splits (split '{name}')"
                )));
            }
            match available.get_mut(&key) {
                Some(count) if *count > 0 => *count -= 1,
                _ => {
                    return Err(SelectionError::DataInvariant(format!(
                        "Split '{name}' holds a row that is not in the input"
                    )))
                }
            }
        }
    }
    Ok(())
}
