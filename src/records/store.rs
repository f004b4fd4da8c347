//! CSV persistence for personnel records
//!
//! CSV format (8 columns with header):
//! ```csv
//! id,first_name,last_name,email,department,title,phone,hired_on
//! 6f1c...,Grace,Hopper,grace@navy.mil,Research,Rear Admiral,,1943-12-09
//! ```
//!
//! An empty `phone` column reads back as no phone number.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, WriterBuilder};
use tokio_util::sync::CancellationToken;

use super::Person;

/// Reads and writes the roster file
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record; a missing file is an empty roster
    ///
    /// Any malformed row fails the whole load, listing each bad line.
    pub fn load(&self) -> Result<Vec<Person>> {
        if !self.path.exists() {
            log::info!(target: "roster::records", "No roster file at {:?}, starting empty", self.path);
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read roster file: {:?}", self.path))?;
        let people = parse_people(&content)
            .with_context(|| format!("Failed to parse roster file: {:?}", self.path))?;

        log::debug!(target: "roster::records", "Loaded {} record(s) from {:?}", people.len(), self.path);
        Ok(people)
    }

    /// Replace the roster file atomically (temp file + rename)
    pub fn save(&self, people: &[Person]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {:?}", parent))?;
        }

        let tmp_path = self.path.with_extension("csv.tmp");
        write_people(&tmp_path, people, None)?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace roster file: {:?}", self.path))?;

        log::info!(target: "roster::records", "Saved {} record(s) to {:?}", people.len(), self.path);
        Ok(())
    }
}

/// Write `people` to `path`, checking `cancel` before each row
///
/// Returns the number of rows written. A cancelled export removes its
/// partial file.
pub fn export(people: &[Person], path: &Path, cancel: &CancellationToken) -> Result<usize> {
    match write_people(path, people, Some(cancel)) {
        Ok(written) => {
            log::info!(target: "roster::records", "Exported {} record(s) to {:?}", written, path);
            Ok(written)
        }
        Err(err) => {
            if cancel.is_cancelled() {
                let _ = fs::remove_file(path);
            }
            Err(err)
        }
    }
}

fn write_people(path: &Path, people: &[Person], cancel: Option<&CancellationToken>) -> Result<usize> {
    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;

    let mut written = 0;
    for person in people {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            bail!("Export cancelled after {} of {} row(s)", written, people.len());
        }
        writer
            .serialize(person)
            .with_context(|| format!("Failed to write record {}", person.id))?;
        written += 1;
    }

    writer.flush().with_context(|| format!("Failed to flush {:?}", path))?;
    Ok(written)
}

/// Parse roster CSV content
pub fn parse_people(content: &str) -> Result<Vec<Person>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut people = Vec::new();
    let mut errors = Vec::new();

    for (line_num, result) in reader.deserialize::<Person>().enumerate() {
        match result {
            Ok(person) => people.push(person),
            Err(e) => errors.push(format!("Line {}: {}", line_num + 2, e)), // +2 for header + 0-index
        }
    }

    if !errors.is_empty() {
        bail!("{} malformed row(s):\n{}", errors.len(), errors.join("\n"));
    }
    Ok(people)
}
