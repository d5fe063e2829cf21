use crate::data::{FeatureTable, LabelTable, ID_COLUMN, NUM_LABELS};
use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Csv,
    Tsv,
    GzippedCsv,
    GzippedTsv,
}

impl FileFormat {
    /// Detect file format from path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str());
        let stem = path.file_stem().and_then(|s| s.to_str());

        match (ext, stem) {
            (Some("gz"), Some(stem)) => {
                if stem.ends_with(".csv") {
                    Ok(FileFormat::GzippedCsv)
                } else if stem.ends_with(".tsv") || stem.ends_with(".txt") {
                    Ok(FileFormat::GzippedTsv)
                } else {
                    bail!("Cannot determine format of gzipped file {:?}", path)
                }
            }
            (Some("csv"), _) => Ok(FileFormat::Csv),
            (Some("tsv"), _) | (Some("txt"), _) => Ok(FileFormat::Tsv),
            _ => bail!("Unsupported file format: {:?}", path),
        }
    }

    /// Get delimiter character
    pub fn delimiter(&self) -> u8 {
        match self {
            FileFormat::Csv | FileFormat::GzippedCsv => b',',
            FileFormat::Tsv | FileFormat::GzippedTsv => b'\t',
        }
    }

    /// Check if format is gzipped
    pub fn is_gzipped(&self) -> bool {
        matches!(self, FileFormat::GzippedCsv | FileFormat::GzippedTsv)
    }
}

/// Rows between progress messages while parsing
const LOG_EVERY: usize = 100_000;

/// Reader and writer for the feature and label tables
#[derive(Debug, Clone, Copy, Default)]
pub struct DataLoader;

impl DataLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load the per-timestamp feature table
    pub fn load_features<P: AsRef<Path>>(&self, path: P) -> Result<FeatureTable> {
        let path = path.as_ref();
        info!("Loading features from {:?}", path);
        let format = FileFormat::from_path(path)?;
        let table = self.parse_features(open_reader(path, format)?, format)?;
        info!(
            "Loaded {} rows for {} subjects ({} feature columns)",
            table.n_rows(),
            table.subject_count(),
            table.n_columns()
        );
        Ok(table)
    }

    /// Load the per-subject label table
    pub fn load_labels<P: AsRef<Path>>(&self, path: P) -> Result<LabelTable> {
        let path = path.as_ref();
        info!("Loading labels from {:?}", path);
        let format = FileFormat::from_path(path)?;
        let table = self.parse_labels(open_reader(path, format)?, format)?;
        info!("Loaded labels for {} subjects", table.len());
        Ok(table)
    }

    /// Parse a feature table; every column except `pid` is a feature
    fn parse_features<R: Read>(&self, reader: R, format: FileFormat) -> Result<FeatureTable> {
        let mut csv_reader = ReaderBuilder::new()
            .delimiter(format.delimiter())
            .has_headers(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader.headers()?.iter().map(|s| s.to_string()).collect();
        let id_index = headers
            .iter()
            .position(|h| h == ID_COLUMN)
            .with_context(|| format!("Missing required column: {}", ID_COLUMN))?;
        debug!("Headers: {:?}", headers);

        let columns = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_index)
            .map(|(_, h)| h.clone())
            .collect();
        let mut table = FeatureTable::new(columns);

        for (line, result) in csv_reader.records().enumerate() {
            let record = result.context("Failed to parse CSV record")?;
            let pid = parse_pid(record.get(id_index).unwrap_or(""))
                .with_context(|| format!("Invalid pid at line {}", line + 2))?;

            let values = record
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != id_index)
                .map(|(_, field)| parse_value(field))
                .collect::<Result<Vec<f32>>>()
                .with_context(|| format!("Invalid value at line {}", line + 2))?;

            if values.len() != table.n_columns() {
                bail!(
                    "Line {} has {} values, expected {}",
                    line + 2,
                    values.len(),
                    table.n_columns()
                );
            }
            table.push_row(pid, values);

            if (line + 1) % LOG_EVERY == 0 {
                debug!("Loaded {} rows...", line + 1);
            }
        }

        Ok(table)
    }

    /// Parse a label table; the first ten columns after `pid` are the labels
    fn parse_labels<R: Read>(&self, reader: R, format: FileFormat) -> Result<LabelTable> {
        let mut csv_reader = ReaderBuilder::new()
            .delimiter(format.delimiter())
            .has_headers(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader.headers()?.iter().map(|s| s.to_string()).collect();
        let id_index = headers
            .iter()
            .position(|h| h == ID_COLUMN)
            .with_context(|| format!("Missing required column: {}", ID_COLUMN))?;

        let label_indices: Vec<usize> = (id_index + 1..headers.len()).take(NUM_LABELS).collect();
        if label_indices.len() < NUM_LABELS {
            bail!(
                "Label table has {} label columns, expected at least {}",
                label_indices.len(),
                NUM_LABELS
            );
        }

        let mut table = LabelTable {
            columns: label_indices.iter().map(|&i| headers[i].clone()).collect(),
            pids: Vec::new(),
            labels: Vec::new(),
        };

        for (line, result) in csv_reader.records().enumerate() {
            let record = result.context("Failed to parse CSV record")?;
            let pid = parse_pid(record.get(id_index).unwrap_or(""))
                .with_context(|| format!("Invalid pid at line {}", line + 2))?;
            let labels = label_indices
                .iter()
                .map(|&i| {
                    let value = parse_value(record.get(i).unwrap_or(""))?;
                    if value == 0.0 || value == 1.0 {
                        Ok(value)
                    } else {
                        bail!("label {} is not binary: {}", headers[i], value)
                    }
                })
                .collect::<Result<Vec<f32>>>()
                .with_context(|| format!("Invalid label at line {}", line + 2))?;

            table.pids.push(pid);
            table.labels.push(labels);
        }

        Ok(table)
    }

    /// Write a feature table in the same layout it was read from
    pub fn write_features<P: AsRef<Path>>(&self, table: &FeatureTable, path: P) -> Result<()> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)?;
        if let Some(parent) = path.parent() {
            crate::utils::ensure_dir(parent)?;
        }

        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        if format.is_gzipped() {
            let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            write_table(table, encoder, format)?
                .finish()
                .context("Failed to finish gzip stream")?;
        } else {
            write_table(table, BufWriter::new(file), format)?;
        }

        debug!("Wrote {} rows to {:?}", table.n_rows(), path);
        Ok(())
    }
}

fn open_reader(path: &Path, format: FileFormat) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    if format.is_gzipped() {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn write_table<W: Write>(table: &FeatureTable, writer: W, format: FileFormat) -> Result<W> {
    let mut csv_writer = WriterBuilder::new()
        .delimiter(format.delimiter())
        .from_writer(writer);

    let mut header = Vec::with_capacity(table.n_columns() + 1);
    header.push(ID_COLUMN.to_string());
    header.extend(table.columns.iter().cloned());
    csv_writer.write_record(&header)?;

    for (pid, row) in table.pids.iter().zip(&table.rows) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(pid.to_string());
        record.extend(row.iter().map(|v| format_value(*v)));
        csv_writer.write_record(&record)?;
    }

    csv_writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush table: {}", e.error()))
}

/// Subject ids are integers, but pandas exports may render them as `12.0`
fn parse_pid(field: &str) -> Result<u64> {
    let field = field.trim();
    if let Ok(pid) = field.parse::<u64>() {
        return Ok(pid);
    }
    let value: f64 = field.parse().with_context(|| format!("not a number: {:?}", field))?;
    if value >= 0.0 && value.fract() == 0.0 {
        Ok(value as u64)
    } else {
        bail!("not a valid subject id: {:?}", field)
    }
}

/// Empty cells and `nan` spellings are missing values.
///
/// Infinities, and literals too large for `f32`, are rejected.
pub(crate) fn parse_value(field: &str) -> Result<f32> {
    let field = field.trim();
    if field.is_empty() || field.eq_ignore_ascii_case("nan") || field.eq_ignore_ascii_case("na") {
        return Ok(f32::NAN);
    }
    let value = field
        .parse::<f32>()
        .with_context(|| format!("not a number: {:?}", field))?;
    if !value.is_finite() {
        bail!("not a finite number: {:?}", field);
    }
    Ok(value)
}

pub(crate) fn format_value(value: f32) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}
