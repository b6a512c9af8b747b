use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufRead, BufReader, Read},
    path::PathBuf,
};

use energy_client::domain::{EntityId, Reading, ReadingBatch};
use time::OffsetDateTime;

use super::{group_readings, ReadingSource, SourceError};
use crate::config::{CsvColumn, CsvConfig};

/// Spreadsheet export read positionally.
///
/// Layout:
/// - `skip_rows` leading lines (titles, units) are ignored. These are raw
///   lines, so blank lines in the preamble count.
/// - one header row follows when `has_header` is set.
/// - every configured column index maps to one `(entity, metric)`.
/// - blank or non-numeric cells carry no reading.
///
/// Rows are stamped from `timestamp_column` (RFC 3339) when configured,
/// otherwise with the file's modification time, so the last filled row wins.
#[derive(Debug, Clone)]
pub struct CsvSnapshotSource {
    path: PathBuf,
    layout: Layout,
}

#[derive(Debug, Clone)]
struct Layout {
    skip_rows: usize,
    has_header: bool,
    delimiter: u8,
    timestamp_column: Option<usize>,
    columns: Vec<CsvColumn>,
}

impl CsvSnapshotSource {
    pub fn from_config(cfg: &CsvConfig) -> Result<Self, SourceError> {
        if cfg.columns.is_empty() {
            return Err(SourceError::Configuration("csv source needs at least one column".to_string()));
        }
        let delimiter = u8::try_from(cfg.delimiter)
            .map_err(|_| SourceError::Configuration(format!("delimiter '{}' is not a single byte", cfg.delimiter)))?;
        if let Some(ts_col) = cfg.timestamp_column {
            if cfg.columns.iter().any(|c| c.index == ts_col) {
                return Err(SourceError::Configuration(format!(
                    "column {ts_col} is both the timestamp and a value column"
                )));
            }
        }

        Ok(Self {
            path: cfg.path.clone(),
            layout: Layout {
                skip_rows: cfg.skip_rows,
                has_header: cfg.has_header,
                delimiter,
                timestamp_column: cfg.timestamp_column,
                columns: cfg.columns.clone(),
            },
        })
    }
}

fn parse_cell_f64(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        None
    } else {
        trimmed.parse().ok().filter(|v: &f64| v.is_finite())
    }
}

fn parse_snapshot<R: Read>(reader: R, layout: &Layout, fallback_ts: OffsetDateTime) -> Result<Vec<Reading>, SourceError> {
    // The csv reader drops empty lines, so the preamble is skipped line by line first.
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    for _ in 0..layout.skip_rows {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| SourceError::MalformedData(format!("failed to read CSV preamble: {e}")))?;
        if n == 0 {
            break;
        }
    }

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(layout.delimiter)
        .from_reader(reader);

    let preamble = usize::from(layout.has_header);
    let mut column_seen = vec![false; layout.columns.len()];
    let mut data_rows = 0usize;
    let mut readings = Vec::new();

    for (row_idx, result) in rdr.records().enumerate().skip(preamble) {
        let record = result.map_err(|e| SourceError::MalformedData(format!("failed to read CSV record: {e}")))?;
        data_rows += 1;

        let ts = match layout.timestamp_column {
            None => fallback_ts,
            Some(idx) => {
                let cell = record.get(idx).map(str::trim).unwrap_or("");
                if cell.is_empty() {
                    continue;
                }
                OffsetDateTime::parse(cell, &time::format_description::well_known::Rfc3339).map_err(|e| {
                    SourceError::MalformedData(format!("invalid timestamp '{cell}' in row {}: {e}", layout.skip_rows + row_idx + 1))
                })?
            }
        };

        for (seen, column) in column_seen.iter_mut().zip(&layout.columns) {
            let Some(cell) = record.get(column.index) else { continue };
            *seen = true;
            if let Some(value) = parse_cell_f64(cell) {
                readings.push(Reading::new(column.entity.clone(), column.metric, ts, value));
            }
        }
    }

    if data_rows > 0 {
        if let Some((_, column)) = column_seen.iter().zip(&layout.columns).find(|(seen, _)| !**seen) {
            return Err(SourceError::MalformedData(format!(
                "column {} ({}/{}) is not present in any row",
                column.index, column.entity, column.metric
            )));
        }
    }

    Ok(readings)
}

#[async_trait::async_trait]
impl ReadingSource for CsvSnapshotSource {
    async fn fetch(
        &self,
        entity_ids: &BTreeSet<EntityId>,
        since: OffsetDateTime,
    ) -> Result<ReadingBatch, SourceError> {
        // The csv reader is blocking; keep it off the async workers.
        let path = self.path.clone();
        let layout = self.layout.clone();
        let readings = tokio::task::spawn_blocking(move || {
            let file = File::open(&path)
                .map_err(|e| SourceError::Unavailable(format!("failed to open {}: {e}", path.display())))?;
            let modified = file
                .metadata()
                .and_then(|m| m.modified())
                .map(OffsetDateTime::from)
                .unwrap_or_else(|_| OffsetDateTime::now_utc());
            parse_snapshot(file, &layout, modified)
        })
        .await
        .map_err(|e| SourceError::Unavailable(format!("CSV reader task failed: {e}")))??;

        Ok(group_readings(readings, entity_ids, since))
    }
}
