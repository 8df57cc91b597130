//! Seeding: loads book documents from a JSON array or NDJSON file into a collection.

use crate::collection::Collection;
use crate::document::Document;
use crate::errors::DbError;
use bson::Document as BsonDocument;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Auto,
    JsonArray,
    Ndjson,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub inserted: u64,
    pub skipped: u64,
}

/// Guesses the format from the first non-whitespace byte: `[` means a JSON array.
fn detect(buf: &[u8]) -> ImportFormat {
    match buf.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'[') => ImportFormat::JsonArray,
        _ => ImportFormat::Ndjson,
    }
}

/// # Errors
/// Returns `DbError::Json` with the offending line for malformed input, or an I/O error.
pub fn import_reader<R: Read>(collection: &Collection, reader: R, format: ImportFormat) -> Result<ImportReport, DbError> {
    let mut reader = BufReader::new(reader);
    let format = match format {
        ImportFormat::Auto => detect(reader.fill_buf()?),
        f => f,
    };
    let mut report = ImportReport::default();
    if format == ImportFormat::JsonArray {
        let docs: Vec<BsonDocument> = serde_json::from_reader(reader)?;
        for d in docs {
            collection.insert_document(Document::new(d));
            report.inserted += 1;
        }
        return Ok(report);
    }
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            report.skipped += 1;
            continue;
        }
        let d: BsonDocument = serde_json::from_str(&line).map_err(|e| {
            log::error!("import: line {} is not a JSON document: {}", line_no + 1, e);
            DbError::Json(e)
        })?;
        collection.insert_document(Document::new(d));
        report.inserted += 1;
    }
    Ok(report)
}

/// # Errors
/// Returns an error if the file cannot be opened or parsed.
pub fn import_file(collection: &Collection, path: &Path) -> Result<ImportReport, DbError> {
    let file = File::open(path).map_err(|e| DbError::Io(format!("open {}: {}", path.display(), e)))?;
    let report = import_reader(collection, file, ImportFormat::Auto)?;
    log::info!("imported {} documents into {} from {}", report.inserted, collection.name(), path.display());
    Ok(report)
}
