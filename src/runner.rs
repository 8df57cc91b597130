use crate::Database;
use crate::aggregate::parse_pipeline;
use crate::catalog::{NamedQuery, Section, Statement, catalog, lookup};
use crate::errors::DbError;
use crate::index::IndexSpec;
use crate::logger::AUDIT_TARGET;
use crate::query::{DeleteReport, ExecutionStats, FindOptions, UpdateReport, parse_filter, parse_projection, parse_sort, parse_update};
use bson::Document as BsonDocument;
use serde_json::{Value, json};
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// What the engine returned for one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Documents(Vec<BsonDocument>),
    Updated(UpdateReport),
    Deleted(DeleteReport),
    Aggregated(Vec<BsonDocument>),
    IndexCreated(String),
    Explained(ExecutionStats),
}

#[derive(Debug)]
pub struct StatementResult {
    pub query: NamedQuery,
    pub result: Result<Outcome, DbError>,
    pub elapsed: Duration,
}

/// Issues one statement against `collection`.
///
/// # Errors
/// Whatever the engine reports: parse errors, a missing collection, aggregation failures.
pub fn execute(db: &Database, collection: &str, statement: &Statement) -> Result<Outcome, DbError> {
    match statement {
        Statement::Find { filter, projection, sort, limit, skip } => {
            let opts = FindOptions {
                projection: projection.as_ref().map(parse_projection).transpose()?,
                sort: sort.as_ref().map(parse_sort).transpose()?,
                limit: *limit,
                skip: *skip,
            };
            Ok(Outcome::Documents(db.find(collection, &parse_filter(filter)?, &opts)?.to_vec()))
        }
        Statement::UpdateOne { filter, update } => {
            let report = db.update_one(collection, &parse_filter(filter)?, &parse_update(update)?)?;
            log::info!(target: AUDIT_TARGET, "updateOne {collection} filter={filter} matched={} modified={}", report.matched, report.modified);
            Ok(Outcome::Updated(report))
        }
        Statement::DeleteOne { filter } => {
            let report = db.delete_one(collection, &parse_filter(filter)?)?;
            log::info!(target: AUDIT_TARGET, "deleteOne {collection} filter={filter} deleted={}", report.deleted);
            Ok(Outcome::Deleted(report))
        }
        Statement::Aggregate { pipeline } => Ok(Outcome::Aggregated(db.aggregate(collection, &parse_pipeline(pipeline)?)?)),
        Statement::CreateIndex { keys } => {
            let name = db.create_index(collection, IndexSpec::from_keys_doc(keys)?)?;
            log::info!(target: AUDIT_TARGET, "createIndex {collection} keys={keys} name={name}");
            Ok(Outcome::IndexCreated(name))
        }
        Statement::Explain { filter } => Ok(Outcome::Explained(db.explain(collection, &parse_filter(filter)?, &FindOptions::default())?)),
    }
}

fn run_one(db: &Database, collection: &str, query: NamedQuery) -> StatementResult {
    let start = Instant::now();
    let result = execute(db, collection, &query.statement);
    let elapsed = start.elapsed();
    match &result {
        Ok(_) => log::info!("{} ok in {:?}", query.name, elapsed),
        Err(e) => log::warn!("{} failed in {:?}: {}", query.name, elapsed, e),
    }
    StatementResult { query, result, elapsed }
}

/// Runs every catalog statement in order. A failing statement does not stop the run.
pub fn run_all(db: &Database, collection: &str) -> Vec<StatementResult> {
    catalog().into_iter().map(|q| run_one(db, collection, q)).collect()
}

/// # Errors
/// Returns `DbError::QueryError` if no statement has that name.
pub fn run_named(db: &Database, collection: &str, name: &str) -> Result<StatementResult, DbError> {
    let query = lookup(name).ok_or_else(|| DbError::QueryError(format!("no statement named '{name}'")))?;
    Ok(run_one(db, collection, query))
}

// --- Rendering ---

fn docs_json(docs: &[BsonDocument]) -> serde_json::Result<Value> {
    docs.iter().map(serde_json::to_value).collect::<serde_json::Result<Vec<_>>>().map(Value::Array)
}

/// The JSON body shown for a successful statement.
///
/// # Errors
/// Returns the serializer's error when a document cannot be represented as JSON.
pub fn outcome_json(outcome: &Outcome) -> serde_json::Result<Value> {
    Ok(match outcome {
        Outcome::Documents(docs) | Outcome::Aggregated(docs) => docs_json(docs)?,
        Outcome::Updated(r) => json!({ "acknowledged": true, "matchedCount": r.matched, "modifiedCount": r.modified }),
        Outcome::Deleted(r) => json!({ "acknowledged": true, "deletedCount": r.deleted }),
        Outcome::IndexCreated(name) => Value::String(name.clone()),
        Outcome::Explained(stats) => json!({ "executionStats": serde_json::to_value(stats)? }),
    })
}

/// One NDJSON object per statement. A result that cannot be serialized is reported under
/// `error` like a failed statement.
#[must_use]
pub fn render_json(r: &StatementResult) -> Value {
    let mut v = json!({
        "name": r.query.name,
        "elapsedMs": r.elapsed.as_millis(),
    });
    let body = match &r.result {
        Ok(o) => outcome_json(o).map_err(|e| format!("cannot render result: {e}")),
        Err(e) => Err(e.to_string()),
    };
    match body {
        Ok(result) => v["result"] = result,
        Err(e) => v["error"] = Value::String(e),
    }
    v
}

const fn section_title(s: Section) -> &'static str {
    match s {
        Section::Crud => "BASIC CRUD OPERATIONS",
        Section::Advanced => "ADVANCED QUERIES",
        Section::Aggregation => "AGGREGATION PIPELINE",
        Section::Indexing => "INDEXING",
    }
}

/// Writes results grouped under section headers, each statement with its description.
///
/// # Errors
/// Returns any error from the writer.
pub fn render_pretty<W: Write>(results: &[StatementResult], w: &mut W) -> io::Result<()> {
    let mut section = None;
    for r in results {
        if section != Some(r.query.section) {
            section = Some(r.query.section);
            writeln!(w, "\n=== {} ===", section_title(r.query.section))?;
        }
        writeln!(w, "\n-- {} ({})", r.query.description, r.query.name)?;
        match &r.result {
            Ok(o) => match outcome_json(o).and_then(|v| serde_json::to_string_pretty(&v)) {
                Ok(body) => writeln!(w, "{body}")?,
                Err(e) => writeln!(w, "error: cannot render result: {e}")?,
            },
            Err(e) => writeln!(w, "error: {e}")?,
        }
    }
    Ok(())
}
