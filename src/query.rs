use crate::collection::Collection;
use crate::document::{Document, ID_FIELD};
use crate::errors::DbError;
use crate::index::{FieldBounds, key_from_bson};
use bson::{Bson, Document as BsonDocument};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

// Safety limits to bound work per operation
const MAX_PATH_DEPTH: usize = 32;
const MAX_IN_SET: usize = 1000;
const MAX_SORT_FIELDS: usize = 8;
const MAX_UPDATE_FIELDS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Order { Asc, Desc }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec { pub field: String, pub order: Order }

/// Field selection applied to each returned document.
///
/// Either `include` or `exclude` may be non-empty, never both. `_id` is governed by
/// `include_id` alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub include_id: bool,
}

/// Options for `find_docs`.
///
/// Semantics:
/// - Matching documents keep insertion order unless `sort` is given; sorting is stable.
/// - `skip` is applied before `limit`, regardless of the order the caller wrote them.
/// - Projection is applied last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindOptions {
    pub projection: Option<Projection>,
    pub sort: Option<Vec<SortSpec>>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp { Eq, Gt, Gte, Lt, Lte }

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    True,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Exists { path: String, exists: bool },
    In { path: String, values: Vec<Bson> },
    Nin { path: String, values: Vec<Bson> },
    Cmp { path: String, op: CmpOp, value: Bson },
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpdateDoc {
    pub set: Vec<(String, Bson)>,
    pub inc: Vec<(String, Bson)>,
    pub unset: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    #[serde(rename = "matchedCount")]
    pub matched: u64,
    #[serde(rename = "modifiedCount")]
    pub modified: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    #[serde(rename = "deletedCount")]
    pub deleted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanStage {
    #[serde(rename = "IXSCAN")]
    IxScan,
    #[serde(rename = "COLLSCAN")]
    CollScan,
}

impl fmt::Display for PlanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Self::IxScan => "IXSCAN", Self::CollScan => "COLLSCAN" })
    }
}

/// What a find did: which access path won and how much it had to touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub winning_stage: PlanStage,
    pub index_name: Option<String>,
    pub n_returned: usize,
    pub total_keys_examined: usize,
    pub total_docs_examined: usize,
    pub execution_time_millis: u128,
}

/// A forward-only cursor over materialized query results.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    docs: Vec<BsonDocument>,
    pos: usize,
}

impl Cursor {
    pub fn advance(&mut self) -> Option<BsonDocument> {
        let d = self.docs.get(self.pos).cloned()?;
        self.pos += 1;
        Some(d)
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.docs.len().saturating_sub(self.pos)
    }

    #[must_use]
    pub fn to_vec(mut self) -> Vec<BsonDocument> {
        self.docs.split_off(self.pos.min(self.docs.len()))
    }
}

impl Iterator for Cursor {
    type Item = BsonDocument;
    fn next(&mut self) -> Option<Self::Item> { self.advance() }
}

// --- Parsing from Mongo-shaped BSON ---

/// Reads a 1 / -1 / 0 style flag. Booleans map to 1 and 0.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn direction_of(v: &Bson) -> Option<i64> {
    match v {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(f) if f.fract() == 0.0 => Some(*f as i64),
        Bson::Boolean(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Parses a query document such as `{ in_stock: true, published_year: { $gt: 2010 } }`.
/// Top-level fields are implicitly AND-ed; the empty document matches everything.
///
/// # Errors
/// Returns `DbError::QueryError` on unknown operators or malformed operands.
pub fn parse_filter(doc: &BsonDocument) -> Result<Filter, DbError> {
    let mut clauses = Vec::with_capacity(doc.len());
    for (key, val) in doc {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                let arr = val
                    .as_array()
                    .ok_or_else(|| DbError::QueryError(format!("{key} expects an array")))?;
                let subs = arr
                    .iter()
                    .map(|b| {
                        b.as_document()
                            .ok_or_else(|| DbError::QueryError(format!("{key} entries must be documents")))
                            .and_then(parse_filter)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                clauses.push(match key.as_str() {
                    "$and" => Filter::And(subs),
                    "$or" => Filter::Or(subs),
                    _ => Filter::Not(Box::new(Filter::Or(subs))),
                });
            }
            k if k.starts_with('$') => return Err(DbError::QueryError(format!("unknown top level operator: {k}"))),
            field => clauses.push(parse_field_clause(field, val)?),
        }
    }
    Ok(match clauses.len() {
        0 => Filter::True,
        1 => clauses.swap_remove(0),
        _ => Filter::And(clauses),
    })
}

fn is_operator_doc(v: &Bson) -> Option<&BsonDocument> {
    match v {
        Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')) => Some(d),
        _ => None,
    }
}

fn parse_field_clause(field: &str, val: &Bson) -> Result<Filter, DbError> {
    let Some(ops) = is_operator_doc(val) else {
        return Ok(Filter::Cmp { path: field.to_string(), op: CmpOp::Eq, value: val.clone() });
    };
    let mut parts = Vec::with_capacity(ops.len());
    for (op, operand) in ops {
        let path = || field.to_string();
        let cmp = |op: CmpOp| Filter::Cmp { path: path(), op, value: operand.clone() };
        parts.push(match op.as_str() {
            "$eq" => cmp(CmpOp::Eq),
            "$ne" => Filter::Not(Box::new(cmp(CmpOp::Eq))),
            "$gt" => cmp(CmpOp::Gt),
            "$gte" => cmp(CmpOp::Gte),
            "$lt" => cmp(CmpOp::Lt),
            "$lte" => cmp(CmpOp::Lte),
            "$in" | "$nin" => {
                let values: Vec<Bson> = operand
                    .as_array()
                    .ok_or_else(|| DbError::QueryError(format!("{op} needs an array")))?
                    .iter()
                    .take(MAX_IN_SET)
                    .cloned()
                    .collect();
                if op == "$in" { Filter::In { path: path(), values } } else { Filter::Nin { path: path(), values } }
            }
            "$exists" => Filter::Exists {
                path: path(),
                exists: direction_of(operand).is_some_and(|n| n != 0),
            },
            "$not" => {
                if is_operator_doc(operand).is_none() {
                    return Err(DbError::QueryError("$not needs an operator document".into()));
                }
                Filter::Not(Box::new(parse_field_clause(field, operand)?))
            }
            other if other.starts_with('$') => return Err(DbError::QueryError(format!("unknown operator: {other}"))),
            other => return Err(DbError::QueryError(format!("cannot mix operators and field '{other}' under '{field}'"))),
        });
    }
    Ok(if parts.len() == 1 { parts.swap_remove(0) } else { Filter::And(parts) })
}

/// Parses `{ $set: {...}, $inc: {...}, $unset: {...} }`.
///
/// # Errors
/// Returns `DbError::QueryError` for replacement-style documents, unknown operators, a
/// non-numeric `$inc`, or any operator targeting `_id`.
pub fn parse_update(doc: &BsonDocument) -> Result<UpdateDoc, DbError> {
    if doc.is_empty() {
        return Err(DbError::QueryError("update document must not be empty".into()));
    }
    let mut out = UpdateDoc::default();
    for (op, val) in doc {
        let fields = val
            .as_document()
            .ok_or_else(|| DbError::QueryError(format!("{op} expects a document")))?;
        match op.as_str() {
            "$set" => {
                for (k, v) in fields.iter().take(MAX_UPDATE_FIELDS) {
                    check_mutable(k)?;
                    out.set.push((k.clone(), v.clone()));
                }
            }
            "$inc" => {
                for (k, v) in fields.iter().take(MAX_UPDATE_FIELDS) {
                    check_mutable(k)?;
                    if !matches!(v, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) {
                        return Err(DbError::QueryError(format!("$inc on '{k}' requires a number")));
                    }
                    out.inc.push((k.clone(), v.clone()));
                }
            }
            "$unset" => {
                for k in fields.keys().take(MAX_UPDATE_FIELDS) {
                    check_mutable(k)?;
                    out.unset.push(k.clone());
                }
            }
            other if other.starts_with('$') => return Err(DbError::QueryError(format!("unknown update operator: {other}"))),
            _ => return Err(DbError::QueryError("update document requires atomic operators".into())),
        }
    }
    Ok(out)
}

fn is_id_path(path: &str) -> bool {
    path == ID_FIELD || path.strip_prefix(ID_FIELD).is_some_and(|rest| rest.starts_with('.'))
}

/// The engine assigns `_id`; no update operator may touch it.
fn check_mutable(path: &str) -> Result<(), DbError> {
    if is_id_path(path) {
        return Err(DbError::QueryError(format!("cannot modify immutable field '{path}'")));
    }
    Ok(())
}

/// Parses `{ title: 1, author: 1, _id: 0 }` style projections.
///
/// # Errors
/// Returns `DbError::QueryError` when a value is not a flag or inclusion and exclusion are mixed.
pub fn parse_projection(doc: &BsonDocument) -> Result<Projection, DbError> {
    let mut p = Projection { include: Vec::new(), exclude: Vec::new(), include_id: true };
    for (field, v) in doc {
        let on = direction_of(v)
            .ok_or_else(|| DbError::QueryError(format!("projection value for '{field}' must be 0 or 1")))?
            != 0;
        if field == ID_FIELD {
            p.include_id = on;
        } else if on {
            p.include.push(field.clone());
        } else {
            p.exclude.push(field.clone());
        }
    }
    if !p.include.is_empty() && !p.exclude.is_empty() {
        return Err(DbError::QueryError("cannot mix inclusion and exclusion in a projection".into()));
    }
    Ok(p)
}

/// Parses `{ price: 1 }` / `{ price: -1 }` sort documents.
///
/// # Errors
/// Returns `DbError::QueryError` for directions other than 1 / -1.
pub fn parse_sort(doc: &BsonDocument) -> Result<Vec<SortSpec>, DbError> {
    doc.iter()
        .take(MAX_SORT_FIELDS)
        .map(|(field, v)| match direction_of(v) {
            Some(1) => Ok(SortSpec { field: field.clone(), order: Order::Asc }),
            Some(-1) => Ok(SortSpec { field: field.clone(), order: Order::Desc }),
            _ => Err(DbError::QueryError(format!("bad sort direction for '{field}': {v}"))),
        })
        .collect()
}

// --- Execution ---

/// Index bounds implied by the top-level conjunction of `filter`.
fn collect_bounds(filter: &Filter) -> HashMap<String, FieldBounds> {
    let mut out: HashMap<String, FieldBounds> = HashMap::new();
    let mut add = |f: &Filter| {
        if let Filter::Cmp { path, op, value } = f {
            let b = out.entry(path.clone()).or_default();
            let key = key_from_bson(Some(value));
            match op {
                CmpOp::Eq => b.eq = Some(key),
                CmpOp::Gt => b.lower = Some((key, false)),
                CmpOp::Gte => b.lower = Some((key, true)),
                CmpOp::Lt => b.upper = Some((key, false)),
                CmpOp::Lte => b.upper = Some((key, true)),
            }
        }
    };
    match filter {
        Filter::And(parts) => parts.iter().for_each(&mut add),
        other => add(other),
    }
    out
}

/// Matching documents in insertion order, plus the stats of the access path used.
fn matching_documents(col: &Collection, filter: &Filter) -> (Vec<Document>, ExecutionStats) {
    let start = Instant::now();
    let bounds = collect_bounds(filter);
    let scan = if bounds.is_empty() { None } else { col.plan_scan(&bounds) };
    let (candidates, stage, index_name, keys) = match scan {
        Some(s) => (col.records(&s.records), PlanStage::IxScan, Some(s.index_name), s.keys_examined),
        None => (col.get_all_documents(), PlanStage::CollScan, None, 0),
    };
    let docs_examined = candidates.len();
    let matched: Vec<Document> = candidates.into_iter().filter(|d| eval_filter(&d.data, filter)).collect();
    let stats = ExecutionStats {
        winning_stage: stage,
        index_name,
        n_returned: matched.len(),
        total_keys_examined: keys,
        total_docs_examined: docs_examined,
        execution_time_millis: start.elapsed().as_millis(),
    };
    (matched, stats)
}

fn execute_find(col: &Collection, filter: &Filter, opts: &FindOptions) -> (Vec<BsonDocument>, ExecutionStats) {
    let start = Instant::now();
    let (mut docs, mut stats) = matching_documents(col, filter);
    if let Some(specs) = &opts.sort {
        let limited: Vec<SortSpec> = specs.iter().take(MAX_SORT_FIELDS).cloned().collect();
        docs.sort_by(|a, b| compare_docs(&a.data, &b.data, &limited));
    }
    let skip = opts.skip.unwrap_or(0);
    let limit = opts.limit.unwrap_or(usize::MAX);
    let out: Vec<BsonDocument> = docs
        .iter()
        .skip(skip)
        .take(limit)
        .map(|d| project(&d.render(), opts.projection.as_ref()))
        .collect();
    stats.n_returned = out.len();
    stats.execution_time_millis = start.elapsed().as_millis();
    log::debug!(
        target: "bookstore::query",
        "find collection={} stage={} returned={} docs_examined={} ms={}",
        col.name(), stats.winning_stage, stats.n_returned, stats.total_docs_examined, stats.execution_time_millis
    );
    (out, stats)
}

pub fn find_docs(col: &Arc<Collection>, filter: &Filter, opts: &FindOptions) -> Cursor {
    let (docs, _) = execute_find(col, filter, opts);
    Cursor { docs, pos: 0 }
}

/// Runs the find and reports how it executed instead of returning documents.
#[must_use]
pub fn explain_find(col: &Arc<Collection>, filter: &Filter, opts: &FindOptions) -> ExecutionStats {
    execute_find(col, filter, opts).1
}

#[must_use]
pub fn count_docs(col: &Arc<Collection>, filter: &Filter) -> usize {
    matching_documents(col, filter).0.len()
}

pub fn update_many(col: &Arc<Collection>, filter: &Filter, update: &UpdateDoc) -> UpdateReport {
    let (docs, _) = matching_documents(col, filter);
    let mut report = UpdateReport::default();
    for doc in docs {
        report.matched += 1;
        if write_update(col, doc, update) { report.modified += 1; }
    }
    report
}

pub fn update_one(col: &Arc<Collection>, filter: &Filter, update: &UpdateDoc) -> UpdateReport {
    let (docs, _) = matching_documents(col, filter);
    let Some(doc) = docs.into_iter().next() else { return UpdateReport::default() };
    let changed = write_update(col, doc, update);
    UpdateReport { matched: 1, modified: u64::from(changed) }
}

fn write_update(col: &Collection, mut doc: Document, update: &UpdateDoc) -> bool {
    if !apply_update(&mut doc, update) {
        return false;
    }
    let id = doc.id.clone();
    col.update_document(&id, doc)
}

pub fn delete_many(col: &Arc<Collection>, filter: &Filter) -> DeleteReport {
    let (docs, _) = matching_documents(col, filter);
    let mut report = DeleteReport::default();
    for d in &docs {
        if col.delete_document(&d.id) { report.deleted += 1; }
    }
    report
}

pub fn delete_one(col: &Arc<Collection>, filter: &Filter) -> DeleteReport {
    let (docs, _) = matching_documents(col, filter);
    let deleted = docs.first().map_or(0, |d| u64::from(col.delete_document(&d.id)));
    DeleteReport { deleted }
}

// --- Evaluation ---

#[must_use]
pub fn eval_filter(doc: &BsonDocument, f: &Filter) -> bool {
    match f {
        Filter::True => true,
        Filter::And(v) => v.iter().all(|x| eval_filter(doc, x)),
        Filter::Or(v) => v.iter().any(|x| eval_filter(doc, x)),
        Filter::Not(b) => !eval_filter(doc, b),
        Filter::Exists { path, exists } => get_path(doc, path).is_some() == *exists,
        Filter::In { path, values } => get_path(doc, path)
            .is_some_and(|v| values.iter().any(|x| bson_equal(v, x))),
        Filter::Nin { path, values } => get_path(doc, path)
            .is_none_or(|v| values.iter().all(|x| !bson_equal(v, x))),
        Filter::Cmp { path, op, value } => match (get_path(doc, path), op) {
            (Some(v), CmpOp::Eq) => bson_equal(v, value),
            (Some(v), CmpOp::Gt) => bson_cmp(v, value).is_some_and(|o| o == Ordering::Greater),
            (Some(v), CmpOp::Gte) => bson_cmp(v, value).is_some_and(|o| o != Ordering::Less),
            (Some(v), CmpOp::Lt) => bson_cmp(v, value).is_some_and(|o| o == Ordering::Less),
            (Some(v), CmpOp::Lte) => bson_cmp(v, value).is_some_and(|o| o != Ordering::Greater),
            (None, _) => false,
        },
    }
}

#[must_use]
pub fn get_path<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut iter = path.split('.');
    let first = iter.next()?;
    let mut cur: Option<&Bson> = doc.get(first);
    for (depth, part) in iter.enumerate() {
        if depth + 2 > MAX_PATH_DEPTH { return None; }
        match cur {
            Some(Bson::Document(d)) => { cur = d.get(part); }
            _ => return None,
        }
    }
    cur
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn to_f64(b: &Bson) -> Option<f64> {
    match b {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

#[allow(clippy::float_cmp)]
pub(crate) fn bson_equal(a: &Bson, b: &Bson) -> bool {
    match (to_f64(a), to_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

pub(crate) fn bson_cmp(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(af), Some(bf)) = (to_f64(a), to_f64(b)) { return af.partial_cmp(&bf); }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Orders documents field by field; a missing value sorts before any present one.
pub(crate) fn compare_docs(a: &BsonDocument, b: &BsonDocument, specs: &[SortSpec]) -> Ordering {
    for s in specs {
        let ord = match (get_path(a, &s.field), get_path(b, &s.field)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(ax), Some(bx)) => bson_cmp(ax, bx).unwrap_or_else(|| key_from_bson(Some(ax)).cmp(&key_from_bson(Some(bx)))),
        };
        if ord != Ordering::Equal { return if s.order == Order::Asc { ord } else { ord.reverse() }; }
    }
    Ordering::Equal
}

#[must_use]
pub fn project(doc: &BsonDocument, projection: Option<&Projection>) -> BsonDocument {
    let Some(p) = projection else { return doc.clone() };
    let mut out = BsonDocument::new();
    if p.include.is_empty() {
        for (k, v) in doc {
            if (k == ID_FIELD && !p.include_id) || p.exclude.iter().any(|e| e == k) { continue; }
            out.insert(k.clone(), v.clone());
        }
        return out;
    }
    if p.include_id && let Some(id) = doc.get(ID_FIELD) {
        out.insert(ID_FIELD, id.clone());
    }
    for f in &p.include {
        if let Some(v) = get_path(doc, f) { out.insert(f.clone(), v.clone()); }
    }
    out
}

/// Applies `upd` in place and reports whether anything changed. `_id` paths are skipped.
pub fn apply_update(doc: &mut Document, upd: &UpdateDoc) -> bool {
    let mut data = doc.data.clone();
    let mut modified = false;
    for (path, val) in upd.set.iter().filter(|(p, _)| !is_id_path(p)) { modified |= set_path(&mut data, path, val.clone()); }
    for (path, delta) in upd.inc.iter().filter(|(p, _)| !is_id_path(p)) { modified |= inc_path(&mut data, path, delta); }
    for path in upd.unset.iter().filter(|p| !is_id_path(p)) { modified |= unset_path(&mut data, path); }
    if modified { doc.update(data); }
    modified
}

fn set_path(doc: &mut BsonDocument, path: &str, val: Bson) -> bool {
    let parts: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = parts.split_last() else { return false };
    let mut cur = doc;
    for key in parents {
        if !matches!(cur.get(*key), Some(Bson::Document(_))) {
            cur.insert((*key).to_string(), Bson::Document(BsonDocument::new()));
        }
        match cur.get_mut(*key) { Some(Bson::Document(d)) => cur = d, _ => return false }
    }
    let changed = cur.get(*last).is_none_or(|p| !bson_equal(p, &val) || std::mem::discriminant(p) != std::mem::discriminant(&val));
    cur.insert((*last).to_string(), val);
    changed
}

fn inc_path(doc: &mut BsonDocument, path: &str, delta: &Bson) -> bool {
    let new_val = match (get_path(doc, path), delta) {
        (None, d) => d.clone(),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => a.checked_add(*b).map_or_else(|| Bson::Int64(i64::from(*a) + i64::from(*b)), Bson::Int32),
        (Some(Bson::Int32(a)), Bson::Int64(b)) => Bson::Int64(i64::from(*a).saturating_add(*b)),
        (Some(Bson::Int64(a)), Bson::Int32(b)) => Bson::Int64(a.saturating_add(i64::from(*b))),
        (Some(Bson::Int64(a)), Bson::Int64(b)) => Bson::Int64(a.saturating_add(*b)),
        (Some(cur), d) => match (to_f64(cur), to_f64(d)) {
            (Some(x), Some(y)) => Bson::Double(x + y),
            _ => return false,
        },
    };
    set_path(doc, path, new_val)
}

fn unset_path(doc: &mut BsonDocument, path: &str) -> bool {
    let parts: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = parts.split_last() else { return false };
    let mut cur = doc;
    for key in parents {
        match cur.get_mut(*key) { Some(Bson::Document(d)) => cur = d, _ => return false }
    }
    cur.remove(*last).is_some()
}
