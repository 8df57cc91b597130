//! Aggregation pipelines: `$match`, `$project`, `$group`, `$sort`, `$skip`, `$limit`.
//!
//! Stages run in order over the collection's documents (insertion order, `_id` included).
//! `$group` emits groups in the order their key was first seen and `$sort` is stable, so
//! ties in a sort keep that first-seen order.

use crate::collection::Collection;
use crate::document::ID_FIELD;
use crate::errors::DbError;
use crate::index::{IndexKeyKind, key_from_bson};
use crate::query::{Filter, SortSpec, bson_cmp, compare_docs, direction_of, eval_filter, get_path, parse_filter, parse_sort, to_f64};
use bson::{Bson, Document as BsonDocument};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

const MAX_STAGES: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(String),
    Literal(Bson),
    Add(Vec<Expr>),
    Multiply(Vec<Expr>),
    Divide(Box<Expr>, Box<Expr>),
    Floor(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(Expr),
    Avg(Expr),
    Min(Expr),
    Max(Expr),
    First(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectField {
    Include,
    Computed(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Project { fields: Vec<(String, ProjectField)>, include_id: bool },
    Group { id: Expr, fields: Vec<(String, Accumulator)> },
    Sort(Vec<SortSpec>),
    Skip(usize),
    Limit(usize),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

fn agg_err(msg: impl Into<String>) -> DbError {
    DbError::AggregationError(msg.into())
}

// --- Parsing ---

/// Parses a pipeline written as an array of single-key stage documents.
///
/// # Errors
/// Returns `DbError::AggregationError` for unknown stages, operators or malformed arguments.
pub fn parse_pipeline(stages: &[BsonDocument]) -> Result<Pipeline, DbError> {
    if stages.len() > MAX_STAGES {
        return Err(agg_err(format!("pipeline exceeds {MAX_STAGES} stages")));
    }
    let stages = stages.iter().map(parse_stage).collect::<Result<Vec<_>, _>>()?;
    Ok(Pipeline { stages })
}

fn parse_stage(doc: &BsonDocument) -> Result<Stage, DbError> {
    let mut it = doc.iter();
    let (Some((name, arg)), None) = (it.next(), it.next()) else {
        return Err(agg_err("a pipeline stage must have exactly one field"));
    };
    let as_doc = || arg.as_document().ok_or_else(|| agg_err(format!("{name} expects a document")));
    match name.as_str() {
        "$match" => Ok(Stage::Match(parse_filter(as_doc()?)?)),
        "$project" => parse_project(as_doc()?),
        "$group" => parse_group(as_doc()?),
        "$sort" => Ok(Stage::Sort(parse_sort(as_doc()?)?)),
        "$skip" | "$limit" => {
            let n = direction_of(arg)
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| agg_err(format!("{name} expects a non-negative integer")))?;
            if name == "$limit" && n == 0 {
                return Err(agg_err("$limit must be positive"));
            }
            Ok(if name == "$skip" { Stage::Skip(n) } else { Stage::Limit(n) })
        }
        other => Err(agg_err(format!("unrecognized pipeline stage name: '{other}'"))),
    }
}

fn parse_project(spec: &BsonDocument) -> Result<Stage, DbError> {
    let mut fields = Vec::with_capacity(spec.len());
    let mut include_id = true;
    for (name, v) in spec {
        match (name.as_str(), direction_of(v)) {
            (ID_FIELD, Some(0)) => include_id = false,
            (_, Some(0)) => return Err(agg_err(format!("exclusion of '{name}' is not supported in $project"))),
            (_, Some(_)) => fields.push((name.clone(), ProjectField::Include)),
            (_, None) => fields.push((name.clone(), ProjectField::Computed(parse_expr(v)?))),
        }
    }
    Ok(Stage::Project { fields, include_id })
}

fn parse_group(spec: &BsonDocument) -> Result<Stage, DbError> {
    let id = spec.get(ID_FIELD).ok_or_else(|| agg_err("a group specification must include an _id"))?;
    let id = parse_expr(id)?;
    let mut fields = Vec::new();
    for (name, v) in spec.iter().filter(|(k, _)| k.as_str() != ID_FIELD) {
        let acc_doc = v
            .as_document()
            .ok_or_else(|| agg_err(format!("the field '{name}' must be an accumulator object")))?;
        let mut it = acc_doc.iter();
        let (Some((op, arg)), None) = (it.next(), it.next()) else {
            return Err(agg_err(format!("the field '{name}' must specify one accumulator")));
        };
        let arg = parse_expr(arg)?;
        let acc = match op.as_str() {
            "$sum" => Accumulator::Sum(arg),
            "$avg" => Accumulator::Avg(arg),
            "$min" => Accumulator::Min(arg),
            "$max" => Accumulator::Max(arg),
            "$first" => Accumulator::First(arg),
            other => return Err(agg_err(format!("unknown group operator '{other}'"))),
        };
        fields.push((name.clone(), acc));
    }
    Ok(Stage::Group { id, fields })
}

/// Parses an expression: `"$field"` paths, operator documents, or literals.
///
/// # Errors
/// Returns `DbError::AggregationError` for unknown operators or wrong arities.
pub fn parse_expr(v: &Bson) -> Result<Expr, DbError> {
    match v {
        Bson::String(s) if s.starts_with('$') => Ok(Expr::Field(s[1..].to_string())),
        Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')) => {
            let mut it = d.iter();
            let (Some((op, arg)), None) = (it.next(), it.next()) else {
                return Err(agg_err("an expression object must have exactly one operator"));
            };
            let args = || -> Result<Vec<Expr>, DbError> {
                match arg {
                    Bson::Array(items) => items.iter().map(parse_expr).collect(),
                    single => Ok(vec![parse_expr(single)?]),
                }
            };
            match op.as_str() {
                "$literal" => Ok(Expr::Literal(arg.clone())),
                "$add" => Ok(Expr::Add(args()?)),
                "$multiply" => Ok(Expr::Multiply(args()?)),
                "$divide" => match <[Expr; 2]>::try_from(args()?) {
                    Ok([a, b]) => Ok(Expr::Divide(Box::new(a), Box::new(b))),
                    Err(_) => Err(agg_err("$divide takes exactly 2 arguments")),
                },
                "$floor" => match <[Expr; 1]>::try_from(args()?) {
                    Ok([a]) => Ok(Expr::Floor(Box::new(a))),
                    Err(_) => Err(agg_err("$floor takes exactly 1 argument")),
                },
                other => Err(agg_err(format!("unrecognized expression '{other}'"))),
            }
        }
        other => Ok(Expr::Literal(other.clone())),
    }
}

// --- Evaluation ---

/// Arithmetic result kept integral while every operand is.
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(v: &Bson, op: &str) -> Result<Option<Self>, DbError> {
        match v {
            Bson::Null | Bson::Undefined => Ok(None),
            Bson::Int32(i) => Ok(Some(Self::Int(i64::from(*i)))),
            Bson::Int64(i) => Ok(Some(Self::Int(*i))),
            Bson::Double(f) => Ok(Some(Self::Float(*f))),
            other => Err(agg_err(format!("{op} only supports numeric types, not {:?}", other.element_type()))),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn as_f64(&self) -> f64 {
        match self {
            Self::Int(i) => *i as f64,
            Self::Float(f) => *f,
        }
    }

    fn into_bson(self) -> Bson {
        match self {
            Self::Int(i) => i32::try_from(i).map_or(Bson::Int64(i), Bson::Int32),
            Self::Float(f) => Bson::Double(f),
        }
    }
}

fn fold_numeric(args: &[Expr], doc: &BsonDocument, op: &str, int_op: fn(i64, i64) -> Option<i64>, float_op: fn(f64, f64) -> f64, identity: i64) -> Result<Bson, DbError> {
    let mut acc = Num::Int(identity);
    for a in args {
        let Some(n) = Num::of(&eval_expr(a, doc)?, op)? else { return Ok(Bson::Null) };
        acc = match (acc, n) {
            (Num::Int(x), Num::Int(y)) => int_op(x, y).map_or_else(|| Num::Float(float_op(Num::Int(x).as_f64(), Num::Int(y).as_f64())), Num::Int),
            (x, y) => Num::Float(float_op(x.as_f64(), y.as_f64())),
        };
    }
    Ok(acc.into_bson())
}

/// Evaluates `expr` against one document. Missing fields evaluate to `Null`, and arithmetic
/// over `Null` yields `Null`.
///
/// # Errors
/// Returns `DbError::AggregationError` for non-numeric arithmetic operands or division by zero.
pub fn eval_expr(expr: &Expr, doc: &BsonDocument) -> Result<Bson, DbError> {
    match expr {
        Expr::Field(path) => Ok(get_path(doc, path).cloned().unwrap_or(Bson::Null)),
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Add(args) => fold_numeric(args, doc, "$add", i64::checked_add, |a, b| a + b, 0),
        Expr::Multiply(args) => fold_numeric(args, doc, "$multiply", i64::checked_mul, |a, b| a * b, 1),
        Expr::Divide(a, b) => {
            let (Some(x), Some(y)) = (Num::of(&eval_expr(a, doc)?, "$divide")?, Num::of(&eval_expr(b, doc)?, "$divide")?) else {
                return Ok(Bson::Null);
            };
            if y.as_f64() == 0.0 {
                return Err(agg_err("can't $divide by zero"));
            }
            Ok(Bson::Double(x.as_f64() / y.as_f64()))
        }
        Expr::Floor(a) => match Num::of(&eval_expr(a, doc)?, "$floor")? {
            None => Ok(Bson::Null),
            Some(Num::Float(f)) => Ok(Bson::Double(f.floor())),
            Some(int) => Ok(int.into_bson()),
        },
    }
}

/// Running state of one accumulator within one group.
enum AccState {
    Sum { int: i64, float: f64, any_float: bool },
    Avg { total: f64, count: u64 },
    Min(Option<Bson>),
    Max(Option<Bson>),
    First(Option<Bson>),
}

impl AccState {
    fn new(acc: &Accumulator) -> Self {
        match acc {
            Accumulator::Sum(_) => Self::Sum { int: 0, float: 0.0, any_float: false },
            Accumulator::Avg(_) => Self::Avg { total: 0.0, count: 0 },
            Accumulator::Min(_) => Self::Min(None),
            Accumulator::Max(_) => Self::Max(None),
            Accumulator::First(_) => Self::First(None),
        }
    }

    // Non-numeric values are ignored by $sum and $avg; null and missing by $min and $max.
    fn feed(&mut self, v: Bson) {
        if matches!(self, Self::Min(_) | Self::Max(_)) && matches!(v, Bson::Null | Bson::Undefined) {
            return;
        }
        match self {
            Self::Sum { int, float, any_float } => match v {
                Bson::Int32(i) => *int = int.saturating_add(i64::from(i)),
                Bson::Int64(i) => *int = int.saturating_add(i),
                Bson::Double(f) => { *float += f; *any_float = true; }
                _ => {}
            },
            Self::Avg { total, count } => {
                if let Some(f) = to_f64(&v) {
                    *total += f;
                    *count += 1;
                }
            }
            Self::Min(cur) => {
                if cur.as_ref().is_none_or(|c| value_cmp(&v, c) == Ordering::Less) { *cur = Some(v); }
            }
            Self::Max(cur) => {
                if cur.as_ref().is_none_or(|c| value_cmp(&v, c) == Ordering::Greater) { *cur = Some(v); }
            }
            Self::First(cur) => {
                if cur.is_none() { *cur = Some(v); }
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(self) -> Bson {
        match self {
            Self::Sum { int, float, any_float } => {
                if any_float { Bson::Double(int as f64 + float) } else { Num::Int(int).into_bson() }
            }
            Self::Avg { total, count } => {
                if count == 0 { Bson::Null } else { Bson::Double(total / count as f64) }
            }
            Self::Min(v) | Self::Max(v) | Self::First(v) => v.unwrap_or(Bson::Null),
        }
    }
}

fn value_cmp(a: &Bson, b: &Bson) -> Ordering {
    bson_cmp(a, b).unwrap_or_else(|| key_from_bson(Some(a)).cmp(&key_from_bson(Some(b))))
}

fn accumulator_expr(acc: &Accumulator) -> &Expr {
    match acc {
        Accumulator::Sum(e) | Accumulator::Avg(e) | Accumulator::Min(e) | Accumulator::Max(e) | Accumulator::First(e) => e,
    }
}

fn run_group(docs: Vec<BsonDocument>, id: &Expr, fields: &[(String, Accumulator)]) -> Result<Vec<BsonDocument>, DbError> {
    // first-seen order of group keys
    let mut order: Vec<(Bson, Vec<AccState>)> = Vec::new();
    let mut slot_of: HashMap<IndexKeyKind, usize> = HashMap::new();
    for doc in &docs {
        let key = eval_expr(id, doc)?;
        let slot = *slot_of.entry(key_from_bson(Some(&key))).or_insert_with(|| {
            order.push((key.clone(), fields.iter().map(|(_, a)| AccState::new(a)).collect()));
            order.len() - 1
        });
        for ((_, acc), state) in fields.iter().zip(order[slot].1.iter_mut()) {
            state.feed(eval_expr(accumulator_expr(acc), doc)?);
        }
    }
    Ok(order
        .into_iter()
        .map(|(key, states)| {
            let mut out = BsonDocument::new();
            out.insert(ID_FIELD, key);
            for ((name, _), state) in fields.iter().zip(states) {
                out.insert(name.clone(), state.finish());
            }
            out
        })
        .collect())
}

fn run_project(docs: Vec<BsonDocument>, fields: &[(String, ProjectField)], include_id: bool) -> Result<Vec<BsonDocument>, DbError> {
    docs.into_iter()
        .map(|doc| {
            let mut out = BsonDocument::new();
            if include_id && let Some(id) = doc.get(ID_FIELD) {
                out.insert(ID_FIELD, id.clone());
            }
            for (name, f) in fields {
                match f {
                    ProjectField::Include => {
                        if let Some(v) = get_path(&doc, name) { out.insert(name.clone(), v.clone()); }
                    }
                    ProjectField::Computed(e) => { out.insert(name.clone(), eval_expr(e, &doc)?); }
                }
            }
            Ok(out)
        })
        .collect()
}

/// Runs `pipeline` over rendered documents.
///
/// # Errors
/// Propagates expression evaluation errors.
pub fn run_stages(mut docs: Vec<BsonDocument>, pipeline: &Pipeline) -> Result<Vec<BsonDocument>, DbError> {
    for stage in &pipeline.stages {
        docs = match stage {
            Stage::Match(f) => docs.into_iter().filter(|d| eval_filter(d, f)).collect(),
            Stage::Project { fields, include_id } => run_project(docs, fields, *include_id)?,
            Stage::Group { id, fields } => run_group(docs, id, fields)?,
            Stage::Sort(specs) => {
                docs.sort_by(|a, b| compare_docs(a, b, specs));
                docs
            }
            Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
            Stage::Limit(n) => docs.into_iter().take(*n).collect(),
        };
    }
    Ok(docs)
}

/// Runs `pipeline` over the collection in insertion order.
///
/// # Errors
/// Propagates expression evaluation errors.
pub fn aggregate(col: &Arc<Collection>, pipeline: &Pipeline) -> Result<Vec<BsonDocument>, DbError> {
    let start = Instant::now();
    let input: Vec<BsonDocument> = col.get_all_documents().iter().map(crate::document::Document::render).collect();
    let out = run_stages(input, pipeline)?;
    log::debug!(
        target: "bookstore::query",
        "aggregate collection={} stages={} returned={} ms={}",
        col.name(), pipeline.stages.len(), out.len(), start.elapsed().as_millis()
    );
    Ok(out)
}
