use crate::errors::DbError;
use crate::query::{Order, get_path};
use bson::{Bson, Document as BsonDocument};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Record id of a stored document: its insertion sequence number within the collection.
pub type RecordId = u64;

/// Normalized key value. Variant order is the cross-type sort order; numbers of any width
/// compare as doubles, and a missing field indexes as `Null`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKeyKind {
    Null,
    Num(OrderedFloat<f64>),
    Str(String),
    Bool(bool),
    Other(String),
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn key_from_bson(v: Option<&Bson>) -> IndexKeyKind {
    match v {
        None | Some(Bson::Null | Bson::Undefined) => IndexKeyKind::Null,
        Some(Bson::Int32(i)) => IndexKeyKind::Num(OrderedFloat(f64::from(*i))),
        Some(Bson::Int64(i)) => IndexKeyKind::Num(OrderedFloat(*i as f64)),
        Some(Bson::Double(f)) => IndexKeyKind::Num(OrderedFloat(*f)),
        Some(Bson::String(s)) => IndexKeyKind::Str(s.clone()),
        Some(Bson::Boolean(b)) => IndexKeyKind::Bool(*b),
        Some(other) => IndexKeyKind::Other(other.to_string()),
    }
}

/// One component of a compound key; descending components invert the comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyPart {
    value: IndexKeyKind,
    order: Order,
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        let ord = self.value.cmp(&other.value);
        if self.order == Order::Desc { ord.reverse() } else { ord }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Key pattern of an index, e.g. `{ author: 1, published_year: -1 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<(String, Order)>,
}

impl IndexSpec {
    /// Builds a spec named the conventional way: `field_1` / `field_-1` joined by `_`.
    #[must_use]
    pub fn new(keys: Vec<(String, Order)>) -> Self {
        let name = keys
            .iter()
            .map(|(f, o)| format!("{f}_{}", if *o == Order::Asc { 1 } else { -1 }))
            .collect::<Vec<_>>()
            .join("_");
        Self { name, keys }
    }

    /// # Errors
    /// Returns `DbError::IndexError` for an empty pattern or a direction other than 1 / -1.
    pub fn from_keys_doc(keys: &BsonDocument) -> Result<Self, DbError> {
        if keys.is_empty() {
            return Err(DbError::IndexError("index key pattern must not be empty".into()));
        }
        let mut out = Vec::with_capacity(keys.len());
        for (field, dir) in keys {
            let order = match crate::query::direction_of(dir) {
                Some(1) => Order::Asc,
                Some(-1) => Order::Desc,
                _ => return Err(DbError::IndexError(format!("bad index direction for '{field}': {dir}"))),
            };
            out.push((field.clone(), order));
        }
        Ok(Self::new(out))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub keys: usize,
    pub entries: usize,
    pub build_time_ms: u128,
}

/// Bounds a query places on one field, gathered from a conjunction of comparisons.
#[derive(Debug, Clone, Default)]
pub struct FieldBounds {
    pub eq: Option<IndexKeyKind>,
    pub lower: Option<(IndexKeyKind, bool)>,
    pub upper: Option<(IndexKeyKind, bool)>,
}

impl FieldBounds {
    #[must_use]
    pub fn admits(&self, key: &IndexKeyKind) -> bool {
        if let Some(eq) = &self.eq && key != eq {
            return false;
        }
        if let Some((lo, incl)) = &self.lower {
            if !same_bracket(key, lo) { return false; }
            match key.cmp(lo) {
                Ordering::Less => return false,
                Ordering::Equal if !incl => return false,
                _ => {}
            }
        }
        if let Some((hi, incl)) = &self.upper {
            if !same_bracket(key, hi) { return false; }
            match key.cmp(hi) {
                Ordering::Greater => return false,
                Ordering::Equal if !incl => return false,
                _ => {}
            }
        }
        true
    }
}

// Range bounds only span values of the bound's own type.
fn same_bracket(a: &IndexKeyKind, b: &IndexKeyKind) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Record ids produced by an index scan, in record order.
#[derive(Debug, Clone)]
pub struct IndexScan {
    pub index_name: String,
    pub records: Vec<RecordId>,
    pub keys_examined: usize,
}

#[derive(Debug, Clone)]
pub struct BTreeIndex {
    pub spec: IndexSpec,
    map: BTreeMap<Vec<KeyPart>, BTreeSet<RecordId>>,
    pub stats: IndexStats,
}

impl BTreeIndex {
    #[must_use]
    pub fn new(spec: IndexSpec) -> Self {
        Self { spec, map: BTreeMap::new(), stats: IndexStats::default() }
    }

    fn key_for(&self, doc: &BsonDocument) -> Vec<KeyPart> {
        self.spec
            .keys
            .iter()
            .map(|(field, order)| KeyPart { value: key_from_bson(get_path(doc, field)), order: *order })
            .collect()
    }

    pub fn insert(&mut self, doc: &BsonDocument, rid: RecordId) {
        let key = self.key_for(doc);
        if self.map.entry(key).or_default().insert(rid) {
            self.stats.entries += 1;
        }
        self.stats.keys = self.map.len();
    }

    pub fn remove(&mut self, doc: &BsonDocument, rid: RecordId) {
        let key = self.key_for(doc);
        if let Some(set) = self.map.get_mut(&key) {
            if set.remove(&rid) {
                self.stats.entries = self.stats.entries.saturating_sub(1);
            }
            if set.is_empty() {
                self.map.remove(&key);
            }
        }
        self.stats.keys = self.map.len();
    }

    /// Number of leading key fields constrained by `bounds`.
    fn prefix_len(&self, bounds: &HashMap<String, FieldBounds>) -> usize {
        self.spec.keys.iter().take_while(|(f, _)| bounds.contains_key(f)).count()
    }

    /// Scans the entries whose leading component satisfies its bounds, checking the
    /// remaining components against theirs. Each entry visited counts as a key examined.
    #[must_use]
    pub fn scan(&self, bounds: &HashMap<String, FieldBounds>) -> IndexScan {
        let mut keys_examined = 0usize;
        let mut records = BTreeSet::new();
        let Some((lead_field, lead_order)) = self.spec.keys.first() else {
            return IndexScan { index_name: self.spec.name.clone(), records: Vec::new(), keys_examined };
        };
        let lead = bounds.get(lead_field).cloned().unwrap_or_default();
        let entries: Box<dyn Iterator<Item = (&Vec<KeyPart>, &BTreeSet<RecordId>)> + '_> = match &lead.eq {
            // Seek: a one-element prefix sorts before every full key that starts with it.
            Some(v) => Box::new(
                self.map
                    .range(vec![KeyPart { value: v.clone(), order: *lead_order }]..)
                    .take_while(move |(k, _)| k.first().is_some_and(|p| &p.value == v)),
            ),
            None => Box::new(self.map.iter()),
        };
        for (key, set) in entries {
            if !lead.admits(&key[0].value) {
                continue;
            }
            keys_examined += set.len();
            let rest_ok = self.spec.keys.iter().zip(key.iter()).skip(1).all(|((f, _), part)| {
                bounds.get(f).is_none_or(|b| b.admits(&part.value))
            });
            if rest_ok {
                records.extend(set.iter().copied());
            }
        }
        IndexScan { index_name: self.spec.name.clone(), records: records.into_iter().collect(), keys_examined }
    }
}

#[derive(Debug, Default)]
pub struct IndexManager {
    // creation order; planner ties go to the earlier index
    pub indexes: Vec<BTreeIndex>,
}

impl IndexManager {
    #[must_use]
    pub fn new() -> Self {
        Self { indexes: Vec::new() }
    }

    /// Registers `spec`, returning `true` when it is new. Re-creating an identical index is a no-op.
    ///
    /// # Errors
    /// Returns `DbError::IndexError` when the name is taken by an index with a different key pattern.
    pub fn create_index(&mut self, spec: IndexSpec) -> Result<bool, DbError> {
        if let Some(existing) = self.indexes.iter().find(|i| i.spec.name == spec.name) {
            if existing.spec.keys == spec.keys {
                return Ok(false);
            }
            return Err(DbError::IndexError(format!(
                "an index named '{}' already exists with different keys",
                spec.name
            )));
        }
        self.indexes.push(BTreeIndex::new(spec));
        Ok(true)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BTreeIndex> {
        self.indexes.iter().find(|i| i.spec.name == name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut BTreeIndex> {
        self.indexes.iter_mut().find(|i| i.spec.name == name)
    }

    #[must_use]
    pub fn specs(&self) -> Vec<IndexSpec> {
        self.indexes.iter().map(|i| i.spec.clone()).collect()
    }

    /// Picks the index whose key prefix is most constrained by `bounds` and scans it.
    /// Returns `None` when no index constrains its leading field.
    #[must_use]
    pub fn best_scan(&self, bounds: &HashMap<String, FieldBounds>) -> Option<IndexScan> {
        let mut best: Option<(&BTreeIndex, usize)> = None;
        for idx in &self.indexes {
            let n = idx.prefix_len(bounds);
            if n > 0 && best.is_none_or(|(_, b)| n > b) {
                best = Some((idx, n));
            }
        }
        best.map(|(idx, _)| idx.scan(bounds))
    }
}

pub fn index_insert_all(mgr: &mut IndexManager, doc: &BsonDocument, rid: RecordId) {
    for idx in &mut mgr.indexes {
        idx.insert(doc, rid);
    }
}

pub fn index_remove_all(mgr: &mut IndexManager, doc: &BsonDocument, rid: RecordId) {
    for idx in &mut mgr.indexes {
        idx.remove(doc, rid);
    }
}
