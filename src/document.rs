use crate::errors::DbError;
use crate::types::DocumentId;
use bson::{Bson, Document as BsonDocument, doc};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ID_FIELD: &str = "_id";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Metadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self { created_at: now, updated_at: now }
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

/// A stored document: the user payload plus the engine's identifier and timestamps.
///
/// The payload never carries `_id`; it is added back by [`Document::render`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub data: BsonDocument,
    pub metadata: Metadata,
}

impl Document {
    #[must_use]
    pub fn new(mut data: BsonDocument) -> Self {
        if let Some(old) = data.remove(ID_FIELD) {
            log::debug!("dropping caller-supplied _id {old}; ids are engine-assigned");
        }
        Self { id: DocumentId::new(), data, metadata: Metadata::new() }
    }

    pub fn update(&mut self, new_data: BsonDocument) {
        self.data = new_data;
        self.metadata.updated_at = Utc::now();
    }

    /// The document as a query returns it: `_id` first, then the payload fields in order.
    #[must_use]
    pub fn render(&self) -> BsonDocument {
        let mut out = BsonDocument::new();
        out.insert(ID_FIELD, Bson::String(self.id.to_string()));
        for (k, v) in &self.data {
            out.insert(k.clone(), v.clone());
        }
        out
    }
}

/// Typed view of a `books` document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub genre: String,
    pub published_year: i32,
    pub price: f64,
    pub in_stock: bool,
}

impl From<&Book> for BsonDocument {
    fn from(b: &Book) -> Self {
        doc! {
            "title": b.title.clone(),
            "author": b.author.clone(),
            "genre": b.genre.clone(),
            "published_year": b.published_year,
            "price": b.price,
            "in_stock": b.in_stock,
        }
    }
}

impl TryFrom<&BsonDocument> for Book {
    type Error = DbError;

    fn try_from(d: &BsonDocument) -> Result<Self, Self::Error> {
        let text = |field: &str| -> Result<String, DbError> {
            d.get(field)
                .and_then(Bson::as_str)
                .map(str::to_string)
                .ok_or_else(|| DbError::QueryError(format!("book field '{field}' missing or not a string")))
        };
        #[allow(clippy::cast_possible_truncation)]
        let published_year = match d.get("published_year") {
            Some(Bson::Int32(y)) => *y,
            Some(Bson::Int64(y)) => i32::try_from(*y)
                .map_err(|_| DbError::QueryError(format!("published_year {y} out of range")))?,
            Some(Bson::Double(y)) if y.fract() == 0.0 => *y as i32,
            _ => return Err(DbError::QueryError("book field 'published_year' missing or not an integer".into())),
        };
        #[allow(clippy::cast_precision_loss)]
        let price = match d.get("price") {
            Some(Bson::Double(p)) => *p,
            Some(Bson::Int32(p)) => f64::from(*p),
            Some(Bson::Int64(p)) => *p as f64,
            _ => return Err(DbError::QueryError("book field 'price' missing or not a number".into())),
        };
        let in_stock = d
            .get("in_stock")
            .and_then(Bson::as_bool)
            .ok_or_else(|| DbError::QueryError("book field 'in_stock' missing or not a boolean".into()))?;
        Ok(Self {
            title: text("title")?,
            author: text("author")?,
            genre: text("genre")?,
            published_year,
            price,
            in_stock,
        })
    }
}
