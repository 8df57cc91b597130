#![allow(dead_code)]

use plp_bookstore::Database;
use plp_bookstore::catalog::{COLLECTION, DATABASE};
use plp_bookstore::import::{ImportFormat, import_reader};

pub const BOOKS_JSON: &str = include_str!("../../seed/books.json");
pub const BOOK_COUNT: usize = 12;

/// A fresh in-memory database seeded with the twelve fixture books.
pub fn seeded_db() -> Database {
    let db = Database::in_memory(DATABASE);
    let col = db.create_collection(COLLECTION);
    let report = import_reader(&col, BOOKS_JSON.as_bytes(), ImportFormat::JsonArray).unwrap();
    assert_eq!(report.inserted as usize, BOOK_COUNT);
    db
}

pub fn titles(docs: &[bson::Document]) -> Vec<String> {
    docs.iter().map(|d| d.get_str("title").unwrap().to_string()).collect()
}
