mod common;

use bson::doc;
use common::{BOOKS_JSON, BOOK_COUNT, titles};
use plp_bookstore::Database;
use plp_bookstore::catalog::COLLECTION;
use plp_bookstore::config::AppConfig;
use plp_bookstore::document::{Book, Document};
use plp_bookstore::engine::Engine;
use plp_bookstore::errors::DbError;
use plp_bookstore::import::{ImportFormat, import_file, import_reader};
use plp_bookstore::index::IndexSpec;
use plp_bookstore::query::{Filter, FindOptions, parse_filter};
use plp_bookstore::runner::run_named;
use std::fs;
use tempfile::tempdir;

fn config_in(dir: &std::path::Path) -> AppConfig {
    AppConfig { data_dir: dir.to_path_buf(), ..AppConfig::default() }
}

fn all_titles(db: &Database) -> Vec<String> {
    titles(&db.find(COLLECTION, &Filter::True, &FindOptions::default()).unwrap().to_vec())
}

#[test]
fn snapshot_round_trip_preserves_order_ids_and_indexes() {
    let dir = tempdir().unwrap();
    let cfg = config_in(dir.path());
    let (before, ids) = {
        let db = Database::open(&cfg).unwrap();
        let col = db.create_collection(COLLECTION);
        import_reader(&col, BOOKS_JSON.as_bytes(), ImportFormat::Auto).unwrap();
        db.create_index(COLLECTION, IndexSpec::from_keys_doc(&doc! { "author": 1, "published_year": -1 }).unwrap()).unwrap();
        run_named(&db, COLLECTION, "delete_moby_dick").unwrap();
        db.flush().unwrap();
        (all_titles(&db), col.list_ids())
    };
    assert!(dir.path().join(format!("{}.json", cfg.db_name)).exists());

    let db = Database::open(&cfg).unwrap();
    assert_eq!(db.list_collection_names(), vec![COLLECTION.to_string()]);
    assert_eq!(all_titles(&db), before);
    assert_eq!(before.len(), BOOK_COUNT - 1);
    assert_eq!(db.get_collection(COLLECTION).unwrap().list_ids(), ids);
    let names: Vec<String> = db.list_indexes(COLLECTION).unwrap().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["author_1_published_year_-1"]);
    // the rebuilt index serves queries
    let f = parse_filter(&doc! { "author": "J.R.R. Tolkien", "published_year": { "$gt": 1930 } }).unwrap();
    let stats = db.explain(COLLECTION, &f, &FindOptions::default()).unwrap();
    assert_eq!(stats.index_name.as_deref(), Some("author_1_published_year_-1"));
}

#[test]
fn rerunning_mutations_after_reopen_is_idempotent() {
    let dir = tempdir().unwrap();
    let cfg = config_in(dir.path());
    {
        let db = Database::open(&cfg).unwrap();
        import_reader(&db.create_collection(COLLECTION), BOOKS_JSON.as_bytes(), ImportFormat::JsonArray).unwrap();
        run_named(&db, COLLECTION, "update_1984_price").unwrap();
        db.flush().unwrap();
    }
    let db = Database::open(&cfg).unwrap();
    let r = run_named(&db, COLLECTION, "update_1984_price").unwrap().result.unwrap();
    assert_eq!(r, plp_bookstore::runner::Outcome::Updated(plp_bookstore::query::UpdateReport { matched: 1, modified: 0 }));
}

#[test]
fn unflushed_changes_are_not_persisted() {
    let dir = tempdir().unwrap();
    let cfg = config_in(dir.path());
    {
        let db = Database::open(&cfg).unwrap();
        import_reader(&db.create_collection(COLLECTION), BOOKS_JSON.as_bytes(), ImportFormat::JsonArray).unwrap();
        db.flush().unwrap();
        run_named(&db, COLLECTION, "delete_moby_dick").unwrap();
    }
    let db = Database::open(&cfg).unwrap();
    assert_eq!(db.count(COLLECTION, &Filter::True).unwrap(), BOOK_COUNT);
}

#[test]
fn bad_snapshot_version_is_rejected() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("old.json"), r#"{"version": 99, "database": "old", "collections": []}"#).unwrap();
    let err = Engine::open(dir.path(), "old").unwrap_err();
    assert!(matches!(err, DbError::SnapshotError(_)));
}

#[test]
fn corrupt_snapshot_is_a_json_error() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
    assert!(matches!(Engine::open(dir.path(), "broken"), Err(DbError::Json(_))));
}

#[test]
fn in_memory_flush_is_noop() {
    let db = Database::in_memory("scratch");
    assert!(db.flush().is_ok());
    assert_eq!(db.name(), "scratch");
}

#[test]
fn create_collection_returns_existing() {
    let db = Database::in_memory("scratch");
    let a = db.create_collection("books");
    a.insert_document(Document::new(doc! { "title": "x" }));
    let b = db.create_collection("books");
    assert_eq!(b.len(), 1);
    assert_eq!(db.list_collection_names().len(), 1);
}

#[test]
fn import_ndjson_skips_blank_lines() {
    let db = Database::in_memory("scratch");
    let col = db.create_collection(COLLECTION);
    let data = "{\"title\":\"a\"}\n\n{\"title\":\"b\"}\n";
    let report = import_reader(&col, data.as_bytes(), ImportFormat::Auto).unwrap();
    assert_eq!((report.inserted, report.skipped), (2, 1));
    assert_eq!(titles(&col.get_all_documents().iter().map(Document::render).collect::<Vec<_>>()), vec!["a", "b"]);
}

#[test]
fn import_rejects_malformed_line() {
    let db = Database::in_memory("scratch");
    let col = db.create_collection(COLLECTION);
    let data = "{\"title\":\"a\"}\n{oops}\n";
    assert!(matches!(import_reader(&col, data.as_bytes(), ImportFormat::Ndjson), Err(DbError::Json(_))));
}

#[test]
fn import_file_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("books.json");
    fs::write(&path, BOOKS_JSON).unwrap();
    let db = Database::in_memory("scratch");
    let col = db.create_collection(COLLECTION);
    assert_eq!(import_file(&col, &path).unwrap().inserted as usize, BOOK_COUNT);
    assert!(matches!(import_file(&col, &dir.path().join("missing.json")), Err(DbError::Io(_))));
}

#[test]
fn engine_assigns_ids_and_drops_supplied_ones() {
    let d = Document::new(doc! { "_id": "mine", "title": "x" });
    assert!(d.data.get("_id").is_none());
    let rendered = d.render();
    assert_eq!(rendered.get_str("_id").unwrap(), d.id.to_string());
}

#[test]
fn book_converts_to_and_from_bson() {
    let book = Book {
        title: "Dune".into(),
        author: "Frank Herbert".into(),
        genre: "Science Fiction".into(),
        published_year: 1965,
        price: 9.5,
        in_stock: true,
    };
    let d = bson::Document::from(&book);
    assert_eq!(Book::try_from(&d).unwrap(), book);
    assert!(Book::try_from(&doc! { "title": "Dune" }).is_err());
}
