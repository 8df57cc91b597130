mod common;

use bson::{Bson, doc};
use common::{seeded_db, titles};
use plp_bookstore::aggregate::parse_pipeline;
use plp_bookstore::catalog::COLLECTION;
use plp_bookstore::document::Document;
use plp_bookstore::errors::DbError;
use plp_bookstore::index::IndexSpec;
use plp_bookstore::query::{
    CmpOp, Filter, FindOptions, Order, PlanStage, SortSpec, UpdateDoc, apply_update, eval_filter, parse_filter, parse_projection,
    parse_sort, parse_update,
};

#[test]
fn filter_eq_and_range() {
    let d = doc! { "genre": "Fiction", "published_year": 1960 };
    assert!(eval_filter(&d, &parse_filter(&doc! { "genre": "Fiction" }).unwrap()));
    assert!(eval_filter(&d, &parse_filter(&doc! { "published_year": { "$gt": 1950 } }).unwrap()));
    assert!(!eval_filter(&d, &parse_filter(&doc! { "published_year": { "$lt": 1950 } }).unwrap()));
    // numbers compare across widths
    assert!(eval_filter(&d, &Filter::Cmp { path: "published_year".into(), op: CmpOp::Eq, value: Bson::Double(1960.0) }));
}

#[test]
fn missing_field_never_matches_comparison() {
    let d = doc! { "title": "x" };
    assert!(!eval_filter(&d, &parse_filter(&doc! { "price": { "$gt": 0 } }).unwrap()));
    assert!(!eval_filter(&d, &parse_filter(&doc! { "price": { "$lte": 0 } }).unwrap()));
    assert!(eval_filter(&d, &parse_filter(&doc! { "price": { "$exists": false } }).unwrap()));
}

#[test]
fn parse_filter_logical_operators() {
    let f = parse_filter(&doc! { "$or": [ { "author": "George Orwell" }, { "genre": "Fantasy" } ] }).unwrap();
    assert!(eval_filter(&doc! { "author": "J.R.R. Tolkien", "genre": "Fantasy" }, &f));
    assert!(!eval_filter(&doc! { "author": "Jane Austen", "genre": "Romance" }, &f));

    let f = parse_filter(&doc! { "genre": { "$in": ["Fiction", "Romance"] }, "price": { "$ne": 7.99 } }).unwrap();
    assert!(eval_filter(&doc! { "genre": "Fiction", "price": 12.99 }, &f));
    assert!(!eval_filter(&doc! { "genre": "Romance", "price": 7.99 }, &f));

    let f = parse_filter(&doc! { "published_year": { "$not": { "$gte": 1900 } } }).unwrap();
    assert!(eval_filter(&doc! { "published_year": 1851 }, &f));
}

#[test]
fn parse_filter_rejects_unknown_operators() {
    assert!(matches!(parse_filter(&doc! { "$where": "1" }), Err(DbError::QueryError(_))));
    assert!(matches!(parse_filter(&doc! { "price": { "$regex": "x" } }), Err(DbError::QueryError(_))));
    assert!(matches!(parse_filter(&doc! { "price": { "$not": 5 } }), Err(DbError::QueryError(_))));
}

#[test]
fn parse_update_requires_operators() {
    let u = parse_update(&doc! { "$set": { "price": 15.0 } }).unwrap();
    assert_eq!(u.set, vec![("price".to_string(), Bson::Double(15.0))]);
    assert!(parse_update(&doc! { "price": 15.0 }).is_err());
    assert!(parse_update(&doc! {}).is_err());
    assert!(parse_update(&doc! { "$inc": { "price": "a lot" } }).is_err());
}

#[test]
fn update_set_inc_unset() {
    let mut d = Document::new(doc! { "price": 10, "stats": { "sold": 1 }, "note": "x" });
    let upd = UpdateDoc {
        set: vec![("title".into(), "1984".into())],
        inc: vec![("price".into(), Bson::Int32(5)), ("stats.sold".into(), Bson::Double(0.5))],
        unset: vec!["note".into()],
    };
    assert!(apply_update(&mut d, &upd));
    assert_eq!(d.data.get_str("title").unwrap(), "1984");
    assert_eq!(d.data.get_i32("price").unwrap(), 15);
    assert_eq!(d.data.get_document("stats").unwrap().get_f64("sold").unwrap(), 1.5);
    assert!(d.data.get("note").is_none());
}

#[test]
fn set_to_same_value_is_not_a_modification() {
    let mut d = Document::new(doc! { "price": 15.0 });
    let upd = parse_update(&doc! { "$set": { "price": 15.0 } }).unwrap();
    assert!(!apply_update(&mut d, &upd));
}

#[test]
fn updates_cannot_touch_id() {
    for upd in [
        doc! { "$set": { "_id": "hijack" } },
        doc! { "$unset": { "_id": "" } },
        doc! { "$inc": { "_id": 1 } },
        doc! { "$set": { "_id.part": 1 } },
        doc! { "$set": { "price": 1.0, "_id": "hijack" } },
    ] {
        let err = parse_update(&upd).unwrap_err();
        assert!(matches!(&err, DbError::QueryError(m) if m.contains("immutable")), "{upd}: {err}");
    }
    // a field merely prefixed with _id is an ordinary field
    assert!(parse_update(&doc! { "$set": { "_idx": 1 } }).is_ok());

    let db = seeded_db();
    let filter = parse_filter(&doc! { "title": "1984" }).unwrap();
    let before = db.find(COLLECTION, &filter, &FindOptions::default()).unwrap().to_vec();
    let id = before[0].get_str("_id").unwrap().to_string();

    // a hand-built update skips the _id path and applies the rest
    let upd = UpdateDoc {
        set: vec![("_id".into(), "hijack".into()), ("price".into(), Bson::Double(1.0))],
        inc: vec![],
        unset: vec!["_id".into()],
    };
    let report = db.update_one(COLLECTION, &filter, &upd).unwrap();
    assert_eq!((report.matched, report.modified), (1, 1));
    let after = db.find(COLLECTION, &filter, &FindOptions::default()).unwrap().to_vec();
    assert_eq!(after[0].get_str("_id").unwrap(), id);
    assert_eq!(after[0].get_f64("price").unwrap(), 1.0);
    let hijacked = parse_filter(&doc! { "_id": "hijack" }).unwrap();
    assert_eq!(db.count(COLLECTION, &hijacked).unwrap(), 0);
}

#[test]
fn projection_include_and_exclude() {
    let p = parse_projection(&doc! { "title": 1, "author": 1, "price": 1, "_id": 0 }).unwrap();
    assert_eq!(p.include, vec!["title", "author", "price"]);
    assert!(!p.include_id);
    assert!(parse_projection(&doc! { "title": 1, "genre": 0 }).is_err());
}

#[test]
fn parse_sort_directions() {
    let s = parse_sort(&doc! { "price": -1, "title": 1 }).unwrap();
    assert_eq!(s, vec![
        SortSpec { field: "price".into(), order: Order::Desc },
        SortSpec { field: "title".into(), order: Order::Asc },
    ]);
    assert!(parse_sort(&doc! { "price": 2 }).is_err());
}

#[test]
fn find_keeps_insertion_order_and_renders_id_first() {
    let db = seeded_db();
    let docs = db.find(COLLECTION, &Filter::True, &FindOptions::default()).unwrap().to_vec();
    assert_eq!(docs.len(), common::BOOK_COUNT);
    assert_eq!(titles(&docs)[0], "To Kill a Mockingbird");
    assert_eq!(titles(&docs)[11], "Wuthering Heights");
    assert_eq!(docs[0].keys().next().map(String::as_str), Some("_id"));
}

#[test]
fn find_applies_skip_before_limit() {
    let db = seeded_db();
    let opts = FindOptions { limit: Some(2), skip: Some(3), ..Default::default() };
    let docs = db.find(COLLECTION, &Filter::True, &opts).unwrap().to_vec();
    assert_eq!(titles(&docs), vec!["Brave New World", "The Hobbit"]);
}

#[test]
fn sort_is_stable_for_equal_keys() {
    let db = seeded_db();
    let opts = FindOptions { sort: Some(parse_sort(&doc! { "price": 1 }).unwrap()), ..Default::default() };
    let docs = db.find(COLLECTION, &Filter::True, &opts).unwrap().to_vec();
    let t = titles(&docs);
    assert_eq!(t[0], "Pride and Prejudice");
    assert_eq!(t[11], "The Lord of the Rings");
    // 9.99 twice and 10.99 twice: insertion order among ties
    let gatsby = t.iter().position(|x| x == "The Great Gatsby").unwrap();
    let heights = t.iter().position(|x| x == "Wuthering Heights").unwrap();
    assert_eq!(heights, gatsby + 1);
    let n1984 = t.iter().position(|x| x == "1984").unwrap();
    let alchemist = t.iter().position(|x| x == "The Alchemist").unwrap();
    assert_eq!(alchemist, n1984 + 1);
}

#[test]
fn update_one_touches_first_match_only() {
    let db = seeded_db();
    let f = parse_filter(&doc! { "author": "George Orwell" }).unwrap();
    let upd = parse_update(&doc! { "$set": { "in_stock": false } }).unwrap();
    let r = db.update_one(COLLECTION, &f, &upd).unwrap();
    assert_eq!((r.matched, r.modified), (1, 1));
    let in_stock = parse_filter(&doc! { "author": "George Orwell", "in_stock": true }).unwrap();
    assert_eq!(db.count(COLLECTION, &in_stock).unwrap(), 0);

    let r = db.update_many(COLLECTION, &f, &upd).unwrap();
    assert_eq!((r.matched, r.modified), (2, 0));
}

#[test]
fn delete_one_then_many() {
    let db = seeded_db();
    let fiction = parse_filter(&doc! { "genre": "Fiction" }).unwrap();
    assert_eq!(db.delete_one(COLLECTION, &fiction).unwrap().deleted, 1);
    assert_eq!(db.count(COLLECTION, &fiction).unwrap(), 3);
    assert_eq!(db.delete_many(COLLECTION, &fiction).unwrap().deleted, 3);
    assert_eq!(db.count(COLLECTION, &Filter::True).unwrap(), 8);
}

#[test]
fn no_match_is_empty_not_error() {
    let db = seeded_db();
    let f = parse_filter(&doc! { "title": "Dune" }).unwrap();
    assert!(db.find(COLLECTION, &f, &FindOptions::default()).unwrap().to_vec().is_empty());
    let r = db.update_one(COLLECTION, &f, &parse_update(&doc! { "$set": { "price": 1 } }).unwrap()).unwrap();
    assert_eq!((r.matched, r.modified), (0, 0));
}

#[test]
fn missing_collection_reads_and_writes_as_empty() {
    let db = seeded_db();
    let everything = Filter::True;
    let opts = FindOptions::default();
    assert!(db.find("magazines", &everything, &opts).unwrap().to_vec().is_empty());
    assert_eq!(db.count("magazines", &everything).unwrap(), 0);

    let update = parse_update(&doc! { "$set": { "price": 1.0 } }).unwrap();
    let report = db.update_one("magazines", &everything, &update).unwrap();
    assert_eq!((report.matched, report.modified), (0, 0));
    let report = db.update_many("magazines", &everything, &update).unwrap();
    assert_eq!((report.matched, report.modified), (0, 0));
    assert_eq!(db.delete_one("magazines", &everything).unwrap().deleted, 0);
    assert_eq!(db.delete_many("magazines", &everything).unwrap().deleted, 0);

    let pipeline = parse_pipeline(&[doc! { "$group": { "_id": "$genre", "n": { "$sum": 1 } } }]).unwrap();
    assert!(db.aggregate("magazines", &pipeline).unwrap().is_empty());

    let stats = db.explain("magazines", &everything, &opts).unwrap();
    assert_eq!(stats.winning_stage, PlanStage::CollScan);
    assert_eq!((stats.total_docs_examined, stats.n_returned), (0, 0));

    // none of the above registers the collection
    assert_eq!(db.list_collection_names(), vec![COLLECTION.to_string()]);
}

#[test]
fn create_index_creates_a_missing_collection() {
    let db = seeded_db();
    assert!(matches!(db.list_indexes("magazines"), Err(DbError::NoSuchCollection(name)) if name == "magazines"));
    let name = db.create_index("magazines", IndexSpec::from_keys_doc(&doc! { "issue": 1 }).unwrap()).unwrap();
    assert_eq!(name, "issue_1");
    assert!(db.list_collection_names().contains(&"magazines".to_string()));
    let names: Vec<String> = db.list_indexes("magazines").unwrap().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["issue_1"]);
    assert_eq!(db.count("magazines", &Filter::True).unwrap(), 0);
}

#[test]
fn cursor_advances_and_reports_remaining() {
    let db = seeded_db();
    let mut cur = db.find(COLLECTION, &Filter::True, &FindOptions { limit: Some(3), ..Default::default() }).unwrap();
    assert_eq!(cur.remaining(), 3);
    assert!(cur.advance().is_some());
    assert_eq!(cur.remaining(), 2);
    assert_eq!(cur.count(), 2);
}
