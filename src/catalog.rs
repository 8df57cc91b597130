//! The bookstore statements, in the order they are run.
//!
//! Each statement is written the way it would be typed into a document shell; the runner
//! parses it with the engine's own parsers, so a malformed statement fails the same way a
//! shell would.

use bson::{Document as BsonDocument, doc};

pub const DATABASE: &str = "plp_bookstore";
pub const COLLECTION: &str = "books";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Crud,
    Advanced,
    Aggregation,
    Indexing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Find {
        filter: BsonDocument,
        projection: Option<BsonDocument>,
        sort: Option<BsonDocument>,
        limit: Option<usize>,
        skip: Option<usize>,
    },
    UpdateOne { filter: BsonDocument, update: BsonDocument },
    DeleteOne { filter: BsonDocument },
    Aggregate { pipeline: Vec<BsonDocument> },
    CreateIndex { keys: BsonDocument },
    /// A find reported with execution statistics instead of documents.
    Explain { filter: BsonDocument },
}

impl Statement {
    /// Whether running the statement changes the collection or its indexes.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(self, Self::UpdateOne { .. } | Self::DeleteOne { .. } | Self::CreateIndex { .. })
    }

    fn find(filter: BsonDocument) -> Self {
        Self::Find { filter, projection: None, sort: None, limit: None, skip: None }
    }

    fn page(n: usize) -> Self {
        Self::Find { filter: doc! {}, projection: None, sort: None, limit: Some(PAGE_SIZE), skip: Some(n * PAGE_SIZE) }
    }
}

pub const PAGE_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct NamedQuery {
    pub name: &'static str,
    pub section: Section,
    pub description: &'static str,
    pub statement: Statement,
}

#[must_use]
pub fn catalog() -> Vec<NamedQuery> {
    let q = |name: &'static str, section: Section, description: &'static str, statement: Statement| NamedQuery { name, section, description, statement };
    vec![
        // Basic CRUD
        q("fiction_books", Section::Crud, "Find all books in the 'Fiction' genre",
            Statement::find(doc! { "genre": "Fiction" })),
        q("published_after_1950", Section::Crud, "Find books published after 1950",
            Statement::find(doc! { "published_year": { "$gt": 1950 } })),
        q("books_by_orwell", Section::Crud, "Find books written by George Orwell",
            Statement::find(doc! { "author": "George Orwell" })),
        q("update_1984_price", Section::Crud, "Set the price of '1984' to 15.00",
            Statement::UpdateOne { filter: doc! { "title": "1984" }, update: doc! { "$set": { "price": 15.00 } } }),
        q("delete_moby_dick", Section::Crud, "Delete the book titled 'Moby Dick'",
            Statement::DeleteOne { filter: doc! { "title": "Moby Dick" } }),
        // Advanced queries
        q("in_stock_after_2010", Section::Advanced, "Books in stock and published after 2010",
            Statement::find(doc! { "in_stock": true, "published_year": { "$gt": 2010 } })),
        q("title_author_price", Section::Advanced, "Only title, author and price of every book",
            Statement::Find {
                filter: doc! {},
                projection: Some(doc! { "title": 1, "author": 1, "price": 1, "_id": 0 }),
                sort: None,
                limit: None,
                skip: None,
            }),
        q("price_ascending", Section::Advanced, "All books, cheapest first",
            Statement::Find { filter: doc! {}, projection: None, sort: Some(doc! { "price": 1 }), limit: None, skip: None }),
        q("price_descending", Section::Advanced, "All books, most expensive first",
            Statement::Find { filter: doc! {}, projection: None, sort: Some(doc! { "price": -1 }), limit: None, skip: None }),
        q("page_1", Section::Advanced, "Pagination: books 1-5", Statement::page(0)),
        q("page_2", Section::Advanced, "Pagination: books 6-10", Statement::page(1)),
        q("page_3", Section::Advanced, "Pagination: books 11-15", Statement::page(2)),
        // Aggregation
        q("avg_price_by_genre", Section::Aggregation, "Average price per genre",
            Statement::Aggregate { pipeline: vec![
                doc! { "$group": { "_id": "$genre", "average_price": { "$avg": "$price" } } },
            ] }),
        q("top_author", Section::Aggregation, "Author with the most books",
            Statement::Aggregate { pipeline: vec![
                doc! { "$group": { "_id": "$author", "book_count": { "$sum": 1 } } },
                doc! { "$sort": { "book_count": -1 } },
                doc! { "$limit": 1 },
            ] }),
        q("books_per_decade", Section::Aggregation, "Number of books per publication decade",
            Statement::Aggregate { pipeline: vec![
                doc! { "$project": {
                    "_id": 0,
                    "title": 1,
                    "decade": { "$multiply": [ { "$floor": { "$divide": ["$published_year", 10] } }, 10 ] },
                } },
                doc! { "$group": { "_id": "$decade", "book_count": { "$sum": 1 } } },
                doc! { "$sort": { "_id": 1 } },
            ] }),
        // Indexing
        q("index_title", Section::Indexing, "Single-field index on title",
            Statement::CreateIndex { keys: doc! { "title": 1 } }),
        q("index_author_year", Section::Indexing, "Compound index on author and published_year",
            Statement::CreateIndex { keys: doc! { "author": 1, "published_year": -1 } }),
        q("explain_tolkien_after_1930", Section::Indexing, "Execution stats for a query the compound index serves",
            Statement::Explain { filter: doc! { "author": "J.R.R. Tolkien", "published_year": { "$gt": 1930 } } }),
    ]
}

#[must_use]
pub fn lookup(name: &str) -> Option<NamedQuery> {
    catalog().into_iter().find(|q| q.name == name)
}
