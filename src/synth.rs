//! Document synthesis: turning catalog records into retrievable text.
//!
//! Four passes over the record set, concatenated in a fixed order:
//!
//! 1. one `Book` document per record,
//! 2. one `AuthorAggregate` per distinct (trimmed) author across the
//!    exploded record/author pairs,
//! 3. one `DecadeAggregate` per publication decade,
//! 4. one `TopRated` document per record in the top 50 by average rating.
//!
//! Synthesis is a pure function of its input. Missing fields never fail a
//! pass; the sentence clause that would have carried them is omitted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::Record;

/// Upper bound on the `TopRated` pass.
pub const TOP_RATED_LIMIT: usize = 50;

/// A unit of retrievable text plus its typed metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(flatten)]
    pub kind: DocKind,
}

/// Document class, tagged the way it is persisted in `metadata_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DocKind {
    Book {
        title: String,
        authors: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        year: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decade: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        average_rating: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ratings_count: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },
    AuthorAggregate {
        author: String,
        count: i64,
    },
    DecadeAggregate {
        decade: i64,
        count: i64,
    },
    TopRated {
        title: String,
        authors: Vec<String>,
        average_rating: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ratings_count: Option<i64>,
    },
}

impl DocKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            DocKind::Book { .. } => "Book",
            DocKind::AuthorAggregate { .. } => "AuthorAggregate",
            DocKind::DecadeAggregate { .. } => "DecadeAggregate",
            DocKind::TopRated { .. } => "TopRated",
        }
    }
}

/// Synthesize the full document set for a record set.
pub fn synthesize(records: &[Record]) -> Vec<Document> {
    let mut documents = Vec::new();
    documents.extend(book_documents(records));
    documents.extend(author_documents(records));
    documents.extend(decade_documents(records));
    documents.extend(top_rated_documents(records));
    documents
}

// ============ Per-record pass ============

fn book_documents(records: &[Record]) -> Vec<Document> {
    records
        .iter()
        .map(|record| Document {
            id: record.id.clone(),
            content: book_sentence(record),
            kind: DocKind::Book {
                title: record.title.clone(),
                authors: record.authors.clone(),
                year: record.publication_year,
                decade: record.decade(),
                average_rating: record.average_rating,
                ratings_count: record.ratings_count,
                image_url: record.image_url.clone(),
            },
        })
        .collect()
}

fn book_sentence(record: &Record) -> String {
    let mut sentence = match join_authors(&record.authors) {
        Some(authors) => format!("Book: {} by {}.", record.title, authors),
        None => format!("Book: {}.", record.title),
    };

    if let Some(year) = record.publication_year {
        sentence.push_str(&format!(" Published in {}.", year));
    }

    match (record.average_rating, record.ratings_count) {
        (Some(rating), Some(count)) => sentence.push_str(&format!(
            " Average rating {} from {} ratings.",
            fmt_rating(rating),
            count
        )),
        (Some(rating), None) => {
            sentence.push_str(&format!(" Average rating {}.", fmt_rating(rating)))
        }
        (None, Some(count)) => sentence.push_str(&format!(" {} ratings recorded.", count)),
        (None, None) => {}
    }

    sentence
}

// ============ Author aggregate pass ============

fn author_documents(records: &[Record]) -> Vec<Document> {
    // Explode each record into one row per author. A book with N authors
    // contributes N rows; names are trimmed, blank names dropped.
    let mut counts: BTreeMap<String, i64> = BTreeMap::new();
    for record in records {
        for author in &record.authors {
            let name = author.trim();
            if name.is_empty() {
                continue;
            }
            *counts.entry(name.to_string()).or_insert(0) += 1;
        }
    }

    let mut entries: Vec<(String, i64)> = counts.into_iter().collect();
    // Stable sort: count descending, name ascending within equal counts.
    entries.sort_by(|a, b| b.1.cmp(&a.1));

    entries
        .into_iter()
        .map(|(author, count)| Document {
            id: format!("Author-{}", author),
            content: format!("Author {} has {} books in the catalog.", author, count),
            kind: DocKind::AuthorAggregate { author, count },
        })
        .collect()
}

// ============ Decade aggregate pass ============

fn decade_documents(records: &[Record]) -> Vec<Document> {
    // Records without a publication year carry no decade and are skipped.
    let mut counts: BTreeMap<i64, i64> = BTreeMap::new();
    for record in records {
        if let Some(decade) = record.decade() {
            *counts.entry(decade).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .map(|(decade, count)| Document {
            id: format!("Decade-{}", decade),
            content: format!("In the {}s, {} books were published.", decade, count),
            kind: DocKind::DecadeAggregate { decade, count },
        })
        .collect()
}

// ============ Top-rated pass ============

fn top_rated_documents(records: &[Record]) -> Vec<Document> {
    let mut rated: Vec<&Record> = records
        .iter()
        .filter(|record| record.average_rating.is_some())
        .collect();

    // Stable sort keeps input order for equal ratings.
    rated.sort_by(|a, b| {
        b.average_rating
            .partial_cmp(&a.average_rating)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rated.truncate(TOP_RATED_LIMIT);

    rated
        .into_iter()
        .map(|record| {
            let rating = record.average_rating.unwrap_or_default();
            Document {
                id: format!("TopRated-{}", record.id),
                content: top_rated_sentence(record, rating),
                kind: DocKind::TopRated {
                    title: record.title.clone(),
                    authors: record.authors.clone(),
                    average_rating: rating,
                    ratings_count: record.ratings_count,
                },
            }
        })
        .collect()
}

fn top_rated_sentence(record: &Record, rating: f64) -> String {
    let mut sentence = match join_authors(&record.authors) {
        Some(authors) => format!("Highly rated book: {} by {}", record.title, authors),
        None => format!("Highly rated book: {}", record.title),
    };
    match record.ratings_count {
        Some(count) => sentence.push_str(&format!(
            ", average rating {} from {} ratings.",
            fmt_rating(rating),
            count
        )),
        None => sentence.push_str(&format!(", average rating {}.", fmt_rating(rating))),
    }
    sentence
}

// ============ Rendering helpers ============

fn join_authors(authors: &[String]) -> Option<String> {
    if authors.is_empty() {
        None
    } else {
        Some(authors.join(", "))
    }
}

/// Whole-valued ratings keep one decimal place (4.0, not 4) so rating text
/// always reads as a rating.
fn fmt_rating(rating: f64) -> String {
    if rating.fract() == 0.0 {
        format!("{:.1}", rating)
    } else {
        format!("{}", rating)
    }
}
