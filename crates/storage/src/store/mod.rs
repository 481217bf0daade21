//! Document store seam used by the repositories.
//!
//! A store holds named collections of schemaless JSON documents keyed by a
//! store-generated [`DocumentId`]. The key is kept outside the document body.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, StorageError};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;

/// Body of a stored document.
pub type Document = Map<String, Value>;

/// Primary key of a stored document.
///
/// Native `Uuid` inside the store, plain string everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an external identifier.
    pub fn parse(id: &str) -> Result<Self> {
        Uuid::parse_str(id.trim())
            .map(Self)
            .map_err(|_| StorageError::invalid_argument(format!("malformed identifier '{}'", id)))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for DocumentId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for DocumentId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub body: Document,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Ascending => "ASC NULLS FIRST",
            Self::Descending => "DESC NULLS LAST",
        }
    }
}

impl FromStr for SortDirection {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "asc" | "ascending" | "1" => Ok(Self::Ascending),
            "desc" | "descending" | "-1" => Ok(Self::Descending),
            other => Err(StorageError::invalid_argument(format!(
                "unknown sort direction '{}'",
                other
            ))),
        }
    }
}

/// Key a query can be ordered by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    /// The document's primary key.
    Id,
    /// A top-level field of the document body.
    Field(String),
}

/// Equality filter. Every entry of `equals` must equal the body's value, with
/// numbers compared numerically as `jsonb` does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    pub id: Option<DocumentId>,
    pub equals: Document,
}

impl DocumentFilter {
    pub fn matches(&self, document: &StoredDocument) -> bool {
        if let Some(id) = self.id
            && id != document.id
        {
            return false;
        }

        self.equals.iter().all(|(key, expected)| {
            match document.body.get(key) {
                Some(actual) => {
                    memory::compare_values(Some(actual), Some(expected)) == Ordering::Equal
                }
                // A null filter value also matches a document missing the field.
                None => expected.is_null(),
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Vec<(SortKey, SortDirection)>,
    pub skip: u64,
    pub limit: Option<u64>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents matching `filter`, ordered by `options.sort` then by insertion order.
    async fn find(
        &self,
        collection: &str,
        filter: &DocumentFilter,
        options: &FindOptions,
    ) -> Result<Vec<StoredDocument>>;

    async fn find_one(&self, collection: &str, id: DocumentId) -> Result<Option<StoredDocument>>;

    /// Number of documents matching `filter`, regardless of any paging.
    async fn count(&self, collection: &str, filter: &DocumentFilter) -> Result<u64>;

    async fn insert(&self, collection: &str, body: Document) -> Result<DocumentId>;

    /// Merge `changes` into the top level of the document body. Returns the
    /// number of documents matched.
    async fn update(&self, collection: &str, id: DocumentId, changes: Document) -> Result<u64>;

    /// Returns the number of documents removed.
    async fn delete(&self, collection: &str, id: DocumentId) -> Result<u64>;
}
