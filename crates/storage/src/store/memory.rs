//! MemoryStore - HashMap-backed document store for tests and dry runs.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    Document, DocumentFilter, DocumentId, DocumentStore, FindOptions, SortDirection, SortKey,
    StoredDocument,
};
use crate::error::{Result, StorageError};

/// In-memory document store.
///
/// Each collection keeps its documents in insertion order, which doubles as
/// the final tie-breaker when sorting. Clone-friendly via Arc.
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, Vec<StoredDocument>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Vec<StoredDocument>>>> {
        self.collections
            .read()
            .map_err(|_| StorageError::Store("lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Vec<StoredDocument>>>> {
        self.collections
            .write()
            .map_err(|_| StorageError::Store("lock poisoned".into()))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: &DocumentFilter,
        options: &FindOptions,
    ) -> Result<Vec<StoredDocument>> {
        let collections = self.read()?;
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<&StoredDocument> =
            documents.iter().filter(|doc| filter.matches(doc)).collect();

        // Stable sort keeps insertion order for ties.
        matches.sort_by(|a, b| compare_documents(a, b, &options.sort));

        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        Ok(matches.into_iter().skip(skip).take(limit).cloned().collect())
    }

    async fn find_one(&self, collection: &str, id: DocumentId) -> Result<Option<StoredDocument>> {
        let collections = self.read()?;

        Ok(collections
            .get(collection)
            .and_then(|documents| documents.iter().find(|doc| doc.id == id))
            .cloned())
    }

    async fn count(&self, collection: &str, filter: &DocumentFilter) -> Result<u64> {
        let collections = self.read()?;

        let count = collections
            .get(collection)
            .map(|documents| documents.iter().filter(|doc| filter.matches(doc)).count())
            .unwrap_or(0);

        Ok(count as u64)
    }

    async fn insert(&self, collection: &str, body: Document) -> Result<DocumentId> {
        let mut collections = self.write()?;
        let documents = collections.entry(collection.to_string()).or_default();

        let id = DocumentId::generate();
        documents.push(StoredDocument { id, body });

        Ok(id)
    }

    async fn update(&self, collection: &str, id: DocumentId, changes: Document) -> Result<u64> {
        let mut collections = self.write()?;

        let Some(document) = collections
            .get_mut(collection)
            .and_then(|documents| documents.iter_mut().find(|doc| doc.id == id))
        else {
            return Ok(0);
        };

        for (key, value) in changes {
            document.body.insert(key, value);
        }

        Ok(1)
    }

    async fn delete(&self, collection: &str, id: DocumentId) -> Result<u64> {
        let mut collections = self.write()?;

        let Some(documents) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let before = documents.len();
        documents.retain(|doc| doc.id != id);

        Ok((before - documents.len()) as u64)
    }
}

fn compare_documents(
    a: &StoredDocument,
    b: &StoredDocument,
    sort: &[(SortKey, SortDirection)],
) -> Ordering {
    for (key, direction) in sort {
        let ordering = match key {
            SortKey::Id => a.id.cmp(&b.id),
            SortKey::Field(field) => compare_values(a.body.get(field), b.body.get(field)),
        };

        let ordering = match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Orders JSON values by the `jsonb` type ranking and sizing rules, with a
/// missing field below everything. Numbers compare numerically, so `5` and
/// `5.0` are equal. Object entries are walked in key order of the map, which
/// is not the order Postgres stores them in.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let by_type = type_rank(a).cmp(&type_rank(b));
            if by_type != Ordering::Equal {
                return by_type;
            }

            match (a, b) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
                (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
                (Value::Array(a), Value::Array(b)) => a.len().cmp(&b.len()).then_with(|| {
                    a.iter()
                        .zip(b)
                        .map(|(a, b)| compare_values(Some(a), Some(b)))
                        .find(|ordering| ordering.is_ne())
                        .unwrap_or(Ordering::Equal)
                }),
                (Value::Object(a), Value::Object(b)) => a.len().cmp(&b.len()).then_with(|| {
                    a.iter()
                        .zip(b)
                        .map(|((ka, va), (kb, vb))| {
                            ka.cmp(kb).then_with(|| compare_values(Some(va), Some(vb)))
                        })
                        .find(|ordering| ordering.is_ne())
                        .unwrap_or(Ordering::Equal)
                }),
                _ => Ordering::Equal,
            }
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Ordering {
    match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
    }
}
