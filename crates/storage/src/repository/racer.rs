use serde_json::Value;
use validator::Validate;

use crate::dto::common::Page;
use crate::dto::racer::PageRequest;
use crate::error::{Result, StorageError};
use crate::models::{Racer, RacerField};
use crate::store::{
    Document, DocumentFilter, DocumentId, DocumentStore, FindOptions, SortDirection, SortKey,
    StoredDocument,
};

/// Collection holding racer documents.
pub const COLLECTION: &str = "racers";

/// Repository for racer documents.
///
/// Holds nothing but a reference to the injected store, so it can be built
/// per request and shared freely.
pub struct RacerRepository<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: DocumentStore + ?Sized> RacerRepository<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Documents matching `prototype`, ordered by `sort` (number ascending
    /// when empty). Keys outside the racer field set are dropped from the
    /// prototype before it reaches the store.
    pub async fn list(
        &self,
        prototype: &Document,
        sort: &[(RacerField, SortDirection)],
        skip: u64,
        limit: Option<u64>,
    ) -> Result<Vec<StoredDocument>> {
        if limit == Some(0) {
            return Err(StorageError::invalid_argument("limit must be positive"));
        }

        let filter = restrict_filter(prototype)?;
        let options = FindOptions {
            sort: sort_keys(sort),
            skip,
            limit,
        };

        self.store.find(COLLECTION, &filter, &options).await
    }

    /// One page of hydrated racers plus the total number of matches.
    ///
    /// The page and the count are two separate store calls and may see
    /// different snapshots if racers are written in between.
    pub async fn paginate(&self, request: &PageRequest) -> Result<Page<Racer>> {
        request.pagination.validate()?;

        let pagination = &request.pagination;
        let documents = self
            .list(
                &request.filter,
                &request.sort,
                pagination.offset(),
                Some(pagination.limit()),
            )
            .await?;

        let filter = restrict_filter(&request.filter)?;
        let total_count = self.store.count(COLLECTION, &filter).await?;

        let items = documents.iter().map(Racer::from_document).collect();

        Ok(Page::new(
            items,
            pagination.page,
            pagination.per_page,
            total_count,
        ))
    }

    /// Look up a racer by its external identifier.
    pub async fn find(&self, id: &str) -> Result<Option<Racer>> {
        let id = DocumentId::parse(id)?;

        let document = self.store.find_one(COLLECTION, id).await?;

        Ok(document.as_ref().map(Racer::from_document))
    }

    /// Insert a new racer and write the generated identifier back onto it.
    pub async fn save(&self, racer: &mut Racer) -> Result<()> {
        if let Some(id) = &racer.id {
            return Err(StorageError::invalid_state(format!(
                "racer {} is already persisted",
                id
            )));
        }

        let id = self.store.insert(COLLECTION, racer.to_document()).await?;
        tracing::debug!(%id, number = ?racer.number, "saved racer");

        racer.id = Some(id.to_string());

        Ok(())
    }

    /// Patch the named fields of a persisted racer and mirror them onto `racer`.
    ///
    /// Only racer fields other than `id` are accepted; anything else in
    /// `updates` is dropped.
    pub async fn update(&self, racer: &mut Racer, updates: &Document) -> Result<()> {
        let id = persisted_id(racer, "update")?;

        let mut changes = Document::new();
        for (key, value) in updates {
            match key.parse::<RacerField>() {
                Ok(field) if field != RacerField::Id => {
                    changes.insert(key.clone(), field.coerce(value)?);
                }
                _ => tracing::debug!(field = %key, "dropping non-updatable field"),
            }
        }

        if changes.is_empty() {
            return Ok(());
        }

        let matched = self.store.update(COLLECTION, id, changes.clone()).await?;
        if matched == 0 {
            tracing::warn!(%id, "update matched no racer");
        }

        racer.apply(&changes);

        Ok(())
    }

    /// Remove a persisted racer. Removing one that is already gone is not an error.
    pub async fn destroy(&self, racer: &Racer) -> Result<()> {
        let id = persisted_id(racer, "destroy")?;

        let deleted = self.store.delete(COLLECTION, id).await?;
        if deleted == 0 {
            tracing::debug!(%id, "racer already absent");
        }

        Ok(())
    }
}

fn persisted_id(racer: &Racer, operation: &str) -> Result<DocumentId> {
    let id = racer.id.as_deref().ok_or_else(|| {
        StorageError::invalid_state(format!("cannot {} a racer that was never saved", operation))
    })?;

    DocumentId::parse(id)
}

/// Keep only racer fields and normalise their values for equality matching.
fn restrict_filter(prototype: &Document) -> Result<DocumentFilter> {
    let mut filter = DocumentFilter::default();

    for (key, value) in prototype {
        let Ok(field) = key.parse::<RacerField>() else {
            tracing::debug!(field = %key, "dropping unknown filter field");
            continue;
        };

        match (field, value) {
            (RacerField::Id, Value::Null) => {}
            (RacerField::Id, Value::String(id)) => filter.id = Some(DocumentId::parse(id)?),
            (RacerField::Id, other) => {
                return Err(StorageError::invalid_argument(format!(
                    "id filter must be a string, got {}",
                    other
                )));
            }
            (field, value) => {
                filter.equals.insert(key.clone(), field.coerce(value)?);
            }
        }
    }

    Ok(filter)
}

fn sort_keys(sort: &[(RacerField, SortDirection)]) -> Vec<(SortKey, SortDirection)> {
    if sort.is_empty() {
        return vec![(
            SortKey::Field(RacerField::Number.as_str().to_string()),
            SortDirection::Ascending,
        )];
    }

    sort.iter()
        .map(|(field, direction)| {
            let key = match field {
                RacerField::Id => SortKey::Id,
                field => SortKey::Field(field.as_str().to_string()),
            };
            (key, *direction)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::common::PaginationParams;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn document(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn racer(number: i64) -> Racer {
        Racer {
            id: None,
            number: Some(number),
            first_name: Some(format!("First{}", number)),
            last_name: Some(format!("Last{}", number)),
            gender: Some(if number % 2 == 0 { "F" } else { "M" }.to_string()),
            group: Some("Open".to_string()),
            secs: Some(1800 + number),
        }
    }

    async fn seed(repo: &RacerRepository<'_, MemoryStore>, numbers: impl IntoIterator<Item = i64>) {
        for number in numbers {
            repo.save(&mut racer(number)).await.unwrap();
        }
    }

    fn numbers(racers: &[Racer]) -> Vec<i64> {
        racers.iter().filter_map(|r| r.number).collect()
    }

    #[tokio::test]
    async fn test_save_then_find_returns_equal_record() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);

        let mut saved = racer(12);
        repo.save(&mut saved).await.unwrap();

        let id = saved.id.clone().expect("save assigns an id");
        let found = repo.find(&id).await.unwrap().unwrap();

        assert_eq!(found, saved);
    }

    #[tokio::test]
    async fn test_save_stores_absent_fields_as_null() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);

        let mut saved = Racer {
            number: Some(1),
            ..Racer::default()
        };
        repo.save(&mut saved).await.unwrap();

        let id = DocumentId::parse(saved.id.as_deref().unwrap()).unwrap();
        let stored = store.find_one(COLLECTION, id).await.unwrap().unwrap();

        assert_eq!(stored.body.len(), 6);
        assert_eq!(stored.body.get("secs"), Some(&Value::Null));
        assert_eq!(repo.find(&id.to_string()).await.unwrap().unwrap(), saved);
    }

    #[tokio::test]
    async fn test_save_rejects_persisted_record() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);

        let mut saved = racer(1);
        repo.save(&mut saved).await.unwrap();

        let result = repo.save(&mut saved).await;
        assert!(matches!(result, Err(StorageError::InvalidState(_))));
        assert_eq!(store.count(COLLECTION, &DocumentFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_missing_and_malformed_ids() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);

        let missing = repo.find(&DocumentId::generate().to_string()).await.unwrap();
        assert!(missing.is_none());

        let malformed = repo.find("not-an-id").await;
        assert!(matches!(malformed, Err(StorageError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_update_changes_only_named_fields() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);

        let mut saved = racer(5);
        repo.save(&mut saved).await.unwrap();
        let before = saved.clone();

        repo.update(&mut saved, &document(json!({ "secs": "1750", "group": "M40" })))
            .await
            .unwrap();

        assert_eq!(saved.secs, Some(1750));
        assert_eq!(saved.group.as_deref(), Some("M40"));

        let found = repo.find(saved.id.as_deref().unwrap()).await.unwrap().unwrap();
        assert_eq!(found, saved);
        assert_eq!(found.number, before.number);
        assert_eq!(found.first_name, before.first_name);
        assert_eq!(found.last_name, before.last_name);
        assert_eq!(found.gender, before.gender);
    }

    #[tokio::test]
    async fn test_update_drops_unknown_fields() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);

        let mut saved = racer(5);
        repo.save(&mut saved).await.unwrap();
        let id = DocumentId::parse(saved.id.as_deref().unwrap()).unwrap();
        let before = store.find_one(COLLECTION, id).await.unwrap().unwrap();

        let other_id = DocumentId::generate().to_string();
        repo.update(
            &mut saved,
            &document(json!({ "city": "Paris", "population": 2, "id": other_id })),
        )
        .await
        .unwrap();

        let after = store.find_one(COLLECTION, id).await.unwrap().unwrap();
        assert_eq!(after, before);
        assert_eq!(saved.id.as_deref(), Some(id.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_update_requires_persisted_record() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);

        let result = repo
            .update(&mut racer(1), &document(json!({ "secs": 1 })))
            .await;

        assert!(matches!(result, Err(StorageError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_update_rejects_uncoercible_values() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);

        let mut saved = racer(1);
        repo.save(&mut saved).await.unwrap();

        let result = repo
            .update(&mut saved, &document(json!({ "number": "first" })))
            .await;

        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
        assert_eq!(saved.number, Some(1));
    }

    #[tokio::test]
    async fn test_destroy_then_find_is_absent() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);

        let mut saved = racer(3);
        repo.save(&mut saved).await.unwrap();
        repo.destroy(&saved).await.unwrap();

        assert!(repo.find(saved.id.as_deref().unwrap()).await.unwrap().is_none());

        // Second destroy is a no-op.
        repo.destroy(&saved).await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_nonexistent_identifier() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);

        let ghost = Racer {
            id: Some(DocumentId::generate().to_string()),
            ..Racer::default()
        };
        repo.destroy(&ghost).await.unwrap();

        let unsaved = repo.destroy(&Racer::default()).await;
        assert!(matches!(unsaved, Err(StorageError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_list_filter_ignores_extraneous_keys() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);
        seed(&repo, [4, 5, 6, 5]).await;

        let found = repo
            .list(
                &document(json!({ "number": 5, "city": "Reno", "$where": "1" })),
                &[],
                0,
                None,
            )
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
        assert!(
            found
                .iter()
                .all(|doc| doc.body.get("number") == Some(&json!(5)))
        );
    }

    #[tokio::test]
    async fn test_list_coerces_filter_values() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);
        seed(&repo, [1, 2, 3]).await;

        let found = repo
            .list(&document(json!({ "number": "2" })), &[], 0, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let malformed = repo
            .list(&document(json!({ "secs": { "$gt": 1 } })), &[], 0, None)
            .await;
        assert!(matches!(malformed, Err(StorageError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_filter_matches_numbers_stored_as_floats() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);
        store
            .insert(COLLECTION, document(json!({ "number": 5.0, "last_name": "Float" })))
            .await
            .unwrap();
        seed(&repo, [4, 6]).await;

        let found = repo
            .list(&document(json!({ "number": 5 })), &[], 0, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(Racer::from_document(&found[0]).number, Some(5));

        let request = PageRequest::new(PaginationParams::new(1, 10))
            .with_filter(document(json!({ "number": "5" })));
        let page = repo.paginate(&request).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(numbers(&page.items), vec![5]);
    }

    #[tokio::test]
    async fn test_list_by_id_and_sort_order() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);
        seed(&repo, [2, 3, 1]).await;

        let all = repo.list(&Document::new(), &[], 0, None).await.unwrap();
        let hydrated: Vec<Racer> = all.iter().map(Racer::from_document).collect();
        assert_eq!(numbers(&hydrated), vec![1, 2, 3]);

        let descending = repo
            .list(
                &Document::new(),
                &[(RacerField::Secs, SortDirection::Descending)],
                1,
                Some(5),
            )
            .await
            .unwrap();
        let hydrated: Vec<Racer> = descending.iter().map(Racer::from_document).collect();
        assert_eq!(numbers(&hydrated), vec![2, 1]);

        let target = hydrated[0].id.clone().unwrap();
        let by_id = repo
            .list(&document(json!({ "id": target })), &[], 0, None)
            .await
            .unwrap();
        assert_eq!(by_id.len(), 1);

        let zero_limit = repo.list(&Document::new(), &[], 0, Some(0)).await;
        assert!(matches!(zero_limit, Err(StorageError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_paginate_second_page() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);
        // Insert out of order so the result depends on the sort.
        seed(&repo, (1..=25).rev()).await;

        let page = repo
            .paginate(&PageRequest::new(PaginationParams::new(2, 10)))
            .await
            .unwrap();

        assert_eq!(numbers(&page.items), (11..=20).collect::<Vec<_>>());
        assert_eq!(page.page, 2);
        assert_eq!(page.per_page, 10);
        assert_eq!(page.total_count, 25);
        assert_eq!(page.total_pages, 3);
    }

    #[tokio::test]
    async fn test_paginate_empty_collection() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);

        let page = repo.paginate(&PageRequest::default()).await.unwrap();

        assert!(page.items.is_empty());
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, 30);
        assert_eq!(page.total_count, 0);
    }

    #[tokio::test]
    async fn test_paginate_beyond_last_page_keeps_total() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);
        seed(&repo, 1..=5).await;

        let page = repo
            .paginate(&PageRequest::new(PaginationParams::new(4, 2)))
            .await
            .unwrap();

        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 5);
    }

    #[tokio::test]
    async fn test_paginate_with_filter_counts_all_matches() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);
        seed(&repo, 1..=9).await;

        let request = PageRequest::new(PaginationParams::new(1, 2))
            .with_filter(document(json!({ "gender": "M", "unknown": true })))
            .with_sort(vec![(RacerField::Number, SortDirection::Descending)]);

        let page = repo.paginate(&request).await.unwrap();

        assert_eq!(numbers(&page.items), vec![9, 7]);
        assert_eq!(page.total_count, 5);
    }

    #[tokio::test]
    async fn test_paginate_rejects_invalid_params() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);

        let zero_size = repo
            .paginate(&PageRequest::new(PaginationParams::new(1, 0)))
            .await;
        assert!(matches!(zero_size, Err(StorageError::InvalidArgument(_))));

        let zero_page = repo
            .paginate(&PageRequest::new(PaginationParams::new(0, 10)))
            .await;
        assert!(matches!(zero_page, Err(StorageError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_resave_document_under_new_identifier() {
        let store = MemoryStore::new();
        let repo = RacerRepository::new(&store);

        let mut original = racer(8);
        repo.save(&mut original).await.unwrap();

        let documents = repo.list(&Document::new(), &[], 0, None).await.unwrap();
        let mut copy = Racer::from_document(&documents[0]);
        copy.id = None;
        repo.save(&mut copy).await.unwrap();

        assert_ne!(copy.id, original.id);
        assert_eq!(
            Racer {
                id: None,
                ..copy.clone()
            },
            Racer {
                id: None,
                ..original.clone()
            }
        );
    }

    #[tokio::test]
    async fn test_repository_over_trait_object() {
        let store = MemoryStore::new();
        let dyn_store: &dyn DocumentStore = &store;
        let repo = RacerRepository::new(dyn_store);

        let mut saved = racer(1);
        repo.save(&mut saved).await.unwrap();

        assert!(repo.find(saved.id.as_deref().unwrap()).await.unwrap().is_some());
    }
}
