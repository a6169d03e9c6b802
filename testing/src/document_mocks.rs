//! In-memory document store for fast, deterministic testing.
//!
//! Follows the reference filter semantics in
//! [`studio_core::document_store::Filter::matches`] and mirrors what the
//! `PostgreSQL` store does for ordering, unique indexes and conditional updates.
//! On top of that it can inject latency and failures to exercise timeout,
//! retry and compensation paths.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use studio_core::document_store::{
    Collection, Direction, Document, DocumentId, DocumentStore, DocumentStoreError, Filter, Patch,
    Query, StoreFuture, compare_values,
};

/// Store operation, used to target injected faults and count calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// [`DocumentStore::get`]
    Get,
    /// [`DocumentStore::list`]
    List,
    /// [`DocumentStore::count`]
    Count,
    /// [`DocumentStore::create`]
    Create,
    /// [`DocumentStore::update`]
    Update,
    /// [`DocumentStore::delete`]
    Delete,
    /// [`DocumentStore::ping`]
    Ping,
}

#[derive(Debug)]
struct Fault {
    op: StoreOp,
    collection: Option<Collection>,
    skip: usize,
    error: DocumentStoreError,
}

type Rows = BTreeMap<DocumentId, Map<String, Value>>;

/// In-memory document store.
///
/// Clones share the same data.
///
/// # Example
///
/// ```
/// use studio_testing::mocks::{InMemoryDocumentStore, StoreOp};
/// use studio_core::document_store::{Collection, DocumentStore, DocumentStoreError, DocumentId};
///
/// # async fn example() {
/// let store = InMemoryDocumentStore::new();
/// store.fail_next(StoreOp::Get, DocumentStoreError::Unavailable("down".into()));
/// let result = store.get(Collection::new("lessons"), DocumentId::new("l1")).await;
/// assert!(result.is_err());
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: Arc<RwLock<HashMap<Collection, Rows>>>,
    unique_indexes: Arc<RwLock<HashMap<Collection, Vec<Vec<String>>>>>,
    faults: Arc<Mutex<Vec<Fault>>>,
    calls: Arc<Mutex<HashMap<StoreOp, usize>>>,
    latency: Arc<RwLock<Duration>>,
}

impl InMemoryDocumentStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a unique index over `fields` in `collection`.
    ///
    /// Like a partial index, it only applies to documents where every field is
    /// present and not `null`.
    #[must_use]
    pub fn with_unique_index(self, collection: Collection, fields: &[&str]) -> Self {
        self.unique_indexes
            .write()
            .unwrap()
            .entry(collection)
            .or_default()
            .push(fields.iter().map(|f| (*f).to_string()).collect());
        self
    }

    /// Delay every call by `latency` before it touches the data.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write().unwrap() = latency;
    }

    /// Fail the next call of `op` (in any collection) with `error`.
    pub fn fail_next(&self, op: StoreOp, error: DocumentStoreError) {
        self.push_fault(op, None, 0, error);
    }

    /// Fail the next call of `op` in `collection` with `error`.
    pub fn fail_next_in(&self, op: StoreOp, collection: Collection, error: DocumentStoreError) {
        self.push_fault(op, Some(collection), 0, error);
    }

    /// Let `skip` calls of `op` in `collection` through, then fail the next one.
    pub fn fail_nth_in(
        &self,
        op: StoreOp,
        collection: Collection,
        skip: usize,
        error: DocumentStoreError,
    ) {
        self.push_fault(op, Some(collection), skip, error);
    }

    fn push_fault(
        &self,
        op: StoreOp,
        collection: Option<Collection>,
        skip: usize,
        error: DocumentStoreError,
    ) {
        self.faults.lock().unwrap().push(Fault {
            op,
            collection,
            skip,
            error,
        });
    }

    /// Number of calls made to `op` so far, including failed ones.
    #[must_use]
    pub fn call_count(&self, op: StoreOp) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    /// All documents of a collection, ordered by id.
    #[must_use]
    pub fn documents(&self, collection: Collection) -> Vec<Document> {
        self.collections
            .read()
            .unwrap()
            .get(&collection)
            .map(|rows| {
                rows.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of documents in a collection.
    #[must_use]
    pub fn len(&self, collection: Collection) -> usize {
        self.collections
            .read()
            .unwrap()
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }

    /// Remove every document (for test isolation).
    pub fn clear(&self) {
        self.collections.write().unwrap().clear();
    }

    /// Count the call, wait out the latency, then consume a matching fault.
    async fn enter(&self, op: StoreOp, collection: Option<Collection>) -> Result<(), DocumentStoreError> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;

        let latency = *self.latency.read().unwrap();
        if latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(latency).await;
        }

        let mut faults = self.faults.lock().unwrap();
        let position = faults
            .iter()
            .position(|f| f.op == op && (f.collection.is_none() || f.collection == collection));
        match position {
            Some(index) if faults[index].skip > 0 => {
                faults[index].skip -= 1;
                Ok(())
            }
            Some(index) => Err(faults.remove(index).error),
            None => Ok(()),
        }
    }

    fn check_unique(
        &self,
        collection: Collection,
        rows: &Rows,
        id: &DocumentId,
        data: &Map<String, Value>,
    ) -> Result<(), DocumentStoreError> {
        let indexes = self.unique_indexes.read().unwrap();
        let Some(indexes) = indexes.get(&collection) else {
            return Ok(());
        };

        for fields in indexes {
            let Some(key) = index_key(fields, data) else {
                continue;
            };
            let clash = rows
                .iter()
                .any(|(other_id, other)| other_id != id && index_key(fields, other).as_ref() == Some(&key));
            if clash {
                return Err(DocumentStoreError::Conflict {
                    collection,
                    reason: format!("unique index on ({}) violated", fields.join(", ")),
                });
            }
        }
        Ok(())
    }
}

fn index_key(fields: &[String], data: &Map<String, Value>) -> Option<Vec<Value>> {
    fields
        .iter()
        .map(|f| data.get(f).filter(|v| !v.is_null()).cloned())
        .collect()
}

/// Ascending order with absent values last, like SQL `NULLS LAST`.
fn order_documents(docs: &mut [Document], field: &str, direction: Direction) {
    docs.sort_by(|a, b| {
        let left = a.field(field).filter(|v| !v.is_null());
        let right = b.field(field).filter(|v| !v.is_null());
        let ordering = match (left, right) {
            (Some(l), Some(r)) => compare_values(l, r).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = match direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    });
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, collection: Collection, id: DocumentId) -> StoreFuture<'_, Option<Document>> {
        Box::pin(async move {
            self.enter(StoreOp::Get, Some(collection)).await?;
            let collections = self.collections.read().unwrap();
            Ok(collections
                .get(&collection)
                .and_then(|rows| rows.get(&id))
                .map(|data| Document::new(id, data.clone())))
        })
    }

    fn list(&self, collection: Collection, query: Query) -> StoreFuture<'_, Vec<Document>> {
        Box::pin(async move {
            self.enter(StoreOp::List, Some(collection)).await?;
            let mut docs: Vec<Document> = {
                let collections = self.collections.read().unwrap();
                collections
                    .get(&collection)
                    .map(|rows| {
                        rows.iter()
                            .filter(|(_, data)| query.matches(data))
                            .map(|(id, data)| Document::new(id.clone(), data.clone()))
                            .collect()
                    })
                    .unwrap_or_default()
            };

            if let Some((field, direction)) = &query.order_by {
                order_documents(&mut docs, field, *direction);
            }

            Ok(docs
                .into_iter()
                .skip(query.offset)
                .take(query.limit.unwrap_or(usize::MAX))
                .collect())
        })
    }

    fn count(&self, collection: Collection, filters: Vec<Filter>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.enter(StoreOp::Count, Some(collection)).await?;
            let collections = self.collections.read().unwrap();
            let count = collections.get(&collection).map_or(0, |rows| {
                rows.values()
                    .filter(|data| filters.iter().all(|f| f.matches(data)))
                    .count()
            });
            Ok(count as u64)
        })
    }

    fn create(&self, collection: Collection, document: Document) -> StoreFuture<'_, Document> {
        Box::pin(async move {
            self.enter(StoreOp::Create, Some(collection)).await?;
            let mut collections = self.collections.write().unwrap();
            let rows = collections.entry(collection).or_default();

            if rows.contains_key(&document.id) {
                return Err(DocumentStoreError::Conflict {
                    collection,
                    reason: format!("document {} already exists", document.id),
                });
            }
            self.check_unique(collection, rows, &document.id, &document.data)?;

            rows.insert(document.id.clone(), document.data.clone());
            Ok(document)
        })
    }

    fn update(
        &self,
        collection: Collection,
        id: DocumentId,
        patch: Patch,
        precondition: Vec<Filter>,
    ) -> StoreFuture<'_, Document> {
        Box::pin(async move {
            self.enter(StoreOp::Update, Some(collection)).await?;
            let mut collections = self.collections.write().unwrap();
            let rows = collections.entry(collection).or_default();

            let Some(current) = rows.get(&id) else {
                return Err(DocumentStoreError::NotFound { collection, id });
            };
            if !precondition.iter().all(|f| f.matches(current)) {
                return Err(DocumentStoreError::PreconditionFailed { collection, id });
            }

            let mut updated = current.clone();
            updated.extend(patch);
            self.check_unique(collection, rows, &id, &updated)?;

            rows.insert(id.clone(), updated.clone());
            Ok(Document::new(id, updated))
        })
    }

    fn delete(&self, collection: Collection, id: DocumentId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.enter(StoreOp::Delete, Some(collection)).await?;
            let mut collections = self.collections.write().unwrap();
            match collections.get_mut(&collection).and_then(|rows| rows.remove(&id)) {
                Some(_) => Ok(()),
                None => Err(DocumentStoreError::NotFound { collection, id }),
            }
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.enter(StoreOp::Ping, None).await })
    }
}
