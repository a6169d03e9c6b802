//! Document store trait and related types.
//!
//! This module defines the one external collaborator the booking engine depends on:
//! a managed document store offering per-document create/read/update/delete and
//! simple filtered listing, but **no** multi-document transactions.
//!
//! # Design
//!
//! The trait is deliberately minimal:
//!
//! - Read a document by id, list documents matching a [`Query`], count matches
//! - Create a document (fails on duplicate id or violated unique index)
//! - Update a document with a *precondition*: the patch is applied only if every
//!   precondition filter still matches. This compare-and-set write is how callers
//!   emulate optimistic locking ("claim only if still unclaimed").
//! - Delete a document
//!
//! # Implementations
//!
//! - `PostgresDocumentStore` (in `studio-postgres`): Production implementation
//! - `InMemoryDocumentStore` (in `studio-testing`): Fast, deterministic testing
//!
//! # Timestamps
//!
//! Range filters and ordering compare stored values textually. Timestamps are
//! therefore always written in the fixed-width form produced by
//! [`timestamp::canonical`], which sorts chronologically.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// A JSON merge patch applied by [`DocumentStore::update`].
///
/// Keys present in the patch replace the stored value; a `null` value clears it.
pub type Patch = Map<String, Value>;

/// Boxed future returned by every [`DocumentStore`] operation.
pub type StoreFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, DocumentStoreError>> + Send + 'a>>;

/// Name of a logical collection (table) in the document store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Collection(&'static str);

impl Collection {
    /// Create a collection handle from its static name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The collection name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Identifier of a document, unique within its collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a document id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document: an id plus a flat JSON object.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    /// Document id
    pub id: DocumentId,
    /// Document body
    pub data: Map<String, Value>,
}

impl Document {
    /// Create a document from raw JSON data.
    #[must_use]
    pub const fn new(id: DocumentId, data: Map<String, Value>) -> Self {
        Self { id, data }
    }

    /// Serialize a model into a document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Serialization`] if the model does not
    /// serialize into a JSON object.
    pub fn encode<T: Serialize>(id: DocumentId, model: &T) -> Result<Self, DocumentStoreError> {
        match serde_json::to_value(model) {
            Ok(Value::Object(data)) => Ok(Self { id, data }),
            Ok(other) => Err(DocumentStoreError::Serialization(format!(
                "document {id} must serialize to an object, got {other}"
            ))),
            Err(e) => Err(DocumentStoreError::Serialization(e.to_string())),
        }
    }

    /// Deserialize the document body into a model.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Serialization`] if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DocumentStoreError> {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|e| {
            DocumentStoreError::Serialization(format!("document {}: {e}", self.id))
        })
    }

    /// Read a single field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// Typed value used on the right-hand side of a filter.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// String value
    Text(String),
    /// Integer value
    Integer(i64),
    /// Boolean value
    Bool(bool),
    /// Timestamp, compared in canonical textual form
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// The JSON representation this value is stored as.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::from(*i),
            Self::Bool(b) => Value::Bool(*b),
            Self::Timestamp(t) => Value::String(timestamp::canonical(t)),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// A single predicate over one document field.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// `field == value`
    Eq(String, FieldValue),
    /// `field` is one of `values`
    In(String, Vec<FieldValue>),
    /// `field` is absent or `null`
    IsNull(String),
    /// `field` is present and not `null`
    IsNotNull(String),
    /// `field > value`
    Gt(String, FieldValue),
    /// `field >= value`
    Gte(String, FieldValue),
    /// `field < value`
    Lt(String, FieldValue),
    /// `field <= value`
    Lte(String, FieldValue),
}

impl Filter {
    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    /// `field` is absent or `null`
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull(field.into())
    }

    /// The field this filter inspects.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Eq(f, _)
            | Self::In(f, _)
            | Self::IsNull(f)
            | Self::IsNotNull(f)
            | Self::Gt(f, _)
            | Self::Gte(f, _)
            | Self::Lt(f, _)
            | Self::Lte(f, _) => f,
        }
    }

    /// Evaluate the filter against a document body.
    ///
    /// This is the reference semantics every store implementation follows.
    #[must_use]
    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        let stored = data.get(self.field()).filter(|v| !v.is_null());
        match self {
            Self::IsNull(_) => stored.is_none(),
            Self::IsNotNull(_) => stored.is_some(),
            Self::Eq(_, value) => stored.is_some_and(|s| *s == value.to_json()),
            Self::In(_, values) => {
                stored.is_some_and(|s| values.iter().any(|v| *s == v.to_json()))
            }
            Self::Gt(_, value) => compare_to(stored, value) == Some(Ordering::Greater),
            Self::Gte(_, value) => matches!(
                compare_to(stored, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt(_, value) => compare_to(stored, value) == Some(Ordering::Less),
            Self::Lte(_, value) => matches!(
                compare_to(stored, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

fn compare_to(stored: Option<&Value>, value: &FieldValue) -> Option<Ordering> {
    compare_values(stored?, &value.to_json())
}

/// Compare two stored JSON values of the same kind.
///
/// Strings compare lexicographically, numbers numerically, booleans with
/// `false < true`. Values of different kinds are incomparable.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Sort direction for [`Query::order_asc`] / [`Query::order_desc`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first
    Ascending,
    /// Largest first
    Descending,
}

/// A listing query: all filters must match.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    /// Conjunction of filters
    pub filters: Vec<Filter>,
    /// Optional ordering field
    pub order_by: Option<(String, Direction)>,
    /// Maximum number of documents returned
    pub limit: Option<usize>,
    /// Number of matching documents skipped
    pub offset: usize,
}

impl Query {
    /// An unfiltered query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an arbitrary filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// `field == value`
    #[must_use]
    pub fn eq(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.filter(Filter::Eq(field.into(), value.into()))
    }

    /// `field` is one of `values`
    #[must_use]
    pub fn one_of<V: Into<FieldValue>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Filter::In(
            field.into(),
            values.into_iter().map(Into::into).collect(),
        ))
    }

    /// `field` is absent or `null`
    #[must_use]
    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.filter(Filter::IsNull(field.into()))
    }

    /// `field` is present
    #[must_use]
    pub fn is_not_null(self, field: impl Into<String>) -> Self {
        self.filter(Filter::IsNotNull(field.into()))
    }

    /// `field > value`
    #[must_use]
    pub fn gt(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.filter(Filter::Gt(field.into(), value.into()))
    }

    /// `field >= value`
    #[must_use]
    pub fn gte(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.filter(Filter::Gte(field.into(), value.into()))
    }

    /// `field < value`
    #[must_use]
    pub fn lt(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.filter(Filter::Lt(field.into(), value.into()))
    }

    /// `field <= value`
    #[must_use]
    pub fn lte(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.filter(Filter::Lte(field.into(), value.into()))
    }

    /// Order by `field`, smallest first.
    #[must_use]
    pub fn order_asc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some((field.into(), Direction::Ascending));
        self
    }

    /// Order by `field`, largest first.
    #[must_use]
    pub fn order_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some((field.into(), Direction::Descending));
        self
    }

    /// Return at most `limit` documents.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `offset` matching documents.
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Whether every filter matches the document body.
    #[must_use]
    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        self.filters.iter().all(|f| f.matches(data))
    }
}

/// Errors that can occur during document store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentStoreError {
    /// The referenced document does not exist.
    #[error("Document not found: {collection}/{id}")]
    NotFound {
        /// Collection searched
        collection: Collection,
        /// Missing id
        id: DocumentId,
    },

    /// A document with the same id or the same unique key already exists.
    #[error("Conflict in {collection}: {reason}")]
    Conflict {
        /// Collection written to
        collection: Collection,
        /// Which constraint was violated
        reason: String,
    },

    /// An update precondition no longer holds (a concurrent writer won).
    #[error("Precondition failed for {collection}/{id}")]
    PreconditionFailed {
        /// Collection written to
        collection: Collection,
        /// Document id
        id: DocumentId,
    },

    /// The store did not answer within the call deadline.
    #[error("Store call timed out after {0} ms")]
    Timeout(u64),

    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl DocumentStoreError {
    /// Whether retrying the same call may succeed.
    ///
    /// Only infrastructure failures are transient; constraint and precondition
    /// failures reproduce on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

/// Document store abstraction.
///
/// # Atomicity
///
/// Every operation is atomic for a single document. Nothing is atomic across
/// documents: callers that write several documents must order their writes and
/// compensate on partial failure.
///
/// # Dyn Compatibility
///
/// This trait returns [`StoreFuture`] instead of using `async fn` so it can be
/// shared as `Arc<dyn DocumentStore>`.
pub trait DocumentStore: Send + Sync {
    /// Load a document by id. Returns `None` if it does not exist.
    fn get(&self, collection: Collection, id: DocumentId) -> StoreFuture<'_, Option<Document>>;

    /// List documents matching the query.
    fn list(&self, collection: Collection, query: Query) -> StoreFuture<'_, Vec<Document>>;

    /// Count documents matching every filter.
    fn count(&self, collection: Collection, filters: Vec<Filter>) -> StoreFuture<'_, u64>;

    /// Insert a new document.
    ///
    /// # Errors
    ///
    /// - `Conflict`: the id exists or a unique index would be violated
    fn create(&self, collection: Collection, document: Document) -> StoreFuture<'_, Document>;

    /// Merge `patch` into a document if every `precondition` filter matches.
    ///
    /// Returns the document as stored after the update.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the document does not exist
    /// - `PreconditionFailed`: the document exists but a precondition does not hold
    fn update(
        &self,
        collection: Collection,
        id: DocumentId,
        patch: Patch,
        precondition: Vec<Filter>,
    ) -> StoreFuture<'_, Document>;

    /// Delete a document.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the document does not exist
    fn delete(&self, collection: Collection, id: DocumentId) -> StoreFuture<'_, ()>;

    /// Check the store is reachable.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Canonical timestamp encoding for stored documents.
///
/// Use with `#[serde(with = "studio_core::document_store::timestamp")]`.
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Fixed-width RFC 3339 form: `2025-01-01T09:30:00.000000Z`.
    #[must_use]
    pub fn canonical(time: &DateTime<Utc>) -> String {
        time.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
    }

    /// Parse any RFC 3339 timestamp into UTC.
    ///
    /// # Errors
    ///
    /// Returns the chrono parse error for malformed input.
    pub fn parse(input: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(input).map(|t| t.with_timezone(&Utc))
    }

    /// Serialize in canonical form.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&canonical(time))
    }

    /// Deserialize any RFC 3339 timestamp.
    ///
    /// # Errors
    ///
    /// Fails on malformed timestamps.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// Canonical encoding for optional timestamps.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize `Some` in canonical form and `None` as `null`.
        ///
        /// # Errors
        ///
        /// Propagates serializer errors.
        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            time: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match time {
                Some(t) => serializer.serialize_str(&super::canonical(t)),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional RFC 3339 timestamp.
        ///
        /// # Errors
        ///
        /// Fails on malformed timestamps.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| super::parse(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
