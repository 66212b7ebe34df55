use async_trait::async_trait;
use thiserror::Error;

use crate::{DecodeError, Document, DocumentPath, Fields, Query, SharedObserver, Subscription};

pub type Result<T> = std::result::Result<T, BackendError>;

pub type QueryObserver = SharedObserver<Vec<Document>>;
pub type DocumentObserver = SharedObserver<Option<Document>>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// A document that was required to exist doesn't
    #[error("{0} doesn't exist")]
    NotFound(DocumentPath),
    /// The backend refused the operation for the current identity
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// The identity token is missing or expired
    #[error("The session has expired, sign in again")]
    Unauthenticated,
    /// The backend could not be reached
    #[error("Network error: {0}")]
    Network(String),
    /// A document didn't have the expected shape
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Anything else the backend reported
    #[error("Internal backend error: {0}")]
    Internal(String),
}

/// A managed document store with realtime subscriptions.
///
/// Reads and writes are async. Subscriptions deliver snapshots to an observer until the
/// returned [Subscription] is released; failures are reported through the observer and
/// never returned from the subscribe call itself.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Reads one document, returning `None` if it doesn't exist.
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>>;

    /// Writes a whole document. With `merge`, only the given fields are replaced.
    async fn set(&self, path: &DocumentPath, fields: Fields, merge: bool) -> Result<()>;

    /// Updates fields of an existing document.
    async fn update(&self, path: &DocumentPath, fields: Fields) -> Result<()>;

    /// Creates a document with a generated id, returning the id.
    async fn add(&self, collection: &str, fields: Fields) -> Result<String>;

    /// Runs a one-shot query.
    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Watches the result set of a query.
    fn subscribe_query(&self, query: Query, observer: QueryObserver) -> Subscription;

    /// Watches a single document.
    fn subscribe_document(&self, path: DocumentPath, observer: DocumentObserver) -> Subscription;
}
