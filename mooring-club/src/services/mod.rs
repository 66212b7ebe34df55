mod bookings;
mod news;
mod notes;
mod users;
mod yachts;

use std::sync::Arc;

pub use bookings::*;
pub use news::*;
pub use notes::*;
pub use users::*;
pub use yachts::*;

use mooring_core::{
    decode_all, Backend, BackendError, DocumentPath, FileStorage, Query, Record, SharedClock,
    SharedObserver, Subscription,
};

use crate::{record_observer, records_observer, Result};

/// Shared handles passed to every service.
pub struct ClubContext<B: ?Sized> {
    pub backend: Arc<B>,
    pub storage: Arc<dyn FileStorage>,
    pub clock: SharedClock,
}

impl<B: Backend + ?Sized> ClubContext<B> {
    /// Reads a record by id, `None` if it doesn't exist.
    pub(crate) async fn find<R: Record>(&self, id: &str) -> Result<Option<R>> {
        let path = DocumentPath::new(R::COLLECTION, id);
        let document = self.backend.get(&path).await?;

        let record = document
            .as_ref()
            .map(R::decode)
            .transpose()
            .map_err(BackendError::from)?;

        Ok(record)
    }

    /// Runs a query and decodes the results, skipping malformed documents.
    pub(crate) async fn list<R: Record>(&self, query: &Query) -> Result<Vec<R>> {
        let documents = self.backend.query(query).await?;
        Ok(decode_all(&documents))
    }

    pub(crate) fn watch_record<R>(&self, id: &str, observer: SharedObserver<Option<R>>) -> Subscription
    where
        R: Record + Send + Sync + 'static,
    {
        self.backend.subscribe_document(
            DocumentPath::new(R::COLLECTION, id),
            record_observer(observer),
        )
    }

    pub(crate) fn watch_records<R, F>(
        &self,
        query: Query,
        observer: SharedObserver<Vec<R>>,
        sort: F,
    ) -> Subscription
    where
        R: Record + Send + Sync + 'static,
        F: Fn(&mut [R]) + Send + Sync + 'static,
    {
        self.backend
            .subscribe_query(query, records_observer(observer, sort))
    }
}

impl<B: ?Sized> Clone for ClubContext<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            storage: self.storage.clone(),
            clock: self.clock.clone(),
        }
    }
}
