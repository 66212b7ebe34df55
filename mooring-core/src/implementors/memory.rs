use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;

use crate::{
    auto_id, resolve_server_timestamps, Backend, BackendError, Document, DocumentObserver,
    DocumentPath, Fields, Id, Query, QueryObserver, Result, SharedClock, Store, Subscription,
};

type Collection = BTreeMap<String, Fields>;
pub type WatchId = Id<Watch>;

/// A live listener registered with the [MemoryBackend].
pub enum Watch {
    Query {
        query: Query,
        observer: QueryObserver,
        last: Mutex<Option<Vec<Document>>>,
    },
    Document {
        path: DocumentPath,
        observer: DocumentObserver,
        last: Mutex<Option<Option<Document>>>,
    },
}

impl Watch {
    fn collection(&self) -> &str {
        match self {
            Watch::Query { query, .. } => &query.collection,
            Watch::Document { path, .. } => &path.collection,
        }
    }
}

/// An in-process document store.
///
/// Snapshots are delivered synchronously: once when a subscription opens, and again
/// after every write that changes what the subscription sees.
pub struct MemoryBackend {
    clock: SharedClock,
    collections: Mutex<HashMap<String, Collection>>,
    watches: Store<WatchId, Watch>,
    opened: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            collections: Default::default(),
            watches: Default::default(),
            opened: AtomicUsize::new(0),
        }
    }

    /// How many subscriptions were ever opened on a collection.
    pub fn subscriptions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// How many subscriptions are currently live.
    pub fn live_subscriptions(&self) -> usize {
        self.watches.len()
    }

    /// Fails every live subscription with the given error. Failed subscriptions stop
    /// receiving snapshots, like the managed store's listeners do.
    pub fn fail_subscriptions(&self, error: BackendError) {
        let failed: Vec<_> = self.watches.iter().map(|w| (*w.key(), w.value().clone())).collect();

        for (id, _) in &failed {
            self.watches.remove(id);
        }

        for (_, watch) in failed {
            match &*watch {
                Watch::Query { observer, .. } => observer.on_error(&error),
                Watch::Document { observer, .. } => observer.on_error(&error),
            }
        }
    }

    fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .lock()
            .get(collection)
            .map(|c| {
                c.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn document(&self, path: &DocumentPath) -> Option<Document> {
        self.collections
            .lock()
            .get(&path.collection)
            .and_then(|c| c.get(&path.id))
            .map(|fields| Document::new(path.id.clone(), fields.clone()))
    }

    /// Delivers a fresh snapshot to a watch if what it sees changed.
    ///
    /// The watch's lock is held from reading the collection until the observer
    /// returns, so concurrent writers deliver snapshots in the order they were read.
    fn deliver(&self, watch: &Watch) {
        match watch {
            Watch::Query {
                query,
                observer,
                last,
            } => {
                let mut last = last.lock();
                let snapshot = query.apply(&self.documents(&query.collection));
                if last.as_ref() == Some(&snapshot) {
                    return;
                }
                *last = Some(snapshot.clone());
                observer.on_next(&snapshot)
            }
            Watch::Document {
                path,
                observer,
                last,
            } => {
                let mut last = last.lock();
                let snapshot = self.document(path);
                if last.as_ref() == Some(&snapshot) {
                    return;
                }
                *last = Some(snapshot.clone());
                observer.on_next(&snapshot)
            }
        }
    }

    fn notify(&self, collection: &str) {
        let watches: Vec<_> = self
            .watches
            .iter()
            .filter(|w| w.collection() == collection)
            .map(|w| w.value().clone())
            .collect();

        for watch in watches {
            self.deliver(&watch);
        }
    }

    fn watch(&self, watch: Watch) -> Subscription {
        let id = WatchId::new();
        let watch = Arc::new(watch);

        debug!("Opening watch {} on {}", id, watch.collection());

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.watches.insert(id, watch.clone());
        self.deliver(&watch);

        let watches = self.watches.clone();
        Subscription::new(move || {
            watches.remove(&id);
        })
    }

    fn write<F>(&self, collection: &str, write: F) -> Result<()>
    where
        F: FnOnce(&mut Collection) -> Result<()>,
    {
        {
            let mut collections = self.collections.lock();
            let documents = collections.entry(collection.to_string()).or_default();
            write(documents)?;
        }

        self.notify(collection);
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        Ok(self.document(path))
    }

    async fn set(&self, path: &DocumentPath, fields: Fields, merge: bool) -> Result<()> {
        let fields = resolve_server_timestamps(fields, self.clock.now());

        self.write(&path.collection, |documents| {
            match (merge, documents.get_mut(&path.id)) {
                (true, Some(existing)) => existing.extend(fields),
                _ => {
                    documents.insert(path.id.clone(), fields);
                }
            }
            Ok(())
        })
    }

    async fn update(&self, path: &DocumentPath, fields: Fields) -> Result<()> {
        let fields = resolve_server_timestamps(fields, self.clock.now());

        self.write(&path.collection, |documents| {
            let existing = documents
                .get_mut(&path.id)
                .ok_or_else(|| BackendError::NotFound(path.clone()))?;

            existing.extend(fields);
            Ok(())
        })
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String> {
        let fields = resolve_server_timestamps(fields, self.clock.now());
        let id = auto_id();

        self.write(collection, |documents| {
            documents.insert(id.clone(), fields);
            Ok(())
        })?;

        Ok(id)
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        Ok(query.apply(&self.documents(&query.collection)))
    }

    fn subscribe_query(&self, query: Query, observer: QueryObserver) -> Subscription {
        self.watch(Watch::Query {
            query,
            observer,
            last: Default::default(),
        })
    }

    fn subscribe_document(&self, path: DocumentPath, observer: DocumentObserver) -> Subscription {
        self.watch(Watch::Document {
            path,
            observer,
            last: Default::default(),
        })
    }
}
