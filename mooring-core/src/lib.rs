use std::sync::Arc;

use dashmap::DashMap;

mod backend;
mod config;
mod decode;
mod document;
mod observer;
mod query;
mod storage;
mod util;

pub mod implementors;
pub use backend::*;
pub use config::*;
pub use decode::*;
pub use document::*;
pub use observer::*;
pub use query::*;
pub use storage::*;
pub use util::*;

// Reduces verbosity
type Store<Id, T> = Arc<DashMap<Id, Arc<T>>>;

/// Builds the backend adapter selected by the config.
///
/// The Firestore adapter spawns its polling tasks on the given runtime handle.
pub fn connect(config: &Config, handle: tokio::runtime::Handle) -> Arc<dyn Backend> {
    match config.kind {
        BackendKind::Memory => Arc::new(implementors::MemoryBackend::new(Arc::new(SystemClock))),
        BackendKind::Firestore => {
            Arc::new(implementors::FirestoreBackend::new(config.clone(), handle))
        }
    }
}
