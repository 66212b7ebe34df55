use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{BackendError, Result};

/// Object storage for uploaded files.
#[async_trait]
pub trait FileStorage: Send + Sync + 'static {
    /// Stores an object, replacing any existing object at the path.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Returns a url the object can be downloaded from.
    async fn download_url(&self, path: &str) -> Result<String>;
}

/// Where a user's profile picture is stored.
pub fn avatar_path(uid: &str) -> String {
    format!("users/{}/avatar.jpg", uid)
}

/// Where a yacht's main picture is stored.
pub fn yacht_image_path(yacht_id: &str) -> String {
    format!("yachts/{}/main.jpg", yacht_id)
}

/// An in-process object store.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a stored object and its content type.
    pub fn object(&self, path: &str) -> Option<(Vec<u8>, String)> {
        self.objects.lock().get(path).cloned()
    }
}

#[async_trait]
impl FileStorage for MemoryStorage {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.objects
            .lock()
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn download_url(&self, path: &str) -> Result<String> {
        if !self.objects.lock().contains_key(path) {
            return Err(BackendError::Internal(format!("No object at {}", path)));
        }

        Ok(format!("memory://{}", path))
    }
}
