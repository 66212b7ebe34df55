use std::time::Duration;

/// Which backend adapter to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// The in-process store
    #[default]
    Memory,
    /// The managed document store over its REST API
    Firestore,
}

impl BackendKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "firestore" => Some(Self::Firestore),
            _ => None,
        }
    }
}

/// The configuration of the backend connection
#[derive(Debug, Clone)]
pub struct Config {
    pub kind: BackendKind,
    /// The project the document store belongs to
    pub project_id: String,
    /// The database inside the project
    pub database_id: String,
    /// Public API key sent with every request
    pub api_key: Option<String>,
    /// Identity token of the signed-in user, if any
    pub id_token: Option<String>,
    /// Base url of the REST endpoint
    pub endpoint: String,
    /// How often subscriptions re-run their query
    pub poll_interval: Duration,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Config {
    /// The resource name prefix of every document in the database.
    pub fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database_id
        )
    }

    /// The url of the documents root.
    pub fn documents_url(&self) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.documents_root()
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            project_id: String::new(),
            // Every project has one
            database_id: "(default)".to_string(),
            api_key: None,
            id_token: None,
            endpoint: "https://firestore.googleapis.com/v1".to_string(),
            // Close enough to realtime for a booking calendar
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
        }
    }
}
