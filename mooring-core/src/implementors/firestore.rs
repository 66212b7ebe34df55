use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use tokio::runtime::Handle;

use crate::{
    auto_id, Backend, BackendError, Config, Direction, Document, DocumentObserver, DocumentPath,
    Fields, Filter, FilterOp, Query, QueryObserver, Result, SharedObserver, Subscription, Value,
};

/// The managed document store, reached over its REST API.
///
/// Writes go through `:commit` so server timestamps become `REQUEST_TIME` transforms.
/// Subscriptions re-run their read on the configured poll interval and emit whenever
/// the result changes. A failed poll is reported to the observer and ends the
/// subscription.
pub struct FirestoreBackend {
    client: Arc<FirestoreClient>,
    handle: Handle,
}

struct FirestoreClient {
    http: Client,
    config: Config,
    id_token: RwLock<Option<String>>,
}

impl FirestoreBackend {
    pub fn new(config: Config, handle: Handle) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();

        Self {
            client: Arc::new(FirestoreClient {
                http,
                id_token: RwLock::new(config.id_token.clone()),
                config,
            }),
            handle,
        }
    }

    /// Replaces the identity token sent with every request.
    pub fn set_id_token(&self, token: Option<String>) {
        *self.client.id_token.write() = token;
    }

    fn poll<T, F, Fut>(&self, what: String, observer: SharedObserver<T>, fetch: F) -> Subscription
    where
        T: PartialEq + Send + Sync + 'static,
        F: Fn(Arc<FirestoreClient>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send,
    {
        let client = self.client.clone();
        let period = client.config.poll_interval;

        let task = self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut last: Option<T> = None;

            loop {
                interval.tick().await;

                match fetch(client.clone()).await {
                    Ok(snapshot) => {
                        if last.as_ref() != Some(&snapshot) {
                            observer.on_next(&snapshot);
                            last = Some(snapshot);
                        }
                    }
                    Err(e) => {
                        warn!("Subscription to {} failed: {}", what, e);
                        observer.on_error(&e);
                        break;
                    }
                }
            }
        });

        Subscription::new(move || task.abort())
    }
}

impl FirestoreClient {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = match &self.config.api_key {
            Some(key) => request.query(&[("key", key)]),
            None => request,
        };

        match &*self.id_token.read() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn document_name(&self, path: &DocumentPath) -> String {
        format!(
            "{}/{}/{}",
            self.config.documents_root(),
            path.collection,
            path.id
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(response)
    }

    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        let url = format!(
            "{}/{}/{}",
            self.config.documents_url(),
            path.collection,
            path.id
        );
        let response = self.send(self.http.get(url)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let raw: RawDocument = check(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Internal(e.to_string()))?;

        raw.into_document().map(Some)
    }

    async fn commit(&self, path: &DocumentPath, fields: Fields, mode: WriteMode) -> Result<()> {
        let url = format!("{}:commit", self.config.documents_url());
        let request = self.http.post(url).json(&CommitRequest {
            writes: vec![self.write(path, fields, mode)],
        });

        let response = self.send(request).await?;

        // A failed exists precondition
        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(path.clone()));
        }

        check(response).await.map(|_| ())
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Document>> {
        let url = format!("{}:runQuery", self.config.documents_url());
        let body = json!({ "structuredQuery": structured_query(query) });

        let results: Vec<RunQueryResult> = check(self.send(self.http.post(url).json(&body)).await?)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Internal(e.to_string()))?;

        results
            .into_iter()
            .filter_map(|r| r.document)
            .map(RawDocument::into_document)
            .collect()
    }

    fn write(&self, path: &DocumentPath, fields: Fields, mode: WriteMode) -> CommitWrite {
        let (fields, transforms) = split_server_timestamps(fields);

        // A mask limits the write to the listed fields, transforms excluded
        let update_mask = match mode {
            WriteMode::Replace => None,
            WriteMode::Merge | WriteMode::Update => Some(FieldMask {
                field_paths: fields.keys().cloned().collect(),
            }),
        };
        let current_document = match mode {
            WriteMode::Update => Some(Precondition { exists: true }),
            _ => None,
        };

        CommitWrite {
            update: RawDocument {
                name: self.document_name(path),
                fields: encode_fields(&fields),
            },
            update_mask,
            update_transforms: transforms
                .into_iter()
                .map(|field_path| FieldTransform {
                    field_path,
                    set_to_server_value: "REQUEST_TIME",
                })
                .collect(),
            current_document,
        }
    }
}

/// Maps a non-success response to a backend error.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<ErrorResponse>()
        .await
        .map(|e| e.error.message)
        .unwrap_or_else(|_| status.to_string());

    Err(match status {
        StatusCode::UNAUTHORIZED => BackendError::Unauthenticated,
        StatusCode::FORBIDDEN => BackendError::PermissionDenied(message),
        _ => BackendError::Internal(message),
    })
}

#[async_trait]
impl Backend for FirestoreBackend {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>> {
        self.client.get(path).await
    }

    async fn set(&self, path: &DocumentPath, fields: Fields, merge: bool) -> Result<()> {
        let mode = if merge {
            WriteMode::Merge
        } else {
            WriteMode::Replace
        };

        self.client.commit(path, fields, mode).await
    }

    async fn update(&self, path: &DocumentPath, fields: Fields) -> Result<()> {
        self.client.commit(path, fields, WriteMode::Update).await
    }

    async fn add(&self, collection: &str, fields: Fields) -> Result<String> {
        let id = auto_id();
        let path = DocumentPath::new(collection, id.clone());

        debug!("Creating {}", path);
        self.client
            .commit(&path, fields, WriteMode::Replace)
            .await?;

        Ok(id)
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        self.client.run_query(query).await
    }

    fn subscribe_query(&self, query: Query, observer: QueryObserver) -> Subscription {
        let what = query.collection.clone();
        let query = Arc::new(query);

        self.poll(what, observer, move |client| {
            let query = query.clone();
            async move { client.run_query(&query).await }
        })
    }

    fn subscribe_document(&self, path: DocumentPath, observer: DocumentObserver) -> Subscription {
        let what = path.to_string();
        let path = Arc::new(path);

        self.poll(what, observer, move |client| {
            let path = path.clone();
            async move { client.get(&path).await }
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    /// Overwrite the whole document
    Replace,
    /// Overwrite only the given fields
    Merge,
    /// Overwrite only the given fields of a document that must exist
    Update,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Json>,
}

impl RawDocument {
    fn into_document(self) -> Result<Document> {
        let id = self
            .name
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let fields = self
            .fields
            .iter()
            .map(|(k, v)| decode_value(v).map(|v| (k.clone(), v)))
            .collect::<Result<Fields>>()?;

        Ok(Document::new(id, fields))
    }
}

#[derive(Debug, Deserialize)]
struct RunQueryResult {
    document: Option<RawDocument>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct CommitRequest {
    writes: Vec<CommitWrite>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitWrite {
    update: RawDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    update_mask: Option<FieldMask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    update_transforms: Vec<FieldTransform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_document: Option<Precondition>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldMask {
    field_paths: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldTransform {
    field_path: String,
    set_to_server_value: &'static str,
}

#[derive(Debug, Serialize)]
struct Precondition {
    exists: bool,
}

/// Pulls server timestamp sentinels out of the fields, returning their dotted paths.
fn split_server_timestamps(fields: Fields) -> (Fields, Vec<String>) {
    fn walk(prefix: &str, fields: Fields, transforms: &mut Vec<String>) -> Fields {
        fields
            .into_iter()
            .filter_map(|(key, value)| {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };

                match value {
                    Value::ServerTimestamp => {
                        transforms.push(path);
                        None
                    }
                    Value::Map(inner) => Some((key, Value::Map(walk(&path, inner, transforms)))),
                    other => Some((key, other)),
                }
            })
            .collect()
    }

    let mut transforms = vec![];
    let fields = walk("", fields, &mut transforms);

    (fields, transforms)
}

fn encode_fields(fields: &Fields) -> Map<String, Json> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}

fn encode_value(value: &Value) -> Json {
    match value {
        // Sentinels are only valid as transforms, anywhere else they are dropped
        Value::Null | Value::ServerTimestamp => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Integer(i) => json!({ "integerValue": i.to_string() }),
        Value::Double(d) => json!({ "doubleValue": d }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Timestamp(t) => {
            json!({ "timestampValue": t.to_rfc3339_opts(SecondsFormat::Micros, true) })
        }
        Value::Array(values) => json!({
            "arrayValue": { "values": values.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Map(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

fn decode_value(json: &Json) -> Result<Value> {
    let malformed = || BackendError::Internal(format!("Malformed value: {}", json));

    let object = json.as_object().ok_or_else(malformed)?;
    let (kind, inner) = object.iter().next().ok_or_else(malformed)?;

    let value = match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().ok_or_else(malformed)?),
        "integerValue" => {
            let parsed = match inner {
                Json::String(s) => s.parse().ok(),
                other => other.as_i64(),
            };
            Value::Integer(parsed.ok_or_else(malformed)?)
        }
        "doubleValue" => Value::Double(inner.as_f64().ok_or_else(malformed)?),
        "stringValue" | "referenceValue" | "bytesValue" => {
            Value::String(inner.as_str().ok_or_else(malformed)?.to_string())
        }
        "timestampValue" => {
            let raw = inner.as_str().ok_or_else(malformed)?;
            let parsed = DateTime::parse_from_rfc3339(raw).map_err(|_| malformed())?;
            Value::Timestamp(parsed.with_timezone(&Utc))
        }
        "arrayValue" => {
            let values = match inner.get("values") {
                Some(Json::Array(values)) => values
                    .iter()
                    .map(decode_value)
                    .collect::<Result<Vec<_>>>()?,
                _ => vec![],
            };
            Value::Array(values)
        }
        "mapValue" => {
            let fields = match inner.get("fields") {
                Some(Json::Object(fields)) => fields
                    .iter()
                    .map(|(k, v)| decode_value(v).map(|v| (k.clone(), v)))
                    .collect::<Result<Fields>>()?,
                _ => Fields::new(),
            };
            Value::Map(fields)
        }
        other => {
            warn!("Ignoring unsupported value kind {}", other);
            Value::Null
        }
    };

    Ok(value)
}

fn op_name(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Equal => "EQUAL",
        FilterOp::NotEqual => "NOT_EQUAL",
        FilterOp::LessThan => "LESS_THAN",
        FilterOp::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
        FilterOp::GreaterThan => "GREATER_THAN",
        FilterOp::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
        FilterOp::In => "IN",
        FilterOp::NotIn => "NOT_IN",
        FilterOp::ArrayContains => "ARRAY_CONTAINS",
    }
}

fn field_filter(filter: &Filter) -> Json {
    json!({
        "fieldFilter": {
            "field": { "fieldPath": filter.field },
            "op": op_name(filter.op),
            "value": encode_value(&filter.value),
        }
    })
}

fn structured_query(query: &Query) -> Json {
    let mut structured = json!({
        "from": [{ "collectionId": query.collection }],
    });

    let filter = match query.filters.as_slice() {
        [] => None,
        [single] => Some(field_filter(single)),
        many => Some(json!({
            "compositeFilter": {
                "op": "AND",
                "filters": many.iter().map(field_filter).collect::<Vec<_>>(),
            }
        })),
    };

    if let Some(filter) = filter {
        structured["where"] = filter;
    }

    if let Some(order) = &query.order_by {
        let direction = match order.direction {
            Direction::Ascending => "ASCENDING",
            Direction::Descending => "DESCENDING",
        };

        structured["orderBy"] = json!([{
            "field": { "fieldPath": order.field },
            "direction": direction,
        }]);
    }

    if let Some(limit) = query.limit {
        structured["limit"] = json!(limit);
    }

    structured
}
