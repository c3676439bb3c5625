// # REST Remote Client
//
// Talks to the workspace REST API (2.0 endpoints) on behalf of the
// reconciler. One logical operation per trait method; the only multi-call
// sequences are the ones the API itself requires (streamed DBFS uploads,
// library uninstall by coordinate, cancel-then-delete for runs).
//
// ## Request Routing
//
// | kind             | create                         | get                      | delete                        |
// |------------------|--------------------------------|--------------------------|-------------------------------|
// | secret_scope     | secrets/scopes/create          | secrets/scopes/list      | secrets/scopes/delete         |
// | job_definition   | jobs/create                    | jobs/get                 | jobs/delete                   |
// | job_run          | jobs/run-now, jobs/runs/submit | jobs/runs/get            | jobs/runs/cancel + delete     |
// | cluster          | clusters/create                | clusters/get             | clusters/permanent-delete     |
// | filesystem_block | dbfs/put (or streamed upload)  | dbfs/get-status          | dbfs/delete                   |
// | workspace_item   | workspace/import               | workspace/get-status     | workspace/delete              |
//
// `get` reshapes every response into the vocabulary of the create payload
// (plus read-only state fields) so adapters can diff it directly.
//
// ## Security
//
// - The bearer token never appears in logs or `Debug` output
// - No retries, caching or background tasks; the reconciler owns policy

use async_trait::async_trait;
use dbrx_core::adapters::{cluster::SIZING_FIELDS, fingerprint, Library, IDEMPOTENCY_TAG};
use dbrx_core::config::RemoteConfig;
use dbrx_core::traits::{
    ChildKind, RemoteChild, RemoteClient, RemoteClientFactory, RemoteObject,
};
use dbrx_core::{Error, RemoteHandle, ResourceKind, Result};
use reqwest::{Method, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Path prefix of every endpoint
const API_PREFIX: &str = "api/2.0";

/// Largest base64 payload accepted by a single `dbfs/put`
const DBFS_PUT_LIMIT: usize = 1024 * 1024;

/// Base64 characters per `dbfs/add-block` call (a multiple of 4)
const DBFS_BLOCK_CHARS: usize = 1024 * 1024;

/// Longest idempotency token the API accepts
const MAX_IDEMPOTENCY_TOKEN: usize = 64;

/// Page size for `jobs/list`
const JOBS_PAGE: usize = 25;

/// Library statuses that no longer count as installed
const UNINSTALLING: &[&str] = &["UNINSTALL_ON_RESTART"];

/// REST client for the remote batch/compute service
pub struct RestClient {
    /// Workspace URL without trailing slash
    host: String,

    /// Bearer token
    /// ⚠️ NEVER log this value
    token: String,

    client: reqwest::Client,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("host", &self.host)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

impl RestClient {
    /// Create a client for `host` with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty token or when the HTTP
    /// client cannot be built.
    pub fn new(host: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(Error::config("REST token cannot be empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            host: host.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.host, API_PREFIX, endpoint)
    }

    async fn send(&self, method: Method, endpoint: &str, query: &[(&str, String)], body: Option<&Value>) -> Result<Value> {
        debug!(%method, endpoint, "REST request");
        let mut request = self
            .client
            .request(method, self.url(endpoint))
            .bearer_auth(&self.token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::Other(format!("{}: unreadable response: {}", endpoint, e)))
    }

    async fn get_json(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Value> {
        self.send(Method::GET, endpoint, query, None).await
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        self.send(Method::POST, endpoint, &[], Some(body)).await
    }

    async fn put_file(&self, path: &str, contents: &str, overwrite: bool) -> Result<()> {
        if contents.len() <= DBFS_PUT_LIMIT {
            self.post(
                "dbfs/put",
                &json!({"path": path, "contents": contents, "overwrite": overwrite}),
            )
            .await?;
            return Ok(());
        }

        let opened = self
            .post("dbfs/create", &json!({"path": path, "overwrite": overwrite}))
            .await?;
        let stream = opened
            .get("handle")
            .cloned()
            .ok_or_else(|| Error::Other("dbfs/create returned no handle".into()))?;
        let blocks = base64_blocks(contents, DBFS_BLOCK_CHARS);
        debug!(path, blocks = blocks.len(), "Streaming DBFS upload");
        for block in blocks {
            self.post("dbfs/add-block", &json!({"handle": stream, "data": block}))
                .await?;
        }
        self.post("dbfs/close", &json!({"handle": stream})).await?;
        Ok(())
    }

    async fn scopes(&self) -> Result<Vec<Value>> {
        let listed = self.get_json("secrets/scopes/list", &[]).await?;
        Ok(array(&listed, "scopes").iter().map(scope_state).collect())
    }

    async fn jobs(&self) -> Result<Vec<Value>> {
        let mut jobs = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .get_json(
                    "jobs/list",
                    &[("limit", JOBS_PAGE.to_string()), ("offset", offset.to_string())],
                )
                .await?;
            let entries = array(&page, "jobs");
            offset += entries.len();
            jobs.extend(entries.iter().map(job_state));
            let more = page.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            if !more || entries.is_empty() {
                return Ok(jobs);
            }
        }
    }

    async fn clusters(&self) -> Result<Vec<Value>> {
        let listed = self.get_json("clusters/list", &[]).await?;
        Ok(array(&listed, "clusters").to_vec())
    }

    async fn installed_libraries(&self, cluster: &RemoteHandle) -> Result<Vec<Value>> {
        let status = self
            .get_json("libraries/cluster-status", &[("cluster_id", cluster.to_string())])
            .await?;
        Ok(array(&status, "library_statuses")
            .iter()
            .filter(|s| {
                let state = s.get("status").and_then(Value::as_str).unwrap_or_default();
                !UNINSTALLING.contains(&state)
            })
            .filter_map(|s| s.get("library").cloned())
            .collect())
    }
}

#[async_trait]
impl RemoteClient for RestClient {
    async fn create(
        &self,
        kind: ResourceKind,
        idempotency_key: &str,
        incarnation: u32,
        payload: &Value,
    ) -> Result<RemoteHandle> {
        info!(%kind, key = idempotency_key, incarnation, "Creating remote resource");
        match kind {
            ResourceKind::SecretScope => {
                self.post("secrets/scopes/create", payload).await?;
                field_handle(payload, "scope")
            }
            ResourceKind::JobDefinition => {
                let created = self.post("jobs/create", payload).await?;
                field_handle(&created, "job_id")
            }
            ResourceKind::JobRun => {
                let (endpoint, body) = run_create(payload, idempotency_key, incarnation);
                let created = self.post(endpoint, &body).await?;
                field_handle(&created, "run_id")
            }
            ResourceKind::Cluster => {
                let token = idempotency_token(idempotency_key, incarnation);
                let body = with_field(payload, "idempotency_token", json!(token));
                let created = self.post("clusters/create", &body).await?;
                field_handle(&created, "cluster_id")
            }
            ResourceKind::FilesystemBlock => {
                let path = str_field(payload, "path")?;
                self.put_file(path, str_field(payload, "contents")?, false).await?;
                Ok(RemoteHandle::new(path))
            }
            ResourceKind::WorkspaceItem => {
                self.post("workspace/import", payload).await?;
                field_handle(payload, "path")
            }
        }
    }

    async fn get(&self, kind: ResourceKind, handle: &RemoteHandle) -> Result<Value> {
        match kind {
            ResourceKind::SecretScope => self
                .scopes()
                .await?
                .into_iter()
                .find(|s| s.get("scope").and_then(Value::as_str) == Some(handle.as_str()))
                .ok_or_else(|| Error::not_found(format!("secret scope {}", handle))),
            ResourceKind::JobDefinition => {
                let job = self.get_json("jobs/get", &[("job_id", handle.to_string())]).await?;
                Ok(job_state(&job))
            }
            ResourceKind::JobRun => {
                let run = self.get_json("jobs/runs/get", &[("run_id", handle.to_string())]).await?;
                Ok(run_state(&run))
            }
            ResourceKind::Cluster => {
                self.get_json("clusters/get", &[("cluster_id", handle.to_string())])
                    .await
            }
            ResourceKind::FilesystemBlock => {
                let status = self.get_json("dbfs/get-status", &[("path", handle.to_string())]).await?;
                Ok(pick(&status, &["path", "file_size"]))
            }
            ResourceKind::WorkspaceItem => {
                let status = self
                    .get_json("workspace/get-status", &[("path", handle.to_string())])
                    .await?;
                Ok(pick(&status, &["path", "language"]))
            }
        }
    }

    async fn update(&self, kind: ResourceKind, handle: &RemoteHandle, payload: &Value) -> Result<()> {
        info!(%kind, %handle, "Updating remote resource");
        match kind {
            ResourceKind::JobDefinition => {
                let body = with_field(payload, "job_id", id_value(handle));
                self.post("jobs/update", &body).await?;
            }
            ResourceKind::Cluster => {
                let (endpoint, body) = cluster_update(handle, payload);
                self.post(endpoint, &body).await?;
            }
            ResourceKind::FilesystemBlock => {
                self.put_file(handle.as_str(), str_field(payload, "contents")?, true)
                    .await?;
            }
            ResourceKind::WorkspaceItem => {
                let body = with_field(payload, "overwrite", json!(true));
                self.post("workspace/import", &body).await?;
            }
            ResourceKind::SecretScope | ResourceKind::JobRun => {
                return Err(Error::invalid_spec(format!("{} has no mutable settings", kind)));
            }
        }
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, handle: &RemoteHandle) -> Result<()> {
        info!(%kind, %handle, "Deleting remote resource");
        match kind {
            ResourceKind::SecretScope => {
                self.post("secrets/scopes/delete", &json!({"scope": handle.as_str()}))
                    .await?;
            }
            ResourceKind::JobDefinition => {
                self.post("jobs/delete", &json!({"job_id": id_value(handle)})).await?;
            }
            ResourceKind::JobRun => {
                let run = json!({"run_id": id_value(handle)});
                // Finished runs reject cancel; the delete below is what matters
                if let Err(e) = self.post("jobs/runs/cancel", &run).await {
                    if e.is_not_found() {
                        return Err(e);
                    }
                    debug!(%handle, "Cancel skipped: {}", e);
                }
                self.post("jobs/runs/delete", &run).await?;
            }
            ResourceKind::Cluster => {
                self.post("clusters/permanent-delete", &json!({"cluster_id": handle.as_str()}))
                    .await?;
            }
            ResourceKind::FilesystemBlock => {
                self.post("dbfs/delete", &json!({"path": handle.as_str(), "recursive": false}))
                    .await?;
            }
            ResourceKind::WorkspaceItem => {
                self.post("workspace/delete", &json!({"path": handle.as_str(), "recursive": false}))
                    .await?;
            }
        }
        Ok(())
    }

    async fn find(&self, kind: ResourceKind, idempotency_key: &str) -> Result<Option<RemoteObject>> {
        let (candidates, tags, id_field) = match kind {
            ResourceKind::JobDefinition => (self.jobs().await?, "tags", "job_id"),
            ResourceKind::Cluster => (self.clusters().await?, "custom_tags", "cluster_id"),
            // Scopes, paths and runs are addressed by name or token, not tags
            _ => return Ok(None),
        };
        Ok(candidates
            .into_iter()
            .find(|state| state[tags][IDEMPOTENCY_TAG].as_str() == Some(idempotency_key))
            .and_then(|state| {
                let handle = id_string(state.get(id_field)?)?;
                Some(RemoteObject {
                    handle: RemoteHandle::new(handle),
                    state,
                })
            }))
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<RemoteObject>> {
        let (states, id_field) = match kind {
            ResourceKind::SecretScope => (self.scopes().await?, "scope"),
            ResourceKind::JobDefinition => (self.jobs().await?, "job_id"),
            ResourceKind::Cluster => (self.clusters().await?, "cluster_id"),
            ResourceKind::JobRun => {
                let listed = self.get_json("jobs/runs/list", &[]).await?;
                (array(&listed, "runs").iter().map(run_state).collect(), "run_id")
            }
            ResourceKind::FilesystemBlock | ResourceKind::WorkspaceItem => {
                return Err(Error::Other(format!("{} cannot be listed without a root path", kind)));
            }
        };
        Ok(states
            .into_iter()
            .filter_map(|state| {
                let handle = id_string(state.get(id_field)?)?;
                Some(RemoteObject {
                    handle: RemoteHandle::new(handle),
                    state,
                })
            })
            .collect())
    }

    async fn list_children(&self, parent: &RemoteHandle, child: ChildKind) -> Result<Vec<RemoteChild>> {
        let scope = [("scope", parent.to_string())];
        match child {
            ChildKind::Secret => {
                let listed = self.get_json("secrets/list", &scope).await?;
                Ok(array(&listed, "secrets")
                    .iter()
                    .filter_map(|s| s.get("key").and_then(Value::as_str))
                    .map(|key| RemoteChild {
                        key: key.to_string(),
                        fingerprint: None,
                    })
                    .collect())
            }
            ChildKind::SecretAcl => {
                let listed = self.get_json("secrets/acls/list", &scope).await?;
                Ok(array(&listed, "items")
                    .iter()
                    .filter_map(|acl| {
                        Some(RemoteChild {
                            key: acl.get("principal")?.as_str()?.to_string(),
                            fingerprint: acl.get("permission").and_then(Value::as_str).map(str::to_string),
                        })
                    })
                    .collect())
            }
            ChildKind::ClusterLibrary => Ok(self
                .installed_libraries(parent)
                .await?
                .iter()
                .filter_map(library_coordinate)
                .map(|coordinate| RemoteChild {
                    key: coordinate.clone(),
                    fingerprint: Some(coordinate),
                })
                .collect()),
        }
    }

    async fn put_child(
        &self,
        parent: &RemoteHandle,
        child: ChildKind,
        key: &str,
        payload: &Value,
    ) -> Result<()> {
        debug!(%parent, child = child.as_str(), key, "Writing child");
        match child {
            ChildKind::Secret => {
                let body = with_field(payload, "scope", json!(parent.as_str()));
                self.post("secrets/put", &body).await?;
            }
            ChildKind::SecretAcl => {
                let body = with_field(payload, "scope", json!(parent.as_str()));
                self.post("secrets/acls/put", &body).await?;
            }
            ChildKind::ClusterLibrary => {
                self.post(
                    "libraries/install",
                    &json!({"cluster_id": parent.as_str(), "libraries": [payload]}),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn delete_child(&self, parent: &RemoteHandle, child: ChildKind, key: &str) -> Result<()> {
        debug!(%parent, child = child.as_str(), key, "Removing child");
        match child {
            ChildKind::Secret => {
                self.post("secrets/delete", &json!({"scope": parent.as_str(), "key": key}))
                    .await?;
            }
            ChildKind::SecretAcl => {
                self.post(
                    "secrets/acls/delete",
                    &json!({"scope": parent.as_str(), "principal": key}),
                )
                .await?;
            }
            ChildKind::ClusterLibrary => {
                let library = self
                    .installed_libraries(parent)
                    .await?
                    .into_iter()
                    .find(|lib| library_coordinate(lib).as_deref() == Some(key))
                    .ok_or_else(|| Error::not_found(format!("library {} on {}", key, parent)))?;
                self.post(
                    "libraries/uninstall",
                    &json!({"cluster_id": parent.as_str(), "libraries": [library]}),
                )
                .await?;
            }
        }
        Ok(())
    }

    fn client_name(&self) -> &'static str {
        "rest"
    }
}

/// Map an error response onto the engine taxonomy
fn classify(status: StatusCode, body: &str) -> Error {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let code = parsed.get("error_code").and_then(Value::as_str).unwrap_or_default();
    let message = parsed
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(200).collect());
    let detail = format!("{} {}: {}", status.as_u16(), code, message);

    match (status.as_u16(), code) {
        (401 | 403, _) => Error::auth(detail),
        (_, "RESOURCE_ALREADY_EXISTS") => Error::already_exists(detail),
        (404, _) | (_, "RESOURCE_DOES_NOT_EXIST") => Error::not_found(detail),
        // jobs/get and clusters/get report unknown ids as bad parameters
        (400, "INVALID_PARAMETER_VALUE") if message.contains("does not exist") => {
            Error::not_found(detail)
        }
        (409, _) | (_, "INVALID_STATE") | (_, "RESOURCE_CONFLICT") => Error::conflict(detail),
        (429, _) | (_, "REQUEST_LIMIT_EXCEEDED") => Error::throttled(detail),
        (500..=599, _) | (_, "TEMPORARILY_UNAVAILABLE") => Error::transient(detail),
        (400..=499, _) => Error::invalid_spec(detail),
        _ => Error::transient(detail),
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_decode() {
        Error::Other(format!("unreadable response: {}", e))
    } else {
        // Timeouts, refused connections and resets alike
        Error::transient(format!("HTTP request failed: {}", e))
    }
}

/// Resize when only sizing changed, otherwise a full edit
fn cluster_update(handle: &RemoteHandle, payload: &Value) -> (&'static str, Value) {
    let sizing_only = payload
        .as_object()
        .is_some_and(|obj| obj.keys().all(|k| SIZING_FIELDS.contains(&k.as_str())));
    let body = with_field(payload, "cluster_id", json!(handle.as_str()));
    if sizing_only {
        ("clusters/resize", body)
    } else {
        ("clusters/edit", body)
    }
}

/// Endpoint and body for starting a run
fn run_create(payload: &Value, idempotency_key: &str, incarnation: u32) -> (&'static str, Value) {
    let token = idempotency_token(idempotency_key, incarnation);
    let body = with_field(payload, "idempotency_token", json!(token));
    if payload.get("job_id").is_some() {
        ("jobs/run-now", body)
    } else {
        ("jobs/runs/submit", body)
    }
}

/// Token for one incarnation of an object
///
/// The remote keeps tokens after the instance is deleted, so a re-created
/// instance needs a token of its own.
fn idempotency_token(key: &str, incarnation: u32) -> String {
    let token = match incarnation {
        0 => key.to_string(),
        n => format!("{}#{}", key, n),
    };
    if token.len() <= MAX_IDEMPOTENCY_TOKEN {
        token
    } else {
        fingerprint(token.as_bytes())
    }
}

fn base64_blocks(contents: &str, size: usize) -> Vec<&str> {
    let mut blocks = Vec::with_capacity(contents.len().div_ceil(size));
    let mut rest = contents;
    while !rest.is_empty() {
        let cut = rest.len().min(size);
        let (block, tail) = rest.split_at(cut);
        blocks.push(block);
        rest = tail;
    }
    blocks
}

fn scope_state(scope: &Value) -> Value {
    let mut obj = Map::new();
    if let Some(name) = scope.get("name") {
        obj.insert("scope".into(), name.clone());
    }
    if let Some(backend) = scope.get("backend_type") {
        obj.insert("scope_backend_type".into(), backend.clone());
    }
    if let Some(vault) = scope.get("keyvault_metadata") {
        obj.insert("backend_azure_keyvault".into(), vault.clone());
    }
    Value::Object(obj)
}

fn job_state(job: &Value) -> Value {
    let mut state = job.get("settings").cloned().unwrap_or_else(|| json!({}));
    if let (Some(obj), Some(id)) = (state.as_object_mut(), job.get("job_id")) {
        obj.insert("job_id".into(), id.clone());
    }
    state
}

/// Flatten a run so trigger parameters and states sit at the top level
fn run_state(run: &Value) -> Value {
    let mut obj = match run {
        Value::Object(obj) => obj.clone(),
        _ => Map::new(),
    };
    for nested in ["overriding_parameters", "cluster_spec", "task", "state"] {
        if let Some(Value::Object(inner)) = obj.remove(nested) {
            for (field, value) in inner {
                obj.entry(field).or_insert(value);
            }
        }
    }
    Value::Object(obj)
}

fn library_coordinate(library: &Value) -> Option<String> {
    serde_json::from_value::<Library>(library.clone())
        .ok()
        .map(|lib| lib.coordinate())
}

fn array<'a>(value: &'a Value, field: &str) -> &'a [Value] {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn pick(value: &Value, fields: &[&str]) -> Value {
    let mut obj = Map::new();
    for field in fields {
        if let Some(v) = value.get(*field) {
            obj.insert((*field).to_string(), v.clone());
        }
    }
    Value::Object(obj)
}

fn with_field(payload: &Value, field: &str, value: Value) -> Value {
    let mut body = payload.clone();
    if let Some(obj) = body.as_object_mut() {
        obj.insert(field.to_string(), value);
    }
    body
}

fn str_field<'a>(payload: &'a Value, field: &str) -> Result<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_spec(format!("payload is missing '{}'", field)))
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field_handle(value: &Value, field: &str) -> Result<RemoteHandle> {
    value
        .get(field)
        .and_then(id_string)
        .map(RemoteHandle::new)
        .ok_or_else(|| Error::Other(format!("response carries no '{}'", field)))
}

/// Numeric ids go over the wire as numbers
fn id_value(handle: &RemoteHandle) -> Value {
    handle
        .as_str()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| json!(handle.as_str()))
}

/// Factory for creating REST clients
pub struct RestClientFactory;

impl RemoteClientFactory for RestClientFactory {
    fn create(&self, config: &RemoteConfig) -> Result<Box<dyn RemoteClient>> {
        match config {
            RemoteConfig::Rest {
                host,
                token,
                timeout_secs,
            } => {
                config.validate()?;
                Ok(Box::new(RestClient::new(
                    host.clone(),
                    token.clone(),
                    Duration::from_secs(*timeout_secs),
                )?))
            }
            _ => Err(Error::config("Invalid config for REST client")),
        }
    }
}

/// Register the REST client with a registry
///
/// # Example
///
/// ```rust
/// use dbrx_core::Registry;
///
/// let registry = Registry::new();
/// dbrx_provider_rest::register(&registry);
/// assert!(registry.has_remote_client("rest"));
/// ```
pub fn register(registry: &dbrx_core::Registry) {
    registry.register_remote_client("rest", Box::new(RestClientFactory));
}
