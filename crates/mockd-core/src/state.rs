//! Stateful resource store: named CRUD collections with seed and reset
//!
//! Each resource is a map of id → JSON object behind its own async mutex; a
//! single mutex per resource is sufficient for serializability. Custom
//! multi-step operations lock every involved resource in canonical
//! (name-sorted) order and commit only if all steps succeed.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

/// Declaration of a stateful resource in the config document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    pub name: String,
    /// HTTP base path served by the stateful CRUD routes (e.g. `/api/users`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Set for nested resources; scopes id uniqueness under the parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_field: Option<String>,
    #[serde(default)]
    pub seed_data: Vec<Value>,
    /// Capacity bound; create fails with `capacity_exceeded` beyond it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

fn default_id_field() -> String {
    "id".to_string()
}

/// Pagination/filter/sort arguments to `list`
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub parent_id: Option<String>,
    /// Field equality filters (stringified comparison)
    pub filters: HashMap<String, String>,
    /// Sort field, optionally prefixed with `-` for descending
    pub sort: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

const DEFAULT_PAGE_LIMIT: usize = 100;

/// One page of a list result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPage {
    pub data: Vec<Value>,
    pub meta: ListMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMeta {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub count: usize,
}

#[derive(Debug, Default)]
struct ResourceInner {
    /// Keyed by `parent/id` when parent-scoped, else by id
    items: BTreeMap<String, Value>,
    /// Materialized seed, restored verbatim on reset
    seed: BTreeMap<String, Value>,
}

/// A named collection and its lock
#[derive(Debug)]
pub struct Resource {
    config: ResourceConfig,
    inner: Mutex<ResourceInner>,
}

impl Resource {
    fn new(mut config: ResourceConfig) -> Self {
        let mut seed = BTreeMap::new();
        let seed_data = std::mem::take(&mut config.seed_data);
        for mut obj in seed_data {
            normalize(&mut obj, &config.id_field);
            let key = storage_key(&obj, &config);
            seed.insert(key, obj);
        }
        Self {
            config,
            inner: Mutex::new(ResourceInner {
                items: seed.clone(),
                seed,
            }),
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }
}

/// Assign id and timestamps when absent
fn normalize(obj: &mut Value, id_field: &str) {
    let Some(map) = obj.as_object_mut() else {
        return;
    };
    if !map.contains_key(id_field) {
        map.insert(
            id_field.to_string(),
            json!(uuid::Uuid::new_v4().to_string()),
        );
    }
    let now = json!(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    map.entry("createdAt").or_insert_with(|| now.clone());
    map.entry("updatedAt").or_insert(now);
}

fn id_of(obj: &Value, id_field: &str) -> String {
    match obj.get(id_field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn storage_key(obj: &Value, config: &ResourceConfig) -> String {
    let id = id_of(obj, &config.id_field);
    match &config.parent_field {
        Some(parent_field) => {
            let parent = obj
                .get(parent_field)
                .map(crate::template::json_to_text)
                .unwrap_or_default();
            format!("{parent}/{id}")
        }
        None => id,
    }
}

/// The store: resource name → collection
#[derive(Debug, Default)]
pub struct StatefulStore {
    resources: RwLock<HashMap<String, Arc<Resource>>>,
}

impl StatefulStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource, materializing its seed. Replaces any existing
    /// resource of the same name.
    pub async fn register(&self, config: ResourceConfig) {
        info!(resource = %config.name, seed = config.seed_data.len(), "registering stateful resource");
        let name = config.name.clone();
        let resource = Arc::new(Resource::new(config));
        self.resources.write().await.insert(name, resource);
    }

    pub async fn resource(&self, name: &str) -> Result<Arc<Resource>> {
        self.resources
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("unknown resource {name}")))
    }

    pub async fn resource_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Find the resource whose base path prefixes the request path
    pub async fn resource_for_path(&self, path: &str) -> Option<Arc<Resource>> {
        let resources = self.resources.read().await;
        resources
            .values()
            .filter(|r| {
                r.config.base_path.as_deref().is_some_and(|base| {
                    path == base || path.starts_with(&format!("{base}/"))
                })
            })
            // Longest base path wins for nested declarations
            .max_by_key(|r| r.config.base_path.as_deref().map_or(0, str::len))
            .cloned()
    }

    pub async fn list(&self, name: &str, query: &ListQuery) -> Result<ListPage> {
        let resource = self.resource(name).await?;
        let inner = resource.inner.lock().await;
        Ok(list_inner(&inner, &resource.config, query))
    }

    pub async fn get(&self, name: &str, id: &str) -> Result<Value> {
        let resource = self.resource(name).await?;
        let inner = resource.inner.lock().await;
        get_inner(&inner, &resource.config, id)
    }

    pub async fn create(&self, name: &str, obj: Value) -> Result<Value> {
        let resource = self.resource(name).await?;
        let mut inner = resource.inner.lock().await;
        create_inner(&mut inner, &resource.config, obj)
    }

    pub async fn update(&self, name: &str, id: &str, patch: Value) -> Result<Value> {
        let resource = self.resource(name).await?;
        let mut inner = resource.inner.lock().await;
        update_inner(&mut inner, &resource.config, id, patch)
    }

    /// Idempotent delete
    pub async fn delete(&self, name: &str, id: &str) -> Result<()> {
        let resource = self.resource(name).await?;
        let mut inner = resource.inner.lock().await;
        delete_inner(&mut inner, &resource.config, id);
        Ok(())
    }

    /// Restore the seed snapshot for one resource, or for all
    pub async fn reset(&self, name: Option<&str>) -> Result<()> {
        match name {
            Some(name) => {
                let resource = self.resource(name).await?;
                let mut inner = resource.inner.lock().await;
                let inner = &mut *inner;
                inner.items = inner.seed.clone();
                debug!(resource = name, "state reset to seed");
                Ok(())
            }
            None => {
                let resources: Vec<Arc<Resource>> =
                    self.resources.read().await.values().cloned().collect();
                for resource in resources {
                    let mut inner = resource.inner.lock().await;
                    let inner = &mut *inner;
                    inner.items = inner.seed.clone();
                }
                debug!("all state reset to seed");
                Ok(())
            }
        }
    }

    /// Remove every item without restoring seed
    pub async fn clear(&self, name: &str) -> Result<()> {
        let resource = self.resource(name).await?;
        let mut inner = resource.inner.lock().await;
        inner.items.clear();
        Ok(())
    }

    /// Read-only field access for templates; `None` on any miss
    pub async fn read_field(&self, name: &str, id: &str, field: &str) -> Option<Value> {
        let resource = self.resource(name).await.ok()?;
        let inner = resource.inner.lock().await;
        let config = &resource.config;
        inner
            .items
            .values()
            .find(|obj| id_of(obj, &config.id_field) == id)
            .and_then(|obj| obj.get(field))
            .cloned()
    }

    /// Apply one CRUD action generically; listeners without verb semantics
    /// (SOAP, gRPC) declare the action explicitly in the mock.
    pub async fn apply(
        &self,
        resource: &str,
        action: crate::model::CrudAction,
        id: Option<&str>,
        body: Option<Value>,
        query: &ListQuery,
    ) -> Result<Value> {
        use crate::model::CrudAction;
        match action {
            CrudAction::List => {
                let page = self.list(resource, query).await?;
                Ok(serde_json::to_value(page)?)
            }
            CrudAction::Get => {
                let id = id.ok_or_else(|| Error::validation("missing item id"))?;
                self.get(resource, id).await
            }
            CrudAction::Create => {
                let body = body.ok_or_else(|| Error::validation("missing item body"))?;
                self.create(resource, body).await
            }
            CrudAction::Update => {
                let id = id.ok_or_else(|| Error::validation("missing item id"))?;
                let body = body.ok_or_else(|| Error::validation("missing item body"))?;
                self.update(resource, id, body).await
            }
            CrudAction::Delete => {
                let id = id.ok_or_else(|| Error::validation("missing item id"))?;
                self.delete(resource, id).await?;
                Ok(Value::Null)
            }
        }
    }

    /// Execute a named custom operation atomically.
    ///
    /// Every involved resource is locked in canonical (name-sorted) order,
    /// steps run against working copies, and the copies are committed only
    /// when every step succeeded.
    pub async fn run_operation(
        &self,
        op: &CustomOperation,
        params: &HashMap<String, Value>,
    ) -> Result<Value> {
        let mut names: Vec<String> = op.steps.iter().map(|s| s.resource.clone()).collect();
        names.sort();
        names.dedup();

        let mut resources = Vec::with_capacity(names.len());
        for name in &names {
            resources.push((name.clone(), self.resource(name).await?));
        }

        // Canonical order acquisition; guards release in reverse on drop
        let mut guards: HashMap<String, MutexGuard<'_, ResourceInner>> = HashMap::new();
        for (name, resource) in &resources {
            guards.insert(name.clone(), resource.inner.lock().await);
        }

        let mut working: HashMap<String, BTreeMap<String, Value>> = guards
            .iter()
            .map(|(name, guard)| (name.clone(), guard.items.clone()))
            .collect();
        let configs: HashMap<String, ResourceConfig> = resources
            .iter()
            .map(|(name, r)| (name.clone(), r.config.clone()))
            .collect();

        let mut env = OpEnv {
            params,
            results: HashMap::new(),
        };
        let mut output = Value::Null;
        for (index, step) in op.steps.iter().enumerate() {
            let config = configs
                .get(&step.resource)
                .ok_or_else(|| Error::internal("resource disappeared during operation"))?;
            let items = working
                .get_mut(&step.resource)
                .ok_or_else(|| Error::internal("resource disappeared during operation"))?;
            output = run_step(step, config, items, &env).map_err(|e| {
                Error::validation(format!(
                    "operation {} failed at step {}: {e}",
                    op.name, index
                ))
            })?;
            if let Some(alias) = &step.store_as {
                env.results.insert(alias.clone(), output.clone());
            }
        }

        // All steps succeeded: commit working copies
        for (name, items) in working {
            if let Some(guard) = guards.get_mut(&name) {
                guard.items = items;
            }
        }
        info!(operation = %op.name, "custom operation committed");
        Ok(output)
    }
}

fn list_inner(inner: &ResourceInner, config: &ResourceConfig, query: &ListQuery) -> ListPage {
    let mut matches: Vec<&Value> = inner
        .items
        .values()
        .filter(|obj| {
            if let (Some(parent_field), Some(parent_id)) =
                (&config.parent_field, &query.parent_id)
            {
                let actual = obj
                    .get(parent_field)
                    .map(crate::template::json_to_text)
                    .unwrap_or_default();
                if &actual != parent_id {
                    return false;
                }
            }
            query.filters.iter().all(|(field, expected)| {
                obj.get(field)
                    .map(crate::template::json_to_text)
                    .is_some_and(|actual| &actual == expected)
            })
        })
        .collect();

    if let Some(sort) = &query.sort {
        let (field, descending) = match sort.strip_prefix('-') {
            Some(field) => (field, true),
            None => (sort.as_str(), false),
        };
        matches.sort_by(|a, b| {
            let left = a.get(field).map(crate::template::json_to_text).unwrap_or_default();
            let right = b.get(field).map(crate::template::json_to_text).unwrap_or_default();
            if descending {
                right.cmp(&left)
            } else {
                left.cmp(&right)
            }
        });
    }

    let total = matches.len();
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let offset = query.offset.unwrap_or(0);
    let data: Vec<Value> = matches
        .into_iter()
        .skip(offset)
        .take(limit)
        .cloned()
        .collect();
    let count = data.len();
    ListPage {
        data,
        meta: ListMeta {
            total,
            limit,
            offset,
            count,
        },
    }
}

fn find_key(inner: &ResourceInner, config: &ResourceConfig, id: &str) -> Option<String> {
    inner
        .items
        .iter()
        .find(|(_, obj)| id_of(obj, &config.id_field) == id)
        .map(|(key, _)| key.clone())
}

fn get_inner(inner: &ResourceInner, config: &ResourceConfig, id: &str) -> Result<Value> {
    find_key(inner, config, id)
        .and_then(|key| inner.items.get(&key).cloned())
        .ok_or_else(|| Error::not_found(format!("{} {id} not found", config.name)))
}

fn create_inner(
    inner: &mut ResourceInner,
    config: &ResourceConfig,
    mut obj: Value,
) -> Result<Value> {
    if !obj.is_object() {
        return Err(Error::validation("stateful items must be JSON objects"));
    }
    if let Some(max) = config.max_items {
        if inner.items.len() >= max {
            return Err(Error::capacity(format!(
                "resource {} is full ({max} items)",
                config.name
            )));
        }
    }
    normalize(&mut obj, &config.id_field);
    let key = storage_key(&obj, config);
    if inner.items.contains_key(&key) {
        return Err(Error::conflict(format!(
            "{} {} already exists",
            config.name,
            id_of(&obj, &config.id_field)
        )));
    }
    inner.items.insert(key, obj.clone());
    Ok(obj)
}

fn update_inner(
    inner: &mut ResourceInner,
    config: &ResourceConfig,
    id: &str,
    patch: Value,
) -> Result<Value> {
    let key = find_key(inner, config, id)
        .ok_or_else(|| Error::not_found(format!("{} {id} not found", config.name)))?;
    let existing = inner
        .items
        .get_mut(&key)
        .ok_or_else(|| Error::not_found(format!("{} {id} not found", config.name)))?;
    let Some(patch_map) = patch.as_object() else {
        return Err(Error::validation("update body must be a JSON object"));
    };
    let Some(map) = existing.as_object_mut() else {
        return Err(Error::internal("stored item is not an object"));
    };
    for (field, value) in patch_map {
        if field == &config.id_field {
            continue;
        }
        map.insert(field.clone(), value.clone());
    }
    map.insert(
        "updatedAt".to_string(),
        json!(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
    );
    Ok(existing.clone())
}

fn delete_inner(inner: &mut ResourceInner, config: &ResourceConfig, id: &str) {
    if let Some(key) = find_key(inner, config, id) {
        inner.items.remove(&key);
    }
}

// ---------------------------------------------------------------------------
// Custom operations

/// A named multi-step pipeline over stateful resources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomOperation {
    pub name: String,
    /// Declared parameter names; callers must supply each
    #[serde(default)]
    pub params: Vec<String>,
    pub steps: Vec<OpStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpStep {
    pub action: OpAction,
    pub resource: String,
    /// Expression resolving to the target id (read/update/delete/set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Object expression for create, or field → expression map for
    /// update/set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<Value>,
    /// Store this step's output under `$<alias>` for later steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_as: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpAction {
    Read,
    Create,
    Update,
    Delete,
    /// Overwrite a whole object (create-or-replace)
    Set,
}

struct OpEnv<'a> {
    params: &'a HashMap<String, Value>,
    results: HashMap<String, Value>,
}

impl OpEnv<'_> {
    /// Resolve `$name` or `$name.field.sub` against params then step results
    fn lookup(&self, reference: &str) -> Option<Value> {
        let mut parts = reference.split('.');
        let head = parts.next()?;
        let mut current = self
            .params
            .get(head)
            .or_else(|| self.results.get(head))?
            .clone();
        for part in parts {
            current = current.get(part)?.clone();
        }
        Some(current)
    }
}

/// Evaluate an expression: `"$ref.path"` strings resolve against the
/// environment; `{add: [..]}`/`{sub: [..]}`/`{concat: [..]}` combine
/// sub-expressions; everything else is literal.
fn eval_expr(expr: &Value, env: &OpEnv<'_>) -> std::result::Result<Value, String> {
    match expr {
        Value::String(s) => match s.strip_prefix('$') {
            Some(reference) => env
                .lookup(reference)
                .ok_or_else(|| format!("unresolved reference ${reference}")),
            None => Ok(expr.clone()),
        },
        Value::Object(map) if map.len() == 1 => {
            let (op, args) = map.iter().next().ok_or("empty expression")?;
            match (op.as_str(), args) {
                ("add", Value::Array(items)) | ("sub", Value::Array(items)) => {
                    let mut numbers = Vec::new();
                    for item in items {
                        let value = eval_expr(item, env)?;
                        numbers.push(
                            value
                                .as_f64()
                                .ok_or_else(|| format!("{op} expects numbers, got {value}"))?,
                        );
                    }
                    let mut iter = numbers.into_iter();
                    let first = iter.next().ok_or_else(|| format!("{op} needs operands"))?;
                    let result = if op == "add" {
                        first + iter.sum::<f64>()
                    } else {
                        iter.fold(first, |acc, n| acc - n)
                    };
                    Ok(number_value(result))
                }
                ("concat", Value::Array(items)) => {
                    let mut out = String::new();
                    for item in items {
                        out.push_str(&crate::template::json_to_text(&eval_expr(item, env)?));
                    }
                    Ok(Value::String(out))
                }
                // Not an operator: treat as a plain one-field object
                _ => {
                    let mut out = Map::with_capacity(1);
                    out.insert(op.clone(), eval_expr(args, env)?);
                    Ok(Value::Object(out))
                }
            }
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), eval_expr(value, env)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(item, env)?);
            }
            Ok(Value::Array(out))
        }
        _ => Ok(expr.clone()),
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        json!(n as i64)
    } else {
        json!(n)
    }
}

fn run_step(
    step: &OpStep,
    config: &ResourceConfig,
    items: &mut BTreeMap<String, Value>,
    env: &OpEnv<'_>,
) -> std::result::Result<Value, String> {
    let resolve_id = |env: &OpEnv<'_>| -> std::result::Result<String, String> {
        let expr = step.id.as_ref().ok_or("step requires an id")?;
        Ok(crate::template::json_to_text(&eval_expr(expr, env)?))
    };
    let mut scratch = ResourceInner {
        items: std::mem::take(items),
        seed: BTreeMap::new(),
    };
    let result = (|| match step.action {
        OpAction::Read => {
            let id = resolve_id(env)?;
            get_inner(&scratch, config, &id).map_err(|e| e.to_string())
        }
        OpAction::Create => {
            let expr = step.set.as_ref().ok_or("create requires set")?;
            let obj = eval_expr(expr, env)?;
            create_inner(&mut scratch, config, obj).map_err(|e| e.to_string())
        }
        OpAction::Update => {
            let id = resolve_id(env)?;
            let expr = step.set.as_ref().ok_or("update requires set")?;
            let patch = eval_expr(expr, env)?;
            update_inner(&mut scratch, config, &id, patch).map_err(|e| e.to_string())
        }
        OpAction::Delete => {
            let id = resolve_id(env)?;
            delete_inner(&mut scratch, config, &id);
            Ok(Value::Null)
        }
        OpAction::Set => {
            let id = resolve_id(env)?;
            let expr = step.set.as_ref().ok_or("set requires set")?;
            let mut obj = eval_expr(expr, env)?;
            if let Some(map) = obj.as_object_mut() {
                map.insert(config.id_field.clone(), json!(id.clone()));
            }
            delete_inner(&mut scratch, config, &id);
            create_inner(&mut scratch, config, obj).map_err(|e| e.to_string())
        }
    })();
    *items = scratch.items;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_config() -> ResourceConfig {
        ResourceConfig {
            name: "users".to_string(),
            base_path: Some("/api/users".to_string()),
            id_field: "id".to_string(),
            parent_field: None,
            seed_data: vec![json!({"id": "1", "name": "Alice"})],
            max_items: None,
        }
    }

    #[tokio::test]
    async fn seed_then_list() {
        let store = StatefulStore::new();
        store.register(users_config()).await;
        let page = store.list("users", &ListQuery::default()).await.expect("list");
        assert_eq!(page.meta.total, 1);
        assert_eq!(page.meta.limit, 100);
        assert_eq!(page.data[0]["name"], "Alice");
    }

    #[tokio::test]
    async fn create_get_roundtrip_with_auto_fields() {
        let store = StatefulStore::new();
        store.register(users_config()).await;
        let created = store
            .create("users", json!({"name": "Bob"}))
            .await
            .expect("create");
        let id = created["id"].as_str().expect("auto id").to_string();
        assert!(created.get("createdAt").is_some());
        assert!(created.get("updatedAt").is_some());

        let fetched = store.get("users", &id).await.expect("get");
        assert_eq!(fetched["name"], "Bob");
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = StatefulStore::new();
        store.register(users_config()).await;
        store
            .update("users", "1", json!({"role": "admin"}))
            .await
            .expect("update");
        let fetched = store.get("users", "1").await.expect("get");
        assert_eq!(fetched["name"], "Alice");
        assert_eq!(fetched["role"], "admin");
    }

    #[tokio::test]
    async fn reset_restores_seed_exactly() {
        let store = StatefulStore::new();
        store.register(users_config()).await;
        store.create("users", json!({"name": "Bob"})).await.expect("create");
        store.delete("users", "1").await.expect("delete");
        store.reset(Some("users")).await.expect("reset");
        let page = store.list("users", &ListQuery::default()).await.expect("list");
        assert_eq!(page.meta.total, 1);
        assert_eq!(page.data[0]["id"], "1");
        assert_eq!(page.data[0]["name"], "Alice");
    }

    #[tokio::test]
    async fn duplicate_id_conflicts() {
        let store = StatefulStore::new();
        store.register(users_config()).await;
        let err = store
            .create("users", json!({"id": "1", "name": "Clone"}))
            .await
            .expect_err("conflict");
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn capacity_bound_maps_to_507() {
        let mut config = users_config();
        config.max_items = Some(1);
        let store = StatefulStore::new();
        store.register(config).await;
        let err = store
            .create("users", json!({"name": "Overflow"}))
            .await
            .expect_err("full");
        assert_eq!(err.http_status(), 507);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = StatefulStore::new();
        store.register(users_config()).await;
        store.delete("users", "missing").await.expect("idempotent");
        store.delete("users", "1").await.expect("delete");
        store.delete("users", "1").await.expect("still ok");
    }

    #[tokio::test]
    async fn list_filters_sorts_and_paginates() {
        let store = StatefulStore::new();
        let mut config = users_config();
        config.seed_data = vec![
            json!({"id": "1", "name": "Alice", "team": "core"}),
            json!({"id": "2", "name": "Bob", "team": "core"}),
            json!({"id": "3", "name": "Carol", "team": "infra"}),
        ];
        store.register(config).await;

        let mut query = ListQuery {
            filters: HashMap::from([("team".to_string(), "core".to_string())]),
            sort: Some("-name".to_string()),
            limit: Some(1),
            ..Default::default()
        };
        let page = store.list("users", &query).await.expect("list");
        assert_eq!(page.meta.total, 2);
        assert_eq!(page.meta.count, 1);
        assert_eq!(page.data[0]["name"], "Bob");

        query.offset = Some(1);
        let page = store.list("users", &query).await.expect("list");
        assert_eq!(page.data[0]["name"], "Alice");
    }

    #[tokio::test]
    async fn parent_scoped_uniqueness() {
        let store = StatefulStore::new();
        store
            .register(ResourceConfig {
                name: "comments".to_string(),
                base_path: None,
                id_field: "id".to_string(),
                parent_field: Some("postId".to_string()),
                seed_data: vec![],
                max_items: None,
            })
            .await;

        store
            .create("comments", json!({"id": "c1", "postId": "p1"}))
            .await
            .expect("first");
        // Same id under a different parent is fine
        store
            .create("comments", json!({"id": "c1", "postId": "p2"}))
            .await
            .expect("different parent");
        // Same id under the same parent conflicts
        let err = store
            .create("comments", json!({"id": "c1", "postId": "p1"}))
            .await
            .expect_err("conflict");
        assert_eq!(err.kind(), "conflict");

        let page = store
            .list(
                "comments",
                &ListQuery {
                    parent_id: Some("p1".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(page.meta.total, 1);
    }

    #[tokio::test]
    async fn transfer_funds_is_atomic() {
        let store = StatefulStore::new();
        store
            .register(ResourceConfig {
                name: "accounts".to_string(),
                base_path: None,
                id_field: "id".to_string(),
                parent_field: None,
                seed_data: vec![
                    json!({"id": "a", "balance": 100}),
                    json!({"id": "b", "balance": 5}),
                ],
                max_items: None,
            })
            .await;

        let op = CustomOperation {
            name: "TransferFunds".to_string(),
            params: vec!["from".to_string(), "to".to_string(), "amount".to_string()],
            steps: vec![
                OpStep {
                    action: OpAction::Read,
                    resource: "accounts".to_string(),
                    id: Some(json!("$from")),
                    set: None,
                    store_as: Some("src".to_string()),
                },
                OpStep {
                    action: OpAction::Read,
                    resource: "accounts".to_string(),
                    id: Some(json!("$to")),
                    set: None,
                    store_as: Some("dst".to_string()),
                },
                OpStep {
                    action: OpAction::Update,
                    resource: "accounts".to_string(),
                    id: Some(json!("$from")),
                    set: Some(json!({"balance": {"sub": ["$src.balance", "$amount"]}})),
                    store_as: None,
                },
                OpStep {
                    action: OpAction::Update,
                    resource: "accounts".to_string(),
                    id: Some(json!("$to")),
                    set: Some(json!({"balance": {"add": ["$dst.balance", "$amount"]}})),
                    store_as: None,
                },
            ],
        };

        let params = HashMap::from([
            ("from".to_string(), json!("a")),
            ("to".to_string(), json!("b")),
            ("amount".to_string(), json!(30)),
        ]);
        store.run_operation(&op, &params).await.expect("transfer");
        assert_eq!(store.get("accounts", "a").await.expect("a")["balance"], 70);
        assert_eq!(store.get("accounts", "b").await.expect("b")["balance"], 35);

        // A failing step rolls the whole pipeline back
        let bad_params = HashMap::from([
            ("from".to_string(), json!("missing")),
            ("to".to_string(), json!("b")),
            ("amount".to_string(), json!(1)),
        ]);
        store
            .run_operation(&op, &bad_params)
            .await
            .expect_err("unknown account");
        assert_eq!(store.get("accounts", "b").await.expect("b")["balance"], 35);
    }
}
