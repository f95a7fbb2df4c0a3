//! Business lifecycle on top of a record store
//!
//! `BusinessOperation` drives a `BusinessStore` and keeps the policy engine registry and the
//! authorized business cache consistent with it.

mod business;

pub use business::BusinessOperation;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering as SortOrder;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{AuthzError, Result};
use crate::meta::UserInfo;
use crate::parser::BUSINESS_ID_FIELD;

/// A stored instance, field name to value
pub type Record = Map<String, Value>;

pub const BUSINESS_NAME_FIELD: &str = "bk_biz_name";
pub const DEFAULT_FIELD: &str = "default";
pub const PARENT_ID_FIELD: &str = "bk_parent_id";
pub const SET_ID_FIELD: &str = "bk_set_id";
pub const SET_NAME_FIELD: &str = "bk_set_name";
pub const MODULE_ID_FIELD: &str = "bk_module_id";
pub const MODULE_NAME_FIELD: &str = "bk_module_name";

pub const DEFAULT_RES_SET_NAME: &str = "idle pool";
pub const DEFAULT_RES_MODULE_NAME: &str = "idle host";
pub const DEFAULT_FAULT_MODULE_NAME: &str = "fault host";

pub const DEFAULT_RES_SET_FLAG: i64 = 1;
pub const DEFAULT_RES_MODULE_FLAG: i64 = 1;
pub const DEFAULT_FAULT_MODULE_FLAG: i64 = 2;

/// Largest page a business search may return
pub const MAX_QUERY_LIMIT: u64 = 500;

/// Caller of a lifecycle operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextParams {
    pub user: UserInfo,
    pub request_id: String,
}

impl ContextParams {
    pub fn new(user: UserInfo) -> Self {
        Self {
            user,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Record search.
///
/// A filter value is matched by equality, or by membership for `{"$in": [..]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub filter: Record,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub limit: u64,
    /// Comma separated sort fields, `-` prefix for descending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
}

impl Query {
    pub fn matches(&self, record: &Record) -> bool {
        self.filter.iter().all(|(field, expected)| {
            let actual = record.get(field).unwrap_or(&Value::Null);
            match expected.get("$in").and_then(Value::as_array) {
                Some(candidates) => candidates.contains(actual),
                None => actual == expected,
            }
        })
    }
}

/// Order records by a `sort` expression such as `"-bk_biz_id,bk_biz_name"`
pub fn sort_records(records: &mut [&Record], sort: &str) {
    let keys: Vec<(&str, bool)> = sort
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| match k.strip_prefix('-') {
            Some(field) => (field, true),
            None => (k.strip_prefix('+').unwrap_or(k), false),
        })
        .collect();

    records.sort_by(|a, b| {
        keys.iter()
            .map(|(field, descending)| {
                let order = compare_values(
                    a.get(*field).unwrap_or(&Value::Null),
                    b.get(*field).unwrap_or(&Value::Null),
                );
                if *descending {
                    order.reverse()
                } else {
                    order
                }
            })
            .find(|o| o.is_ne())
            .unwrap_or(SortOrder::Equal)
    });
}

fn compare_values(a: &Value, b: &Value) -> SortOrder {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(SortOrder::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindResult {
    pub count: u64,
    pub info: Vec<Record>,
}

/// A module of the idle pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerModule {
    #[serde(rename = "bk_module_id")]
    pub module_id: i64,
    #[serde(rename = "bk_module_name")]
    pub module_name: String,
}

/// Idle set of a business with its idle and fault modules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTopology {
    #[serde(rename = "bk_set_id")]
    pub set_id: i64,
    #[serde(rename = "bk_set_name")]
    pub set_name: String,
    pub module: Vec<InnerModule>,
}

/// Persistence of businesses and their default topology
#[async_trait]
pub trait BusinessStore: Send + Sync {
    /// Create a business, returning its id
    async fn create_business(&self, params: &ContextParams, data: Record) -> Result<i64>;

    async fn create_set(&self, params: &ContextParams, business_id: i64, data: Record) -> Result<i64>;

    async fn create_module(
        &self,
        params: &ContextParams,
        business_id: i64,
        set_id: i64,
        data: Record,
    ) -> Result<i64>;

    /// Delete a business with its sets and modules
    async fn delete_business(&self, params: &ContextParams, business_id: i64) -> Result<()>;

    async fn update_business(&self, params: &ContextParams, business_id: i64, data: Record) -> Result<()>;

    async fn find_business(&self, params: &ContextParams, query: &Query) -> Result<FindResult>;

    /// Default sets and modules of a business, `None` when the business does not exist
    async fn find_default_topology(
        &self,
        params: &ContextParams,
        business_id: i64,
    ) -> Result<Option<(Vec<Record>, Vec<Record>)>>;
}

#[derive(Default)]
struct Tables {
    businesses: BTreeMap<i64, Record>,
    sets: BTreeMap<i64, Record>,
    modules: BTreeMap<i64, Record>,
}

/// Business store kept in memory
pub struct InMemoryBusinessStore {
    tables: Arc<RwLock<Tables>>,
    next_id: AtomicI64,
    unavailable: AtomicBool,
}

impl InMemoryBusinessStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            next_id: AtomicI64::new(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every store call fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert a business with a fixed id
    pub async fn insert_business(&self, business_id: i64, mut data: Record) {
        data.insert(BUSINESS_ID_FIELD.to_string(), Value::from(business_id));
        let mut tables = self.tables.write().await;
        tables.businesses.insert(business_id, data);
        self.next_id.fetch_max(business_id + 1, Ordering::SeqCst);
    }

    pub async fn business(&self, business_id: i64) -> Option<Record> {
        self.tables.read().await.businesses.get(&business_id).cloned()
    }

    /// Sets and modules belonging to a business
    pub async fn topology(&self, business_id: i64) -> (Vec<Record>, Vec<Record>) {
        let tables = self.tables.read().await;
        let owned = |r: &&Record| r.get(BUSINESS_ID_FIELD) == Some(&Value::from(business_id));
        (
            tables.sets.values().filter(owned).cloned().collect(),
            tables.modules.values().filter(owned).cloned().collect(),
        )
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthzError::Store("business store unavailable".to_string()));
        }
        Ok(())
    }

    fn allocate(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for InMemoryBusinessStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusinessStore for InMemoryBusinessStore {
    async fn create_business(&self, _params: &ContextParams, mut data: Record) -> Result<i64> {
        self.check()?;
        let id = self.allocate();
        data.insert(BUSINESS_ID_FIELD.to_string(), Value::from(id));
        self.tables.write().await.businesses.insert(id, data);
        Ok(id)
    }

    async fn create_set(&self, _params: &ContextParams, business_id: i64, mut data: Record) -> Result<i64> {
        self.check()?;
        let mut tables = self.tables.write().await;
        if !tables.businesses.contains_key(&business_id) {
            return Err(AuthzError::Store(format!("business {business_id} not found")));
        }
        let id = self.allocate();
        data.insert(SET_ID_FIELD.to_string(), Value::from(id));
        tables.sets.insert(id, data);
        Ok(id)
    }

    async fn create_module(
        &self,
        _params: &ContextParams,
        business_id: i64,
        set_id: i64,
        data: Record,
    ) -> Result<i64> {
        self.check()?;
        let mut tables = self.tables.write().await;
        if !tables.businesses.contains_key(&business_id) || !tables.sets.contains_key(&set_id) {
            return Err(AuthzError::Store(format!(
                "set {set_id} of business {business_id} not found"
            )));
        }
        let id = self.allocate();
        let mut data = data;
        data.insert(MODULE_ID_FIELD.to_string(), Value::from(id));
        tables.modules.insert(id, data);
        Ok(id)
    }

    async fn delete_business(&self, _params: &ContextParams, business_id: i64) -> Result<()> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let owned = |r: &Record| r.get(BUSINESS_ID_FIELD) == Some(&Value::from(business_id));
        tables.modules.retain(|_, r| !owned(r));
        tables.sets.retain(|_, r| !owned(r));
        tables.businesses.remove(&business_id);
        Ok(())
    }

    async fn update_business(&self, _params: &ContextParams, business_id: i64, data: Record) -> Result<()> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let Some(record) = tables.businesses.get_mut(&business_id) else {
            return Err(AuthzError::Store(format!("business {business_id} not found")));
        };
        for (field, value) in data {
            if field != BUSINESS_ID_FIELD {
                record.insert(field, value);
            }
        }
        Ok(())
    }

    async fn find_business(&self, _params: &ContextParams, query: &Query) -> Result<FindResult> {
        self.check()?;
        let tables = self.tables.read().await;
        let mut matched: Vec<&Record> = tables
            .businesses
            .values()
            .filter(|r| query.matches(r))
            .collect();
        if let Some(sort) = &query.sort {
            sort_records(&mut matched, sort);
        }

        let limit = if query.limit == 0 { usize::MAX } else { query.limit as usize };
        let info = matched
            .iter()
            .skip(query.start as usize)
            .take(limit)
            .map(|r| {
                if query.fields.is_empty() {
                    (*r).clone()
                } else {
                    r.iter()
                        .filter(|(k, _)| query.fields.contains(k))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                }
            })
            .collect();

        Ok(FindResult {
            count: matched.len() as u64,
            info,
        })
    }

    async fn find_default_topology(
        &self,
        _params: &ContextParams,
        business_id: i64,
    ) -> Result<Option<(Vec<Record>, Vec<Record>)>> {
        self.check()?;
        let tables = self.tables.read().await;
        if !tables.businesses.contains_key(&business_id) {
            return Ok(None);
        }

        let owned = |r: &&Record| r.get(BUSINESS_ID_FIELD) == Some(&Value::from(business_id));
        fn flag(r: &Record) -> Option<i64> {
            r.get(DEFAULT_FIELD).and_then(Value::as_i64)
        }
        let sets = tables
            .sets
            .values()
            .filter(owned)
            .filter(|r| flag(r) == Some(DEFAULT_RES_SET_FLAG))
            .cloned()
            .collect();
        let modules = tables
            .modules
            .values()
            .filter(owned)
            .filter(|r| {
                matches!(flag(r), Some(f) if f == DEFAULT_RES_MODULE_FLAG || f == DEFAULT_FAULT_MODULE_FLAG)
            })
            .cloned()
            .collect();
        Ok(Some((sets, modules)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_query_matches_eq_and_in() {
        let query = Query {
            filter: record(json!({"default": 0, "bk_biz_id": {"$in": [1, 3]}})),
            ..Default::default()
        };

        assert!(query.matches(&record(json!({"default": 0, "bk_biz_id": 3}))));
        assert!(!query.matches(&record(json!({"default": 0, "bk_biz_id": 2}))));
        assert!(!query.matches(&record(json!({"default": 1, "bk_biz_id": 1}))));
    }

    #[test]
    fn test_sort_records() {
        let a = record(json!({"bk_biz_id": 10, "bk_biz_name": "b"}));
        let b = record(json!({"bk_biz_id": 2, "bk_biz_name": "a"}));
        let c = record(json!({"bk_biz_id": 7, "bk_biz_name": "b"}));

        let mut rows = vec![&a, &b, &c];
        sort_records(&mut rows, "bk_biz_id");
        assert_eq!(rows, vec![&b, &c, &a]);

        sort_records(&mut rows, "-bk_biz_name,bk_biz_id");
        assert_eq!(rows, vec![&c, &a, &b]);
    }

    #[tokio::test]
    async fn test_find_business_sorted() {
        let store = InMemoryBusinessStore::new();
        let params = ContextParams::new(UserInfo::new("admin", "0"));
        for (id, name) in [(3, "c"), (12, "a"), (5, "b")] {
            store.insert_business(id, record(json!({"bk_biz_name": name}))).await;
        }

        let query = Query {
            sort: Some("-bk_biz_id".to_string()),
            limit: 2,
            ..Default::default()
        };
        let found = store.find_business(&params, &query).await.unwrap();
        let ids: Vec<_> = found.info.iter().map(|r| r["bk_biz_id"].clone()).collect();
        assert_eq!(found.count, 3);
        assert_eq!(ids, vec![json!(12), json!(5)]);

        let query = Query {
            sort: Some("bk_biz_name".to_string()),
            ..Default::default()
        };
        let found = store.find_business(&params, &query).await.unwrap();
        assert_eq!(found.info[0]["bk_biz_id"], json!(12));
    }

    #[tokio::test]
    async fn test_delete_removes_topology() {
        let store = InMemoryBusinessStore::new();
        let params = ContextParams::new(UserInfo::new("admin", "0"));

        let biz = store
            .create_business(&params, record(json!({"bk_biz_name": "ops"})))
            .await
            .unwrap();
        let set = store
            .create_set(&params, biz, record(json!({"bk_biz_id": biz})))
            .await
            .unwrap();
        store
            .create_module(&params, biz, set, record(json!({"bk_biz_id": biz})))
            .await
            .unwrap();
        assert_eq!(store.topology(biz).await.1.len(), 1);

        store.delete_business(&params, biz).await.unwrap();
        assert!(store.business(biz).await.is_none());
        assert_eq!(store.topology(biz).await, (vec![], vec![]));
    }
}
