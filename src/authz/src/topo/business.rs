use futures::future::try_join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use super::{
    BusinessStore, ContextParams, FindResult, InnerModule, InternalTopology, Query, Record,
    BUSINESS_NAME_FIELD, DEFAULT_FAULT_MODULE_FLAG, DEFAULT_FAULT_MODULE_NAME, DEFAULT_FIELD,
    DEFAULT_RES_MODULE_FLAG, DEFAULT_RES_MODULE_NAME, DEFAULT_RES_SET_FLAG, DEFAULT_RES_SET_NAME,
    MAX_QUERY_LIMIT, MODULE_ID_FIELD, MODULE_NAME_FIELD, PARENT_ID_FIELD, SET_ID_FIELD,
    SET_NAME_FIELD,
};
use crate::cache::{BusinessScope, BusinessScopeCache};
use crate::error::{AuthzError, Result};
use crate::parser::BUSINESS_ID_FIELD;
use crate::registrar::Registrar;

/// Business create, delete, update and search
pub struct BusinessOperation<S: BusinessStore> {
    store: Arc<S>,
    registrar: Registrar,
    cache: Arc<BusinessScopeCache>,
}

impl<S: BusinessStore> BusinessOperation<S> {
    pub fn new(store: Arc<S>, registrar: Registrar, cache: Arc<BusinessScopeCache>) -> Self {
        Self {
            store,
            registrar,
            cache,
        }
    }

    /// Create a business, register it, then create its idle set and modules.
    ///
    /// The business is registered only after the store accepted it. A registration failure
    /// fails the call but leaves the created record in place.
    pub async fn create_business(&self, params: &ContextParams, data: Record) -> Result<i64> {
        if !data.get(DEFAULT_FIELD).map_or(false, Value::is_i64) {
            return Err(AuthzError::InvalidInput(format!(
                "create business requires an integer {DEFAULT_FIELD} field"
            )));
        }
        let name = business_name(&data)?.ok_or_else(|| {
            AuthzError::InvalidInput(format!("create business requires {BUSINESS_NAME_FIELD}"))
        })?;

        let business_id = self.store.create_business(params, data).await.map_err(|e| {
            error!(request_id = %params.request_id, error = %e, "create business failed");
            e
        })?;

        if let Err(e) = self.registrar.register_business(business_id, &name).await {
            error!(
                request_id = %params.request_id,
                business_id,
                name = %name,
                error = %e,
                "business created but registration failed"
            );
            return Err(e);
        }

        let set_id = self
            .store
            .create_set(
                params,
                business_id,
                record(json!({
                    BUSINESS_ID_FIELD: business_id,
                    PARENT_ID_FIELD: business_id,
                    SET_NAME_FIELD: DEFAULT_RES_SET_NAME,
                    DEFAULT_FIELD: DEFAULT_RES_SET_FLAG,
                })),
            )
            .await?;

        let modules = [
            (DEFAULT_RES_MODULE_NAME, DEFAULT_RES_MODULE_FLAG),
            (DEFAULT_FAULT_MODULE_NAME, DEFAULT_FAULT_MODULE_FLAG),
        ]
        .into_iter()
        .map(|(module_name, flag)| {
            self.store.create_module(
                params,
                business_id,
                set_id,
                record(json!({
                    SET_ID_FIELD: set_id,
                    PARENT_ID_FIELD: set_id,
                    BUSINESS_ID_FIELD: business_id,
                    MODULE_NAME_FIELD: module_name,
                    DEFAULT_FIELD: flag,
                })),
            )
        });
        try_join_all(modules).await?;

        info!(request_id = %params.request_id, business_id, name = %name, "business created");
        Ok(business_id)
    }

    /// Deregister, then delete. Nothing is deleted when deregistration fails.
    pub async fn delete_business(&self, params: &ContextParams, business_id: i64) -> Result<()> {
        self.registrar.deregister_business(business_id).await.map_err(|e| {
            error!(request_id = %params.request_id, business_id, error = %e, "delete business aborted");
            e
        })?;

        self.store.delete_business(params, business_id).await?;
        info!(request_id = %params.request_id, business_id, "business deleted");
        Ok(())
    }

    /// Update a business; a renamed business is re-registered first
    pub async fn update_business(
        &self,
        params: &ContextParams,
        business_id: i64,
        data: Record,
    ) -> Result<()> {
        if let Some(name) = business_name(&data)? {
            self.registrar.update_business(business_id, &name).await?;
        }
        self.store.update_business(params, business_id, data).await
    }

    /// Search non-default businesses the caller may see
    pub async fn find_business(&self, params: &ContextParams, mut query: Query) -> Result<FindResult> {
        query
            .filter
            .insert(DEFAULT_FIELD.to_string(), Value::from(0));
        if query.limit == 0 || query.limit > MAX_QUERY_LIMIT {
            query.limit = MAX_QUERY_LIMIT;
        }

        let store = &self.store;
        let query = &query;
        self.cache
            .scoped_query(&params.user, |scope| {
                let mut scoped = query.clone();
                if let BusinessScope::Only(ids) = scope {
                    scoped
                        .filter
                        .insert(BUSINESS_ID_FIELD.to_string(), json!({ "$in": ids }));
                }
                async move { store.find_business(params, &scoped).await }
            })
            .await
    }

    /// Idle set and its idle and fault modules.
    ///
    /// The caller must be able to see the business; an unknown business is `InvalidInput`.
    pub async fn get_internal_module(
        &self,
        params: &ContextParams,
        business_id: i64,
    ) -> Result<InternalTopology> {
        let store = &self.store;
        self.cache
            .scoped_query(&params.user, |scope| async move {
                if !scope.allows(business_id) {
                    return Err(AuthzError::Denied(format!(
                        "user {} may not access business {business_id}",
                        params.user.user_name
                    )));
                }

                let (sets, modules) = store
                    .find_default_topology(params, business_id)
                    .await?
                    .ok_or_else(|| {
                        AuthzError::InvalidInput(format!("business {business_id} not found"))
                    })?;
                internal_topology(&sets, &modules)
            })
            .await
    }
}

fn internal_topology(sets: &[Record], modules: &[Record]) -> Result<InternalTopology> {
    let mut topology = InternalTopology::default();
    if let Some(set) = sets.first() {
        topology.set_id = int_field(set, SET_ID_FIELD)?;
        topology.set_name = str_field(set, SET_NAME_FIELD)?;
    }

    topology.module = modules
        .iter()
        .map(|m| {
            Ok(InnerModule {
                module_id: int_field(m, MODULE_ID_FIELD)?,
                module_name: str_field(m, MODULE_NAME_FIELD)?,
            })
        })
        .collect::<Result<_>>()?;
    topology.module.sort_by_key(|m| m.module_id);
    Ok(topology)
}

fn int_field(data: &Record, field: &str) -> Result<i64> {
    data.get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| AuthzError::Store(format!("record has no integer {field}")))
}

fn str_field(data: &Record, field: &str) -> Result<String> {
    data.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AuthzError::Store(format!("record has no string {field}")))
}

fn business_name(data: &Record) -> Result<Option<String>> {
    match data.get(BUSINESS_NAME_FIELD) {
        None => Ok(None),
        Some(Value::String(name)) => Ok(Some(name.clone())),
        Some(other) => Err(AuthzError::InvalidInput(format!(
            "invalid {BUSINESS_NAME_FIELD} value {other}"
        ))),
    }
}

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}
