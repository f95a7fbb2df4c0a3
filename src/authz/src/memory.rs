//! In-memory policy engine
//!
//! Holds grants and a resource registry in process. Supports failure injection and
//! counts backend calls so callers can assert when the engine was contacted.

use async_trait::async_trait;
use std::cmp::Ordering as PathOrder;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::authcenter::adaptor;
use crate::client::{
    merge_skipped, partition_skipped, Authorizer, ResourceHandler, AUTH_DISABLED_REASON,
};
use crate::error::{AuthzError, Result};
use crate::meta::{
    Action, AuthAttribute, AuthorizedResource, BackendResource, Decision, InitConfig, Page,
    RegisterInfo, ResourceAttribute, ResourceEntity, ResourceType, RscTypeAndId, ScopeInfo,
    UserInfo, GLOBAL_SCOPE,
};

const SYSTEM_ID: &str = "bk_cmdb";

/// Permission on an engine resource type; `resource_id: None` covers every instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Grant {
    action_id: String,
    resource_type: String,
    resource_id: Option<BackendResource>,
}

/// Snapshot of how often each backend operation ran
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub authorize: u64,
    pub business_list: u64,
    pub register: u64,
    pub deregister: u64,
    pub update: u64,
}

#[derive(Default)]
struct Counters {
    authorize: AtomicU64,
    business_list: AtomicU64,
    register: AtomicU64,
    deregister: AtomicU64,
    update: AtomicU64,
}

type RegistryKey = (String, BackendResource);

/// (tenant, user name)
type GrantKey = (String, String);

fn grant_key(user: &UserInfo) -> GrantKey {
    (user.supplier_account.clone(), user.user_name.clone())
}

/// Layer by layer: type, then numeric id, then the raw id for non-numeric ones
fn path_order(a: &BackendResource, b: &BackendResource) -> PathOrder {
    for (x, y) in a.iter().zip(b.iter()) {
        let order = x.resource_type.cmp(&y.resource_type).then_with(|| {
            match (x.resource_id.parse::<i64>(), y.resource_id.parse::<i64>()) {
                (Ok(m), Ok(n)) => m.cmp(&n),
                (Ok(_), Err(_)) => PathOrder::Less,
                (Err(_), Ok(_)) => PathOrder::Greater,
                (Err(_), Err(_)) => x.resource_id.cmp(&y.resource_id),
            }
        });
        if order.is_ne() {
            return order;
        }
    }
    a.len().cmp(&b.len())
}

/// Policy engine kept entirely in memory
pub struct InMemoryAuthCenter {
    enabled: bool,
    grants: Arc<RwLock<HashMap<GrantKey, HashSet<Grant>>>>,
    registry: Arc<RwLock<HashMap<RegistryKey, ResourceEntity>>>,
    model: Arc<RwLock<Option<InitConfig>>>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    counters: Counters,
}

impl InMemoryAuthCenter {
    /// Engine with enforcement on
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// Engine with enforcement off; every check passes
    pub fn disabled() -> Self {
        Self::with_enabled(false)
    }

    fn with_enabled(enabled: bool) -> Self {
        Self {
            enabled,
            grants: Arc::new(RwLock::new(HashMap::new())),
            registry: Arc::new(RwLock::new(HashMap::new())),
            model: Arc::new(RwLock::new(None)),
            unavailable: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    // Grant helpers take a bare user name for the default tenant, or a `&UserInfo`.

    /// Allow `user` exactly the operation `attr` describes
    pub async fn grant(&self, user: impl Into<UserInfo>, attr: &ResourceAttribute) -> Result<()> {
        let grant = Grant {
            action_id: adaptor::action_id(attr)?.to_string(),
            resource_type: adaptor::resource_type_id(attr)?.to_string(),
            resource_id: Some(adaptor::resource_path(attr)?),
        };
        self.insert_grant(user, grant).await;
        Ok(())
    }

    /// Allow `user` an action on every instance of a type within a scope
    pub async fn grant_type(
        &self,
        user: impl Into<UserInfo>,
        resource_type: ResourceType,
        action: Action,
        business_id: i64,
    ) -> Result<()> {
        let attr = ResourceAttribute::new(resource_type, action).with_business(business_id);
        let grant = Grant {
            action_id: adaptor::action_id(&attr)?.to_string(),
            resource_type: adaptor::resource_type_id(&attr)?.to_string(),
            resource_id: None,
        };
        self.insert_grant(user, grant).await;
        Ok(())
    }

    /// Make a business visible to `user`
    pub async fn grant_business(&self, user: impl Into<UserInfo>, business_id: i64) {
        self.insert_grant(user, Self::business_grant(business_id)).await;
    }

    pub async fn revoke_business(&self, user: impl Into<UserInfo>, business_id: i64) {
        let key = grant_key(&user.into());
        let mut grants = self.grants.write().await;
        if let Some(set) = grants.get_mut(&key) {
            set.remove(&Self::business_grant(business_id));
        }
    }

    /// Allow `user` to open a system-level entry
    pub async fn grant_admin_entrance(&self, user: impl Into<UserInfo>, action_id: &str) {
        let grant = Grant {
            action_id: action_id.to_string(),
            resource_type: adaptor::SYS_MANAGEMENT.to_string(),
            resource_id: None,
        };
        self.insert_grant(user, grant).await;
    }

    /// Allow `user` to read audit logs of a business
    pub async fn grant_audit(&self, user: impl Into<UserInfo>, business_id: i64) {
        let grant = Grant {
            action_id: "find".to_string(),
            resource_type: adaptor::AUDIT_LOG.to_string(),
            resource_id: Some(vec![RscTypeAndId::new(
                adaptor::BUSINESS,
                business_id.to_string(),
            )]),
        };
        self.insert_grant(user, grant).await;
    }

    fn business_grant(business_id: i64) -> Grant {
        Grant {
            action_id: "find".to_string(),
            resource_type: adaptor::BUSINESS.to_string(),
            resource_id: Some(vec![RscTypeAndId::new(
                adaptor::BUSINESS,
                business_id.to_string(),
            )]),
        }
    }

    async fn insert_grant(&self, user: impl Into<UserInfo>, grant: Grant) {
        let key = grant_key(&user.into());
        let mut grants = self.grants.write().await;
        grants.entry(key).or_default().insert(grant);
    }

    /// Make every backend call fail as if the engine were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every backend call
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            authorize: self.counters.authorize.load(Ordering::SeqCst),
            business_list: self.counters.business_list.load(Ordering::SeqCst),
            register: self.counters.register.load(Ordering::SeqCst),
            deregister: self.counters.deregister.load(Ordering::SeqCst),
            update: self.counters.update.load(Ordering::SeqCst),
        }
    }

    /// Registered entities, ordered by type then path
    pub async fn registered(&self) -> Vec<ResourceEntity> {
        let registry = self.registry.read().await;
        let mut entities: Vec<ResourceEntity> = registry.values().cloned().collect();
        entities.sort_by(|a, b| {
            a.resource_type
                .cmp(&b.resource_type)
                .then_with(|| path_order(&a.resource_id, &b.resource_id))
        });
        entities
    }

    pub async fn is_registered(&self, attr: &ResourceAttribute) -> Result<bool> {
        let entity = adaptor::resource_entity(attr, SYSTEM_ID)?;
        let registry = self.registry.read().await;
        Ok(registry.contains_key(&(entity.resource_type, entity.resource_id)))
    }

    /// Meta-model stored by the last `init`
    pub async fn model(&self) -> Option<InitConfig> {
        self.model.read().await.clone()
    }

    /// Simulated round trip: latency then availability check
    async fn backend(&self, counter: &AtomicU64) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthzError::Indeterminate(
                "policy engine unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn matches(grants: &HashSet<Grant>, action_id: &str, resource_type: &str, path: &BackendResource) -> bool {
        grants.iter().any(|g| {
            g.action_id == action_id
                && g.resource_type == resource_type
                && g.resource_id.as_ref().map_or(true, |id| id == path)
        })
    }

    fn entities(&self, resources: &[ResourceAttribute]) -> Result<Vec<ResourceEntity>> {
        resources
            .iter()
            .filter(|r| !r.is_skip())
            .map(|r| adaptor::resource_entity(r, SYSTEM_ID))
            .collect()
    }

    async fn remove_entities(&self, keys: Vec<RegistryKey>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.backend(&self.counters.deregister).await?;

        let mut registry = self.registry.write().await;
        for key in keys {
            registry.remove(&key);
        }
        Ok(())
    }
}

impl Default for InMemoryAuthCenter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authorizer for InMemoryAuthCenter {
    async fn authorize(&self, attribute: &AuthAttribute) -> Result<Decision> {
        let decisions = self
            .authorize_batch(&attribute.user, &attribute.resources)
            .await?;
        Ok(decisions
            .into_iter()
            .find(|d| !d.authorized)
            .unwrap_or_else(|| {
                if self.enabled {
                    Decision::allow("authorized")
                } else {
                    Decision::allow(AUTH_DISABLED_REASON)
                }
            }))
    }

    async fn authorize_batch(
        &self,
        user: &UserInfo,
        resources: &[ResourceAttribute],
    ) -> Result<Vec<Decision>> {
        if !self.enabled {
            return Ok(vec![Decision::allow(AUTH_DISABLED_REASON); resources.len()]);
        }

        let (checked, slots) = partition_skipped(resources);
        if checked.is_empty() {
            return merge_skipped(&slots, Vec::new());
        }

        self.backend(&self.counters.authorize).await?;

        let empty = HashSet::new();
        let grants = self.grants.read().await;
        let user_grants = grants.get(&grant_key(user)).unwrap_or(&empty);

        let decisions = checked
            .iter()
            .map(|r| {
                let action_id = adaptor::action_id(r)?;
                let resource_type = adaptor::resource_type_id(r)?;
                let path = adaptor::resource_path(r)?;
                Ok(if Self::matches(user_grants, action_id, resource_type, &path) {
                    Decision::allow("authorized")
                } else {
                    Decision::deny(format!(
                        "user {} has no permission to {action_id} {resource_type}",
                        user.user_name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        merge_skipped(&slots, decisions)
    }

    async fn get_authorized_business_list(&self, user: &UserInfo) -> Result<Vec<i64>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        self.backend(&self.counters.business_list).await?;

        let grants = self.grants.read().await;
        let mut ids = BTreeSet::new();
        for grant in grants.get(&grant_key(user)).into_iter().flatten() {
            if grant.resource_type != adaptor::BUSINESS || grant.action_id != "find" {
                continue;
            }
            if let Some(path) = &grant.resource_id {
                ids.insert(adaptor::business_id_of(path)?);
            }
        }
        Ok(ids.into_iter().collect())
    }

    async fn admin_entrance(&self, user: &UserInfo) -> Result<Vec<String>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        self.backend(&self.counters.authorize).await?;

        let grants = self.grants.read().await;
        let mut actions: Vec<String> = grants
            .get(&grant_key(user))
            .into_iter()
            .flatten()
            .filter(|g| g.resource_type == adaptor::SYS_MANAGEMENT)
            .map(|g| g.action_id.clone())
            .collect();
        actions.sort();
        actions.dedup();
        Ok(actions)
    }

    async fn get_authorized_audit_list(
        &self,
        user: &UserInfo,
        business_id: i64,
    ) -> Result<Vec<AuthorizedResource>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        self.backend(&self.counters.authorize).await?;

        let grants = self.grants.read().await;
        let resource_ids: Vec<BackendResource> = grants
            .get(&grant_key(user))
            .into_iter()
            .flatten()
            .filter(|g| g.resource_type == adaptor::AUDIT_LOG)
            .filter_map(|g| g.resource_id.clone())
            .filter(|path| {
                business_id == GLOBAL_SCOPE
                    || adaptor::business_id_of(path).ok() == Some(business_id)
            })
            .collect();

        if resource_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![AuthorizedResource {
            action_id: "find".to_string(),
            resource_type: adaptor::AUDIT_LOG.to_string(),
            resource_ids,
        }])
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl ResourceHandler for InMemoryAuthCenter {
    async fn register_resource(&self, resources: &[ResourceAttribute]) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let entities = self.entities(resources)?;
        if entities.is_empty() {
            return Ok(());
        }
        self.backend(&self.counters.register).await?;

        let mut registry = self.registry.write().await;
        for entity in entities {
            registry
                .entry((entity.resource_type.clone(), entity.resource_id.clone()))
                .or_insert(entity);
        }
        Ok(())
    }

    async fn dry_run_register_resource(
        &self,
        resources: &[ResourceAttribute],
    ) -> Result<RegisterInfo> {
        let resources = if self.enabled {
            self.entities(resources)?
        } else {
            Vec::new()
        };
        Ok(RegisterInfo {
            creator_type: "app".to_string(),
            creator_id: SYSTEM_ID.to_string(),
            resources,
        })
    }

    async fn deregister_resource(&self, resources: &[ResourceAttribute]) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let keys = self
            .entities(resources)?
            .into_iter()
            .map(|e| (e.resource_type, e.resource_id))
            .collect();
        self.remove_entities(keys).await
    }

    async fn raw_deregister_resource(
        &self,
        _scope: &ScopeInfo,
        resources: &[BackendResource],
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let keys = resources
            .iter()
            .map(|path| {
                let last = path.last().ok_or_else(|| {
                    AuthzError::InvalidInput("cannot deregister an empty resource path".to_string())
                })?;
                Ok((last.resource_type.clone(), path.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        self.remove_entities(keys).await
    }

    async fn update_resource(&self, resource: &ResourceAttribute) -> Result<()> {
        if !self.enabled || resource.is_skip() {
            return Ok(());
        }
        let entity = adaptor::resource_entity(resource, SYSTEM_ID)?;
        self.backend(&self.counters.update).await?;

        let mut registry = self.registry.write().await;
        registry.insert(
            (entity.resource_type.clone(), entity.resource_id.clone()),
            entity,
        );
        Ok(())
    }

    async fn list_resources(
        &self,
        resource: &ResourceAttribute,
        page: Page,
    ) -> Result<Vec<BackendResource>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let resource_type = adaptor::resource_type_id(resource)?;
        let scope = adaptor::scope(resource, SYSTEM_ID);

        let mut paths: Vec<BackendResource> = self
            .registered()
            .await
            .into_iter()
            .filter(|e| e.resource_type == resource_type && e.scope == scope)
            .map(|e| e.resource_id)
            .collect();
        paths.sort_by(path_order);

        Ok(paths
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn init(&self, config: &InitConfig) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.backend(&self.counters.register).await?;
        *self.model.write().await = Some(config.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if self.enabled && self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthzError::Indeterminate(
                "policy engine unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BusinessScope;

    fn alice() -> UserInfo {
        UserInfo::new("alice", "0")
    }

    #[tokio::test]
    async fn test_exact_grant() {
        let engine = InMemoryAuthCenter::new();
        let attr = ResourceAttribute::new(ResourceType::Business, Action::Update)
            .with_business(5)
            .with_instance(5);
        engine.grant("alice", &attr).await.unwrap();

        let other = attr.clone().with_business(6).with_instance(6);
        let decisions = engine
            .authorize_batch(&alice(), &[attr, other])
            .await
            .unwrap();

        assert!(decisions[0].authorized);
        assert!(!decisions[1].authorized);
        assert_eq!(engine.calls().authorize, 1);
    }

    #[tokio::test]
    async fn test_type_grant_covers_instances() {
        let engine = InMemoryAuthCenter::new();
        engine
            .grant_type("alice", ResourceType::HostFavorite, Action::Update, 0)
            .await
            .unwrap();

        let attr = ResourceAttribute::new(ResourceType::HostFavorite, Action::Update).with_name("fav-1");
        let decision = engine
            .authorize(&AuthAttribute::new(alice(), vec![attr]))
            .await
            .unwrap();
        assert!(decision.authorized);
    }

    #[tokio::test]
    async fn test_business_list_sorted_unique() {
        let engine = InMemoryAuthCenter::new();
        for id in [9, 3, 9, 1] {
            engine.grant_business("alice", id).await;
        }
        assert_eq!(
            engine.get_authorized_business_list(&alice()).await.unwrap(),
            vec![1, 3, 9]
        );

        engine.revoke_business("alice", 3).await;
        assert_eq!(
            engine.get_authorized_business_list(&alice()).await.unwrap(),
            vec![1, 9]
        );
    }

    #[tokio::test]
    async fn test_unavailable_is_indeterminate() {
        let engine = InMemoryAuthCenter::new();
        engine.set_unavailable(true);

        let attr = ResourceAttribute::new(ResourceType::Business, Action::Find);
        let err = engine.authorize_batch(&alice(), &[attr]).await.unwrap_err();
        assert!(err.is_indeterminate());
        assert!(engine.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_registry_pagination() {
        let engine = InMemoryAuthCenter::new();
        let resources: Vec<_> = (1..=5)
            .map(|id| {
                ResourceAttribute::new(ResourceType::Business, Action::Create)
                    .with_instance(id)
                    .with_name(format!("biz-{id}"))
            })
            .collect();
        engine.register_resource(&resources).await.unwrap();

        let query = ResourceAttribute::new(ResourceType::Business, Action::FindMany);
        let page = engine
            .list_resources(&query, Page { offset: 1, limit: 2 })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0], vec![RscTypeAndId::new("business", "2")]);
    }

    #[tokio::test]
    async fn test_registry_pages_in_numeric_id_order() {
        let engine = InMemoryAuthCenter::new();
        let resources: Vec<_> = [10, 2, 11, 1, 3]
            .into_iter()
            .map(|id| {
                ResourceAttribute::new(ResourceType::Business, Action::Create)
                    .with_instance(id)
                    .with_name(format!("biz-{id}"))
            })
            .collect();
        engine.register_resource(&resources).await.unwrap();

        let query = ResourceAttribute::new(ResourceType::Business, Action::FindMany);
        let ids: Vec<String> = engine
            .list_resources(&query, Page { offset: 2, limit: 3 })
            .await
            .unwrap()
            .into_iter()
            .map(|path| path[0].resource_id.clone())
            .collect();
        assert_eq!(ids, vec!["3", "10", "11"]);
    }

    #[tokio::test]
    async fn test_grants_are_per_tenant() {
        let engine = InMemoryAuthCenter::new();
        let other_tenant = UserInfo::new("alice", "1");
        engine.grant_business(&other_tenant, 7).await;
        engine.grant_business("alice", 3).await;

        assert_eq!(
            engine.get_authorized_business_list(&other_tenant).await.unwrap(),
            vec![7]
        );
        assert_eq!(engine.get_authorized_business_list(&alice()).await.unwrap(), vec![3]);

        engine.revoke_business(&other_tenant, 7).await;
        assert!(engine
            .get_authorized_business_list(&other_tenant)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(engine.get_authorized_business_list(&alice()).await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_business_scope_respects_enforcement() {
        let engine = InMemoryAuthCenter::new();
        assert_eq!(
            engine.authorized_business_scope(&alice()).await.unwrap(),
            BusinessScope::Only(vec![])
        );
        engine.grant_business("alice", 4).await;
        assert_eq!(
            engine.authorized_business_scope(&alice()).await.unwrap(),
            BusinessScope::Only(vec![4])
        );

        let disabled = InMemoryAuthCenter::disabled();
        assert!(disabled.get_authorized_business_list(&alice()).await.unwrap().is_empty());
        assert_eq!(
            disabled.authorized_business_scope(&alice()).await.unwrap(),
            BusinessScope::Unrestricted
        );
        assert!(disabled
            .authorized_business_scope(&alice())
            .await
            .unwrap()
            .allows(99));
    }
}
