//! Authorization client and resource registrar contracts
//!
//! `Authorizer` answers decision and scope queries. `ResourceHandler` keeps the policy
//! engine's resource registry in step with entity lifecycle. A backend usually implements
//! both and is used through `Authorize`.

use async_trait::async_trait;

use crate::cache::BusinessScope;
use crate::error::{AuthzError, Result};
use crate::meta::{
    AuthAttribute, AuthorizedResource, BackendResource, Decision, InitConfig, Page,
    RegisterInfo, ResourceAttribute, ScopeInfo, UserInfo,
};

/// Reason attached to decisions answered locally for skip-action resources
pub const SKIP_ACTION_REASON: &str = "skip action";

/// Reason attached to decisions answered while enforcement is disabled
pub const AUTH_DISABLED_REASON: &str = "authorization disabled";

/// Decision and scope queries against the policy engine.
///
/// A negative decision is `Ok(Decision { authorized: false, .. })`. Failing to reach the
/// engine is `Err(AuthzError::Indeterminate)` and must never be read as an allow.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Whether all of `attribute.resources` may be acted on
    async fn authorize(&self, attribute: &AuthAttribute) -> Result<Decision>;

    /// One decision per resource, same order; any backend failure fails the whole batch
    async fn authorize_batch(
        &self,
        user: &UserInfo,
        resources: &[ResourceAttribute],
    ) -> Result<Vec<Decision>>;

    /// Businesses the user may see, ascending and deduplicated.
    ///
    /// Only meaningful while `enabled()`: with enforcement off the list is empty and does not
    /// restrict anything. Callers that filter by it should use `authorized_business_scope`.
    async fn get_authorized_business_list(&self, user: &UserInfo) -> Result<Vec<i64>>;

    /// Business filter for `user`, `Unrestricted` when enforcement is off
    async fn authorized_business_scope(&self, user: &UserInfo) -> Result<BusinessScope> {
        if !self.enabled() {
            return Ok(BusinessScope::Unrestricted);
        }
        let mut ids = self.get_authorized_business_list(user).await?;
        ids.sort_unstable();
        ids.dedup();
        Ok(BusinessScope::Only(ids))
    }

    /// System-level entries the user may open
    async fn admin_entrance(&self, user: &UserInfo) -> Result<Vec<String>>;

    /// Audit log scopes the user may read within a business
    async fn get_authorized_audit_list(
        &self,
        user: &UserInfo,
        business_id: i64,
    ) -> Result<Vec<AuthorizedResource>>;

    /// Whether enforcement is active
    fn enabled(&self) -> bool;
}

/// Registry maintenance against the policy engine.
///
/// Register, update and deregister are idempotent: registering an existing resource or
/// deregistering an absent one succeeds.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn register_resource(&self, resources: &[ResourceAttribute]) -> Result<()>;

    /// Compute what `register_resource` would send without committing it
    async fn dry_run_register_resource(
        &self,
        resources: &[ResourceAttribute],
    ) -> Result<RegisterInfo>;

    async fn deregister_resource(&self, resources: &[ResourceAttribute]) -> Result<()>;

    /// Deregister by engine-native ids when local descriptors are gone
    async fn raw_deregister_resource(
        &self,
        scope: &ScopeInfo,
        resources: &[BackendResource],
    ) -> Result<()>;

    async fn update_resource(&self, resource: &ResourceAttribute) -> Result<()>;

    /// Registered resources matching the attribute's type and scope
    async fn list_resources(
        &self,
        resource: &ResourceAttribute,
        page: Page,
    ) -> Result<Vec<BackendResource>>;

    /// Bootstrap the engine's meta-model
    async fn init(&self, config: &InitConfig) -> Result<()>;

    /// Backend liveness
    async fn ping(&self) -> Result<()>;
}

/// A backend offering both decisions and registry maintenance
pub trait Authorize: Authorizer + ResourceHandler {}

impl<T: Authorizer + ResourceHandler + ?Sized> Authorize for T {}

/// Turn a negative decision into `AuthzError::Denied`
pub fn enforce(decision: Decision) -> Result<()> {
    if decision.authorized {
        Ok(())
    } else {
        Err(AuthzError::Denied(decision.reason))
    }
}

/// Split resources into those needing a backend decision and the positions of skipped ones.
///
/// Returns the non-skip resources in order together with, for each input slot, the index
/// into that list or `None` for a skip-action slot.
pub(crate) fn partition_skipped(
    resources: &[ResourceAttribute],
) -> (Vec<&ResourceAttribute>, Vec<Option<usize>>) {
    let mut checked = Vec::with_capacity(resources.len());
    let mut slots = Vec::with_capacity(resources.len());

    for resource in resources {
        if resource.is_skip() {
            slots.push(None);
        } else {
            slots.push(Some(checked.len()));
            checked.push(resource);
        }
    }

    (checked, slots)
}

/// Re-assemble backend decisions into input order, filling skipped slots with allows
pub(crate) fn merge_skipped(
    slots: &[Option<usize>],
    decisions: Vec<Decision>,
) -> Result<Vec<Decision>> {
    let expected = slots.iter().filter(|s| s.is_some()).count();
    if decisions.len() != expected {
        return Err(AuthzError::Indeterminate(format!(
            "policy engine returned {} decisions for {} resources",
            decisions.len(),
            expected
        )));
    }

    Ok(slots
        .iter()
        .map(|slot| match slot {
            Some(i) => decisions[*i].clone(),
            None => Decision::allow(SKIP_ACTION_REASON),
        })
        .collect())
}
