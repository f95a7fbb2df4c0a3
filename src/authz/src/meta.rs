//! Resource attribute model
//!
//! Canonical descriptors of "what resource, what action, what scope" produced by the
//! request classifier and consumed by the decision and registration calls.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Business id used when an operation is not bound to a business.
pub const GLOBAL_SCOPE: i64 = 0;

/// Kind of protected resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Matched without naming a concrete type (e.g. identifier search)
    Unspecified,
    HostInstance,
    HostFavorite,
    UserCustom,
    DynamicGrouping,
    ResourceSync,
    Business,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Unspecified => "unspecified",
            ResourceType::HostInstance => "host_instance",
            ResourceType::HostFavorite => "host_favorite",
            ResourceType::UserCustom => "user_custom",
            ResourceType::DynamicGrouping => "dynamic_grouping",
            ResourceType::ResourceSync => "resource_sync",
            ResourceType::Business => "business",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation performed on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Delete,
    DeleteMany,
    Find,
    FindMany,
    Execute,
    Archive,

    /// Matched but intentionally exempt from authorization
    SkipAction,

    // Composite host placement actions
    AddHostToResourcePool,
    MoveHostToModule,
    MoveHostToBizFaultModule,
    MoveHostToBizIdleModule,
    MoveHostToAnotherBizModule,
    MoveResPoolHostToBizIdleModule,
    CleanHostInSetOrModule,
    MoveHostsToBusinessOrModule,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::DeleteMany => "delete_many",
            Action::Find => "find",
            Action::FindMany => "find_many",
            Action::Execute => "execute",
            Action::Archive => "archive",
            Action::SkipAction => "skip_action",
            Action::AddHostToResourcePool => "add_host_to_resource_pool",
            Action::MoveHostToModule => "move_host_to_module",
            Action::MoveHostToBizFaultModule => "move_host_to_biz_fault_module",
            Action::MoveHostToBizIdleModule => "move_host_to_biz_idle_module",
            Action::MoveHostToAnotherBizModule => "move_host_to_another_biz_module",
            Action::MoveResPoolHostToBizIdleModule => "move_res_pool_host_to_biz_idle_module",
            Action::CleanHostInSetOrModule => "clean_host_in_set_or_module",
            Action::MoveHostsToBusinessOrModule => "move_hosts_to_business_or_module",
        }
    }

    /// Whether this action is exempt from authorization
    pub fn is_skip(&self) -> bool {
        matches!(self, Action::SkipAction)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type, action and identity of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Basic {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    pub action: Action,

    /// Optional resource name (e.g. favorite id, custom query id)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Instance id when the resource is a single, known instance
    #[serde(default)]
    pub instance_id: i64,
}

/// One level of the resource's parent path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub instance_id: i64,
}

/// Canonical descriptor of a protected operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttribute {
    #[serde(flatten)]
    pub basic: Basic,

    /// Scope of the operation, `GLOBAL_SCOPE` when unscoped
    #[serde(default)]
    pub business_id: i64,

    /// Parent resources, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<Item>,
}

impl ResourceAttribute {
    /// Create a globally scoped attribute
    pub fn new(resource_type: ResourceType, action: Action) -> Self {
        Self {
            basic: Basic {
                resource_type,
                action,
                name: String::new(),
                instance_id: 0,
            },
            business_id: GLOBAL_SCOPE,
            layers: Vec::new(),
        }
    }

    pub fn with_business(mut self, business_id: i64) -> Self {
        self.business_id = business_id;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.basic.name = name.into();
        self
    }

    pub fn with_instance(mut self, instance_id: i64) -> Self {
        self.basic.instance_id = instance_id;
        self
    }

    pub fn with_layer(mut self, layer: Item) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn resource_type(&self) -> ResourceType {
        self.basic.resource_type
    }

    pub fn action(&self) -> Action {
        self.basic.action
    }

    pub fn is_skip(&self) -> bool {
        self.basic.action.is_skip()
    }
}

/// Tenant of users created without an explicit supplier account
pub const DEFAULT_SUPPLIER_ACCOUNT: &str = "0";

/// Identity of the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_name: String,

    /// Tenant the user belongs to
    pub supplier_account: String,
}

impl UserInfo {
    pub fn new(user_name: impl Into<String>, supplier_account: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            supplier_account: supplier_account.into(),
        }
    }
}

impl From<&str> for UserInfo {
    /// A user of the default tenant
    fn from(user_name: &str) -> Self {
        Self::new(user_name, DEFAULT_SUPPLIER_ACCOUNT)
    }
}

impl From<&UserInfo> for UserInfo {
    fn from(user: &UserInfo) -> Self {
        user.clone()
    }
}

/// Unit passed to a single decision call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthAttribute {
    pub user: UserInfo,
    pub resources: Vec<ResourceAttribute>,
}

impl AuthAttribute {
    pub fn new(user: UserInfo, resources: Vec<ResourceAttribute>) -> Self {
        Self { user, resources }
    }
}

/// Allow/deny outcome of a decision call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub authorized: bool,
    #[serde(default)]
    pub reason: String,
}

impl Decision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            authorized: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            authorized: false,
            reason: reason.into(),
        }
    }
}

/// One typed id on an engine-native resource path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RscTypeAndId {
    pub resource_type: String,
    pub resource_id: String,
}

impl RscTypeAndId {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

/// Engine-native path identifying one registered resource
pub type BackendResource = Vec<RscTypeAndId>;

/// Explicit scope for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeInfo {
    pub scope_type: String,
    pub scope_id: String,
}

impl ScopeInfo {
    pub fn system(system_id: impl Into<String>) -> Self {
        Self {
            scope_type: "system".to_string(),
            scope_id: system_id.into(),
        }
    }

    pub fn business(business_id: i64) -> Self {
        Self {
            scope_type: "biz".to_string(),
            scope_id: business_id.to_string(),
        }
    }
}

/// A resource as the registry stores it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntity {
    pub resource_type: String,
    pub resource_id: BackendResource,
    pub resource_name: String,
    #[serde(flatten)]
    pub scope: ScopeInfo,
}

/// Register request body; returned as-is by a dry run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInfo {
    pub creator_type: String,
    pub creator_id: String,
    pub resources: Vec<ResourceEntity>,
}

/// Resources of one type a user may act on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedResource {
    pub action_id: String,
    pub resource_type: String,
    #[serde(default)]
    pub resource_ids: Vec<BackendResource>,
}

/// Action belonging to a resource type in the engine's meta-model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub action_id: String,
    pub action_name: String,
    #[serde(default)]
    pub is_related_resource: bool,
}

/// Resource type in the engine's meta-model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTypeInfo {
    pub resource_type: String,
    pub resource_type_name: String,
    #[serde(default)]
    pub parent_resource_type: String,
    pub actions: Vec<ActionInfo>,
}

/// System registered in the policy engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub system_id: String,
    pub system_name: String,
}

/// Meta-model bootstrapped into the policy engine by `init`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitConfig {
    pub system: SystemInfo,
    pub resource_types: Vec<ResourceTypeInfo>,
}

impl InitConfig {
    /// Default meta-model of the resource-management platform
    pub fn cmdb(system_id: impl Into<String>) -> Self {
        fn action(id: &str, name: &str, related: bool) -> ActionInfo {
            ActionInfo {
                action_id: id.to_string(),
                action_name: name.to_string(),
                is_related_resource: related,
            }
        }
        fn crud(related: bool) -> Vec<ActionInfo> {
            vec![
                action("create", "Create", false),
                action("edit", "Edit", related),
                action("delete", "Delete", related),
                action("find", "Find", related),
            ]
        }

        let mut business_actions = crud(true);
        business_actions.push(action("archive", "Archive", true));

        let mut custom_query_actions = crud(true);
        custom_query_actions.push(action("execute", "Execute", true));

        let resource_types = vec![
            ("business", "Business", "", business_actions),
            ("sys_host_instance", "Host (resource pool)", "", crud(true)),
            ("biz_host_instance", "Host (business)", "business", crud(true)),
            ("biz_custom_query", "Dynamic grouping", "business", custom_query_actions),
            ("sys_cloud_sync", "Cloud resource sync", "", crud(false)),
            ("host_favorite", "Host favorite", "", crud(false)),
            ("user_custom", "User custom settings", "", crud(false)),
        ]
        .into_iter()
        .map(|(id, name, parent, actions)| ResourceTypeInfo {
            resource_type: id.to_string(),
            resource_type_name: name.to_string(),
            parent_resource_type: parent.to_string(),
            actions,
        })
        .collect();

        Self {
            system: SystemInfo {
                system_id: system_id.into(),
                system_name: "Configuration Management".to_string(),
            },
            resource_types,
        }
    }
}

/// Pagination for registry list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_builder() {
        let attr = ResourceAttribute::new(ResourceType::DynamicGrouping, Action::Update)
            .with_business(3)
            .with_name("q1");

        assert_eq!(attr.resource_type(), ResourceType::DynamicGrouping);
        assert_eq!(attr.action(), Action::Update);
        assert_eq!(attr.business_id, 3);
        assert_eq!(attr.basic.name, "q1");
        assert!(!attr.is_skip());
    }

    #[test]
    fn test_new_attribute_is_global() {
        let attr = ResourceAttribute::new(ResourceType::HostInstance, Action::SkipAction);
        assert_eq!(attr.business_id, GLOBAL_SCOPE);
        assert!(attr.is_skip());
    }

    #[test]
    fn test_attribute_serialization_flattens_basic() {
        let attr = ResourceAttribute::new(ResourceType::Business, Action::Delete)
            .with_business(42)
            .with_instance(42);
        let json = serde_json::to_value(&attr).unwrap();

        assert_eq!(json["type"], "business");
        assert_eq!(json["action"], "delete");
        assert_eq!(json["business_id"], 42);
        assert!(json.get("name").is_none());
    }

    #[test]
    fn test_cmdb_init_config() {
        let config = InitConfig::cmdb("bk_cmdb");
        assert_eq!(config.system.system_id, "bk_cmdb");
        assert!(config
            .resource_types
            .iter()
            .any(|t| t.resource_type == "business"
                && t.actions.iter().any(|a| a.action_id == "archive")));
    }
}
