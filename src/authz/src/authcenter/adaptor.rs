//! Mapping from resource attributes to the policy engine's vocabulary

use crate::error::{AuthzError, Result};
use crate::meta::{
    Action, BackendResource, ResourceAttribute, ResourceEntity, ResourceType, RscTypeAndId,
    ScopeInfo, GLOBAL_SCOPE,
};

pub const BUSINESS: &str = "business";
pub const SYS_HOST_INSTANCE: &str = "sys_host_instance";
pub const BIZ_HOST_INSTANCE: &str = "biz_host_instance";
pub const BIZ_CUSTOM_QUERY: &str = "biz_custom_query";
pub const SYS_CLOUD_SYNC: &str = "sys_cloud_sync";
pub const HOST_FAVORITE: &str = "host_favorite";
pub const USER_CUSTOM: &str = "user_custom";
pub const AUDIT_LOG: &str = "audit_log";
pub const SYS_MANAGEMENT: &str = "sys_management";

/// Engine resource type for a local type within a business scope
pub fn type_id(resource_type: ResourceType, business_id: i64) -> Result<&'static str> {
    let id = match resource_type {
        ResourceType::HostInstance if business_id == GLOBAL_SCOPE => SYS_HOST_INSTANCE,
        ResourceType::HostInstance => BIZ_HOST_INSTANCE,
        ResourceType::Business => BUSINESS,
        ResourceType::DynamicGrouping => BIZ_CUSTOM_QUERY,
        ResourceType::ResourceSync => SYS_CLOUD_SYNC,
        ResourceType::HostFavorite => HOST_FAVORITE,
        ResourceType::UserCustom => USER_CUSTOM,
        ResourceType::Unspecified => {
            return Err(AuthzError::InvalidInput(
                "resource without a type has no policy engine counterpart".to_string(),
            ))
        }
    };
    Ok(id)
}

/// Engine resource type for an attribute
pub fn resource_type_id(attr: &ResourceAttribute) -> Result<&'static str> {
    type_id(attr.resource_type(), attr.business_id)
}

/// Engine action id for an attribute
pub fn action_id(attr: &ResourceAttribute) -> Result<&'static str> {
    let id = match attr.action() {
        Action::Create | Action::AddHostToResourcePool => "create",
        Action::Update
        | Action::MoveHostToModule
        | Action::MoveHostToBizFaultModule
        | Action::MoveHostToBizIdleModule
        | Action::MoveHostToAnotherBizModule
        | Action::MoveResPoolHostToBizIdleModule
        | Action::CleanHostInSetOrModule
        | Action::MoveHostsToBusinessOrModule => "edit",
        Action::Delete | Action::DeleteMany => "delete",
        Action::Find | Action::FindMany => "find",
        Action::Execute => "execute",
        Action::Archive => "archive",
        Action::SkipAction => {
            return Err(AuthzError::InvalidInput(
                "skip action resources are never sent to the policy engine".to_string(),
            ))
        }
    };
    Ok(id)
}

/// Scope an attribute is evaluated in
pub fn scope(attr: &ResourceAttribute, system_id: &str) -> ScopeInfo {
    if attr.business_id == GLOBAL_SCOPE {
        ScopeInfo::system(system_id)
    } else {
        ScopeInfo::business(attr.business_id)
    }
}

fn own_id(attr: &ResourceAttribute) -> Option<String> {
    if attr.basic.instance_id > 0 {
        Some(attr.basic.instance_id.to_string())
    } else if !attr.basic.name.is_empty() {
        Some(attr.basic.name.clone())
    } else {
        None
    }
}

/// Engine-native path of an attribute, outermost parent first.
///
/// Business scoped resources without explicit layers get the business as their parent.
/// A type-level attribute (no instance id, no name) yields only its parents.
pub fn resource_path(attr: &ResourceAttribute) -> Result<BackendResource> {
    let mut path = Vec::with_capacity(attr.layers.len() + 2);

    if attr.layers.is_empty()
        && attr.business_id != GLOBAL_SCOPE
        && attr.resource_type() != ResourceType::Business
    {
        path.push(RscTypeAndId::new(BUSINESS, attr.business_id.to_string()));
    }

    for layer in &attr.layers {
        let id = if layer.instance_id > 0 {
            layer.instance_id.to_string()
        } else {
            layer.name.clone()
        };
        path.push(RscTypeAndId::new(type_id(layer.resource_type, attr.business_id)?, id));
    }

    if let Some(id) = own_id(attr) {
        path.push(RscTypeAndId::new(resource_type_id(attr)?, id));
    }

    Ok(path)
}

/// Registry entry for an attribute; the attribute must name a single instance
pub fn resource_entity(attr: &ResourceAttribute, system_id: &str) -> Result<ResourceEntity> {
    let Some(id) = own_id(attr) else {
        return Err(AuthzError::InvalidInput(format!(
            "cannot register {} without an instance id or name",
            attr.resource_type()
        )));
    };

    let resource_name = if attr.basic.name.is_empty() {
        id
    } else {
        attr.basic.name.clone()
    };

    Ok(ResourceEntity {
        resource_type: resource_type_id(attr)?.to_string(),
        resource_id: resource_path(attr)?,
        resource_name,
        scope: scope(attr, system_id),
    })
}

/// Business id carried by an authorized business path
pub fn business_id_of(path: &BackendResource) -> Result<i64> {
    let Some(entry) = path.iter().rev().find(|p| p.resource_type == BUSINESS) else {
        return Err(AuthzError::Indeterminate(format!(
            "authorized resource {path:?} carries no business id"
        )));
    };

    entry.resource_id.parse::<i64>().map_err(|e| {
        AuthzError::Indeterminate(format!(
            "policy engine returned malformed business id {:?}: {e}",
            entry.resource_id
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Item;

    #[test]
    fn test_host_type_depends_on_scope() {
        let global = ResourceAttribute::new(ResourceType::HostInstance, Action::FindMany);
        let scoped = global.clone().with_business(7);
        assert_eq!(resource_type_id(&global).unwrap(), SYS_HOST_INSTANCE);
        assert_eq!(resource_type_id(&scoped).unwrap(), BIZ_HOST_INSTANCE);
    }

    #[test]
    fn test_composite_host_actions_are_edits() {
        let attr = ResourceAttribute::new(ResourceType::HostInstance, Action::MoveHostToModule);
        assert_eq!(action_id(&attr).unwrap(), "edit");

        let attr = ResourceAttribute::new(ResourceType::HostInstance, Action::AddHostToResourcePool);
        assert_eq!(action_id(&attr).unwrap(), "create");
    }

    #[test]
    fn test_unmappable_inputs() {
        let skip = ResourceAttribute::new(ResourceType::HostInstance, Action::SkipAction);
        assert!(action_id(&skip).is_err());

        let untyped = ResourceAttribute::new(ResourceType::Unspecified, Action::Find);
        assert!(resource_type_id(&untyped).is_err());
    }

    #[test]
    fn test_business_path_and_scope() {
        let attr = ResourceAttribute::new(ResourceType::Business, Action::Delete)
            .with_business(42)
            .with_instance(42);

        assert_eq!(
            resource_path(&attr).unwrap(),
            vec![RscTypeAndId::new(BUSINESS, "42")]
        );
        assert_eq!(scope(&attr, "bk_cmdb"), ScopeInfo::business(42));
    }

    #[test]
    fn test_scoped_resource_gets_business_parent() {
        let attr = ResourceAttribute::new(ResourceType::DynamicGrouping, Action::Update)
            .with_business(3)
            .with_name("q1");

        assert_eq!(
            resource_path(&attr).unwrap(),
            vec![
                RscTypeAndId::new(BUSINESS, "3"),
                RscTypeAndId::new(BIZ_CUSTOM_QUERY, "q1"),
            ]
        );
    }

    #[test]
    fn test_explicit_layers() {
        let attr = ResourceAttribute::new(ResourceType::HostInstance, Action::Update)
            .with_business(3)
            .with_instance(100)
            .with_layer(Item {
                resource_type: ResourceType::Business,
                name: String::new(),
                instance_id: 3,
            });

        let path = resource_path(&attr).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[1], RscTypeAndId::new(BIZ_HOST_INSTANCE, "100"));
    }

    #[test]
    fn test_entity_requires_identity() {
        let attr = ResourceAttribute::new(ResourceType::Business, Action::Create);
        assert!(resource_entity(&attr, "bk_cmdb").is_err());

        let attr = attr.with_instance(5).with_name("payments");
        let entity = resource_entity(&attr, "bk_cmdb").unwrap();
        assert_eq!(entity.resource_name, "payments");
        assert_eq!(entity.scope, ScopeInfo::system("bk_cmdb"));
    }

    #[test]
    fn test_business_id_of() {
        let path = vec![RscTypeAndId::new(BUSINESS, "12")];
        assert_eq!(business_id_of(&path).unwrap(), 12);

        let bad = vec![RscTypeAndId::new(BUSINESS, "twelve")];
        assert!(business_id_of(&bad).unwrap_err().is_indeterminate());
        assert!(business_id_of(&vec![]).is_err());
    }
}
