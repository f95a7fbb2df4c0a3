//! Host related rule groups

use http::Method;

use super::{RequestContext, Rule, RuleSet};
use crate::error::{AuthzError, Result};
use crate::meta::{Action, ResourceAttribute, ResourceType};

fn one(attr: ResourceAttribute) -> Result<Vec<ResourceAttribute>> {
    Ok(vec![attr])
}

fn host_attr(action: Action) -> ResourceAttribute {
    ResourceAttribute::new(ResourceType::HostInstance, action)
}

/// Host attribute scoped by the body's business id
fn body_scoped_host(ctx: &RequestContext, action: Action) -> Result<Vec<ResourceAttribute>> {
    let business_id = ctx.body_business_id()?;
    one(host_attr(action).with_business(business_id))
}

pub(super) fn host() -> Result<RuleSet> {
    let rules = vec![
        Rule::exact(Method::POST, "/api/v3/hosts/findmany/modulehost", |ctx| {
            let business_id = ctx.metadata.business_id().map_err(|e| {
                AuthzError::Classification(format!(
                    "find hosts with modules, but parse business id failed, err: {e}"
                ))
            })?;
            one(host_attr(Action::FindMany).with_business(business_id))
        }),
        // deleting hosts in batch cannot name the hosts up front
        Rule::exact(Method::DELETE, "/api/v3/hosts/batch", |_| {
            one(host_attr(Action::SkipAction))
        }),
        Rule::exact(Method::POST, "/api/v3/hosts/add", |_| {
            one(host_attr(Action::AddHostToResourcePool))
        }),
        Rule::exact(Method::POST, "/api/v3/hosts/modules/resource", |ctx| {
            body_scoped_host(ctx, Action::SkipAction)
        }),
        Rule::exact(Method::POST, "/api/v3/hosts/modules", |ctx| {
            body_scoped_host(ctx, Action::MoveHostToModule)
        }),
        Rule::exact(Method::POST, "/api/v3/hosts/modules/resource/idle", |_| {
            one(host_attr(Action::Update))
        }),
        Rule::exact(Method::POST, "/api/v3/hosts/modules/fault", |ctx| {
            body_scoped_host(ctx, Action::MoveHostToBizFaultModule)
        }),
        Rule::exact(Method::POST, "/api/v3/hosts/modules/idle", |ctx| {
            body_scoped_host(ctx, Action::MoveHostToBizIdleModule)
        }),
        Rule::exact(Method::POST, "/api/v3/hosts/modules/biz/mutilple", |ctx| {
            body_scoped_host(ctx, Action::MoveHostToAnotherBizModule)
        }),
        Rule::exact(Method::POST, "/api/v3/hosts//host/add/module", |_| {
            one(host_attr(Action::MoveResPoolHostToBizIdleModule))
        }),
        Rule::exact(Method::POST, "/api/v3/hosts/modules/idle/set", |ctx| {
            body_scoped_host(ctx, Action::CleanHostInSetOrModule)
        }),
        Rule::exact(Method::POST, "/api/v3/hosts/sync/new/host", |ctx| {
            body_scoped_host(ctx, Action::MoveHostsToBusinessOrModule)
        }),
        Rule::exact(Method::POST, "/api/v3/hosts/search", |ctx| {
            body_scoped_host(ctx, Action::FindMany)
        }),
        Rule::exact(Method::POST, "/api/v3/hosts/search/asstdetail", |ctx| {
            body_scoped_host(ctx, Action::FindMany)
        }),
        Rule::exact(Method::PUT, "/api/v3/hosts/batch", |_| {
            one(host_attr(Action::SkipAction))
        }),
    ];

    Ok(RuleSet::new("host", rules))
}

pub(super) fn user_api() -> Result<RuleSet> {
    const ITEM: &str = r"[^\s/]+";

    let rules = vec![
        Rule::exact(Method::POST, "/api/v3/userapi", |ctx| {
            let business_id = ctx.body_business_id()?;
            one(ResourceAttribute::new(ResourceType::DynamicGrouping, Action::Create)
                .with_business(business_id))
        }),
        Rule::pattern(
            Method::PUT,
            &format!(r"^/api/v3/userapi/[0-9]+/{ITEM}/?$"),
            |ctx| {
                let op = "update host user custom query";
                let business_id = ctx.segment_business_id(3, 5, op)?;
                one(ResourceAttribute::new(ResourceType::DynamicGrouping, Action::Update)
                    .with_business(business_id)
                    .with_name(ctx.segment(4, 5, op)?))
            },
        )?,
        Rule::pattern(
            Method::DELETE,
            &format!(r"^/api/v3/userapi/[0-9]+/{ITEM}/?$"),
            |ctx| {
                let op = "delete host user custom query";
                let business_id = ctx.segment_business_id(3, 5, op)?;
                one(ResourceAttribute::new(ResourceType::DynamicGrouping, Action::Delete)
                    .with_business(business_id)
                    .with_name(ctx.segment(4, 5, op)?))
            },
        )?,
        Rule::pattern(Method::POST, r"^/api/v3/userapi/search/[0-9]+/?$", |ctx| {
            let business_id = ctx.segment_business_id(4, 5, "find host user custom query")?;
            one(ResourceAttribute::new(ResourceType::DynamicGrouping, Action::FindMany)
                .with_business(business_id))
        })?,
        Rule::pattern(
            Method::GET,
            &format!(r"^/api/v3/userapi/detail/[0-9]+/{ITEM}/?$"),
            |ctx| {
                let op = "find host user custom query details";
                let business_id = ctx.segment_business_id(4, 6, op)?;
                one(ResourceAttribute::new(ResourceType::DynamicGrouping, Action::Find)
                    .with_business(business_id)
                    .with_name(ctx.segment(5, 6, op)?))
            },
        )?,
        Rule::pattern(
            Method::GET,
            &format!(r"^/api/v3/userapi/data/[0-9]+/{ITEM}/[0-9]+/[0-9]+/?$"),
            |ctx| {
                let op = "find data with host user custom query";
                let business_id = ctx.segment_business_id(4, 8, op)?;
                one(ResourceAttribute::new(ResourceType::DynamicGrouping, Action::Execute)
                    .with_business(business_id)
                    .with_name(ctx.segment(5, 8, op)?))
            },
        )?,
    ];

    Ok(RuleSet::new("user_api", rules))
}

pub(super) fn user_custom() -> RuleSet {
    let rules = vec![
        Rule::exact(Method::POST, "/api/v3/usercustom", |_| {
            one(ResourceAttribute::new(ResourceType::UserCustom, Action::Create))
        }),
        Rule::exact(Method::POST, "/api/v3/usercustom/user/search", |_| {
            one(ResourceAttribute::new(ResourceType::UserCustom, Action::Find))
        }),
        Rule::exact(Method::POST, "/api/v3/usercustom/default/search", |_| {
            one(ResourceAttribute::new(ResourceType::UserCustom, Action::Find))
        }),
    ];

    RuleSet::new("user_custom", rules)
}

pub(super) fn host_favorite() -> Result<RuleSet> {
    let rules = vec![
        Rule::exact(Method::POST, "/api/v3/hosts/favorites", |_| {
            one(ResourceAttribute::new(ResourceType::HostFavorite, Action::Create))
        }),
        Rule::pattern(Method::PUT, r"^/api/v3/hosts/favorite/[^\s/]+/?$", |ctx| {
            let name = ctx.segment(4, 5, "update host favorite")?;
            one(ResourceAttribute::new(ResourceType::HostFavorite, Action::Update).with_name(name))
        })?,
        Rule::pattern(Method::DELETE, r"^/api/v3/hosts/favorite/[^\s/]+/?$", |ctx| {
            let name = ctx.segment(4, 5, "delete host favorite")?;
            one(ResourceAttribute::new(ResourceType::HostFavorite, Action::DeleteMany).with_name(name))
        })?,
        Rule::exact(Method::POST, "/api/v3/hosts/favorites/search", |_| {
            one(ResourceAttribute::new(ResourceType::HostFavorite, Action::FindMany))
        }),
        Rule::pattern(Method::PUT, r"^/api/v3/hosts/favorite/[^\s/]+/incr$", |ctx| {
            let name = ctx.segment(4, 6, "increase host favorite count")?;
            one(ResourceAttribute::new(ResourceType::HostFavorite, Action::Update).with_name(name))
        })?,
    ];

    Ok(RuleSet::new("host_favorite", rules))
}

pub(super) fn cloud_resource_sync() -> RuleSet {
    let rules = vec![
        Rule::exact(Method::POST, "/api/v3/hosts/cloud/search", |_| {
            one(ResourceAttribute::new(ResourceType::ResourceSync, Action::FindMany))
        }),
        Rule::exact(Method::POST, "/api/v3/hosts/cloud/searchConfirm", |_| {
            one(ResourceAttribute::new(ResourceType::ResourceSync, Action::FindMany))
        }),
    ];

    RuleSet::new("cloud_resource_sync", rules)
}

pub(super) fn host_snapshot() -> Result<RuleSet> {
    let rules = vec![Rule::pattern(
        Method::GET,
        r"^/api/v3/hosts/snapshot/[0-9]+/?$",
        |ctx| {
            ctx.segment(4, 5, "find host snapshot details query")?;
            one(host_attr(Action::SkipAction))
        },
    )?];

    Ok(RuleSet::new("host_snapshot", rules))
}

pub(super) fn object_identifier() -> Result<RuleSet> {
    let rules = vec![Rule::pattern(
        Method::POST,
        r"^/api/v3/identifier/[^\s/]+/search/?$",
        |_| one(ResourceAttribute::new(ResourceType::Unspecified, Action::SkipAction)),
    )?];

    Ok(RuleSet::new("object_identifier", rules))
}
