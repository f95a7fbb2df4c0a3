//! Business rule group

use http::Method;

use super::{RequestContext, Rule, RuleSet};
use crate::error::Result;
use crate::meta::{Action, ResourceAttribute, ResourceType};

fn business_instance(
    ctx: &RequestContext,
    action: Action,
    index: usize,
    expected: usize,
    operation: &str,
) -> Result<Vec<ResourceAttribute>> {
    let business_id = ctx.segment_business_id(index, expected, operation)?;
    Ok(vec![ResourceAttribute::new(ResourceType::Business, action)
        .with_business(business_id)
        .with_instance(business_id)])
}

pub(super) fn business() -> Result<RuleSet> {
    let rules = vec![
        Rule::pattern(Method::POST, r"^/api/v3/biz/search/[^\s/]+/?$", |ctx| {
            ctx.segment(4, 5, "find business")?;
            Ok(vec![ResourceAttribute::new(ResourceType::Business, Action::FindMany)])
        })?,
        Rule::pattern(
            Method::PUT,
            r"^/api/v3/biz/status/[^\s/]+/[^\s/]+/[0-9]+/?$",
            |ctx| business_instance(ctx, Action::Archive, 6, 7, "update business status"),
        )?,
        Rule::pattern(Method::POST, r"^/api/v3/biz/[^\s/]+/?$", |ctx| {
            ctx.segment(3, 4, "create business")?;
            Ok(vec![ResourceAttribute::new(ResourceType::Business, Action::Create)])
        })?,
        Rule::pattern(Method::PUT, r"^/api/v3/biz/[^\s/]+/[0-9]+/?$", |ctx| {
            business_instance(ctx, Action::Update, 4, 5, "update business")
        })?,
        Rule::pattern(Method::DELETE, r"^/api/v3/biz/[^\s/]+/[0-9]+/?$", |ctx| {
            business_instance(ctx, Action::Delete, 4, 5, "delete business")
        })?,
    ];

    Ok(RuleSet::new("business", rules))
}
