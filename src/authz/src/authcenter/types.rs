//! Policy engine wire types

use serde::{Deserialize, Serialize};

use crate::meta::{BackendResource, ResourceEntity, ScopeInfo};

pub const CODE_SUCCESS: i64 = 0;
pub const CODE_RESOURCE_EXISTS: i64 = 1_901_002;
pub const CODE_RESOURCE_NOT_FOUND: i64 = 1_901_003;
pub const CODE_MODEL_EXISTS: i64 = 1_902_409;

pub const PRINCIPAL_USER: &str = "user";

/// Envelope wrapping every engine response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseResponse<T> {
    pub result: bool,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> BaseResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            result: true,
            code: CODE_SUCCESS,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn fail(code: i64, message: impl Into<String>) -> Self {
        Self {
            result: false,
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Who is asking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub principal_type: String,
    pub principal_id: String,
    /// Tenant of the principal
    #[serde(default)]
    pub supplier_account: String,
}

/// One `(action, resource)` pair to verify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAction {
    pub action_id: String,
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: BackendResource,
    #[serde(flatten)]
    pub scope: ScopeInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    #[serde(flatten)]
    pub principal: Principal,
    pub resources_actions: Vec<ResourceAction>,
}

/// Verdict for one `ResourceAction`, in request order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub action_id: String,
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: BackendResource,
    pub is_pass: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchAuthorizedResources {
    #[serde(flatten)]
    pub principal: Principal,
    #[serde(flatten)]
    pub scope: ScopeInfo,
    pub resource_types: Vec<String>,
    pub action_ids: Vec<String>,
    #[serde(default)]
    pub exact: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchAuthorizedActions {
    #[serde(flatten)]
    pub principal: Principal,
    #[serde(flatten)]
    pub scope: ScopeInfo,
    pub resource_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeregisterRequest {
    pub resources: Vec<DeregisterEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeregisterEntity {
    pub resource_type: String,
    pub resource_id: BackendResource,
    #[serde(flatten)]
    pub scope: ScopeInfo,
}

impl From<&ResourceEntity> for DeregisterEntity {
    fn from(entity: &ResourceEntity) -> Self {
        Self {
            resource_type: entity.resource_type.clone(),
            resource_id: entity.resource_id.clone(),
            scope: entity.scope.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourcesRequest {
    pub resource_type: String,
    #[serde(flatten)]
    pub scope: ScopeInfo,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListResourcesResult {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub info: Vec<BackendResource>,
}
