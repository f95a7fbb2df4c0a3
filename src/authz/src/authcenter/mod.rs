//! HTTP client for the external policy engine
//!
//! Implements both `Authorizer` and `ResourceHandler`. Addresses are tried in order and the
//! last one that answered is tried first next time. Transport failures surface as
//! `AuthzError::Indeterminate`; they are never turned into an allow.

pub mod adaptor;
pub mod types;

use async_trait::async_trait;
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{
    merge_skipped, partition_skipped, Authorizer, ResourceHandler, AUTH_DISABLED_REASON,
};
use crate::config::AuthConfig;
use crate::error::{AuthzError, Result};
use crate::meta::{
    AuthAttribute, AuthorizedResource, BackendResource, Decision, InitConfig, Page,
    RegisterInfo, ResourceAttribute, ScopeInfo, UserInfo, GLOBAL_SCOPE,
};

use self::types::{
    BaseResponse, DeregisterEntity, DeregisterRequest, ListResourcesRequest,
    ListResourcesResult, Principal, ResourceAction, SearchAuthorizedActions,
    SearchAuthorizedResources, VerifyRequest, VerifyResult, CODE_MODEL_EXISTS,
    CODE_RESOURCE_EXISTS, CODE_RESOURCE_NOT_FOUND, PRINCIPAL_USER,
};

pub const HEADER_APP_CODE: &str = "X-BK-APP-CODE";
pub const HEADER_APP_SECRET: &str = "X-BK-APP-SECRET";
pub const HEADER_IAM_VERSION: &str = "X-BK-IAM-VERSION";
pub const HEADER_REQUEST_ID: &str = "X-Bkapi-Request-Id";

const IAM_VERSION: &str = "1";
const CREATOR_APP: &str = "app";

/// Policy engine client
pub struct AuthCenter {
    config: AuthConfig,
    http: reqwest::Client,
    preferred: AtomicUsize,
}

impl AuthCenter {
    /// Build a client; TLS material is read from disk here
    pub fn new(config: AuthConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout());

        if let Some(ca_file) = &config.tls.ca_file {
            let pem = std::fs::read(ca_file)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| AuthzError::Config(format!("invalid ca file {ca_file:?}: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        if let (Some(cert_file), Some(key_file)) = (&config.tls.cert_file, &config.tls.key_file) {
            let mut pem = std::fs::read(cert_file)?;
            pem.extend(std::fs::read(key_file)?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| AuthzError::Config(format!("invalid client certificate: {e}")))?;
            builder = builder.identity(identity);
        }

        if config.tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| AuthzError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            config,
            http,
            preferred: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn system_id(&self) -> &str {
        &self.config.system_id
    }

    fn perm_path(&self, suffix: &str) -> String {
        format!("/bkiam/api/v1/perm/systems/{}/{suffix}", self.system_id())
    }

    fn resource_path(&self, suffix: &str) -> String {
        format!("/bkiam/api/v1/resources/systems/{}/{suffix}", self.system_id())
    }

    fn principal(user: &UserInfo) -> Principal {
        Principal {
            principal_type: PRINCIPAL_USER.to_string(),
            principal_id: user.user_name.clone(),
            supplier_account: user.supplier_account.clone(),
        }
    }

    /// Send one request, failing over across addresses on transport errors
    async fn send<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<Response>
    where
        B: Serialize + ?Sized + Sync,
    {
        let addresses = &self.config.address;
        if addresses.is_empty() {
            return Err(AuthzError::Indeterminate(
                "no policy engine address configured".to_string(),
            ));
        }

        let start = self.preferred.load(Ordering::Relaxed) % addresses.len();
        let mut last_error = String::new();

        for offset in 0..addresses.len() {
            let index = (start + offset) % addresses.len();
            let url = format!("{}{path}", addresses[index].trim_end_matches('/'));
            let request_id = Uuid::new_v4().to_string();

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header(HEADER_APP_CODE, &self.config.app_code)
                .header(HEADER_APP_SECRET, &self.config.app_secret)
                .header(HEADER_IAM_VERSION, IAM_VERSION)
                .header(HEADER_REQUEST_ID, &request_id);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    self.preferred.store(index, Ordering::Relaxed);
                    debug!(%method, %url, %request_id, status = %response.status(), "policy engine call");
                    return Ok(response);
                }
                Err(e) => {
                    warn!(%method, %url, %request_id, error = %e, "policy engine unreachable, trying next address");
                    last_error = e.to_string();
                }
            }
        }

        Err(AuthzError::Indeterminate(format!(
            "policy engine unreachable: {last_error}"
        )))
    }

    /// Send a request and decode the response envelope
    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<BaseResponse<T>>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self.send(method, path, body).await?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            AuthzError::Indeterminate(format!("failed to read policy engine response: {e}"))
        })?;

        match serde_json::from_slice::<BaseResponse<T>>(&bytes) {
            Ok(envelope) => Ok(envelope),
            Err(e) if status.is_success() => Err(AuthzError::Indeterminate(format!(
                "malformed policy engine response for {path}: {e}"
            ))),
            Err(_) => Err(AuthzError::Indeterminate(format!(
                "policy engine returned {status} for {path}: {}",
                String::from_utf8_lossy(&bytes)
            ))),
        }
    }

    /// Decode query data; any rejection is indeterminate
    fn data<T>(response: BaseResponse<T>, what: &str) -> Result<T> {
        if !response.result {
            return Err(AuthzError::Indeterminate(format!(
                "{what} failed, code: {}, message: {}",
                response.code, response.message
            )));
        }
        response.data.ok_or_else(|| {
            AuthzError::Indeterminate(format!("{what} returned no data"))
        })
    }

    /// Accept a registry response, treating `tolerated` codes as success
    fn ack(response: BaseResponse<Value>, what: &str, tolerated: &[i64]) -> Result<()> {
        if response.result || tolerated.contains(&response.code) {
            return Ok(());
        }
        Err(AuthzError::Registration(format!(
            "{what} failed, code: {}, message: {}",
            response.code, response.message
        )))
    }

    fn register_info(&self, resources: &[ResourceAttribute]) -> Result<RegisterInfo> {
        let resources = resources
            .iter()
            .filter(|r| !r.is_skip())
            .map(|r| adaptor::resource_entity(r, self.system_id()))
            .collect::<Result<Vec<_>>>()?;

        Ok(RegisterInfo {
            creator_type: CREATOR_APP.to_string(),
            creator_id: self.config.app_code.clone(),
            resources,
        })
    }

    async fn delete_entities(&self, resources: Vec<DeregisterEntity>) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }
        let count = resources.len();
        let body = DeregisterRequest { resources };
        let response = self
            .call::<_, Value>(
                Method::DELETE,
                &self.resource_path("resources/batch-delete"),
                Some(&body),
            )
            .await?;
        Self::ack(response, "deregister resources", &[CODE_RESOURCE_NOT_FOUND])?;
        info!(count, "resources deregistered");
        Ok(())
    }

    async fn search_resources(
        &self,
        user: &UserInfo,
        scope: ScopeInfo,
        resource_type: &str,
        action_id: &str,
        exact: bool,
    ) -> Result<Vec<AuthorizedResource>> {
        let body = SearchAuthorizedResources {
            principal: Self::principal(user),
            scope,
            resource_types: vec![resource_type.to_string()],
            action_ids: vec![action_id.to_string()],
            exact,
        };
        let response = self
            .call(
                Method::POST,
                &self.perm_path("authorized-resources/search"),
                Some(&body),
            )
            .await?;
        Self::data(response, "search authorized resources")
    }

    /// Create a meta-model entry, updating it instead when it already exists
    async fn upsert_model<B>(
        &self,
        create_path: &str,
        update_path: &str,
        body: &B,
        what: &str,
    ) -> Result<()>
    where
        B: Serialize + ?Sized + Sync,
    {
        let response = self.call::<_, Value>(Method::POST, create_path, Some(body)).await?;
        if response.result || response.code != CODE_MODEL_EXISTS {
            return Self::ack(response, what, &[]);
        }

        let response = self
            .call::<_, Value>(Method::PUT, update_path, Some(body))
            .await?;
        Self::ack(response, what, &[])
    }
}

#[async_trait]
impl Authorizer for AuthCenter {
    async fn authorize(&self, attribute: &AuthAttribute) -> Result<Decision> {
        if !self.enabled() {
            return Ok(Decision::allow(AUTH_DISABLED_REASON));
        }

        let decisions = self
            .authorize_batch(&attribute.user, &attribute.resources)
            .await?;

        Ok(decisions
            .into_iter()
            .find(|d| !d.authorized)
            .unwrap_or_else(|| Decision::allow("authorized")))
    }

    async fn authorize_batch(
        &self,
        user: &UserInfo,
        resources: &[ResourceAttribute],
    ) -> Result<Vec<Decision>> {
        if !self.enabled() {
            return Ok(vec![Decision::allow(AUTH_DISABLED_REASON); resources.len()]);
        }

        let (checked, slots) = partition_skipped(resources);
        if checked.is_empty() {
            return merge_skipped(&slots, Vec::new());
        }

        let resources_actions = checked
            .iter()
            .map(|r| {
                Ok(ResourceAction {
                    action_id: adaptor::action_id(r)?.to_string(),
                    resource_type: adaptor::resource_type_id(r)?.to_string(),
                    resource_id: adaptor::resource_path(r)?,
                    scope: adaptor::scope(r, self.system_id()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let body = VerifyRequest {
            principal: Self::principal(user),
            resources_actions,
        };
        let response = self
            .call::<_, Vec<VerifyResult>>(
                Method::POST,
                &self.perm_path("resources-perms/verify"),
                Some(&body),
            )
            .await?;
        let results = Self::data(response, "verify permissions")?;

        let decisions = results
            .into_iter()
            .map(|r| {
                if r.is_pass {
                    Decision::allow("authorized")
                } else {
                    Decision::deny(format!(
                        "user {} has no permission to {} {}",
                        user.user_name, r.action_id, r.resource_type
                    ))
                }
            })
            .collect();

        let decisions = merge_skipped(&slots, decisions)?;
        debug!(
            user = %user.user_name,
            total = decisions.len(),
            denied = decisions.iter().filter(|d| !d.authorized).count(),
            "batch authorized"
        );
        Ok(decisions)
    }

    async fn get_authorized_business_list(&self, user: &UserInfo) -> Result<Vec<i64>> {
        if !self.enabled() {
            return Ok(Vec::new());
        }

        let authorized = self
            .search_resources(
                user,
                ScopeInfo::system(self.system_id()),
                adaptor::BUSINESS,
                "find",
                true,
            )
            .await?;

        let mut ids = BTreeSet::new();
        for resource in authorized.iter().filter(|r| r.resource_type == adaptor::BUSINESS) {
            for path in &resource.resource_ids {
                ids.insert(adaptor::business_id_of(path)?);
            }
        }
        Ok(ids.into_iter().collect())
    }

    async fn admin_entrance(&self, user: &UserInfo) -> Result<Vec<String>> {
        if !self.enabled() {
            return Ok(Vec::new());
        }

        let body = SearchAuthorizedActions {
            principal: Self::principal(user),
            scope: ScopeInfo::system(self.system_id()),
            resource_type: adaptor::SYS_MANAGEMENT.to_string(),
        };
        let response = self
            .call(
                Method::POST,
                &self.perm_path("authorized-actions/search"),
                Some(&body),
            )
            .await?;
        Self::data(response, "search authorized actions")
    }

    async fn get_authorized_audit_list(
        &self,
        user: &UserInfo,
        business_id: i64,
    ) -> Result<Vec<AuthorizedResource>> {
        if !self.enabled() {
            return Ok(Vec::new());
        }

        let scope = if business_id == GLOBAL_SCOPE {
            ScopeInfo::system(self.system_id())
        } else {
            ScopeInfo::business(business_id)
        };
        self.search_resources(user, scope, adaptor::AUDIT_LOG, "find", false)
            .await
    }

    fn enabled(&self) -> bool {
        self.config.enable
    }
}

#[async_trait]
impl ResourceHandler for AuthCenter {
    async fn register_resource(&self, resources: &[ResourceAttribute]) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        let info = self.register_info(resources)?;
        if info.resources.is_empty() {
            return Ok(());
        }

        let count = info.resources.len();
        let response = self
            .call::<_, Value>(
                Method::POST,
                &self.resource_path("resources/batch-register"),
                Some(&info),
            )
            .await?;
        Self::ack(response, "register resources", &[CODE_RESOURCE_EXISTS])?;
        info!(count, "resources registered");
        Ok(())
    }

    async fn dry_run_register_resource(
        &self,
        resources: &[ResourceAttribute],
    ) -> Result<RegisterInfo> {
        if !self.enabled() {
            return Ok(RegisterInfo {
                creator_type: CREATOR_APP.to_string(),
                creator_id: self.config.app_code.clone(),
                resources: Vec::new(),
            });
        }
        self.register_info(resources)
    }

    async fn deregister_resource(&self, resources: &[ResourceAttribute]) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        let info = self.register_info(resources)?;
        let entities = info.resources.iter().map(DeregisterEntity::from).collect();
        self.delete_entities(entities).await
    }

    async fn raw_deregister_resource(
        &self,
        scope: &ScopeInfo,
        resources: &[BackendResource],
    ) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        let entities = resources
            .iter()
            .map(|path| {
                let last = path.last().ok_or_else(|| {
                    AuthzError::InvalidInput("cannot deregister an empty resource path".to_string())
                })?;
                Ok(DeregisterEntity {
                    resource_type: last.resource_type.clone(),
                    resource_id: path.clone(),
                    scope: scope.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.delete_entities(entities).await
    }

    async fn update_resource(&self, resource: &ResourceAttribute) -> Result<()> {
        if !self.enabled() || resource.is_skip() {
            return Ok(());
        }

        let entity = adaptor::resource_entity(resource, self.system_id())?;
        let response = self
            .call::<_, Value>(Method::PUT, &self.resource_path("resources"), Some(&entity))
            .await?;

        if !response.result && response.code == CODE_RESOURCE_NOT_FOUND {
            debug!(resource_type = %entity.resource_type, "updated resource missing, registering it");
            return self.register_resource(std::slice::from_ref(resource)).await;
        }
        Self::ack(response, "update resource", &[])
    }

    async fn list_resources(
        &self,
        resource: &ResourceAttribute,
        page: Page,
    ) -> Result<Vec<BackendResource>> {
        if !self.enabled() {
            return Ok(Vec::new());
        }

        let body = ListResourcesRequest {
            resource_type: adaptor::resource_type_id(resource)?.to_string(),
            scope: adaptor::scope(resource, self.system_id()),
            offset: page.offset,
            limit: page.limit,
        };
        let response = self
            .call::<_, ListResourcesResult>(
                Method::POST,
                &self.resource_path("resources/search"),
                Some(&body),
            )
            .await?;

        if !response.result {
            return Err(AuthzError::Registration(format!(
                "list resources failed, code: {}, message: {}",
                response.code, response.message
            )));
        }
        Ok(response.data.unwrap_or_default().info)
    }

    async fn init(&self, config: &InitConfig) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        let system_path = format!("/bkiam/api/v1/model/systems/{}", config.system.system_id);
        self.upsert_model(
            "/bkiam/api/v1/model/systems",
            &system_path,
            &config.system,
            "register system",
        )
        .await?;

        let types_path = format!("{system_path}/resource-types");
        self.upsert_model(
            &types_path,
            &types_path,
            &config.resource_types,
            "register resource types",
        )
        .await?;

        info!(
            system = %config.system.system_id,
            resource_types = config.resource_types.len(),
            "policy engine model initialized"
        );
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        let response = self.send::<Value>(Method::GET, "/ping", None).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AuthzError::Indeterminate(format!(
                "policy engine ping returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{Action, ResourceType};

    fn disabled() -> AuthCenter {
        AuthCenter::new(AuthConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_disabled_allows_without_backend() {
        let center = disabled();
        let user = UserInfo::new("alice", "0");
        let resources = vec![
            ResourceAttribute::new(ResourceType::Business, Action::Delete).with_business(1),
            ResourceAttribute::new(ResourceType::HostInstance, Action::SkipAction),
        ];

        let decisions = center.authorize_batch(&user, &resources).await.unwrap();
        assert_eq!(decisions.len(), 2);
        assert!(decisions.iter().all(|d| d.authorized && d.reason == AUTH_DISABLED_REASON));

        assert!(center.register_resource(&resources).await.is_ok());
        assert!(center.get_authorized_business_list(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_address_is_indeterminate() {
        let center = AuthCenter::new(AuthConfig {
            enable: true,
            ..Default::default()
        })
        .unwrap();
        let user = UserInfo::new("alice", "0");
        let resources = vec![ResourceAttribute::new(ResourceType::Business, Action::Find)];

        let err = center.authorize_batch(&user, &resources).await.unwrap_err();
        assert!(err.is_indeterminate());
    }

    #[tokio::test]
    async fn test_all_skipped_never_calls_backend() {
        let center = AuthCenter::new(AuthConfig {
            enable: true,
            ..Default::default()
        })
        .unwrap();
        let user = UserInfo::new("alice", "0");
        let resources = vec![ResourceAttribute::new(ResourceType::HostInstance, Action::SkipAction)];

        let decisions = center.authorize_batch(&user, &resources).await.unwrap();
        assert!(decisions[0].authorized);
    }

    #[test]
    fn test_register_info_drops_skipped() {
        let center = AuthCenter::new(AuthConfig {
            app_code: "cmdb".to_string(),
            ..Default::default()
        })
        .unwrap();
        let info = center
            .register_info(&[
                ResourceAttribute::new(ResourceType::Business, Action::Create)
                    .with_instance(4)
                    .with_name("ops"),
                ResourceAttribute::new(ResourceType::HostInstance, Action::SkipAction),
            ])
            .unwrap();

        assert_eq!(info.creator_id, "cmdb");
        assert_eq!(info.resources.len(), 1);
        assert_eq!(info.resources[0].resource_name, "ops");
    }
}
