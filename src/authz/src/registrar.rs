//! Lifecycle hooks that keep the policy engine registry in step with businesses
//!
//! Every failure from these hooks is reported as `AuthzError::Registration`, whatever the
//! underlying cause, so callers can tell a registry problem from a store problem.

use std::sync::Arc;
use tracing::{info, warn};

use crate::authcenter::adaptor;
use crate::client::ResourceHandler;
use crate::error::Result;
use crate::meta::{Action, ResourceAttribute, ResourceType, RscTypeAndId, ScopeInfo};

/// Registration hooks for business entities
#[derive(Clone)]
pub struct Registrar {
    handler: Arc<dyn ResourceHandler>,
    system_id: String,
}

impl Registrar {
    pub fn new(handler: Arc<dyn ResourceHandler>, system_id: impl Into<String>) -> Self {
        Self {
            handler,
            system_id: system_id.into(),
        }
    }

    /// Registry descriptor of one business
    pub fn business_attribute(business_id: i64, name: &str) -> ResourceAttribute {
        ResourceAttribute::new(ResourceType::Business, Action::Create)
            .with_instance(business_id)
            .with_name(name)
    }

    /// Register a business that has just been created
    pub async fn register_business(&self, business_id: i64, name: &str) -> Result<()> {
        let attr = Self::business_attribute(business_id, name);
        self.handler
            .register_resource(std::slice::from_ref(&attr))
            .await
            .map_err(|e| {
                warn!(business_id, error = %e, "register business to policy engine failed");
                e.into_registration()
            })?;

        info!(business_id, name, "business registered");
        Ok(())
    }

    /// Deregister a business by its engine-native id; must complete before the record goes
    pub async fn deregister_business(&self, business_id: i64) -> Result<()> {
        let path = vec![RscTypeAndId::new(adaptor::BUSINESS, business_id.to_string())];
        self.handler
            .raw_deregister_resource(&ScopeInfo::system(&self.system_id), &[path])
            .await
            .map_err(|e| {
                warn!(business_id, error = %e, "deregister business from policy engine failed");
                e.into_registration()
            })?;

        info!(business_id, "business deregistered");
        Ok(())
    }

    /// Refresh the registered name of a business
    pub async fn update_business(&self, business_id: i64, name: &str) -> Result<()> {
        let attr = ResourceAttribute::new(ResourceType::Business, Action::Update)
            .with_instance(business_id)
            .with_name(name);
        self.handler.update_resource(&attr).await.map_err(|e| {
            warn!(business_id, error = %e, "update business registration failed");
            e.into_registration()
        })
    }
}
