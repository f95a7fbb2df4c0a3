//! # CMDB Authorization Core
//!
//! Maps inbound resource-management API requests onto a protected-resource model and
//! enforces decisions from an external policy engine.
//!
//! ## Features
//!
//! - **Request classification** into canonical resource attributes (type, action, scope)
//! - **Authorization client** for single and batch decisions plus scope queries
//! - **Resource registration** keeping the policy engine registry in step with entities
//! - **Authorized business cache** with stale-while-refresh re-querying
//!
//! ## Example
//!
//! ```rust,no_run
//! use cmdb_authz::{Authorizer, Classifier, InMemoryAuthCenter, RequestContext, UserInfo};
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let classifier = Classifier::new()?;
//!     let engine = InMemoryAuthCenter::new();
//!
//!     let ctx = RequestContext::new(
//!         Method::POST,
//!         "/api/v3/hosts/search",
//!         serde_json::json!({"bk_biz_id": 3}),
//!     )?;
//!     let attribute = classifier.parse(UserInfo::new("alice", "0"), &ctx)?;
//!
//!     let decision = engine.authorize(&attribute).await?;
//!     if decision.authorized {
//!         println!("Access granted!");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod authcenter;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod meta;
pub mod parser;
pub mod registrar;
pub mod topo;

// Re-export commonly used types
pub use authcenter::AuthCenter;
pub use cache::{BusinessScope, BusinessScopeCache, CacheStats};
pub use client::{enforce, Authorize, Authorizer, ResourceHandler};
pub use config::{AuthConfig, GatewayConfig, WarmRefreshPolicy};
pub use error::{AuthzError, Result};
pub use memory::InMemoryAuthCenter;
pub use meta::{
    Action, AuthAttribute, Decision, ResourceAttribute, ResourceType, UserInfo, GLOBAL_SCOPE,
};
pub use parser::{Classifier, Metadata, RequestContext};
pub use registrar::Registrar;
pub use topo::{BusinessOperation, BusinessStore, InMemoryBusinessStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
