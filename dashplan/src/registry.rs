//! Data-source registry and credential-profile store.
//!
//! Both are external collaborators. The controller only reads from them
//! during an execution; the in-memory implementations here back the CLI and
//! the tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Transport behind a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    Rest,
    Database,
    Mcp,
}

impl Default for DataSourceKind {
    fn default() -> Self {
        Self::Rest
    }
}

/// Value type accepted for a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamType {
    Number,
    String,
    Boolean,
    /// `YYYY-MM-DD` or RFC 3339
    Date,
    /// `{start, end}`, `"start..end"` or `"start/end"`, with `start <= end`
    DateRange,
    Enum { options: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(flatten)]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    /// Whether asking the user can fix a missing or invalid value
    #[serde(default = "default_true")]
    pub user_resolvable: bool,
    /// Question shown when the value is missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            user_resolvable: true,
            prompt: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn not_user_resolvable(mut self) -> Self {
        self.user_resolvable = false;
        self
    }
}

/// Credential scope a data source needs beyond the default profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthScope {
    /// e.g. `enterprise`
    pub name: String,
    /// Parameters that identify the tenant, e.g. `company_id`
    #[serde(default)]
    pub identifying_params: Vec<String>,
    /// Profile to use when the caller gives no hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
}

impl AuthScope {
    pub fn new<I, S>(name: impl Into<String>, identifying_params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            identifying_params: identifying_params.into_iter().map(Into::into).collect(),
            default_profile: None,
        }
    }
}

/// What the registry knows about one data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    pub id: String,
    #[serde(default)]
    pub kind: DataSourceKind,
    /// Endpoint, DSN or MCP server/tool name, opaque to the controller
    #[serde(default)]
    pub connection_info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_auth_scope: Option<AuthScope>,
    #[serde(default)]
    pub param_schema: Vec<ParamSpec>,
}

impl DataSourceDescriptor {
    pub fn new(id: impl Into<String>, kind: DataSourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            connection_info: String::new(),
            required_auth_scope: None,
            param_schema: vec![],
        }
    }

    pub fn with_connection_info(mut self, info: impl Into<String>) -> Self {
        self.connection_info = info.into();
        self
    }

    pub fn with_auth_scope(mut self, scope: AuthScope) -> Self {
        self.required_auth_scope = Some(scope);
        self
    }

    pub fn with_param(mut self, spec: ParamSpec) -> Self {
        self.param_schema.push(spec);
        self
    }
}

/// A named credential profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthProfile {
    pub name: String,
    /// Scope this profile grants, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Identifying values carried by the profile, e.g. a fixed `company_id`
    #[serde(default)]
    pub identifying_params: Map<String, Value>,
}

impl AuthProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
            identifying_params: Map::new(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_identity(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.identifying_params.insert(key.into(), value.into());
        self
    }
}

/// Resolves a named data source to connection and auth metadata.
#[async_trait]
pub trait DataSourceRegistry: Send + Sync {
    async fn resolve(&self, data_source: &str) -> Option<DataSourceDescriptor>;
}

/// Looks up credential profiles by name.
#[async_trait]
pub trait AuthProfileStore: Send + Sync {
    async fn lookup(&self, profile: &str) -> Option<AuthProfile>;
}

#[derive(Debug, Default)]
pub struct InMemoryDataSourceRegistry {
    sources: RwLock<HashMap<String, DataSourceDescriptor>>,
}

impl InMemoryDataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = DataSourceDescriptor>) -> Self {
        let sources = descriptors
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        Self {
            sources: RwLock::new(sources),
        }
    }

    /// Insert or replace a descriptor; last write wins.
    pub async fn register(&self, descriptor: DataSourceDescriptor) {
        log::debug!("Registering data source {}", descriptor.id);
        self.sources
            .write()
            .await
            .insert(descriptor.id.clone(), descriptor);
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.sources.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl DataSourceRegistry for InMemoryDataSourceRegistry {
    async fn resolve(&self, data_source: &str) -> Option<DataSourceDescriptor> {
        self.sources.read().await.get(data_source).cloned()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuthProfileStore {
    profiles: RwLock<HashMap<String, AuthProfile>>,
}

impl InMemoryAuthProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = AuthProfile>) -> Self {
        let profiles = profiles.into_iter().map(|p| (p.name.clone(), p)).collect();
        Self {
            profiles: RwLock::new(profiles),
        }
    }

    pub async fn register(&self, profile: AuthProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.name.clone(), profile);
    }
}

#[async_trait]
impl AuthProfileStore for InMemoryAuthProfileStore {
    async fn lookup(&self, profile: &str) -> Option<AuthProfile> {
        self.profiles.read().await.get(profile).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = InMemoryDataSourceRegistry::new();
        assert!(registry.resolve("courses").await.is_none());

        registry
            .register(DataSourceDescriptor::new("courses", DataSourceKind::Rest))
            .await;
        registry
            .register(
                DataSourceDescriptor::new("courses", DataSourceKind::Database)
                    .with_connection_info("postgres://lms/courses"),
            )
            .await;

        let resolved = registry.resolve("courses").await.unwrap();
        assert_eq!(resolved.kind, DataSourceKind::Database);
        assert_eq!(registry.ids().await, vec!["courses".to_string()]);
    }

    #[tokio::test]
    async fn test_profile_store() {
        let store = InMemoryAuthProfileStore::from_profiles([AuthProfile::new("acme")
            .with_scope("enterprise")
            .with_identity("company_id", "acme-01")]);
        let profile = store.lookup("acme").await.unwrap();
        assert_eq!(profile.identifying_params.get("company_id"), Some(&json!("acme-01")));
        assert!(store.lookup("globex").await.is_none());
    }

    #[test]
    fn test_descriptor_from_toml() {
        let descriptor: DataSourceDescriptor = toml::from_str(
            r#"
id = "enterprise.companies"
kind = "mcp"
connection_info = "crm-server/list_companies"

[required_auth_scope]
name = "enterprise"
identifying_params = ["company_id"]

[[param_schema]]
name = "status"
type = "enum"
options = ["active", "churned"]
required = true

[[param_schema]]
name = "period"
type = "date_range"
"#,
        )
        .unwrap();

        assert_eq!(descriptor.kind, DataSourceKind::Mcp);
        let scope = descriptor.required_auth_scope.unwrap();
        assert_eq!(scope.identifying_params, vec!["company_id".to_string()]);
        assert_eq!(
            descriptor.param_schema[0].param_type,
            ParamType::Enum {
                options: vec!["active".into(), "churned".into()]
            }
        );
        assert!(descriptor.param_schema[0].user_resolvable);
        assert!(!descriptor.param_schema[1].required);
        assert_eq!(descriptor.param_schema[1].param_type, ParamType::DateRange);
    }
}
