//! Authentication-context detection.
//!
//! Runs before any tool call. A sub-query that targets a tenant-scoped
//! resource without the identifying parameters short-circuits to a
//! clarification request instead of hitting the data source.

use serde_json::{Map, Value};

use crate::error::ErrorKind;
use crate::registry::{AuthProfile, AuthProfileStore, AuthScope, DataSourceDescriptor};
use crate::types::{ClarificationRequest, SubQuery};

/// Segments of a data source id that imply a tenant-scoped resource.
const SCOPED_SOURCE_MARKERS: &[&str] = &["enterprise", "company", "companies", "empresa", "corporate"];
/// Filter keys that may request a scope explicitly.
const SCOPE_FILTER_KEYS: &[&str] = &["scope", "auth_scope"];
const INFERRED_SCOPE: &str = "enterprise";
const DEFAULT_IDENTIFYING_PARAM: &str = "company_id";

#[derive(Debug, Clone, PartialEq)]
pub enum AuthResolution {
    /// Default credentials, optionally a caller-hinted profile.
    Default { profile: Option<AuthProfile> },
    /// Scoped credentials with every identifying parameter resolved.
    Scoped {
        scope: String,
        profile: Option<AuthProfile>,
        identity: Map<String, Value>,
    },
    /// Cannot proceed without more information from the user.
    Missing(ClarificationRequest),
}

/// Scope required by the registry entry, or inferred from the id and filters.
pub fn detect_required_scope(sq: &SubQuery, descriptor: &DataSourceDescriptor) -> Option<AuthScope> {
    if let Some(scope) = &descriptor.required_auth_scope {
        return Some(scope.clone());
    }

    let source = sq.data_source.to_lowercase();
    let source_signal = source
        .split(|c: char| c == '.' || c == '_' || c == '-' || c == '/')
        .any(|segment| SCOPED_SOURCE_MARKERS.contains(&segment));

    let filter_signal = SCOPE_FILTER_KEYS.iter().any(|key| {
        sq.filters
            .get(*key)
            .and_then(Value::as_str)
            .map(|v| {
                let v = v.to_lowercase();
                SCOPED_SOURCE_MARKERS.iter().any(|m| v.contains(m))
            })
            .unwrap_or(false)
    });

    if source_signal || filter_signal {
        Some(AuthScope::new(INFERRED_SCOPE, [DEFAULT_IDENTIFYING_PARAM]))
    } else {
        None
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Resolve which credentials a sub-query runs with.
///
/// `params` are the sub-query filters merged with user-supplied values.
pub async fn resolve_auth(
    sq: &SubQuery,
    descriptor: &DataSourceDescriptor,
    params: &Map<String, Value>,
    profile_hint: Option<&str>,
    store: &dyn AuthProfileStore,
) -> AuthResolution {
    let scope = detect_required_scope(sq, descriptor);

    let profile_name = profile_hint
        .map(str::to_string)
        .or_else(|| scope.as_ref().and_then(|s| s.default_profile.clone()));

    let profile = match profile_name {
        Some(name) => match store.lookup(&name).await {
            Some(profile) => Some(profile),
            None => {
                log::warn!(
                    "Credential profile '{}' not found for sub-query {}",
                    name,
                    sq.id
                );
                return AuthResolution::Missing(ClarificationRequest {
                    query_id: sq.id.clone(),
                    question: format!(
                        "The credential profile '{}' is not available. Which profile should be used for \"{}\"?",
                        name, sq.description
                    ),
                    missing_params: vec!["auth_profile".to_string()],
                    reason: ErrorKind::AuthRequired,
                });
            }
        },
        None => None,
    };

    let Some(scope) = scope else {
        return AuthResolution::Default { profile };
    };

    let mut identity = Map::new();
    let mut missing = Vec::new();
    for key in &scope.identifying_params {
        let from_params = params.get(key).filter(|v| is_present(Some(v)));
        let from_profile = profile
            .as_ref()
            .and_then(|p| p.identifying_params.get(key))
            .filter(|v| is_present(Some(v)));
        match from_params.or(from_profile) {
            Some(value) => {
                identity.insert(key.clone(), value.clone());
            }
            None => missing.push(key.clone()),
        }
    }

    if !missing.is_empty() {
        log::info!(
            "Sub-query {} needs {} scope but is missing {:?}",
            sq.id,
            scope.name,
            missing
        );
        return AuthResolution::Missing(ClarificationRequest {
            query_id: sq.id.clone(),
            question: format!(
                "\"{}\" reads {} data. Which company should be used? Please provide: {}",
                sq.description,
                scope.name,
                missing.join(", ")
            ),
            missing_params: missing,
            reason: ErrorKind::AuthRequired,
        });
    }

    AuthResolution::Scoped {
        scope: scope.name,
        profile,
        identity,
    }
}
