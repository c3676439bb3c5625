//! Secret scope adapter
//!
//! The scope is named after the object. Secrets and ACLs are children;
//! secret values cannot be read back, so they are compared by the digest
//! recorded when they were last written.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

use super::{Adapter, Delta, DesiredChild, MappingContext, decode_base64, fingerprint, project};
use crate::error::{Error, Result};
use crate::model::{ObjectKey, ObjectStatus, RemoteHandle};
use crate::traits::ChildKind;

const SCOPE_FIELDS: &[&str] = &["scope", "scope_backend_type", "backend_azure_keyvault"];

/// Storage backing a scope
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScopeBackend {
    #[default]
    Native,
    KeyVault { resource_id: String, dns_name: String },
}

/// Secret value, as plain text or base64 bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretValue {
    StringValue(String),
    BytesValue(String),
}

impl SecretValue {
    fn digest(&self) -> Result<String> {
        match self {
            SecretValue::StringValue(value) => Ok(fingerprint(value.as_bytes())),
            SecretValue::BytesValue(encoded) => Ok(fingerprint(&decode_base64("bytes_value", encoded)?)),
        }
    }
}

/// A secret inside the scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub key: String,
    #[serde(flatten)]
    pub value: SecretValue,
}

/// Permission granted to a principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AclPermission {
    Read,
    Write,
    Manage,
}

impl AclPermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            AclPermission::Read => "READ",
            AclPermission::Write => "WRITE",
            AclPermission::Manage => "MANAGE",
        }
    }
}

/// Access control entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclSpec {
    pub principal: String,
    pub permission: AclPermission,
}

/// Desired secret scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretScopeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_manage_principal: Option<String>,
    #[serde(default)]
    pub backend: ScopeBackend,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acls: Vec<AclSpec>,
}

impl SecretScopeSpec {
    fn identity(&self, ctx: &MappingContext<'_>) -> Value {
        let mut obj = Map::new();
        obj.insert("scope".into(), json!(ctx.key.name));
        match &self.backend {
            ScopeBackend::Native => {
                obj.insert("scope_backend_type".into(), json!("DATABRICKS"));
            }
            ScopeBackend::KeyVault {
                resource_id,
                dns_name,
            } => {
                obj.insert("scope_backend_type".into(), json!("AZURE_KEYVAULT"));
                obj.insert(
                    "backend_azure_keyvault".into(),
                    json!({"resource_id": resource_id, "dns_name": dns_name}),
                );
            }
        }
        Value::Object(obj)
    }
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 128
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl Adapter for SecretScopeSpec {
    fn validate(&self) -> Result<()> {
        let mut keys = BTreeSet::new();
        for secret in &self.secrets {
            if !valid_key(&secret.key) {
                return Err(Error::invalid_spec(format!(
                    "secret key '{}' must be 1-128 characters of [A-Za-z0-9-_.]",
                    secret.key
                )));
            }
            if !keys.insert(secret.key.as_str()) {
                return Err(Error::invalid_spec(format!("secret '{}' is listed twice", secret.key)));
            }
            secret.value.digest()?;
        }

        let mut principals = BTreeSet::new();
        for acl in &self.acls {
            if acl.principal.trim().is_empty() {
                return Err(Error::invalid_spec("acl principal is required"));
            }
            if !principals.insert(acl.principal.as_str()) {
                return Err(Error::invalid_spec(format!(
                    "acl for '{}' is listed twice",
                    acl.principal
                )));
            }
        }

        if matches!(&self.backend, ScopeBackend::KeyVault { resource_id, .. } if resource_id.is_empty())
        {
            return Err(Error::invalid_spec("key vault backend needs a resource_id"));
        }
        Ok(())
    }

    fn natural_handle(&self, key: &ObjectKey) -> Option<RemoteHandle> {
        Some(RemoteHandle::new(key.name.clone()))
    }

    fn create_payload(&self, ctx: &MappingContext<'_>) -> Result<Value> {
        let mut payload = self.identity(ctx);
        if let (Some(obj), Some(principal)) = (payload.as_object_mut(), &self.initial_manage_principal) {
            obj.insert("initial_manage_principal".into(), json!(principal));
        }
        Ok(payload)
    }

    fn normalize(&self, remote: &Value) -> Value {
        project(remote, SCOPE_FIELDS)
    }

    fn delta(
        &self,
        ctx: &MappingContext<'_>,
        observed: &Value,
        _status: &ObjectStatus,
    ) -> Result<Delta> {
        // Scopes have no mutable settings; backend changes need a new scope
        let diff = super::diff_fields(&self.identity(ctx), observed, &["backend_azure_keyvault"]);
        if diff.is_empty() {
            Ok(Delta::InSync)
        } else {
            Ok(Delta::Replace {
                fields: diff.fields(),
            })
        }
    }

    fn child_kinds(&self) -> &'static [ChildKind] {
        &[ChildKind::Secret, ChildKind::SecretAcl]
    }

    fn children(&self) -> Result<Vec<DesiredChild>> {
        let mut children = Vec::with_capacity(self.secrets.len() + self.acls.len());
        for secret in &self.secrets {
            let mut payload = serde_json::to_value(&secret.value)?;
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("key".into(), json!(secret.key));
            }
            children.push(DesiredChild {
                child: ChildKind::Secret,
                key: secret.key.clone(),
                payload,
                fingerprint: secret.value.digest()?,
            });
        }
        for acl in &self.acls {
            children.push(DesiredChild {
                child: ChildKind::SecretAcl,
                key: acl.principal.clone(),
                payload: json!({"principal": acl.principal, "permission": acl.permission}),
                fingerprint: acl.permission.as_str().to_string(),
            });
        }
        Ok(children)
    }
}
