//! Workspace item adapter
//!
//! Notebooks and files are imported at their path. Path and import format
//! cannot change in place; language or content changes re-import with
//! overwrite.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use super::{
    Adapter, CONTENT_SLOT, Delta, MappingContext, decode_base64, fingerprint, project,
    require_absolute,
};
use crate::error::{Error, Result};
use crate::model::{ObjectKey, ObjectStatus, RemoteHandle};

/// Notebook language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Language {
    Python,
    Scala,
    Sql,
    R,
}

/// Import format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportFormat {
    #[default]
    Source,
    Html,
    Jupyter,
    Dbc,
    Auto,
}

/// Desired notebook or file in the workspace tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceItemSpec {
    /// Absolute workspace path
    pub path: String,
    /// Base64 content
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default)]
    pub format: ExportFormat,
}

impl WorkspaceItemSpec {
    fn import_payload(&self, overwrite: bool) -> Value {
        let mut obj = Map::new();
        obj.insert("path".into(), json!(self.path));
        obj.insert("content".into(), json!(self.content));
        obj.insert("format".into(), json!(self.format));
        if let Some(language) = self.language {
            obj.insert("language".into(), json!(language));
        }
        obj.insert("overwrite".into(), json!(overwrite));
        Value::Object(obj)
    }
}

impl Adapter for WorkspaceItemSpec {
    fn validate(&self) -> Result<()> {
        require_absolute("path", &self.path)?;
        decode_base64("content", &self.content)?;
        if self.format == ExportFormat::Source && self.language.is_none() {
            return Err(Error::invalid_spec("SOURCE imports need a language"));
        }
        Ok(())
    }

    fn natural_handle(&self, _key: &ObjectKey) -> Option<RemoteHandle> {
        Some(RemoteHandle::new(self.path.clone()))
    }

    fn create_payload(&self, _ctx: &MappingContext<'_>) -> Result<Value> {
        Ok(self.import_payload(false))
    }

    fn normalize(&self, remote: &Value) -> Value {
        project(remote, &["path", "language", "format"])
    }

    fn delta(
        &self,
        _ctx: &MappingContext<'_>,
        observed: &Value,
        status: &ObjectStatus,
    ) -> Result<Delta> {
        let mut immutable = Vec::new();
        if observed.get("path").and_then(Value::as_str) != Some(self.path.as_str()) {
            immutable.push("path".to_string());
        }
        // Status reads do not report the format of every item
        if let Some(format) = observed.get("format") {
            if *format != json!(self.format) {
                immutable.push("format".to_string());
            }
        }
        if !immutable.is_empty() {
            return Ok(Delta::Replace { fields: immutable });
        }

        let mut fields = Vec::new();
        if let Some(language) = self.language {
            if observed.get("language") != Some(&json!(language)) {
                fields.push("language".to_string());
            }
        }
        let digest = fingerprint(&decode_base64("content", &self.content)?);
        if status.fingerprints.get(CONTENT_SLOT) != Some(&digest) {
            fields.push("content".to_string());
        }

        if fields.is_empty() {
            Ok(Delta::InSync)
        } else {
            Ok(Delta::Update {
                payload: self.import_payload(true),
                fields,
            })
        }
    }

    fn fingerprints(&self) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::from([(
            CONTENT_SLOT.to_string(),
            fingerprint(&decode_base64("content", &self.content)?),
        )]))
    }
}
