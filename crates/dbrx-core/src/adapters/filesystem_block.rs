//! Filesystem block adapter
//!
//! The remote path is the handle. Contents are write-only from the
//! reconciler's point of view: only the file size is observable, so the
//! content digest recorded at the last write is compared as well.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

use super::{Adapter, CONTENT_SLOT, Delta, MappingContext, decode_base64, fingerprint, require_absolute};
use crate::error::Result;
use crate::model::{ObjectKey, ObjectStatus, RemoteHandle};

/// Desired file on the distributed filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemBlockSpec {
    /// Absolute filesystem path
    pub path: String,
    /// Base64 file contents
    #[serde(default)]
    pub data: String,
}

impl FilesystemBlockSpec {
    pub fn new(path: impl Into<String>, contents: &[u8]) -> Self {
        use base64::Engine as _;
        Self {
            path: path.into(),
            data: base64::engine::general_purpose::STANDARD.encode(contents),
        }
    }

    fn decoded(&self) -> Result<Vec<u8>> {
        decode_base64("data", &self.data)
    }

    fn write_payload(&self, overwrite: bool) -> Value {
        json!({"path": self.path, "contents": self.data, "overwrite": overwrite})
    }
}

impl Adapter for FilesystemBlockSpec {
    fn validate(&self) -> Result<()> {
        require_absolute("path", &self.path)?;
        self.decoded().map(|_| ())
    }

    fn natural_handle(&self, _key: &ObjectKey) -> Option<RemoteHandle> {
        Some(RemoteHandle::new(self.path.clone()))
    }

    fn create_payload(&self, _ctx: &MappingContext<'_>) -> Result<Value> {
        Ok(self.write_payload(false))
    }

    fn normalize(&self, remote: &Value) -> Value {
        let path = remote.get("path").cloned().unwrap_or(Value::Null);
        // Remotes that echo contents instead of reporting a size
        let size = remote.get("file_size").and_then(Value::as_u64).or_else(|| {
            remote
                .get("contents")
                .and_then(Value::as_str)
                .and_then(|data| decode_base64("contents", data).ok())
                .map(|bytes| bytes.len() as u64)
        });
        json!({"path": path, "file_size": size})
    }

    fn delta(
        &self,
        _ctx: &MappingContext<'_>,
        observed: &Value,
        status: &ObjectStatus,
    ) -> Result<Delta> {
        if observed.get("path").and_then(Value::as_str) != Some(self.path.as_str()) {
            return Ok(Delta::Replace {
                fields: vec!["path".to_string()],
            });
        }

        let contents = self.decoded()?;
        let mut fields = Vec::new();
        if observed.get("file_size").and_then(Value::as_u64) != Some(contents.len() as u64) {
            fields.push("file_size".to_string());
        }
        if status.fingerprints.get(CONTENT_SLOT) != Some(&fingerprint(&contents)) {
            fields.push("contents".to_string());
        }

        if fields.is_empty() {
            Ok(Delta::InSync)
        } else {
            Ok(Delta::Update {
                payload: self.write_payload(true),
                fields,
            })
        }
    }

    fn fingerprints(&self) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::from([(
            CONTENT_SLOT.to_string(),
            fingerprint(&self.decoded()?),
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Dependencies;

    #[test]
    fn test_validate() {
        assert!(FilesystemBlockSpec::new("/tmp/a.txt", b"hi").validate().is_ok());
        assert!(FilesystemBlockSpec::new("tmp/a.txt", b"hi").validate().is_err());

        let bad = FilesystemBlockSpec {
            path: "/tmp/a.txt".to_string(),
            data: "not base64!".to_string(),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_same_size_content_change_detected_by_fingerprint() {
        let key = ObjectKey::new("team-a", "conf");
        let deps = Dependencies::new();
        let ctx = MappingContext {
            key: &key,
            dependencies: &deps,
        };

        let old = FilesystemBlockSpec::new("/conf/app.json", b"{\"a\":1}");
        let observed = old.normalize(&json!({"path": "/conf/app.json", "file_size": 7}));
        let status = ObjectStatus {
            fingerprints: old.fingerprints().unwrap(),
            ..ObjectStatus::default()
        };
        assert_eq!(old.delta(&ctx, &observed, &status).unwrap(), Delta::InSync);

        let new = FilesystemBlockSpec::new("/conf/app.json", b"{\"a\":2}");
        match new.delta(&ctx, &observed, &status).unwrap() {
            Delta::Update { payload, fields } => {
                assert_eq!(fields, vec!["contents".to_string()]);
                assert_eq!(payload["overwrite"], json!(true));
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_path_change_replaces() {
        let key = ObjectKey::new("team-a", "conf");
        let deps = Dependencies::new();
        let ctx = MappingContext {
            key: &key,
            dependencies: &deps,
        };
        let spec = FilesystemBlockSpec::new("/conf/new.json", b"{}");
        let observed = json!({"path": "/conf/old.json", "file_size": 2});
        assert!(matches!(
            spec.delta(&ctx, &observed, &ObjectStatus::default()).unwrap(),
            Delta::Replace { .. }
        ));
    }

    #[test]
    fn test_normalize_from_echoed_contents() {
        let spec = FilesystemBlockSpec::new("/tmp/a.txt", b"hello");
        let key = ObjectKey::new("ns", "a");
        let deps = Dependencies::new();
        let payload = spec
            .create_payload(&MappingContext {
                key: &key,
                dependencies: &deps,
            })
            .unwrap();
        assert_eq!(
            spec.normalize(&payload),
            json!({"path": "/tmp/a.txt", "file_size": 5})
        );
    }
}
