//! Cluster adapter
//!
//! Sizing-only changes (`num_workers`, `autoscale`) are applied with a
//! resize payload carrying just the sizing field. Any other change sends
//! the full settings as an edit. Libraries are children of the cluster.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use super::{
    Adapter, Delta, DesiredChild, MappingContext, Readiness, IDEMPOTENCY_TAG, diff_fields,
    project, put_opt,
};
use crate::error::{Error, Result};
use crate::model::ObjectStatus;
use crate::traits::ChildKind;

/// Fields changed by a resize
pub const SIZING_FIELDS: &[&str] = &["num_workers", "autoscale"];

const CLUSTER_FIELDS: &[&str] = &[
    "cluster_name",
    "spark_version",
    "node_type_id",
    "driver_node_type_id",
    "num_workers",
    "autoscale",
    "autotermination_minutes",
    "spark_conf",
    "spark_env_vars",
    "custom_tags",
];

/// Autoscaling bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autoscale {
    pub min_workers: u32,
    pub max_workers: u32,
}

/// A library attached to a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Library {
    Jar(String),
    Egg(String),
    Whl(String),
    Pypi {
        package: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo: Option<String>,
    },
    Maven {
        coordinates: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        exclusions: Vec<String>,
    },
    Cran {
        package: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo: Option<String>,
    },
}

impl Library {
    /// Coordinate identifying the library on its cluster
    pub fn coordinate(&self) -> String {
        match self {
            Library::Jar(path) => format!("jar:{}", path),
            Library::Egg(path) => format!("egg:{}", path),
            Library::Whl(path) => format!("whl:{}", path),
            Library::Pypi { package, .. } => format!("pypi:{}", package),
            Library::Maven { coordinates, .. } => format!("maven:{}", coordinates),
            Library::Cran { package, .. } => format!("cran:{}", package),
        }
    }
}

/// Desired cluster configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Display name, defaults to the object name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    pub spark_version: String,
    pub node_type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_node_type_id: Option<String>,
    /// Fixed size; exclusive with `autoscale`
    #[serde(default, alias = "size", skip_serializing_if = "Option::is_none")]
    pub num_workers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscale: Option<Autoscale>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autotermination_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spark_conf: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spark_env_vars: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<Library>,
}

impl ClusterSpec {
    /// A fixed-size cluster with default settings
    pub fn fixed(spark_version: impl Into<String>, node_type_id: impl Into<String>, workers: u32) -> Self {
        Self {
            cluster_name: None,
            spark_version: spark_version.into(),
            node_type_id: node_type_id.into(),
            driver_node_type_id: None,
            num_workers: Some(workers),
            autoscale: None,
            autotermination_minutes: None,
            spark_conf: BTreeMap::new(),
            spark_env_vars: BTreeMap::new(),
            custom_tags: BTreeMap::new(),
            libraries: Vec::new(),
        }
    }

    /// Validate the compute shape, shared with inline job clusters
    pub(crate) fn validate_shape(&self) -> Result<()> {
        if self.spark_version.trim().is_empty() {
            return Err(Error::invalid_spec("spark_version is required"));
        }
        if self.node_type_id.trim().is_empty() {
            return Err(Error::invalid_spec("node_type_id is required"));
        }
        match (self.num_workers, self.autoscale) {
            (Some(_), Some(_)) => Err(Error::invalid_spec(
                "num_workers and autoscale are mutually exclusive",
            )),
            (None, None) => Err(Error::invalid_spec(
                "one of num_workers or autoscale is required",
            )),
            (None, Some(bounds)) if bounds.min_workers > bounds.max_workers => {
                Err(Error::invalid_spec(format!(
                    "autoscale min_workers {} exceeds max_workers {}",
                    bounds.min_workers, bounds.max_workers
                )))
            }
            _ => Ok(()),
        }
    }

    /// Compute settings without name, tags or libraries
    pub(crate) fn shape_payload(&self) -> Result<Map<String, Value>> {
        let mut obj = Map::new();
        obj.insert("spark_version".into(), json!(self.spark_version));
        obj.insert("node_type_id".into(), json!(self.node_type_id));
        put_opt(&mut obj, "driver_node_type_id", &self.driver_node_type_id)?;
        put_opt(&mut obj, "num_workers", &self.num_workers)?;
        put_opt(&mut obj, "autoscale", &self.autoscale)?;
        put_opt(&mut obj, "autotermination_minutes", &self.autotermination_minutes)?;
        if !self.spark_conf.is_empty() {
            obj.insert("spark_conf".into(), serde_json::to_value(&self.spark_conf)?);
        }
        if !self.spark_env_vars.is_empty() {
            obj.insert("spark_env_vars".into(), serde_json::to_value(&self.spark_env_vars)?);
        }
        Ok(obj)
    }

    fn settings(&self, ctx: &MappingContext<'_>) -> Result<Value> {
        let mut obj = self.shape_payload()?;
        let name = self.cluster_name.clone().unwrap_or_else(|| ctx.key.name.clone());
        obj.insert("cluster_name".into(), json!(name));

        let mut tags = self.custom_tags.clone();
        tags.insert(IDEMPOTENCY_TAG.to_string(), ctx.key.idempotency_key());
        obj.insert("custom_tags".into(), serde_json::to_value(tags)?);
        Ok(Value::Object(obj))
    }
}

impl Adapter for ClusterSpec {
    fn validate(&self) -> Result<()> {
        self.validate_shape()?;
        let mut seen = std::collections::BTreeSet::new();
        for library in &self.libraries {
            if !seen.insert(library.coordinate()) {
                return Err(Error::invalid_spec(format!(
                    "library {} is listed twice",
                    library.coordinate()
                )));
            }
        }
        Ok(())
    }

    fn create_payload(&self, ctx: &MappingContext<'_>) -> Result<Value> {
        self.settings(ctx)
    }

    fn normalize(&self, remote: &Value) -> Value {
        let mut normalized = project(remote, CLUSTER_FIELDS);
        // Autoscaling clusters report their current size in num_workers
        if let Some(obj) = normalized.as_object_mut() {
            if obj.contains_key("autoscale") {
                obj.remove("num_workers");
            }
        }
        normalized
    }

    fn delta(
        &self,
        ctx: &MappingContext<'_>,
        observed: &Value,
        _status: &ObjectStatus,
    ) -> Result<Delta> {
        let desired = self.settings(ctx)?;
        let diff = diff_fields(&desired, observed, SIZING_FIELDS);
        if diff.is_empty() {
            return Ok(Delta::InSync);
        }

        let fields = diff.fields();
        let payload = if diff.touches_only(SIZING_FIELDS) {
            let mut resize = Map::new();
            put_opt(&mut resize, "num_workers", &self.num_workers)?;
            put_opt(&mut resize, "autoscale", &self.autoscale)?;
            Value::Object(resize)
        } else {
            desired
        };
        Ok(Delta::Update { payload, fields })
    }

    /// A new cluster starts `PENDING`
    fn polls_after_create(&self) -> bool {
        true
    }

    fn readiness(&self, observed: &Value) -> Readiness {
        match observed.get("state").and_then(Value::as_str) {
            None | Some("RUNNING") => Readiness::Ready("Running".to_string()),
            Some(state @ ("PENDING" | "RESTARTING" | "RESIZING" | "TERMINATING")) => {
                Readiness::Progressing(state.to_string())
            }
            Some("TERMINATED") => Readiness::Unavailable("Terminated".to_string()),
            Some(other) => Readiness::Unavailable(other.to_string()),
        }
    }

    fn child_kinds(&self) -> &'static [ChildKind] {
        &[ChildKind::ClusterLibrary]
    }

    fn children(&self) -> Result<Vec<DesiredChild>> {
        self.libraries
            .iter()
            .map(|library| {
                let coordinate = library.coordinate();
                Ok(DesiredChild {
                    child: ChildKind::ClusterLibrary,
                    key: coordinate.clone(),
                    payload: serde_json::to_value(library)?,
                    fingerprint: coordinate,
                })
            })
            .collect()
    }
}
