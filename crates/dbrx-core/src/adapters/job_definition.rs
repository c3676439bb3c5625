//! Job definition adapter
//!
//! Updates are partial: `new_settings` carries the changed top-level
//! settings and `fields_to_remove` names optional settings that were
//! dropped from the spec.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use super::{
    Adapter, ClusterSpec, Delta, MappingContext, IDEMPOTENCY_TAG, diff_fields, project, put_opt,
};
use crate::error::{Error, Result};
use crate::model::{ObjectStatus, ResourceKind};

const JOB_FIELDS: &[&str] = &[
    "name",
    "existing_cluster_id",
    "new_cluster",
    "notebook_task",
    "spark_jar_task",
    "spark_python_task",
    "max_retries",
    "min_retry_interval_millis",
    "timeout_seconds",
    "max_concurrent_runs",
    "schedule",
    "tags",
];

// Settings the remote does not default, so their absence is meaningful
const CLEARABLE_FIELDS: &[&str] = &[
    "existing_cluster_id",
    "new_cluster",
    "notebook_task",
    "spark_jar_task",
    "spark_python_task",
    "schedule",
    "max_retries",
    "min_retry_interval_millis",
];

/// Work a job or one-off run executes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTask {
    NotebookTask {
        notebook_path: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        base_parameters: BTreeMap<String, String>,
    },
    SparkJarTask {
        main_class_name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        parameters: Vec<String>,
    },
    SparkPythonTask {
        python_file: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        parameters: Vec<String>,
    },
}

impl JobTask {
    pub(crate) fn validate(&self) -> Result<()> {
        let (field, value) = match self {
            JobTask::NotebookTask { notebook_path, .. } => ("notebook_path", notebook_path),
            JobTask::SparkJarTask {
                main_class_name, ..
            } => ("main_class_name", main_class_name),
            JobTask::SparkPythonTask { python_file, .. } => ("python_file", python_file),
        };
        if value.trim().is_empty() {
            return Err(Error::invalid_spec(format!("{} is required", field)));
        }
        Ok(())
    }

    /// Insert the task under its payload key
    pub(crate) fn write_into(&self, obj: &mut Map<String, Value>) -> Result<()> {
        if let Value::Object(tagged) = serde_json::to_value(self)? {
            obj.extend(tagged);
        }
        Ok(())
    }
}

/// Cron schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    pub quartz_cron_expression: String,
    pub timezone_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_status: Option<String>,
}

/// Where runs execute
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClusterSource<'a> {
    pub existing_cluster: Option<&'a str>,
    pub existing_cluster_id: Option<&'a str>,
    pub new_cluster: Option<&'a ClusterSpec>,
}

impl ClusterSource<'_> {
    pub fn validate(&self) -> Result<()> {
        let count = [
            self.existing_cluster.is_some(),
            self.existing_cluster_id.is_some(),
            self.new_cluster.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        match count {
            0 => Err(Error::invalid_spec(
                "one of existing_cluster, existing_cluster_id or new_cluster is required",
            )),
            1 => match self.new_cluster {
                Some(cluster) => cluster.validate_shape(),
                None => Ok(()),
            },
            _ => Err(Error::invalid_spec(
                "existing_cluster, existing_cluster_id and new_cluster are mutually exclusive",
            )),
        }
    }

    pub fn dependency(&self) -> Option<(ResourceKind, String)> {
        self.existing_cluster
            .map(|name| (ResourceKind::Cluster, name.to_string()))
    }

    pub fn write_into(&self, ctx: &MappingContext<'_>, obj: &mut Map<String, Value>) -> Result<()> {
        if let Some(name) = self.existing_cluster {
            let handle = ctx.dependencies.handle(ResourceKind::Cluster, name)?;
            obj.insert("existing_cluster_id".into(), json!(handle.as_str()));
        } else if let Some(id) = self.existing_cluster_id {
            obj.insert("existing_cluster_id".into(), json!(id));
        } else if let Some(cluster) = self.new_cluster {
            obj.insert("new_cluster".into(), Value::Object(cluster.shape_payload()?));
        }
        Ok(())
    }
}

/// Desired job definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinitionSpec {
    /// Display name, defaults to the object name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Name of a managed cluster object to run on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_cluster: Option<String>,
    /// Remote id of an unmanaged cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_cluster_id: Option<String>,
    /// Cluster created for each run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_cluster: Option<ClusterSpec>,
    pub task: JobTask,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_retry_interval_millis: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_runs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<JobSchedule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl JobDefinitionSpec {
    /// A notebook job on a managed cluster
    pub fn notebook_on(cluster: impl Into<String>, notebook_path: impl Into<String>) -> Self {
        Self {
            name: None,
            existing_cluster: Some(cluster.into()),
            existing_cluster_id: None,
            new_cluster: None,
            task: JobTask::NotebookTask {
                notebook_path: notebook_path.into(),
                base_parameters: BTreeMap::new(),
            },
            max_retries: None,
            min_retry_interval_millis: None,
            timeout_seconds: None,
            max_concurrent_runs: None,
            schedule: None,
            tags: BTreeMap::new(),
        }
    }

    fn cluster_source(&self) -> ClusterSource<'_> {
        ClusterSource {
            existing_cluster: self.existing_cluster.as_deref(),
            existing_cluster_id: self.existing_cluster_id.as_deref(),
            new_cluster: self.new_cluster.as_ref(),
        }
    }

    fn settings(&self, ctx: &MappingContext<'_>) -> Result<Value> {
        let mut obj = Map::new();
        let name = self.name.clone().unwrap_or_else(|| ctx.key.name.clone());
        obj.insert("name".into(), json!(name));
        self.cluster_source().write_into(ctx, &mut obj)?;
        self.task.write_into(&mut obj)?;
        put_opt(&mut obj, "max_retries", &self.max_retries)?;
        put_opt(&mut obj, "min_retry_interval_millis", &self.min_retry_interval_millis)?;
        put_opt(&mut obj, "timeout_seconds", &self.timeout_seconds)?;
        put_opt(&mut obj, "max_concurrent_runs", &self.max_concurrent_runs)?;
        put_opt(&mut obj, "schedule", &self.schedule)?;

        let mut tags = self.tags.clone();
        tags.insert(IDEMPOTENCY_TAG.to_string(), ctx.key.idempotency_key());
        obj.insert("tags".into(), serde_json::to_value(tags)?);
        Ok(Value::Object(obj))
    }
}

impl Adapter for JobDefinitionSpec {
    fn validate(&self) -> Result<()> {
        self.cluster_source().validate()?;
        self.task.validate()?;
        if let Some(schedule) = &self.schedule {
            if schedule.quartz_cron_expression.trim().is_empty() {
                return Err(Error::invalid_spec("schedule.quartz_cron_expression is required"));
            }
        }
        if self.max_concurrent_runs == Some(0) {
            return Err(Error::invalid_spec("max_concurrent_runs must be at least 1"));
        }
        Ok(())
    }

    fn dependencies(&self) -> Vec<(ResourceKind, String)> {
        self.cluster_source().dependency().into_iter().collect()
    }

    fn create_payload(&self, ctx: &MappingContext<'_>) -> Result<Value> {
        self.settings(ctx)
    }

    fn normalize(&self, remote: &Value) -> Value {
        project(remote, JOB_FIELDS)
    }

    fn delta(
        &self,
        ctx: &MappingContext<'_>,
        observed: &Value,
        _status: &ObjectStatus,
    ) -> Result<Delta> {
        let desired = self.settings(ctx)?;
        let diff = diff_fields(&desired, observed, CLEARABLE_FIELDS);
        if diff.is_empty() {
            return Ok(Delta::InSync);
        }

        let fields = diff.fields();
        let payload = json!({
            "new_settings": Value::Object(diff.changed),
            "fields_to_remove": diff.removed,
        });
        Ok(Delta::Update { payload, fields })
    }
}
