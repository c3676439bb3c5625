//! Job run adapter
//!
//! A run is either a trigger of a managed job definition (`run-now` with
//! parameters) or a one-off submitted run. Runs cannot be edited, so every
//! spec change replaces the run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

use super::job_definition::ClusterSource;
use super::{
    Adapter, ClusterSpec, Delta, JobTask, MappingContext, Readiness, diff_fields, handle_value,
    project, put_opt,
};
use crate::error::{Error, Result};
use crate::model::{ObjectStatus, ResourceKind};

const RUN_FIELDS: &[&str] = &[
    "job_id",
    "notebook_params",
    "jar_params",
    "python_params",
    "run_name",
    "existing_cluster_id",
    "new_cluster",
    "notebook_task",
    "spark_jar_task",
    "spark_python_task",
    "timeout_seconds",
];

/// One-off run definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSubmitSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_cluster: Option<ClusterSpec>,
    pub task: JobTask,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl RunSubmitSpec {
    fn cluster_source(&self) -> ClusterSource<'_> {
        ClusterSource {
            existing_cluster: self.existing_cluster.as_deref(),
            existing_cluster_id: self.existing_cluster_id.as_deref(),
            new_cluster: self.new_cluster.as_ref(),
        }
    }
}

/// Desired run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRunSpec {
    /// Name of a managed job definition to trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub notebook_params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jar_params: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub python_params: Vec<String>,
    /// One-off run instead of a job trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit: Option<RunSubmitSpec>,
}

impl JobRunSpec {
    /// Trigger a managed job
    pub fn of_job(job: impl Into<String>) -> Self {
        Self {
            job: Some(job.into()),
            ..Self::default()
        }
    }

    fn desired(&self, ctx: &MappingContext<'_>) -> Result<Value> {
        let mut obj = Map::new();
        if let Some(job) = &self.job {
            let handle = ctx.dependencies.handle(ResourceKind::JobDefinition, job)?;
            obj.insert("job_id".into(), handle_value(handle));
            if !self.notebook_params.is_empty() {
                obj.insert("notebook_params".into(), serde_json::to_value(&self.notebook_params)?);
            }
            if !self.jar_params.is_empty() {
                obj.insert("jar_params".into(), json!(self.jar_params));
            }
            if !self.python_params.is_empty() {
                obj.insert("python_params".into(), json!(self.python_params));
            }
        } else if let Some(submit) = &self.submit {
            let name = submit.run_name.clone().unwrap_or_else(|| ctx.key.name.clone());
            obj.insert("run_name".into(), json!(name));
            submit.cluster_source().write_into(ctx, &mut obj)?;
            submit.task.write_into(&mut obj)?;
            put_opt(&mut obj, "timeout_seconds", &submit.timeout_seconds)?;
        }
        Ok(Value::Object(obj))
    }
}

impl Adapter for JobRunSpec {
    fn validate(&self) -> Result<()> {
        match (&self.job, &self.submit) {
            (Some(job), None) if job.trim().is_empty() => {
                Err(Error::invalid_spec("job must name a job definition"))
            }
            (Some(_), None) => Ok(()),
            (None, Some(submit)) => {
                if !self.notebook_params.is_empty()
                    || !self.jar_params.is_empty()
                    || !self.python_params.is_empty()
                {
                    return Err(Error::invalid_spec(
                        "run parameters apply only to job triggers",
                    ));
                }
                submit.cluster_source().validate()?;
                submit.task.validate()
            }
            (Some(_), Some(_)) => Err(Error::invalid_spec("job and submit are mutually exclusive")),
            (None, None) => Err(Error::invalid_spec("one of job or submit is required")),
        }
    }

    fn dependencies(&self) -> Vec<(ResourceKind, String)> {
        let mut deps = Vec::new();
        if let Some(job) = &self.job {
            deps.push((ResourceKind::JobDefinition, job.clone()));
        }
        if let Some(submit) = &self.submit {
            deps.extend(submit.cluster_source().dependency());
        }
        deps
    }

    fn create_payload(&self, ctx: &MappingContext<'_>) -> Result<Value> {
        self.desired(ctx)
    }

    fn normalize(&self, remote: &Value) -> Value {
        let mut normalized = project(remote, RUN_FIELDS);
        if let (Some(obj), Some(state)) = (normalized.as_object_mut(), remote.as_object()) {
            for field in ["life_cycle_state", "result_state", "state_message"] {
                if let Some(value) = state.get(field) {
                    obj.insert(field.to_string(), value.clone());
                }
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
        let desired = self.desired(ctx)?;
        let diff = diff_fields(&desired, observed, &[]);
        if diff.is_empty() {
            Ok(Delta::InSync)
        } else {
            Ok(Delta::Replace {
                fields: diff.fields(),
            })
        }
    }

    fn polls_after_create(&self) -> bool {
        true
    }

    fn readiness(&self, observed: &Value) -> Readiness {
        let life_cycle = observed.get("life_cycle_state").and_then(Value::as_str);
        let result = observed.get("result_state").and_then(Value::as_str);
        match (life_cycle, result) {
            (None, _) => Readiness::Ready("Submitted".to_string()),
            (Some(state @ ("PENDING" | "QUEUED" | "RUNNING" | "TERMINATING")), _) => {
                Readiness::Progressing(state.to_string())
            }
            (Some("TERMINATED"), Some("SUCCESS")) => Readiness::Ready("Succeeded".to_string()),
            (Some("TERMINATED"), Some(result)) => Readiness::Unavailable(result.to_string()),
            (Some(state), _) => Readiness::Unavailable(state.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Dependencies;
    use crate::model::{ObjectKey, RemoteHandle};

    fn deps() -> Dependencies {
        let mut deps = Dependencies::new();
        deps.insert(ResourceKind::JobDefinition, "nightly", RemoteHandle::new("42"));
        deps
    }

    #[test]
    fn test_trigger_payload() {
        let key = ObjectKey::new("team-a", "nightly-run");
        let deps = deps();
        let ctx = MappingContext {
            key: &key,
            dependencies: &deps,
        };

        let mut spec = JobRunSpec::of_job("nightly");
        spec.notebook_params.insert("date".to_string(), "2024-01-01".to_string());
        assert!(spec.validate().is_ok());

        let payload = spec.create_payload(&ctx).unwrap();
        assert_eq!(
            payload,
            json!({"job_id": 42, "notebook_params": {"date": "2024-01-01"}})
        );
    }

    #[test]
    fn test_any_change_replaces() {
        let key = ObjectKey::new("team-a", "nightly-run");
        let deps = deps();
        let ctx = MappingContext {
            key: &key,
            dependencies: &deps,
        };

        let old = JobRunSpec::of_job("nightly");
        let mut remote = old.create_payload(&ctx).unwrap();
        remote["life_cycle_state"] = json!("TERMINATED");
        remote["result_state"] = json!("SUCCESS");
        let observed = old.normalize(&remote);
        assert_eq!(
            old.delta(&ctx, &observed, &ObjectStatus::default()).unwrap(),
            Delta::InSync
        );

        let mut new = old.clone();
        new.python_params = vec!["--full".to_string()];
        assert_eq!(
            new.delta(&ctx, &observed, &ObjectStatus::default()).unwrap(),
            Delta::Replace {
                fields: vec!["python_params".to_string()]
            }
        );
    }

    #[test]
    fn test_validate_modes() {
        assert!(JobRunSpec::default().validate().is_err());

        let submit = RunSubmitSpec {
            run_name: None,
            existing_cluster: None,
            existing_cluster_id: Some("0412-abc".to_string()),
            new_cluster: None,
            task: JobTask::SparkPythonTask {
                python_file: "dbfs:/jobs/main.py".to_string(),
                parameters: Vec::new(),
            },
            timeout_seconds: None,
        };
        let mut spec = JobRunSpec {
            submit: Some(submit),
            ..JobRunSpec::default()
        };
        assert!(spec.validate().is_ok());
        assert!(spec.dependencies().is_empty());

        spec.job = Some("nightly".to_string());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_readiness_from_life_cycle() {
        let spec = JobRunSpec::of_job("nightly");
        assert!(matches!(
            spec.readiness(&json!({"life_cycle_state": "RUNNING"})),
            Readiness::Progressing(_)
        ));
        assert!(matches!(
            spec.readiness(&json!({"life_cycle_state": "TERMINATED", "result_state": "SUCCESS"})),
            Readiness::Ready(_)
        ));
        assert_eq!(
            spec.readiness(&json!({"life_cycle_state": "TERMINATED", "result_state": "FAILED"})),
            Readiness::Unavailable("FAILED".to_string())
        );
        assert_eq!(
            spec.readiness(&json!({"life_cycle_state": "INTERNAL_ERROR"})),
            Readiness::Unavailable("INTERNAL_ERROR".to_string())
        );
    }
}
