use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use log::debug;
use uuid::Uuid;

use crate::core::context::ExecutionContext;
use crate::core::job::{JobExecution, JobInstance};
use crate::core::lock;
use crate::core::parameters::JobParameters;
use crate::core::step::StepStatus;

/// In-memory store for job instances, execution snapshots, and persisted
/// execution contexts — the minimal metadata a restarted launch needs to
/// resume from the last commit point.
///
/// Executions are stored as snapshots: the runner saves after every step
/// (and steps save their context at every chunk commit), so a concurrent
/// observer of the same instance sees committed progress, never a live
/// mutable execution.
#[derive(Debug, Default)]
pub struct ExecutionRepository {
    instances: Mutex<HashMap<String, JobInstance>>,
    /// Execution snapshots in creation order, newest last.
    executions: Mutex<Vec<JobExecution>>,
    step_contexts: Mutex<HashMap<(String, String), ExecutionContext>>,
    job_contexts: Mutex<HashMap<String, ExecutionContext>>,
}

impl ExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the instance for `(job_name, identifying parameters)`,
    /// creating it on first launch.
    pub fn find_or_create_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> JobInstance {
        let key = parameters.instance_key(job_name);
        let mut instances = lock(&self.instances);
        instances
            .entry(key.clone())
            .or_insert_with(|| {
                debug!("creating job instance for key {key}");
                JobInstance {
                    id: Uuid::new_v4(),
                    job_name: job_name.to_string(),
                    key,
                    parameters: parameters.clone(),
                }
            })
            .clone()
    }

    pub fn instance(&self, instance_key: &str) -> Option<JobInstance> {
        lock(&self.instances).get(instance_key).cloned()
    }

    /// Upserts an execution snapshot by id.
    pub fn save_execution(&self, execution: &JobExecution) {
        let mut executions = lock(&self.executions);
        match executions.iter_mut().find(|stored| stored.id == execution.id) {
            Some(stored) => *stored = execution.clone(),
            None => executions.push(execution.clone()),
        }
    }

    pub fn execution(&self, id: Uuid) -> Option<JobExecution> {
        lock(&self.executions)
            .iter()
            .find(|execution| execution.id == id)
            .cloned()
    }

    /// All executions of an instance, oldest first.
    pub fn executions_for_instance(&self, instance_key: &str) -> Vec<JobExecution> {
        lock(&self.executions)
            .iter()
            .filter(|execution| execution.instance_key == instance_key)
            .cloned()
            .collect()
    }

    /// The most recent execution of an instance.
    pub fn last_execution(&self, instance_key: &str) -> Option<JobExecution> {
        lock(&self.executions)
            .iter()
            .rev()
            .find(|execution| execution.instance_key == instance_key)
            .cloned()
    }

    /// Names of steps that reached COMPLETED in any prior execution of the
    /// instance; a restarted execution resumes past these.
    pub fn completed_steps(&self, instance_key: &str) -> HashSet<String> {
        lock(&self.executions)
            .iter()
            .filter(|execution| execution.instance_key == instance_key)
            .flat_map(|execution| execution.step_executions.iter())
            .filter(|step| step.status == StepStatus::Completed)
            .map(|step| step.step_name.clone())
            .collect()
    }

    pub fn save_step_context(
        &self,
        instance_key: &str,
        step_name: &str,
        context: &ExecutionContext,
    ) {
        lock(&self.step_contexts).insert(
            (instance_key.to_string(), step_name.to_string()),
            context.clone(),
        );
    }

    pub fn step_context(&self, instance_key: &str, step_name: &str) -> Option<ExecutionContext> {
        lock(&self.step_contexts)
            .get(&(instance_key.to_string(), step_name.to_string()))
            .cloned()
    }

    /// Drops every persisted context of an instance. Used when a completed
    /// instance is deliberately re-run from scratch, so stale restart
    /// positions cannot fast-forward the new execution.
    pub fn clear_contexts(&self, instance_key: &str) {
        lock(&self.step_contexts).retain(|(key, _), _| key != instance_key);
        lock(&self.job_contexts).remove(instance_key);
    }

    pub fn save_job_context(&self, instance_key: &str, context: &ExecutionContext) {
        lock(&self.job_contexts).insert(instance_key.to_string(), context.clone());
    }

    pub fn job_context(&self, instance_key: &str) -> Option<ExecutionContext> {
        lock(&self.job_contexts).get(instance_key).cloned()
    }
}
