use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::{info, warn};
use uuid::Uuid;

use crate::BatchError;
use crate::core::job::{BatchStatus, Job, JobExecution};
use crate::core::lock;
use crate::core::parameters::JobParameters;
use crate::core::repository::ExecutionRepository;
use crate::core::step::StopToken;

/// Process-wide registry of job definitions keyed by name.
///
/// Intended to be populated once at startup and treated as a read-only
/// lookup table afterwards; lookups take the read lock, registration the
/// write lock. Re-registering a name is a configuration error rather than a
/// silent replacement.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job: Job) -> Result<(), BatchError> {
        let mut jobs = self
            .jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let name = job.name().to_string();
        if jobs.contains_key(&name) {
            return Err(BatchError::Configuration(format!(
                "a job named '{name}' is already registered"
            )));
        }
        info!("registering job '{name}'");
        jobs.insert(name, Arc::new(job));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Job>> {
        self.jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

/// Launches registered jobs and tracks their in-flight executions.
///
/// `launch` runs the job synchronously on the calling thread and returns its
/// final execution — including a FAILED one, with the first fatal cause and
/// the per-step counts intact. An `Err` from `launch` means the run never
/// started: unknown job name, or a COMPLETED instance relaunched without
/// restart being enabled for the job.
///
/// Launches of different instances may run concurrently; launches of the
/// same instance are serialized — at most one execution is in flight per
/// instance, and a second caller gets a snapshot of the in-flight execution
/// instead of a duplicate run.
pub struct JobLauncher {
    registry: Arc<JobRegistry>,
    repository: Arc<ExecutionRepository>,
    running: Mutex<HashMap<String, Uuid>>,
    stop_tokens: Mutex<HashMap<Uuid, StopToken>>,
}

impl JobLauncher {
    pub fn new(registry: Arc<JobRegistry>, repository: Arc<ExecutionRepository>) -> Self {
        Self {
            registry,
            repository,
            running: Mutex::new(HashMap::new()),
            stop_tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &ExecutionRepository {
        &self.repository
    }

    /// Launches `job_name` with `parameters`.
    ///
    /// Restart semantics: if the newest execution of this instance FAILED or
    /// STOPPED, the new execution resumes from the first non-COMPLETED step,
    /// reusing the contexts persisted by completed steps. Relaunching a
    /// COMPLETED instance is rejected unless the job allows it.
    pub fn launch(
        &self,
        job_name: &str,
        parameters: JobParameters,
    ) -> Result<JobExecution, BatchError> {
        let job = self.registry.get(job_name).ok_or_else(|| {
            BatchError::Configuration(format!("no job registered under '{job_name}'"))
        })?;

        let instance = self.repository.find_or_create_instance(job_name, &parameters);

        let (mut execution, stop, resuming) = {
            // The running map is the serialization point for same-instance
            // launches; admission and registration happen under its lock.
            let mut running = lock(&self.running);

            if let Some(in_flight) = running.get(&instance.key) {
                info!(
                    "job instance {} already has execution {} in flight",
                    instance.key, in_flight
                );
                return self.repository.execution(*in_flight).ok_or_else(|| {
                    BatchError::Configuration(format!(
                        "in-flight execution {in_flight} has no snapshot"
                    ))
                });
            }

            let mut resuming = false;
            if let Some(last) = self.repository.last_execution(&instance.key) {
                match last.status {
                    BatchStatus::Completed => {
                        if !job.allows_restart_when_complete() {
                            return Err(BatchError::InstanceAlreadyComplete(instance.key.clone()));
                        }
                        info!("re-running completed job instance {}", instance.key);
                        self.repository.clear_contexts(&instance.key);
                    }
                    BatchStatus::Failed | BatchStatus::Stopped => resuming = true,
                    status => {
                        // A stale non-terminal snapshot without a running
                        // entry means a previous process died mid-run; treat
                        // it like a restartable failure.
                        warn!(
                            "last execution of {} left in non-terminal status {:?}",
                            instance.key, status
                        );
                        resuming = true;
                    }
                }
            }

            let execution = JobExecution::new(job_name, &instance.key, parameters);
            self.repository.save_execution(&execution);

            let stop = StopToken::new();
            running.insert(instance.key.clone(), execution.id);
            lock(&self.stop_tokens).insert(execution.id, stop.clone());

            (execution, stop, resuming)
        };

        // Only a restart skips previously completed steps; an allowed
        // re-run of a completed instance starts from scratch.
        let previously_completed = if resuming {
            self.repository.completed_steps(&instance.key)
        } else {
            Default::default()
        };

        job.run(&mut execution, &self.repository, &stop, &previously_completed);

        lock(&self.running).remove(&instance.key);
        lock(&self.stop_tokens).remove(&execution.id);
        self.repository.save_execution(&execution);

        Ok(execution)
    }

    /// Requests a stop of a running execution. The current step finishes its
    /// in-flight chunks, refuses to start new ones, and settles STOPPED.
    /// Returns false when the execution is unknown or already settled.
    pub fn stop(&self, execution_id: Uuid) -> bool {
        match lock(&self.stop_tokens).get(&execution_id) {
            Some(token) => {
                info!("stop requested for execution {execution_id}");
                token.request_stop();
                true
            }
            None => false,
        }
    }
}
