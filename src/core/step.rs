use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::BatchError;
use crate::core::chunk::ChunkStepBuilder;
use crate::core::context::ExecutionContext;
use crate::core::parameters::JobParameters;
use crate::core::repository::ExecutionRepository;

/// Status of a step execution.
///
/// The status is monotonic through `Starting → Executing → (Stopping) →
/// {Completed, Failed, Stopped}`; once a terminal status is reached no
/// further transition is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Starting,
    Executing,
    Stopping,
    Completed,
    Failed,
    Stopped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Stopped
        )
    }

    /// The exit code the job's transition rules are matched against.
    pub fn exit_code(&self) -> &'static str {
        match self {
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Stopped => "STOPPED",
            _ => "UNKNOWN",
        }
    }
}

/// One attempt to run a step within a job execution.
///
/// Owned exclusively by its `JobExecution`; counters are folded in by the
/// executing step once it settles.
#[derive(Debug, Clone)]
pub struct StepExecution {
    pub id: Uuid,
    pub step_name: String,
    pub status: StepStatus,
    pub start_time: OffsetDateTime,
    pub end_time: Option<OffsetDateTime>,
    pub duration: Duration,
    /// Items consumed from the source.
    pub read_count: usize,
    /// Items handed to the sink in committed chunks.
    pub write_count: usize,
    /// Items the processor filtered out (`Ok(None)`).
    pub filter_count: usize,
    /// Whitelisted per-item failures dropped by the skip policy.
    pub skip_count: usize,
    /// Committed chunks.
    pub commit_count: usize,
    /// First fatal cause, when the step failed.
    pub failure: Option<String>,
}

impl StepExecution {
    pub fn new(step_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_name: step_name.to_string(),
            status: StepStatus::Starting,
            start_time: OffsetDateTime::now_utc(),
            end_time: None,
            duration: Duration::ZERO,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            skip_count: 0,
            commit_count: 0,
            failure: None,
        }
    }

    /// Moves the execution to `status`, unless a terminal status was already
    /// reached. Transitions out of a terminal status are refused.
    pub fn transition_to(&mut self, status: StepStatus) {
        if self.status.is_terminal() {
            warn!(
                "refusing transition of step '{}' from terminal status {:?} to {:?}",
                self.step_name, self.status, status
            );
            return;
        }
        self.status = status;
    }

    pub fn exit_status(&self) -> &'static str {
        self.status.exit_code()
    }

    pub(crate) fn record_failure(&mut self, error: &BatchError) {
        if self.failure.is_none() {
            self.failure = Some(error.to_string());
        }
    }

    pub(crate) fn settle(&mut self, status: StepStatus, started: Instant) {
        self.transition_to(status);
        self.end_time = Some(OffsetDateTime::now_utc());
        self.duration = started.elapsed();
    }
}

/// Cooperative stop signal shared between a launcher and a running job.
///
/// A stop request lets in-flight chunks finish but refuses to start new
/// ones; committed progress stays persisted for a later resume.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Everything a step needs from its surrounding job execution, passed
/// explicitly at step start instead of looked up ambiently.
pub struct StepScope<'a> {
    pub parameters: &'a JobParameters,
    pub repository: &'a ExecutionRepository,
    pub instance_key: &'a str,
    pub stop: &'a StopToken,
}

impl StepScope<'_> {
    /// Loads the persisted context of `step_name` for this job instance, or
    /// a fresh one on the first attempt.
    pub fn load_step_context(&self, step_name: &str) -> ExecutionContext {
        self.repository
            .step_context(self.instance_key, step_name)
            .unwrap_or_default()
    }

    pub fn persist_step_context(&self, step_name: &str, context: &ExecutionContext) {
        self.repository
            .save_step_context(self.instance_key, step_name, context);
    }
}

/// A named unit of work within a job: either a tasklet or a chunk-oriented
/// configuration.
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Executes the step, recording counts and final status into
    /// `execution`. Returns `Err` exactly when the execution settles at
    /// `Failed`.
    fn execute(&self, execution: &mut StepExecution, scope: &StepScope<'_>)
    -> Result<(), BatchError>;
}

impl<S: Step + ?Sized> Step for Box<S> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    fn execute(
        &self,
        execution: &mut StepExecution,
        scope: &StepScope<'_>,
    ) -> Result<(), BatchError> {
        self.as_ref().execute(execution, scope)
    }
}

/// Outcome of one tasklet invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// Invoke the tasklet again immediately (polling-style tasklets).
    Continuable,
    /// The step is done.
    Finished,
}

/// A single-shot (or polling) unit of step work.
///
/// The canonical example is a required-parameter check that fails fast with
/// the offending parameter name before any chunk work begins. Any matching
/// closure is a tasklet too:
///
/// ```
/// use batchling::BatchError;
/// use batchling::core::context::ExecutionContext;
/// use batchling::core::parameters::JobParameters;
/// use batchling::core::step::{RepeatStatus, Tasklet};
///
/// let tasklet = |_parameters: &JobParameters,
///                context: &mut ExecutionContext|
///  -> Result<RepeatStatus, BatchError> {
///     context.put("touched", true);
///     Ok(RepeatStatus::Finished)
/// };
/// let _boxed: Box<dyn Tasklet> = Box::new(tasklet);
/// ```
pub trait Tasklet: Send + Sync {
    fn execute(
        &self,
        parameters: &JobParameters,
        context: &mut ExecutionContext,
    ) -> Result<RepeatStatus, BatchError>;
}

impl<F> Tasklet for F
where
    F: Fn(&JobParameters, &mut ExecutionContext) -> Result<RepeatStatus, BatchError>
        + Send
        + Sync,
{
    fn execute(
        &self,
        parameters: &JobParameters,
        context: &mut ExecutionContext,
    ) -> Result<RepeatStatus, BatchError> {
        self(parameters, context)
    }
}

/// A step that wraps a single tasklet.
pub struct TaskletStep {
    name: String,
    tasklet: Box<dyn Tasklet>,
}

impl Step for TaskletStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        execution: &mut StepExecution,
        scope: &StepScope<'_>,
    ) -> Result<(), BatchError> {
        let started = Instant::now();
        execution.start_time = OffsetDateTime::now_utc();
        execution.transition_to(StepStatus::Executing);
        info!("Start of step: {}, id: {}", self.name, execution.id);

        let mut context = scope.load_step_context(&self.name);

        let outcome = loop {
            if scope.stop.is_stop_requested() {
                execution.transition_to(StepStatus::Stopping);
                break StepStatus::Stopped;
            }

            match self.tasklet.execute(scope.parameters, &mut context) {
                Ok(RepeatStatus::Finished) => break StepStatus::Completed,
                Ok(RepeatStatus::Continuable) => {
                    debug!("tasklet of step '{}' is continuable, re-invoking", self.name);
                }
                Err(error) => {
                    execution.record_failure(&error);
                    scope.persist_step_context(&self.name, &context);
                    execution.settle(StepStatus::Failed, started);
                    info!("End of step: {}, id: {}", self.name, execution.id);
                    return Err(BatchError::StepFailure {
                        step: self.name.clone(),
                        message: error.to_string(),
                    });
                }
            }
        };

        scope.persist_step_context(&self.name, &context);
        execution.settle(outcome, started);
        info!("End of step: {}, id: {}", self.name, execution.id);
        Ok(())
    }
}

/// Builder for a tasklet-backed step.
pub struct TaskletStepBuilder {
    name: String,
    tasklet: Box<dyn Tasklet>,
}

impl TaskletStepBuilder {
    pub fn build(self) -> TaskletStep {
        TaskletStep {
            name: self.name,
            tasklet: self.tasklet,
        }
    }
}

/// Entry point for building steps.
///
/// `StepBuilder::new("name")` branches into a tasklet step or a
/// chunk-oriented step:
///
/// ```
/// use batchling::core::context::ExecutionContext;
/// use batchling::core::parameters::JobParameters;
/// use batchling::core::step::{RepeatStatus, StepBuilder};
///
/// let step = StepBuilder::new("validate")
///     .tasklet(|_: &JobParameters, _: &mut ExecutionContext| Ok(RepeatStatus::Finished))
///     .build();
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Makes this a tasklet step.
    pub fn tasklet(self, tasklet: impl Tasklet + 'static) -> TaskletStepBuilder {
        TaskletStepBuilder {
            name: self.name,
            tasklet: Box::new(tasklet),
        }
    }

    /// Makes this a chunk-oriented step committing `chunk_size` items at a
    /// time.
    pub fn chunk<I, O>(self, chunk_size: usize) -> ChunkStepBuilder<I, O> {
        ChunkStepBuilder::new(&self.name).chunk_size(chunk_size)
    }
}
