use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::info;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::BatchError;
use crate::core::build_name;
use crate::core::parameters::JobParameters;
use crate::core::repository::ExecutionRepository;
use crate::core::step::{Step, StepExecution, StepScope, StopToken};

/// Status of a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Created but not yet running.
    Starting,
    /// Running.
    Started,
    /// A stop was requested; the current step is winding down.
    Stopping,
    /// Stopped by request, partial progress committed.
    Stopped,
    /// All traversed required steps completed.
    Completed,
    /// A step failed and the transition rules terminated the job.
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Stopped
        )
    }
}

/// One (job name, identifying parameters) pair. Created on first launch and
/// never mutated; restarts attach new executions to the same instance.
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub id: Uuid,
    pub job_name: String,
    /// Identity key derived from the job name and identifying parameters.
    pub key: String,
    pub parameters: JobParameters,
}

/// One attempt to run a job instance.
#[derive(Debug, Clone)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_name: String,
    pub instance_key: String,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub start_time: OffsetDateTime,
    pub end_time: Option<OffsetDateTime>,
    pub duration: Duration,
    /// Step executions in the order the graph was traversed.
    pub step_executions: Vec<StepExecution>,
    /// First fatal cause, when the execution failed.
    pub failure: Option<String>,
}

impl JobExecution {
    pub(crate) fn new(job_name: &str, instance_key: &str, parameters: JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            instance_key: instance_key.to_string(),
            parameters,
            status: BatchStatus::Starting,
            start_time: OffsetDateTime::now_utc(),
            end_time: None,
            duration: Duration::ZERO,
            step_executions: Vec::new(),
            failure: None,
        }
    }

    /// The execution of `step_name` within this attempt, if it ran.
    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .find(|step| step.step_name == step_name)
    }
}

/// Where a matched transition rule routes the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Continue with the named step.
    To(String),
    /// Terminate the job as COMPLETED.
    Complete,
    /// Terminate the job as FAILED.
    Fail,
    /// Terminate the job as STOPPED.
    Stop,
}

#[derive(Debug, Clone)]
struct TransitionRule {
    from: String,
    pattern: String,
    outcome: Transition,
}

/// Matches an exit status against a pattern supporting `*` (any run of
/// characters) and `?` (exactly one character).
fn exit_matches(pattern: &str, status: &str) -> bool {
    fn matches(pattern: &[u8], status: &[u8]) -> bool {
        match pattern.first() {
            None => status.is_empty(),
            Some(b'*') => {
                matches(&pattern[1..], status)
                    || (!status.is_empty() && matches(pattern, &status[1..]))
            }
            Some(b'?') => !status.is_empty() && matches(&pattern[1..], &status[1..]),
            Some(&expected) => {
                status.first() == Some(&expected) && matches(&pattern[1..], &status[1..])
            }
        }
    }
    matches(pattern.as_bytes(), status.as_bytes())
}

/// A directed graph of uniquely named steps with exit-status transition
/// rules. The graph is fixed at build time: conditional steps are included
/// (or not) when the builder runs, never re-evaluated mid-run.
pub struct Job {
    name: String,
    first_step: String,
    steps: HashMap<String, Box<dyn Step>>,
    rules: Vec<TransitionRule>,
    restart_completed: bool,
}

impl Job {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a COMPLETED instance of this job may be launched again.
    pub fn allows_restart_when_complete(&self) -> bool {
        self.restart_completed
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    /// First rule matching `(from, exit)`, in declaration order (explicit
    /// rules before the linear-chain defaults).
    fn resolve(&self, from: &str, exit: &str) -> Option<&Transition> {
        self.rules
            .iter()
            .find(|rule| rule.from == from && exit_matches(&rule.pattern, exit))
            .map(|rule| &rule.outcome)
    }

    /// Walks the step graph, one step at a time, until a terminal outcome.
    ///
    /// Steps named in `previously_completed` (from a prior execution of the
    /// same instance) are routed through as COMPLETED without re-executing
    /// them or producing a new `StepExecution`.
    pub(crate) fn run(
        &self,
        execution: &mut JobExecution,
        repository: &ExecutionRepository,
        stop: &StopToken,
        previously_completed: &HashSet<String>,
    ) {
        let started = Instant::now();
        execution.status = BatchStatus::Started;
        execution.start_time = OffsetDateTime::now_utc();
        repository.save_execution(execution);
        info!("Start of job: {}, id: {}", self.name, execution.id);

        // Job-scoped context: records the exit of every settled step, so a
        // restarted execution (and any observer) can see how far prior
        // attempts got without replaying their step executions.
        let mut job_context = repository
            .job_context(&execution.instance_key)
            .unwrap_or_default();

        let mut current = self.first_step.clone();
        loop {
            let exit = if previously_completed.contains(&current) {
                info!(
                    "step '{}' already completed in a previous execution, skipping",
                    current
                );
                "COMPLETED"
            } else {
                let Some(step) = self.steps.get(&current) else {
                    // Unreachable for a validated graph.
                    execution.failure = Some(format!("unknown step '{current}'"));
                    execution.status = BatchStatus::Failed;
                    break;
                };

                let mut step_execution = StepExecution::new(&current);
                let result = {
                    let scope = StepScope {
                        parameters: &execution.parameters,
                        repository,
                        instance_key: &execution.instance_key,
                        stop,
                    };
                    step.execute(&mut step_execution, &scope)
                };
                let exit = step_execution.exit_status();
                if let Err(error) = &result
                    && execution.failure.is_none()
                {
                    execution.failure = Some(error.to_string());
                }
                execution.step_executions.push(step_execution);
                repository.save_execution(execution);
                job_context.put(&format!("step.{current}.exit"), exit);
                repository.save_job_context(&execution.instance_key, &job_context);
                exit
            };

            // A stop request terminates the walk regardless of the rules.
            if exit == "STOPPED" {
                execution.status = BatchStatus::Stopped;
                break;
            }

            match self.resolve(&current, exit) {
                Some(Transition::To(next)) => current = next.clone(),
                Some(Transition::Complete) => {
                    execution.status = BatchStatus::Completed;
                    break;
                }
                Some(Transition::Fail) => {
                    execution.status = BatchStatus::Failed;
                    break;
                }
                Some(Transition::Stop) => {
                    execution.status = BatchStatus::Stopped;
                    break;
                }
                None => {
                    // Guarded at build time; kept as a terminal fallback.
                    if execution.failure.is_none() {
                        execution.failure = Some(format!(
                            "no transition rule for step '{current}' exit status '{exit}'"
                        ));
                    }
                    execution.status = BatchStatus::Failed;
                    break;
                }
            }
        }

        execution.end_time = Some(OffsetDateTime::now_utc());
        execution.duration = started.elapsed();
        info!(
            "End of job: {}, id: {}, status: {:?}",
            self.name, execution.id, execution.status
        );
        repository.save_execution(execution);
    }
}

/// Builder for a [`Job`].
///
/// `start`/`next` chain steps linearly and install the default rules
/// (`COMPLETED` flows to the next step, anything else fails the job);
/// `step` adds a node without defaults for graphs wired entirely through
/// explicit [`JobBuilder::transition`] rules. Explicit rules always win over
/// the chain defaults, and within each group the first declared match wins.
///
/// Validation happens in [`JobBuilder::build`]: an empty job, a duplicate
/// step name, a rule naming an unknown step, or a step whose COMPLETED or
/// FAILED exit no rule covers are all configuration errors — detected when
/// the graph is built, not when it runs.
#[derive(Default)]
pub struct JobBuilder {
    name: Option<String>,
    steps: Vec<Box<dyn Step>>,
    chain: Vec<String>,
    rules: Vec<TransitionRule>,
    restart_completed: bool,
}

impl JobBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Sets the first step of the job.
    pub fn start(self, step: impl Step + 'static) -> Self {
        self.next(step)
    }

    /// Appends a step to the linear chain.
    pub fn next(mut self, step: impl Step + 'static) -> Self {
        self.chain.push(step.name().to_string());
        self.steps.push(Box::new(step));
        self
    }

    /// Adds a step without chaining it; reachable only through explicit
    /// transition rules.
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Adds an explicit transition rule `(from, pattern) → outcome`.
    pub fn transition(mut self, from: &str, on_pattern: &str, outcome: Transition) -> Self {
        self.rules.push(TransitionRule {
            from: from.to_string(),
            pattern: on_pattern.to_string(),
            outcome,
        });
        self
    }

    /// Allows relaunching this job after a COMPLETED execution.
    pub fn restart_completed(mut self, allowed: bool) -> Self {
        self.restart_completed = allowed;
        self
    }

    pub fn build(self) -> Result<Job, BatchError> {
        if self.steps.is_empty() {
            return Err(BatchError::Configuration(
                "a job requires at least one step".to_string(),
            ));
        }

        let mut names = Vec::new();
        for step in &self.steps {
            if names.iter().any(|name| name == step.name()) {
                return Err(BatchError::Configuration(format!(
                    "duplicate step name '{}'",
                    step.name()
                )));
            }
            names.push(step.name().to_string());
        }
        let first_step = names[0].clone();

        // Explicit rules first, then the linear-chain defaults.
        let mut rules = self.rules;
        for window in self.chain.windows(2) {
            rules.push(TransitionRule {
                from: window[0].clone(),
                pattern: "COMPLETED".to_string(),
                outcome: Transition::To(window[1].clone()),
            });
        }
        if let Some(last) = self.chain.last() {
            rules.push(TransitionRule {
                from: last.clone(),
                pattern: "COMPLETED".to_string(),
                outcome: Transition::Complete,
            });
        }
        for chained in &self.chain {
            rules.push(TransitionRule {
                from: chained.clone(),
                pattern: "*".to_string(),
                outcome: Transition::Fail,
            });
        }

        for rule in &rules {
            if !names.iter().any(|name| name == &rule.from) {
                return Err(BatchError::Configuration(format!(
                    "transition rule references unknown step '{}'",
                    rule.from
                )));
            }
            if let Transition::To(target) = &rule.outcome
                && !names.iter().any(|name| name == target)
            {
                return Err(BatchError::Configuration(format!(
                    "transition rule routes to unknown step '{target}'"
                )));
            }
        }

        // Every step must know where to go for both regular exits.
        for name in &names {
            for exit in ["COMPLETED", "FAILED"] {
                let covered = rules
                    .iter()
                    .any(|rule| &rule.from == name && exit_matches(&rule.pattern, exit));
                if !covered {
                    return Err(BatchError::Configuration(format!(
                        "no transition rule covers step '{name}' exit status '{exit}'"
                    )));
                }
            }
        }

        let steps = self
            .steps
            .into_iter()
            .map(|step| (step.name().to_string(), step))
            .collect();

        Ok(Job {
            name: self.name.unwrap_or_else(build_name),
            first_step,
            steps,
            rules,
            restart_completed: self.restart_completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::core::context::ExecutionContext;
    use crate::core::step::{RepeatStatus, StepBuilder, StepStatus};

    use super::*;

    fn finished_tasklet(name: &str) -> impl Step + 'static {
        StepBuilder::new(name)
            .tasklet(|_: &JobParameters, _: &mut ExecutionContext| Ok(RepeatStatus::Finished))
            .build()
    }

    fn failing_tasklet(name: &str) -> impl Step + 'static {
        StepBuilder::new(name)
            .tasklet(|_: &JobParameters, _: &mut ExecutionContext| {
                Err(BatchError::Configuration("deliberate failure".to_string()))
            })
            .build()
    }

    fn run(job: &Job) -> JobExecution {
        let repository = ExecutionRepository::new();
        let mut execution = JobExecution::new(job.name(), "test?{}", JobParameters::default());
        job.run(
            &mut execution,
            &repository,
            &StopToken::new(),
            &HashSet::new(),
        );
        execution
    }

    #[test]
    fn exit_patterns_support_wildcards() {
        assert!(exit_matches("COMPLETED", "COMPLETED"));
        assert!(exit_matches("*", "COMPLETED"));
        assert!(exit_matches("*", ""));
        assert!(exit_matches("COMPLET??", "COMPLETED"));
        assert!(exit_matches("FAIL*", "FAILED"));
        assert!(!exit_matches("FAILED", "COMPLETED"));
        assert!(!exit_matches("COMPLETED?", "COMPLETED"));
        assert!(!exit_matches("", "COMPLETED"));
    }

    #[test]
    fn empty_job_is_a_configuration_error() {
        let result = JobBuilder::new("empty").build();
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn duplicate_step_names_are_rejected() {
        let result = JobBuilder::new("dup")
            .start(finished_tasklet("same"))
            .next(finished_tasklet("same"))
            .build();
        assert!(
            matches!(result, Err(BatchError::Configuration(message)) if message.contains("same"))
        );
    }

    #[test]
    fn rules_must_reference_known_steps() {
        let result = JobBuilder::new("dangling")
            .start(finished_tasklet("a"))
            .transition("a", "FAILED", Transition::To("ghost".to_string()))
            .build();
        assert!(
            matches!(result, Err(BatchError::Configuration(message)) if message.contains("ghost"))
        );
    }

    #[test]
    fn uncovered_exit_status_is_detected_at_build_time() {
        // A detached step gets no default rules; covering only COMPLETED
        // leaves FAILED dangling.
        let result = JobBuilder::new("uncovered")
            .step(finished_tasklet("a"))
            .transition("a", "COMPLETED", Transition::Complete)
            .build();
        assert!(
            matches!(result, Err(BatchError::Configuration(message)) if message.contains("FAILED"))
        );
    }

    #[test]
    fn linear_chain_completes_in_order() {
        let job = JobBuilder::new("linear")
            .start(finished_tasklet("a"))
            .next(finished_tasklet("b"))
            .build()
            .expect("valid job");

        let execution = run(&job);

        assert_eq!(execution.status, BatchStatus::Completed);
        let traversed: Vec<&str> = execution
            .step_executions
            .iter()
            .map(|step| step.step_name.as_str())
            .collect();
        assert_eq!(traversed, vec!["a", "b"]);
    }

    #[test]
    fn chained_step_failure_fails_the_job() {
        let job = JobBuilder::new("fails")
            .start(finished_tasklet("a"))
            .next(failing_tasklet("b"))
            .next(finished_tasklet("c"))
            .build()
            .expect("valid job");

        let execution = run(&job);

        assert_eq!(execution.status, BatchStatus::Failed);
        assert!(execution.step_execution("c").is_none());
        assert!(
            execution
                .failure
                .as_deref()
                .is_some_and(|cause| cause.contains("deliberate failure"))
        );
    }

    #[test]
    fn first_matching_rule_wins_regardless_of_declaration_order() {
        let build = |step: Box<dyn Step>| {
            JobBuilder::new("routed")
                .step(step)
                .step(finished_tasklet("b"))
                .transition("a", "FAILED", Transition::Fail)
                .transition("a", "*", Transition::To("b".to_string()))
                .transition("b", "*", Transition::Complete)
                .build()
                .expect("valid job")
        };

        // COMPLETED does not match the FAILED rule, so the wildcard routes
        // to step b.
        let execution = run(&build(Box::new(finished_tasklet("a"))));
        assert_eq!(execution.status, BatchStatus::Completed);
        assert!(execution.step_execution("b").is_some());

        // FAILED matches the first rule even though the wildcard also
        // matches.
        let execution = run(&build(Box::new(failing_tasklet("a"))));
        assert_eq!(execution.status, BatchStatus::Failed);
        assert!(execution.step_execution("b").is_none());
    }

    #[test]
    fn explicit_rules_override_chain_defaults() {
        // By default a failed chained step fails the job; an explicit rule
        // routes the failure to a cleanup step instead.
        let job = JobBuilder::new("cleanup-on-failure")
            .start(failing_tasklet("work"))
            .step(finished_tasklet("cleanup"))
            .transition("work", "FAILED", Transition::To("cleanup".to_string()))
            .transition("cleanup", "COMPLETED", Transition::Complete)
            .transition("cleanup", "*", Transition::Fail)
            .build()
            .expect("valid job");

        let execution = run(&job);

        assert_eq!(execution.status, BatchStatus::Completed);
        assert!(execution.step_execution("cleanup").is_some());
        assert_eq!(
            execution.step_execution("work").map(|step| step.status),
            Some(StepStatus::Failed)
        );
        // The original cause stays attached for diagnosis.
        assert!(execution.failure.is_some());
    }

    #[test]
    fn previously_completed_steps_are_not_reexecuted() {
        let job = JobBuilder::new("resume")
            .start(failing_tasklet("a"))
            .next(finished_tasklet("b"))
            .build()
            .expect("valid job");

        let repository = ExecutionRepository::new();
        let mut execution = JobExecution::new("resume", "resume?{}", JobParameters::default());
        let completed: HashSet<String> = ["a".to_string()].into();
        job.run(&mut execution, &repository, &StopToken::new(), &completed);

        // Step a would fail if executed; skipping it routes COMPLETED to b.
        assert_eq!(execution.status, BatchStatus::Completed);
        assert!(execution.step_execution("a").is_none());
        assert!(execution.step_execution("b").is_some());
    }
}
