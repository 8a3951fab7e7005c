mod common;

use std::sync::{Arc, Mutex};

use common::{UppercaseProcessor, init_logger, launcher_for};
use mockall::Sequence;
use mockall::mock;

use batchling::BatchError;
use batchling::core::item::{ItemProcessor, ItemProcessorResult, ItemWriter, ItemWriterResult};
use batchling::core::job::{BatchStatus, Job, JobBuilder};
use batchling::core::parameters::JobParameters;
use batchling::core::step::{StepBuilder, StepStatus};
use batchling::item::collect::VecItemWriter;
use batchling::item::list::ListItemReader;
use batchling::tasklet::validate::ValidateParametersTasklet;

mock! {
    pub Writer {}

    impl ItemWriter<String> for Writer {
        fn write(&self, items: &[String]) -> ItemWriterResult;
    }
}

/// Fails items marked `bad` with a whitelistable kind.
struct RejectBadRecords;

impl ItemProcessor<String, String> for RejectBadRecords {
    fn process(&self, item: &String) -> ItemProcessorResult<String> {
        if item.starts_with("bad") {
            Err(BatchError::processor("invalid-record", format!("rejected {item}")))
        } else {
            Ok(Some(item.to_uppercase()))
        }
    }
}

/// `bad_count` bad items interleaved among good ones, ten items total.
fn mixed_source(bad_count: usize) -> Vec<String> {
    (0..10)
        .map(|index| {
            if index < bad_count {
                // Spread the bad items through the source.
                format!("bad-{index}")
            } else {
                format!("good-{index}")
            }
        })
        .collect()
}

#[test]
fn missing_required_parameter_fails_before_any_chunk_work() {
    init_logger();

    let written = VecItemWriter::new();
    let sink = written.clone();

    let validate = StepBuilder::new("validate")
        .tasklet(ValidateParametersTasklet::new(["name"]))
        .build();
    let process = StepBuilder::new("process")
        .chunk::<String, String>(3)
        .reader(|_: &JobParameters| Ok(Box::new(ListItemReader::new(mixed_source(0)))))
        .processor(UppercaseProcessor)
        .writer(move |_: &JobParameters| Ok(Box::new(sink.clone())))
        .build();

    let job = JobBuilder::new("guarded")
        .start(validate)
        .next(process)
        .build()
        .expect("valid job");
    let launcher = launcher_for([job]);

    let execution = launcher
        .launch("guarded", JobParameters::default())
        .expect("a failed run still returns its execution");

    assert_eq!(execution.status, BatchStatus::Failed);
    // The chunk step never started.
    assert_eq!(execution.step_executions.len(), 1);
    assert!(execution.step_execution("process").is_none());
    assert!(written.is_empty());
    // The cause names the missing parameter.
    assert!(
        execution
            .failure
            .as_deref()
            .is_some_and(|cause| cause.contains("'name'"))
    );
}

#[test]
fn skip_limit_boundary_tolerates_exactly_the_limit() {
    init_logger();

    let written = VecItemWriter::new();
    let sink = written.clone();

    let process = StepBuilder::new("process")
        .chunk::<String, String>(4)
        .reader(|_: &JobParameters| Ok(Box::new(ListItemReader::new(mixed_source(3)))))
        .processor(RejectBadRecords)
        .writer(move |_: &JobParameters| Ok(Box::new(sink.clone())))
        .skip_limit(3)
        .skip_on("invalid-record")
        .build();

    let job = JobBuilder::new("tolerant").start(process).build().expect("valid job");
    let launcher = launcher_for([job]);

    let execution = launcher
        .launch("tolerant", JobParameters::default())
        .expect("launch");

    assert_eq!(execution.status, BatchStatus::Completed);
    let step = execution.step_execution("process").expect("step ran");
    assert_eq!(step.read_count, 10);
    assert_eq!(step.skip_count, 3);
    assert_eq!(step.write_count, 7);
    assert_eq!(written.len(), 7);
}

#[test]
fn skip_limit_boundary_fails_on_the_next_failure() {
    init_logger();

    let process = StepBuilder::new("process")
        .chunk::<String, String>(4)
        .reader(|_: &JobParameters| Ok(Box::new(ListItemReader::new(mixed_source(4)))))
        .processor(RejectBadRecords)
        .writer(|_: &JobParameters| Ok(Box::new(VecItemWriter::new())))
        .skip_limit(3)
        .skip_on("invalid-record")
        .build();

    let job = JobBuilder::new("overrun").start(process).build().expect("valid job");
    let launcher = launcher_for([job]);

    let execution = launcher
        .launch("overrun", JobParameters::default())
        .expect("a failed run still returns its execution");

    assert_eq!(execution.status, BatchStatus::Failed);
    let step = execution.step_execution("process").expect("step ran");
    assert_eq!(step.status, StepStatus::Failed);
    // Only the tolerated skips are counted; the fourth failure is the cause.
    assert_eq!(step.skip_count, 3);
    assert!(
        execution
            .failure
            .as_deref()
            .is_some_and(|cause| cause.contains("invalid-record"))
    );
}

#[test]
fn exhausted_sink_retries_fail_the_step_with_counts_rolled_back() {
    init_logger();

    struct BrokenSink;
    impl ItemWriter<String> for BrokenSink {
        fn write(&self, _items: &[String]) -> ItemWriterResult {
            Err(BatchError::ItemWriter("sink is down".to_string()))
        }
    }

    let process = StepBuilder::new("process")
        .chunk::<String, String>(5)
        .reader(|_: &JobParameters| Ok(Box::new(ListItemReader::new(mixed_source(0)))))
        .processor(UppercaseProcessor)
        .writer(|_: &JobParameters| Ok(Box::new(BrokenSink)))
        .retry_limit(2)
        .build();

    let job = JobBuilder::new("down").start(process).build().expect("valid job");
    let launcher = launcher_for([job]);

    let execution = launcher
        .launch("down", JobParameters::default())
        .expect("a failed run still returns its execution");

    assert_eq!(execution.status, BatchStatus::Failed);
    let step = execution.step_execution("process").expect("step ran");
    assert_eq!(step.status, StepStatus::Failed);
    // The failed chunk was rolled back: reads stand, nothing committed.
    assert_eq!(step.read_count, 5);
    assert_eq!(step.write_count, 0);
    assert_eq!(step.commit_count, 0);
    assert!(
        execution
            .failure
            .as_deref()
            .is_some_and(|cause| cause.contains("sink is down"))
    );
}

#[test]
fn transient_sink_failure_is_retried_with_the_same_payload() {
    init_logger();

    let mut writer = MockWriter::new();
    let mut sequence = Sequence::new();
    writer
        .expect_write()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Err(BatchError::ItemWriter("transient outage".to_string())));
    writer
        .expect_write()
        .times(1)
        .in_sequence(&mut sequence)
        .withf(|items: &[String]| items.len() == 10)
        .returning(|_| Ok(()));

    // The factory runs once per execution; hand the mock over through a slot.
    let slot = Arc::new(Mutex::new(Some(writer)));
    let process = StepBuilder::new("process")
        .chunk::<String, String>(10)
        .reader(|_: &JobParameters| Ok(Box::new(ListItemReader::new(mixed_source(0)))))
        .processor(UppercaseProcessor)
        .writer(move |_: &JobParameters| {
            let writer = slot
                .lock()
                .expect("slot lock")
                .take()
                .expect("single execution");
            Ok(Box::new(writer))
        })
        .retry_limit(1)
        .build();

    let job = JobBuilder::new("flaky").start(process).build().expect("valid job");
    let launcher = launcher_for([job]);

    let execution = launcher
        .launch("flaky", JobParameters::default())
        .expect("launch");

    assert_eq!(execution.status, BatchStatus::Completed);
    let step = execution.step_execution("process").expect("step ran");
    assert_eq!(step.write_count, 10);
    assert_eq!(step.commit_count, 1);
}

#[test]
fn launching_an_unregistered_job_never_starts() {
    init_logger();

    let launcher = launcher_for(Vec::<Job>::new());
    let result = launcher.launch("ghost", JobParameters::default());

    assert!(matches!(result, Err(BatchError::Configuration(_))));
    assert!(launcher.repository().last_execution("ghost?{}").is_none());
}
