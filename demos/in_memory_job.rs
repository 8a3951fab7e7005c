//! Dev-profile demo: validate parameters, uppercase an in-memory list, and
//! optionally run a trailing cleanup step — all wired from typed
//! configuration when the graph is built.
//!
//! Run with: `cargo run --example in_memory_job`

use std::sync::Arc;

use anyhow::Result;
use log::info;

use batchling::config::{BatchProperties, SourceProfile};
use batchling::core::context::ExecutionContext;
use batchling::core::item::{ItemProcessor, ItemProcessorResult};
use batchling::core::job::{Job, JobBuilder};
use batchling::core::launcher::{JobLauncher, JobRegistry};
use batchling::core::parameters::JobParameters;
use batchling::core::repository::ExecutionRepository;
use batchling::core::step::{RepeatStatus, StepBuilder};
use batchling::item::logger::LoggerWriter;
use batchling::tasklet::validate::ValidateParametersTasklet;

/// Uppercases each line unless the configuration turned it off.
struct UppercaseProcessor {
    skip_uppercase: bool,
}

impl ItemProcessor<String, String> for UppercaseProcessor {
    fn process(&self, item: &String) -> ItemProcessorResult<String> {
        if self.skip_uppercase {
            Ok(Some(item.clone()))
        } else {
            Ok(Some(item.to_uppercase()))
        }
    }
}

/// The graph is assembled once from the resolved configuration; the
/// optional cleanup step either is or is not part of the job.
fn build_job(properties: &BatchProperties, profile: SourceProfile) -> Result<Job> {
    let validate = StepBuilder::new("validate")
        .tasklet(ValidateParametersTasklet::new(["name"]))
        .build();

    let process = StepBuilder::new("process")
        .chunk::<String, String>(properties.chunk_size)
        .reader(move |parameters: &JobParameters| profile.open_reader(parameters))
        .processor(UppercaseProcessor {
            skip_uppercase: false,
        })
        .writer(|_: &JobParameters| Ok(Box::new(LoggerWriter)))
        .skip_limit(properties.skip_limit)
        .retry_limit(properties.retry_limit)
        .concurrency(properties.concurrency)
        .build();

    let mut builder = JobBuilder::new("demo-job").start(validate).next(process);

    if properties.enable_cleanup_step {
        builder = builder.next(
            StepBuilder::new("cleanup")
                .tasklet(|_: &JobParameters, context: &mut ExecutionContext| {
                    info!("cleanup step executed");
                    context.put("cleaned", true);
                    Ok(RepeatStatus::Finished)
                })
                .build(),
        );
    }

    Ok(builder.build()?)
}

fn main() -> Result<()> {
    env_logger::init();

    let properties =
        BatchProperties::from_json(r#"{"chunk-size": 2, "enable-cleanup-step": true}"#)?;

    let registry = Arc::new(JobRegistry::new());
    registry.register(build_job(&properties, SourceProfile::Dev)?)?;
    let launcher = JobLauncher::new(registry, Arc::new(ExecutionRepository::new()));

    let parameters = JobParameters::builder().string("name", "Aleks").build();
    let execution = launcher.launch("demo-job", parameters)?;

    println!("job '{}' finished: {:?}", execution.job_name, execution.status);
    for step in &execution.step_executions {
        println!(
            "  step '{}': {:?} (read {}, written {}, committed {})",
            step.step_name, step.status, step.read_count, step.write_count, step.commit_count
        );
    }
    println!("  took {:?}", execution.duration);

    Ok(())
}
