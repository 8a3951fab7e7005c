//! Prod-profile demo: read lines from the file named by the `input.path`
//! job parameter, uppercase them on a small worker pool, and append them to
//! the `output.path` file.
//!
//! Run with: `cargo run --example file_lines_job`

use std::env::temp_dir;
use std::fs;
use std::sync::Arc;

use anyhow::Result;

use batchling::BatchError;
use batchling::config::SourceProfile;
use batchling::core::item::{ItemProcessor, ItemProcessorResult};
use batchling::core::job::JobBuilder;
use batchling::core::launcher::{JobLauncher, JobRegistry};
use batchling::core::parameters::JobParameters;
use batchling::core::repository::ExecutionRepository;
use batchling::core::step::StepBuilder;
use batchling::item::lines::LineItemWriter;
use batchling::tasklet::validate::ValidateParametersTasklet;

struct UppercaseProcessor;

impl ItemProcessor<String, String> for UppercaseProcessor {
    fn process(&self, item: &String) -> ItemProcessorResult<String> {
        Ok(Some(item.to_uppercase()))
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let input = temp_dir().join("batchling-demo-input.txt");
    let output = temp_dir().join("batchling-demo-output.txt");
    fs::write(&input, "alpha\nbravo\ncharlie\ndelta\necho\n")?;
    // Append-mode writer; start from a clean slate.
    let _ = fs::remove_file(&output);

    let validate = StepBuilder::new("validate")
        .tasklet(ValidateParametersTasklet::new(["name", "input.path", "output.path"]))
        .build();

    let process = StepBuilder::new("process")
        .chunk::<String, String>(2)
        .reader(|parameters: &JobParameters| SourceProfile::Prod.open_reader(parameters))
        .processor(UppercaseProcessor)
        .writer(|parameters: &JobParameters| {
            let path = parameters.get_string("output.path").ok_or_else(|| {
                BatchError::Configuration(
                    "missing required job parameter 'output.path'".to_string(),
                )
            })?;
            Ok(Box::new(LineItemWriter::from_path(path)?))
        })
        .concurrency(2)
        .build();

    let job = JobBuilder::new("file-job").start(validate).next(process).build()?;

    let registry = Arc::new(JobRegistry::new());
    registry.register(job)?;
    let launcher = JobLauncher::new(registry, Arc::new(ExecutionRepository::new()));

    let parameters = JobParameters::builder()
        .string("name", "World")
        .string("input.path", input.to_string_lossy())
        .string("output.path", output.to_string_lossy())
        .build();
    let execution = launcher.launch("file-job", parameters)?;

    println!("job '{}' finished: {:?}", execution.job_name, execution.status);
    for step in &execution.step_executions {
        println!(
            "  step '{}': {:?} (read {}, written {}, committed {})",
            step.step_name, step.status, step.read_count, step.write_count, step.commit_count
        );
    }
    println!("--- {} ---", output.display());
    print!("{}", fs::read_to_string(&output)?);

    Ok(())
}
