use std::sync::Arc;

use batchling::core::item::{ItemProcessor, ItemProcessorResult};
use batchling::core::job::Job;
use batchling::core::launcher::{JobLauncher, JobRegistry};
use batchling::core::repository::ExecutionRepository;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Registers the given jobs and returns a launcher over a fresh repository.
pub fn launcher_for(jobs: impl IntoIterator<Item = Job>) -> JobLauncher {
    let registry = Arc::new(JobRegistry::new());
    for job in jobs {
        registry.register(job).expect("job registration");
    }
    JobLauncher::new(registry, Arc::new(ExecutionRepository::new()))
}

pub struct UppercaseProcessor;

impl ItemProcessor<String, String> for UppercaseProcessor {
    fn process(&self, item: &String) -> ItemProcessorResult<String> {
        Ok(Some(item.to_uppercase()))
    }
}
