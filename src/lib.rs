#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
 # Batchling

 A self-contained, restartable, chunk-oriented batch job execution engine.

 ## Core Concepts

 - **Job:** a directed graph of uniquely named steps with transition rules
   keyed on step exit status. The graph is fixed when it is built;
   conditional steps are resolved from configuration at construction time.
 - **Step:** an independent unit of work — either a one-shot `Tasklet` or a
   chunk-oriented read/process/write configuration.
 - **ItemReader:** retrieves input for a step, one item at a time.
 - **ItemProcessor:** transforms (or filters, or rejects) one item; rejected
   items can be skipped under the step's fault-tolerance policy.
 - **ItemWriter:** receives each chunk of processed items in a single call —
   the commit boundary; failed commits are retried with the same payload.
 - **JobLauncher / ExecutionRepository:** launches registered jobs, tracks
   `JobInstance`/`JobExecution` identity, and persists `ExecutionContext`
   snapshots at every chunk commit so a failed or stopped execution restarts
   from the last commit point instead of from the beginning.

 ## Getting Started

```rust
use std::sync::Arc;

use batchling::core::item::{ItemProcessor, ItemProcessorResult};
use batchling::core::job::{BatchStatus, JobBuilder};
use batchling::core::launcher::{JobLauncher, JobRegistry};
use batchling::core::parameters::JobParameters;
use batchling::core::repository::ExecutionRepository;
use batchling::core::step::StepBuilder;
use batchling::item::collect::VecItemWriter;
use batchling::item::list::ListItemReader;
use batchling::tasklet::validate::ValidateParametersTasklet;

struct UppercaseProcessor;

impl ItemProcessor<String, String> for UppercaseProcessor {
    fn process(&self, item: &String) -> ItemProcessorResult<String> {
        Ok(Some(item.to_uppercase()))
    }
}

fn main() -> Result<(), batchling::BatchError> {
    let written = VecItemWriter::new();
    let sink = written.clone();

    let validate = StepBuilder::new("validate")
        .tasklet(ValidateParametersTasklet::new(["name"]))
        .build();

    let process = StepBuilder::new("process")
        .chunk::<String, String>(2)
        .reader(|_: &JobParameters| {
            Ok(Box::new(ListItemReader::new(
                ["alpha", "bravo", "charlie"].map(String::from),
            )))
        })
        .processor(UppercaseProcessor)
        .writer(move |_: &JobParameters| Ok(Box::new(sink.clone())))
        .build();

    let job = JobBuilder::new("demo")
        .start(validate)
        .next(process)
        .build()?;

    let registry = Arc::new(JobRegistry::new());
    registry.register(job)?;
    let launcher = JobLauncher::new(registry, Arc::new(ExecutionRepository::new()));

    let parameters = JobParameters::builder().string("name", "World").build();
    let execution = launcher.launch("demo", parameters)?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(written.items(), vec!["ALPHA", "BRAVO", "CHARLIE"]);
    Ok(())
}
```

 ## Fault tolerance

 Chunk steps take a skip policy (`skip_on(kind)` + `skip_limit`) for
 tolerated per-item processor failures, a `retry_limit` for transient sink
 failures, and a `concurrency` for fanning chunk work out to a worker pool.
 Counts (read / written / filtered / skipped / committed) are tracked per
 step execution and survive in the repository for diagnosis.
 */

/// Typed configuration and environment profiles.
pub mod config;

/// Core module for batch operations.
pub mod core;

/// Error types for batch operations.
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of item readers / writers (for example: list reader, line writer).
pub mod item;

/// Set of reusable tasklets.
pub mod tasklet;
