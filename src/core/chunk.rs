use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};
use time::OffsetDateTime;

use crate::BatchError;
use crate::core::context::ExecutionContext;
use crate::core::item::{ItemProcessor, ItemReader, ItemWriter};
use crate::core::lock;
use crate::core::parameters::JobParameters;
use crate::core::step::{Step, StepExecution, StepScope, StepStatus};

/// Step-context key holding the cumulative number of committed chunks.
pub const COMMIT_COUNT_KEY: &str = "batchling.commit.count";

/// Step-context key holding the number of source items consumed at the last
/// commit. Only written by sequential steps, where commit order matches read
/// order; a restarted sequential step fast-forwards its reader past this
/// many items.
pub const READ_POSITION_KEY: &str = "batchling.read.position";

/// Factory constructing a reader at step-start time from the resolved job
/// parameters. Steps hold factories rather than reader instances so every
/// execution (including restarts) starts from a fresh source cursor.
pub type ReaderFactory<I> =
    dyn Fn(&JobParameters) -> Result<Box<dyn ItemReader<I>>, BatchError> + Send + Sync;

/// Factory constructing a writer at step-start time from the resolved job
/// parameters.
pub type WriterFactory<O> =
    dyn Fn(&JobParameters) -> Result<Box<dyn ItemWriter<O>>, BatchError> + Send + Sync;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum ChunkStatus {
    /// The chunk reached the configured size; more input may follow.
    Full,
    /// The source is exhausted.
    Finished,
}

enum StepOutcome {
    Finished,
    Stopped,
}

/// Thread-safe progress counters shared between the chunk coordinator and
/// its workers. Monotonically increasing; the commit counter is the only
/// cross-chunk ordering guarantee once workers commit out of read order.
#[derive(Default)]
struct ChunkCounters {
    read: AtomicUsize,
    written: AtomicUsize,
    filtered: AtomicUsize,
    skipped: AtomicUsize,
    commits: AtomicUsize,
}

fn record_error(slot: &Mutex<Option<BatchError>>, error: BatchError) {
    let mut guard = lock(slot);
    if guard.is_none() {
        *guard = Some(error);
    } else {
        debug!("suppressing secondary chunk failure: {error}");
    }
}

/// A step that drives source → processor → sink in fixed-size chunks.
///
/// Each chunk is read sequentially from the source, run through the
/// processor (applying the skip policy to tolerated failures), and handed to
/// the sink in a single `write` call — the commit boundary. A sink failure
/// is retried with the same payload up to `retry_limit` times before the
/// step fails. With `concurrency > 1` processing and committing run on a
/// worker pool and chunks may commit out of read order.
pub struct ChunkOrientedStep<I, O> {
    name: String,
    reader_factory: Box<ReaderFactory<I>>,
    processor: Arc<dyn ItemProcessor<I, O>>,
    writer_factory: Box<WriterFactory<O>>,
    chunk_size: usize,
    skip_limit: usize,
    skip_kinds: HashSet<String>,
    retry_limit: usize,
    concurrency: usize,
}

impl<I, O> Step for ChunkOrientedStep<I, O>
where
    I: Send + 'static,
    O: 'static,
{
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

        let counters = ChunkCounters::default();
        let outcome = self.run(scope, &counters);

        execution.read_count = counters.read.load(Ordering::SeqCst);
        execution.write_count = counters.written.load(Ordering::SeqCst);
        execution.filter_count = counters.filtered.load(Ordering::SeqCst);
        execution.skip_count = counters.skipped.load(Ordering::SeqCst);
        execution.commit_count = counters.commits.load(Ordering::SeqCst);

        info!("End of step: {}, id: {}", self.name, execution.id);

        match outcome {
            Ok(StepOutcome::Finished) => {
                execution.settle(StepStatus::Completed, started);
                Ok(())
            }
            Ok(StepOutcome::Stopped) => {
                execution.transition_to(StepStatus::Stopping);
                execution.settle(StepStatus::Stopped, started);
                Ok(())
            }
            Err(error) => {
                execution.record_failure(&error);
                execution.settle(StepStatus::Failed, started);
                Err(BatchError::StepFailure {
                    step: self.name.clone(),
                    message: error.to_string(),
                })
            }
        }
    }
}

impl<I, O> ChunkOrientedStep<I, O>
where
    I: Send + 'static,
    O: 'static,
{
    fn run(
        &self,
        scope: &StepScope<'_>,
        counters: &ChunkCounters,
    ) -> Result<StepOutcome, BatchError> {
        let reader = (self.reader_factory)(scope.parameters)?;
        let writer = (self.writer_factory)(scope.parameters)?;

        let mut context = scope.load_step_context(&self.name);
        let prior_commits = context.get_usize(COMMIT_COUNT_KEY).unwrap_or(0);

        // A prior failed or stopped attempt left its last commit position in
        // the persisted context; resume after it instead of re-reading the
        // whole source. Unordered commits make the position meaningless, so
        // concurrent steps always start over.
        let resume_offset = if self.concurrency <= 1 {
            context.get_usize(READ_POSITION_KEY).unwrap_or(0)
        } else {
            0
        };
        if resume_offset > 0 {
            info!(
                "step '{}' resuming after {} previously committed items",
                self.name, resume_offset
            );
            for _ in 0..resume_offset {
                if reader.read()?.is_none() {
                    break;
                }
            }
        }

        writer.open()?;

        let outcome = if self.concurrency > 1 {
            self.run_concurrent(scope, reader.as_ref(), writer.as_ref(), counters, prior_commits, context)
        } else {
            self.run_sequential(
                scope,
                reader.as_ref(),
                writer.as_ref(),
                counters,
                resume_offset,
                prior_commits,
                &mut context,
            )
        };

        if let Err(error) = writer.close() {
            warn!("error closing writer of step '{}': {}", self.name, error);
        }

        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn run_sequential(
        &self,
        scope: &StepScope<'_>,
        reader: &dyn ItemReader<I>,
        writer: &dyn ItemWriter<O>,
        counters: &ChunkCounters,
        resume_offset: usize,
        prior_commits: usize,
        context: &mut ExecutionContext,
    ) -> Result<StepOutcome, BatchError> {
        loop {
            if scope.stop.is_stop_requested() {
                return Ok(StepOutcome::Stopped);
            }

            let (items, status) = self.read_chunk(reader, counters)?;
            if items.is_empty() && status == ChunkStatus::Finished {
                return Ok(StepOutcome::Finished);
            }

            let survivors = self.process_chunk(&items, counters)?;
            self.write_chunk(&survivors, writer, counters)?;

            let commits = counters.commits.fetch_add(1, Ordering::SeqCst) + 1;
            context.put(COMMIT_COUNT_KEY, prior_commits + commits);
            context.put(
                READ_POSITION_KEY,
                resume_offset + counters.read.load(Ordering::SeqCst),
            );
            scope.persist_step_context(&self.name, context);

            if status == ChunkStatus::Finished {
                return Ok(StepOutcome::Finished);
            }
        }
    }

    /// Reads chunks on the calling thread and fans them out to a bounded
    /// worker pool for processing and committing. Workers finish in-flight
    /// chunks on stop or failure; the coordinator just refuses to hand out
    /// new ones.
    fn run_concurrent(
        &self,
        scope: &StepScope<'_>,
        reader: &dyn ItemReader<I>,
        writer: &dyn ItemWriter<O>,
        counters: &ChunkCounters,
        prior_commits: usize,
        context: ExecutionContext,
    ) -> Result<StepOutcome, BatchError> {
        let shared_context = Mutex::new(context);
        let first_error: Mutex<Option<BatchError>> = Mutex::new(None);
        let mut stopped = false;

        thread::scope(|threads| {
            let (sender, receiver) = mpsc::sync_channel::<Vec<I>>(self.concurrency);
            let receiver = Arc::new(Mutex::new(receiver));

            for _ in 0..self.concurrency {
                let receiver = Arc::clone(&receiver);
                let first_error = &first_error;
                let shared_context = &shared_context;
                threads.spawn(move || {
                    loop {
                        // Holding the lock while blocked on recv serializes
                        // chunk hand-off across workers, which is the intent.
                        let received = lock(&receiver).recv();
                        let Ok(items) = received else {
                            break;
                        };
                        if let Err(error) = self.commit_chunk(
                            scope,
                            &items,
                            writer,
                            counters,
                            shared_context,
                            prior_commits,
                        ) {
                            record_error(first_error, error);
                            break;
                        }
                    }
                });
            }
            // Workers hold the only receiver handles now; once they all bail
            // out the channel closes and a blocked send returns instead of
            // waiting forever.
            drop(receiver);

            loop {
                if scope.stop.is_stop_requested() {
                    stopped = true;
                    break;
                }
                if lock(&first_error).is_some() {
                    break;
                }

                match self.read_chunk(reader, counters) {
                    Ok((items, status)) => {
                        if !items.is_empty() && sender.send(items).is_err() {
                            // All workers already bailed out.
                            break;
                        }
                        if status == ChunkStatus::Finished {
                            break;
                        }
                    }
                    Err(error) => {
                        record_error(&first_error, error);
                        break;
                    }
                }
            }
            drop(sender);
        });

        if let Some(error) = lock(&first_error).take() {
            return Err(error);
        }
        if stopped {
            return Ok(StepOutcome::Stopped);
        }
        Ok(StepOutcome::Finished)
    }

    /// Processes and writes one chunk, then publishes the commit into the
    /// shared step context. Used by the concurrent path.
    fn commit_chunk(
        &self,
        scope: &StepScope<'_>,
        items: &[I],
        writer: &dyn ItemWriter<O>,
        counters: &ChunkCounters,
        context: &Mutex<ExecutionContext>,
        prior_commits: usize,
    ) -> Result<(), BatchError> {
        let survivors = self.process_chunk(items, counters)?;
        self.write_chunk(&survivors, writer, counters)?;

        let commits = counters.commits.fetch_add(1, Ordering::SeqCst) + 1;
        let mut guard = lock(context);
        guard.put(COMMIT_COUNT_KEY, prior_commits + commits);
        scope.persist_step_context(&self.name, &guard);
        Ok(())
    }

    /// Reads up to `chunk_size` items, stopping early at end of source.
    /// Reader failures are fatal to the step; the skip policy covers only
    /// processor failures.
    fn read_chunk(
        &self,
        reader: &dyn ItemReader<I>,
        counters: &ChunkCounters,
    ) -> Result<(Vec<I>, ChunkStatus), BatchError> {
        debug!("Start reading chunk");
        let mut items = Vec::with_capacity(self.chunk_size);

        loop {
            match reader.read() {
                Ok(Some(item)) => {
                    items.push(item);
                    counters.read.fetch_add(1, Ordering::SeqCst);
                    if items.len() >= self.chunk_size {
                        debug!("End reading chunk: full");
                        return Ok((items, ChunkStatus::Full));
                    }
                }
                Ok(None) => {
                    debug!("End reading chunk: source finished");
                    return Ok((items, ChunkStatus::Finished));
                }
                Err(error) => {
                    warn!("Error reading item: {error}");
                    return Err(error);
                }
            }
        }
    }

    /// Applies the processor to each item of a chunk, dropping filtered
    /// items and items whose failure kind the skip policy tolerates.
    fn process_chunk(
        &self,
        items: &[I],
        counters: &ChunkCounters,
    ) -> Result<Vec<O>, BatchError> {
        debug!("Processing chunk of {} items", items.len());
        let mut survivors = Vec::with_capacity(items.len());

        for item in items {
            match self.processor.process(item) {
                Ok(Some(processed)) => survivors.push(processed),
                Ok(None) => {
                    counters.filtered.fetch_add(1, Ordering::SeqCst);
                }
                Err(error) => {
                    let tolerated = error
                        .skip_kind()
                        .is_some_and(|kind| self.skip_kinds.contains(kind));
                    if !tolerated {
                        warn!("Error processing item: {error}");
                        return Err(error);
                    }
                    let skipped = counters.skipped.fetch_add(1, Ordering::SeqCst) + 1;
                    if skipped > self.skip_limit {
                        // The increment above is rolled back so the counts
                        // reflect tolerated skips only.
                        counters.skipped.fetch_sub(1, Ordering::SeqCst);
                        warn!(
                            "skip limit {} exceeded in step '{}': {}",
                            self.skip_limit, self.name, error
                        );
                        return Err(error);
                    }
                    debug!("skipping item after tolerated failure: {error}");
                }
            }
        }

        Ok(survivors)
    }

    /// Hands the surviving chunk to the sink in one call, retrying the same
    /// payload on failure. Counters only advance once the write succeeds, so
    /// a failed chunk leaves no trace in the write count.
    fn write_chunk(
        &self,
        items: &[O],
        writer: &dyn ItemWriter<O>,
        counters: &ChunkCounters,
    ) -> Result<(), BatchError> {
        if items.is_empty() {
            debug!("No surviving items, skipping write call");
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            match writer.write(items).and_then(|()| writer.flush()) {
                Ok(()) => {
                    counters.written.fetch_add(items.len(), Ordering::SeqCst);
                    debug!("End writing chunk of {} items", items.len());
                    return Ok(());
                }
                Err(error) if attempt < self.retry_limit => {
                    attempt += 1;
                    warn!(
                        "retrying chunk write of step '{}' (attempt {}/{}): {}",
                        self.name, attempt, self.retry_limit, error
                    );
                }
                Err(error) => {
                    warn!("Error writing chunk: {error}");
                    return Err(error);
                }
            }
        }
    }
}

/// Builder for a chunk-oriented step.
///
/// Reader and writer are supplied as factories invoked with the resolved job
/// parameters at step-start time, so a restarted execution always gets a
/// fresh source cursor and sink stream.
pub struct ChunkStepBuilder<I, O> {
    name: String,
    reader_factory: Option<Box<ReaderFactory<I>>>,
    processor: Option<Arc<dyn ItemProcessor<I, O>>>,
    writer_factory: Option<Box<WriterFactory<O>>>,
    chunk_size: usize,
    skip_limit: usize,
    skip_kinds: HashSet<String>,
    retry_limit: usize,
    concurrency: usize,
}

impl<I, O> ChunkStepBuilder<I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader_factory: None,
            processor: None,
            writer_factory: None,
            chunk_size: 10,
            skip_limit: 0,
            skip_kinds: HashSet::new(),
            retry_limit: 0,
            concurrency: 1,
        }
    }

    pub fn reader<F>(mut self, factory: F) -> Self
    where
        F: Fn(&JobParameters) -> Result<Box<dyn ItemReader<I>>, BatchError>
            + Send
            + Sync
            + 'static,
    {
        self.reader_factory = Some(Box::new(factory));
        self
    }

    pub fn processor(mut self, processor: impl ItemProcessor<I, O> + 'static) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    pub fn writer<F>(mut self, factory: F) -> Self
    where
        F: Fn(&JobParameters) -> Result<Box<dyn ItemWriter<O>>, BatchError>
            + Send
            + Sync
            + 'static,
    {
        self.writer_factory = Some(Box::new(factory));
        self
    }

    /// Number of items per commit. Clamped to at least one.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Maximum number of tolerated per-item failures across the step.
    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    /// Whitelists a processor failure kind for the skip policy.
    pub fn skip_on(mut self, kind: &str) -> Self {
        self.skip_kinds.insert(kind.to_string());
        self
    }

    /// Number of additional write attempts for a failing chunk commit.
    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Size of the chunk worker pool. One (the default) keeps the step
    /// sequential and restartable mid-source.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn build(self) -> ChunkOrientedStep<I, O> {
        ChunkOrientedStep {
            name: self.name,
            reader_factory: self
                .reader_factory
                .expect("Reader is required for building a step"),
            processor: self
                .processor
                .expect("Processor is required for building a step"),
            writer_factory: self
                .writer_factory
                .expect("Writer is required for building a step"),
            chunk_size: self.chunk_size,
            skip_limit: self.skip_limit,
            skip_kinds: self.skip_kinds,
            retry_limit: self.retry_limit,
            concurrency: self.concurrency,
        }
    }
}
