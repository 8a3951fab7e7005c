use std::sync::Arc;

use crate::error::BatchError;

/// Result of a single read attempt: `Ok(None)` signals end of source.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of processing one item: `Ok(None)` filters the item out of the
/// chunk without counting it as a failure.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Result of a writer operation.
pub type ItemWriterResult = Result<(), BatchError>;

/// Produces the input sequence of a chunk-oriented step, one item at a time.
///
/// Readers are constructed per step execution (see
/// [`crate::core::chunk::ChunkStepBuilder::reader`]) and are only ever read
/// from the step's coordinating thread, so implementations are free to use
/// interior mutability (`RefCell`) for their cursor state.
pub trait ItemReader<I> {
    /// Reads the next item, or `Ok(None)` once the source is exhausted.
    fn read(&self) -> ItemReaderResult<I>;
}

/// Transforms one item of a chunk.
///
/// Returning `Ok(None)` filters the item (it is dropped silently and counted
/// as filtered, not skipped). Returning an error with a whitelisted kind
/// lets the step's skip policy drop the item instead of failing the chunk.
pub trait ItemProcessor<I, O>: Send + Sync {
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// Consumes one chunk of processed items per call.
///
/// The `write` call is the commit boundary of the chunk executor: a failure
/// here rolls the chunk back and is retried with the same payload. With step
/// concurrency above one, `write` may be called from several worker threads
/// at once.
pub trait ItemWriter<O>: Send + Sync {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// Identity processor for steps that move items through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughProcessor;

impl<I: Clone> ItemProcessor<I, I> for PassThroughProcessor {
    fn process(&self, item: &I) -> ItemProcessorResult<I> {
        Ok(Some(item.clone()))
    }
}

impl<I, R: ItemReader<I> + ?Sized> ItemReader<I> for Arc<R> {
    fn read(&self) -> ItemReaderResult<I> {
        self.as_ref().read()
    }
}

impl<I, O, P: ItemProcessor<I, O> + ?Sized> ItemProcessor<I, O> for Arc<P> {
    fn process(&self, item: &I) -> ItemProcessorResult<O> {
        self.as_ref().process(item)
    }
}

impl<O, W: ItemWriter<O> + ?Sized> ItemWriter<O> for Arc<W> {
    fn write(&self, items: &[O]) -> ItemWriterResult {
        self.as_ref().write(items)
    }

    fn open(&self) -> ItemWriterResult {
        self.as_ref().open()
    }

    fn flush(&self) -> ItemWriterResult {
        self.as_ref().flush()
    }

    fn close(&self) -> ItemWriterResult {
        self.as_ref().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_clones_the_item() {
        let processor = PassThroughProcessor;
        let result = processor.process(&"alpha".to_string());
        assert_eq!(result, Ok(Some("alpha".to_string())));
    }

    #[test]
    fn arc_writer_delegates() {
        struct Sink;
        impl ItemWriter<u32> for Sink {
            fn write(&self, items: &[u32]) -> ItemWriterResult {
                assert_eq!(items, &[1, 2]);
                Ok(())
            }
        }

        let writer: Arc<dyn ItemWriter<u32>> = Arc::new(Sink);
        assert!(writer.open().is_ok());
        assert!(writer.write(&[1, 2]).is_ok());
        assert!(writer.close().is_ok());
    }
}
