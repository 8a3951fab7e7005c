use std::fmt::Debug;

use log::info;

use crate::core::item::{ItemWriter, ItemWriterResult};

/// A writer that logs every record instead of persisting it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggerWriter;

impl<T: Debug> ItemWriter<T> for LoggerWriter {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        for item in items {
            info!("wrote: {item:?}");
        }
        Ok(())
    }
}
