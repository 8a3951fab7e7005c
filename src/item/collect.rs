use std::sync::{Arc, Mutex};

use crate::core::item::{ItemWriter, ItemWriterResult};
use crate::core::lock;

/// A writer that collects every written item into a shared vector.
///
/// Clones share the same backing storage, so a test can keep one handle
/// while handing another to the step's writer factory — including across
/// restarts, where the factory runs once per execution.
pub struct VecItemWriter<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> VecItemWriter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }
}

impl<T: Clone> VecItemWriter<T> {
    /// Snapshot of everything written so far, in commit order.
    pub fn items(&self) -> Vec<T> {
        lock(&self.items).clone()
    }
}

impl<T> Default for VecItemWriter<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T> Clone for VecItemWriter<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T: Clone + Send> ItemWriter<T> for VecItemWriter<T> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        lock(&self.items).extend_from_slice(items);
        Ok(())
    }
}
