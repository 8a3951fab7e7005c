use std::cell::RefCell;
use std::collections::VecDeque;

use crate::core::item::{ItemReader, ItemReaderResult};

/// An in-memory item reader that hands out the elements of a list in order.
///
/// Useful for development profiles and tests where a real source would be
/// overkill. The cursor lives in a `RefCell` so `read` can stay `&self`;
/// readers are only ever driven from the step's coordinating thread.
pub struct ListItemReader<T> {
    items: RefCell<VecDeque<T>>,
}

impl<T> ListItemReader<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: RefCell::new(items.into_iter().collect()),
        }
    }
}

impl<T> ItemReader<T> for ListItemReader<T> {
    fn read(&self) -> ItemReaderResult<T> {
        Ok(self.items.borrow_mut().pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_the_list_in_order_then_signals_end() {
        let reader = ListItemReader::new(["alpha", "bravo", "charlie"]);

        assert_eq!(reader.read(), Ok(Some("alpha")));
        assert_eq!(reader.read(), Ok(Some("bravo")));
        assert_eq!(reader.read(), Ok(Some("charlie")));
        assert_eq!(reader.read(), Ok(None));
        // Stays exhausted.
        assert_eq!(reader.read(), Ok(None));
    }
}
