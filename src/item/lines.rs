use std::cell::RefCell;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Read, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::core::item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult};
use crate::core::lock;
use crate::error::BatchError;

/// A reader producing one `String` item per line of its source.
///
/// The file-backed constructor is the production counterpart of
/// [`crate::item::list::ListItemReader`]: the path typically arrives as a
/// job parameter and the reader is built by the step's reader factory at
/// step-start time.
pub struct LineItemReader<R: Read> {
    lines: RefCell<Lines<BufReader<R>>>,
}

impl LineItemReader<File> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, BatchError> {
        let file = File::open(path.as_ref()).map_err(|error| {
            BatchError::ItemReader(format!(
                "unable to open {}: {error}",
                path.as_ref().display()
            ))
        })?;
        Ok(Self::from_reader(file))
    }
}

impl<R: Read> LineItemReader<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: RefCell::new(BufReader::new(reader).lines()),
        }
    }
}

impl<R: Read> ItemReader<String> for LineItemReader<R> {
    fn read(&self) -> ItemReaderResult<String> {
        match self.lines.borrow_mut().next() {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(error)) => Err(BatchError::ItemReader(error.to_string())),
            None => Ok(None),
        }
    }
}

/// A writer appending one line per item to a file.
///
/// The stream sits behind a mutex because chunk workers may write
/// concurrently; each `write` call appends its whole chunk while holding the
/// lock, keeping committed chunks contiguous in the output.
pub struct LineItemWriter {
    stream: Mutex<BufWriter<File>>,
}

impl LineItemWriter {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, BatchError> {
        let file = File::options()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .map_err(|error| {
                BatchError::ItemWriter(format!(
                    "unable to open {}: {error}",
                    path.as_ref().display()
                ))
            })?;
        Ok(Self {
            stream: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl<T: Display> ItemWriter<T> for LineItemWriter {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        let mut stream = lock(&self.stream);
        for item in items {
            writeln!(stream, "{item}")
                .map_err(|error| BatchError::ItemWriter(error.to_string()))?;
        }
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        lock(&self.stream)
            .flush()
            .map_err(|error| BatchError::ItemWriter(error.to_string()))
    }

    fn close(&self) -> ItemWriterResult {
        <Self as ItemWriter<T>>::flush(self)
    }
}
