use crate::error::{Error, Result};
use crate::message::Record;

/// Holds the records of the batch being built and tells the coordinator when it is full.
#[derive(Debug)]
pub(crate) struct BatchAccumulator {
    records: Vec<Record>,
    max_size: usize,
}

impl BatchAccumulator {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            records: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// Appends a record and returns whether the batch reached its maximum size. A full batch has
    /// to be cleared before anything else can be appended.
    pub(crate) fn append(&mut self, record: Record) -> Result<bool> {
        if self.is_full() {
            return Err(Error::Batch(format!(
                "batch already holds {} records and was not flushed",
                self.records.len()
            )));
        }
        self.records.push(record);
        Ok(self.is_full())
    }

    pub(crate) fn records(&self) -> &[Record] {
        &self.records
    }

    /// Drops the current batch, flushed or not.
    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn is_full(&self) -> bool {
        self.records.len() >= self.max_size
    }
}
