//! Capacity-checked batch buffer
//!
//! Records accumulate in source order until the buffer holds `capacity` of
//! them; the push that fills it hands the full [`Batch`] back to the caller.
//! The buffer never grows past its capacity.

use super::record::CustomerRecord;

/// A run of consecutive records submitted to the store as one unit
#[derive(Debug, Clone)]
pub struct Batch {
    /// 1-based position of this batch in the file
    pub sequence: u64,
    /// First and last 1-based source lines covered
    pub first_line: usize,
    pub last_line: usize,
    pub records: Vec<CustomerRecord>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug)]
pub struct BatchBuffer {
    capacity: usize,
    records: Vec<CustomerRecord>,
    first_line: usize,
    last_line: usize,
    next_sequence: u64,
}

impl BatchBuffer {
    /// Buffer holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Vec::with_capacity(capacity),
            first_line: 0,
            last_line: 0,
            next_sequence: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a record read from `line`. Returns the batch once full.
    pub fn push(&mut self, line: usize, record: CustomerRecord) -> Option<Batch> {
        if self.records.is_empty() {
            self.first_line = line;
        }
        self.last_line = line;
        self.records.push(record);

        if self.records.len() >= self.capacity {
            self.take()
        } else {
            None
        }
    }

    /// Drain whatever is buffered, if anything.
    pub fn flush(&mut self) -> Option<Batch> {
        self.take()
    }

    fn take(&mut self) -> Option<Batch> {
        if self.records.is_empty() {
            return None;
        }

        let records = std::mem::replace(&mut self.records, Vec::with_capacity(self.capacity));
        let batch = Batch {
            sequence: self.next_sequence,
            first_line: self.first_line,
            last_line: self.last_line,
            records,
        };
        self.next_sequence += 1;
        Some(batch)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(cpf: &str) -> CustomerRecord {
        CustomerRecord {
            cpf: cpf.to_string(),
            private: false,
            incomplete: false,
            last_purchase_date: None,
            average_ticket: None,
            last_ticket: None,
            most_frequent_store: None,
            last_store: None,
        }
    }

    #[test]
    fn test_push_returns_batch_at_capacity() {
        let mut buffer = BatchBuffer::new(2);

        assert!(buffer.push(2, record("a")).is_none());
        let batch = buffer.push(3, record("b")).unwrap();

        assert_eq!(batch.sequence, 1);
        assert_eq!((batch.first_line, batch.last_line), (2, 3));
        assert_eq!(
            batch.records.iter().map(|r| r.cpf.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_flush_drains_partial_batch() {
        let mut buffer = BatchBuffer::new(10);
        assert!(buffer.flush().is_none());

        buffer.push(2, record("a"));
        buffer.push(5, record("b"));
        let batch = buffer.flush().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!((batch.first_line, batch.last_line), (2, 5));
        assert!(buffer.flush().is_none());
    }

    #[test]
    fn test_sequence_increments() {
        let mut buffer = BatchBuffer::new(1);
        let first = buffer.push(2, record("a")).unwrap();
        let second = buffer.push(3, record("b")).unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = BatchBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
    }
}
