use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum HistoryError {
    #[error("History capacity must be at least 2, got {0}")]
    CapacityTooSmall(usize),
}

/// Fixed-capacity ring of the most recent samples.
///
/// The ring is pre-filled with an initial value, so [`now`](Self::now) and
/// [`prev`](Self::prev) are defined from the moment it is created.
#[derive(Clone, Debug)]
pub struct HistoryBuffer<T> {
    samples: Vec<T>,
    // index of the most recently written slot
    head: usize,
}

impl<T: Clone> HistoryBuffer<T> {
    pub fn new(capacity: usize, initial: T) -> Result<Self, HistoryError> {
        if capacity < 2 {
            return Err(HistoryError::CapacityTooSmall(capacity));
        }

        Ok(Self {
            samples: vec![initial; capacity],
            head: capacity - 1,
        })
    }

    /// Overwrites the oldest sample.
    pub fn push(&mut self, value: T) {
        self.head = (self.head + 1) % self.samples.len();
        self.samples[self.head] = value;
    }

    pub fn now(&self) -> &T {
        &self.samples[self.head]
    }

    pub fn prev(&self) -> &T {
        let len = self.samples.len();
        &self.samples[(self.head + len - 1) % len]
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let len = self.samples.len();
        (1..=len).map(move |offset| &self.samples[(self.head + offset) % len])
    }
}
