use std::collections::VecDeque;

use super::metrics::ProcessSample;

const DEFAULT_HISTORY_SIZE: usize = 60;

/// Rolling window of the most recent samples of one monitored process
#[derive(Debug, Clone)]
pub struct SampleHistory {
    capacity: usize,
    samples: VecDeque<ProcessSample>,
}

impl SampleHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a sample, evicting the oldest once full
    pub fn push(&mut self, sample: ProcessSample) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&ProcessSample> {
        self.samples.back()
    }

    pub fn oldest(&self) -> Option<&ProcessSample> {
        self.samples.front()
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &ProcessSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Instantaneous cpu percentages, oldest first (for sparklines)
    pub fn cpu_series(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.cpu.percent_instant).collect()
    }

    /// Resident bytes, oldest first
    pub fn memory_series(&self) -> Vec<u64> {
        self.samples.iter().map(|s| s.memory.resident_bytes).collect()
    }
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self::new()
    }
}
