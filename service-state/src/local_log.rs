use chrono::{DateTime, Utc};
use std::{collections::VecDeque, fmt::Write};

/// Bounded history of human readable events, oldest dropped first.
#[derive(Debug)]
pub struct LocalLog {
    capacity: usize,
    entries: VecDeque<(DateTime<Utc>, String)>,
}

impl LocalLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn log(&mut self, msg: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((Utc::now(), msg.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, m)| m.as_str())
    }

    pub fn dump(&self, out: &mut String) {
        for (ts, msg) in &self.entries {
            let _ = writeln!(out, "  {} - {msg}", ts.format("%m-%d %H:%M:%S%.3f"));
        }
    }
}
