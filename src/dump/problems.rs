// ABOUTME: Run-length deduplicated log of row-level import problems
// ABOUTME: Collapses identical consecutive messages into one entry with a repeat count

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub message: String,
    pub count: u64,
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count > 1 {
            write!(f, "{} ({} times)", self.message, self.count)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// Problems recorded while importing one table.
///
/// A bulk import against a bad target tends to fail every row for the same
/// reason; consecutive identical messages are folded into one entry.
#[derive(Debug, Default)]
pub struct ProblemLog {
    last_message: Option<String>,
    repeat_count: u64,
    entries: Vec<Problem>,
    total: u64,
}

impl ProblemLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.total += 1;
        if self.last_message.as_deref() == Some(message.as_str()) {
            self.repeat_count += 1;
            return;
        }
        self.flush();
        self.last_message = Some(message);
        self.repeat_count = 1;
    }

    /// Move the pending run into the entry list
    pub fn flush(&mut self) {
        if let Some(message) = self.last_message.take() {
            let problem = Problem {
                message,
                count: self.repeat_count,
            };
            tracing::warn!("⚠ {}", problem);
            self.entries.push(problem);
            self.repeat_count = 0;
        }
    }

    /// Rows that failed, counting repeats
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Flush and take the collected entries, leaving the log empty
    pub fn take_entries(&mut self) -> Vec<Problem> {
        self.flush();
        self.total = 0;
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_duplicates_are_folded() {
        let mut log = ProblemLog::new();
        log.record("duplicate key");
        log.record("duplicate key");
        log.record("duplicate key");
        log.record("value too long");
        log.record("duplicate key");
        assert_eq!(log.total(), 5);

        let entries = log.take_entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].to_string(), "duplicate key (3 times)");
        assert_eq!(entries[1].to_string(), "value too long");
        assert_eq!(entries[2].count, 1);
        assert_eq!(log.total(), 0);
        assert!(log.take_entries().is_empty());
    }
}
