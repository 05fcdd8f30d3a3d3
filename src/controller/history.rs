//! Attempt records and the bounded feedback window.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptVerdict {
    Accepted { warnings: Vec<String> },
    Rejected { diagnostics: String },
}

impl AttemptVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// One generate-and-validate round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// 1-based
    pub index: u32,
    pub prompt: String,
    /// Raw service output; empty when the call itself failed
    pub response: String,
    pub verdict: AttemptVerdict,
    pub timestamp: DateTime<Utc>,
}

impl AttemptRecord {
    /// Why this attempt was rejected, if it was.
    pub fn diagnostics(&self) -> Option<&str> {
        match &self.verdict {
            AttemptVerdict::Rejected { diagnostics } => Some(diagnostics),
            AttemptVerdict::Accepted { .. } => None,
        }
    }
}

/// The last `capacity` attempts, oldest first.
#[derive(Debug, Clone)]
pub struct FeedbackHistory {
    records: VecDeque<AttemptRecord>,
    capacity: usize,
}

impl FeedbackHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `record`, evicting the oldest entry when full.
    pub fn push(&mut self, record: AttemptRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttemptRecord> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rejected(index: u32) -> AttemptRecord {
        AttemptRecord {
            index,
            prompt: format!("prompt {index}"),
            response: String::new(),
            verdict: AttemptVerdict::Rejected {
                diagnostics: format!("failure {index}"),
            },
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, index).unwrap(),
        }
    }

    #[test]
    fn test_never_exceeds_capacity_and_evicts_oldest() {
        let mut history = FeedbackHistory::new(3);
        for i in 1..=5 {
            history.push(rejected(i));
            assert!(history.len() <= 3);
        }
        let kept: Vec<u32> = history.iter().map(|r| r.index).collect();
        assert_eq!(kept, vec![3, 4, 5]);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut history = FeedbackHistory::new(0);
        history.push(rejected(1));
        assert!(history.is_empty());
    }

    #[test]
    fn test_diagnostics_accessor() {
        assert_eq!(rejected(2).diagnostics(), Some("failure 2"));
        let accepted = AttemptRecord {
            verdict: AttemptVerdict::Accepted { warnings: vec![] },
            ..rejected(1)
        };
        assert!(accepted.diagnostics().is_none());
        assert!(accepted.verdict.is_accepted());
    }

    #[test]
    fn test_record_serializes_with_status_tag() {
        let json = serde_json::to_value(rejected(1)).unwrap();
        assert_eq!(json["verdict"]["status"], "rejected");
        assert_eq!(json["index"], 1);
    }
}
