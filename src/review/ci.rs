//! CI check aggregation.

use std::fmt;

use serde::Serialize;

use crate::platform::CheckRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CiState {
    Success,
    Failed,
    Pending,
    NoChecks,
    /// Checks could not be fetched
    Error,
}

impl CiState {
    pub fn emoji(&self) -> &'static str {
        match self {
            CiState::Success => "✅",
            CiState::Failed => "❌",
            CiState::Pending => "⏳",
            CiState::NoChecks => "⚪",
            CiState::Error => "⚠️",
        }
    }
}

impl fmt::Display for CiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CiState::Success => "success",
            CiState::Failed => "failed",
            CiState::Pending => "pending",
            CiState::NoChecks => "no_checks",
            CiState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CiSummary {
    pub state: CiState,
    pub checks: Vec<CheckRun>,
    /// `name: conclusion` for each failed check
    pub failed: Vec<String>,
    pub pending: Vec<String>,
    pub summary: String,
}

impl CiSummary {
    /// Any pending check makes the whole run pending, even if others failed.
    pub fn from_checks(checks: Vec<CheckRun>) -> Self {
        let pending: Vec<String> = checks
            .iter()
            .filter(|c| c.is_pending())
            .map(|c| c.name.clone())
            .collect();
        let failed: Vec<String> = checks
            .iter()
            .filter(|c| !c.is_pending() && !c.is_passing())
            .map(|c| format!("{}: {}", c.name, c.conclusion.as_deref().unwrap_or("unknown")))
            .collect();

        let (state, summary) = if !pending.is_empty() {
            (CiState::Pending, format!("Pending checks: {}", pending.join(", ")))
        } else if !failed.is_empty() {
            (CiState::Failed, format!("Failed checks: {}", failed.join(", ")))
        } else if !checks.is_empty() {
            (CiState::Success, format!("All {} checks passed.", checks.len()))
        } else {
            (
                CiState::NoChecks,
                "No CI checks configured for this repository.".to_string(),
            )
        };

        Self {
            state,
            checks,
            failed,
            pending,
            summary,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            state: CiState::Error,
            checks: Vec::new(),
            failed: Vec::new(),
            pending: Vec::new(),
            summary: format!("Error: {}", message),
        }
    }
}
