//! Findings produced by `integrity::IntegrityChecker` (spec §4.8, C11).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    DanglingReference,
    OrphanCheckpoint,
    OrphanFileCommit,
    OutboxStuck,
    MissingBlob,
    StateMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A reference to the entity an issue was found on or points at, named by
/// kind (e.g. `"checkpoint_file_link"`) and id rather than a typed handle,
/// since the scan walks heterogeneous tables.
pub type EntityRef = (String, String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub issue_type: IssueType,
    pub severity: Severity,
    pub source: EntityRef,
    pub target: Option<EntityRef>,
    pub message: String,
    pub suggested_repair: String,
    pub auto_repairable: bool,
}

impl IntegrityIssue {
    pub fn new(
        issue_type: IssueType,
        severity: Severity,
        source: EntityRef,
        message: impl Into<String>,
        suggested_repair: impl Into<String>,
        auto_repairable: bool,
    ) -> Self {
        Self {
            issue_type,
            severity,
            source,
            target: None,
            message: message.into(),
            suggested_repair: suggested_repair.into(),
            auto_repairable,
        }
    }

    pub fn with_target(mut self, target: EntityRef) -> Self {
        self.target = Some(target);
        self
    }
}

/// The result of a single fixed-order scan pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
    pub scanned_at: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl IntegrityReport {
    pub fn critical_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .count()
    }

    pub fn auto_repairable(&self) -> impl Iterator<Item = &IntegrityIssue> {
        self.issues.iter().filter(|i| i.auto_repairable)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
