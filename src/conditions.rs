//! The bounded condition history kept in the `status.conditions` of every Kogito custom resource.
//!
//! At most `MAX_CONDITIONS` entries are kept, newest last. Re-asserting `Deployed` or `Provisioning`
//! while it is already the most recent condition is a no-op, so a converged resource does not churn its
//! status on every pass. Failures are always recorded, since the message carries new information.
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

use std::collections::VecDeque;
use std::fmt::{self, Display};

pub const MAX_CONDITIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    Deployed,
    Provisioning,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
}

/// Why a pass failed. Every error produced during reconciliation maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonType {
    ParseCRRequestFailed,
    RetrieveDeployedResourceFailed,
    CreateResourceFailed,
    UpdateResourceFailed,
    TriggerBuildFailed,
    BuildS2IFailed,
    BuildRuntimeFailed,
    DeploymentNotAvailable,
    MissingDependency,
    #[serde(other)]
    UnknownReason,
}

impl Display for ReasonType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub last_transition_time: Time,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Condition {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.last_transition_time.0
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConditionHistory(VecDeque<Condition>);

impl ConditionHistory {
    pub fn new() -> ConditionHistory {
        ConditionHistory(VecDeque::with_capacity(MAX_CONDITIONS))
    }

    /// Records a `Deployed` condition. Returns false if the last condition was already `Deployed`.
    pub fn set_deployed(&mut self) -> bool {
        self.set_deployed_at(Utc::now())
    }

    /// Records a `Provisioning` condition. Returns false if the last condition was already `Provisioning`.
    pub fn set_provisioning(&mut self) -> bool {
        self.set_provisioning_at(Utc::now())
    }

    pub fn set_failed(&mut self, reason: ReasonType, error: &dyn Display) {
        self.set_failed_at(reason, error, Utc::now())
    }

    pub fn set_deployed_at(&mut self, now: DateTime<Utc>) -> bool {
        if self.last_type() == Some(ConditionType::Deployed) {
            return false;
        }
        self.push(ConditionType::Deployed, ConditionStatus::True, None, String::new(), now);
        true
    }

    pub fn set_provisioning_at(&mut self, now: DateTime<Utc>) -> bool {
        if self.last_type() == Some(ConditionType::Provisioning) {
            return false;
        }
        self.push(ConditionType::Provisioning, ConditionStatus::True, None, String::new(), now);
        true
    }

    pub fn set_failed_at(&mut self, reason: ReasonType, error: &dyn Display, now: DateTime<Utc>) {
        self.push(
            ConditionType::Failed,
            ConditionStatus::False,
            Some(reason),
            error.to_string(),
            now,
        );
    }

    pub fn last(&self) -> Option<&Condition> {
        self.0.back()
    }

    pub fn last_type(&self) -> Option<ConditionType> {
        self.last().map(|c| c.type_)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    fn push(
        &mut self,
        type_: ConditionType,
        status: ConditionStatus,
        reason: Option<ReasonType>,
        message: String,
        now: DateTime<Utc>,
    ) {
        // clocks can go backwards between operator restarts, but the history must not
        let timestamp = match self.last() {
            Some(last) if last.timestamp() > now => last.timestamp(),
            _ => now,
        };
        if self.0.len() >= MAX_CONDITIONS {
            self.0.pop_front();
        }
        self.0.push_back(Condition {
            type_,
            status,
            last_transition_time: Time(timestamp),
            reason,
            message,
        });
    }
}

impl Serialize for ConditionHistory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for ConditionHistory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut conditions = Vec::<Condition>::deserialize(deserializer)?;
        if conditions.len() > MAX_CONDITIONS {
            conditions.drain(..conditions.len() - MAX_CONDITIONS);
        }
        Ok(ConditionHistory(conditions.into_iter().collect()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn history_keeps_only_the_newest_five_failures() {
        let mut history = ConditionHistory::new();
        for i in 0..7 {
            history.set_failed(ReasonType::CreateResourceFailed, &format!("failure {}", i));
        }
        let messages = history.iter().map(|c| c.message.as_str()).collect::<Vec<_>>();
        assert_eq!(
            vec!["failure 2", "failure 3", "failure 4", "failure 5", "failure 6"],
            messages
        );
    }

    #[test]
    fn repeated_deployed_condition_is_suppressed() {
        let mut history = ConditionHistory::new();
        assert!(history.set_deployed());
        let first_timestamp = history.last().unwrap().timestamp();
        assert!(!history.set_deployed());
        assert_eq!(1, history.len());
        assert_eq!(first_timestamp, history.last().unwrap().timestamp());

        assert!(history.set_provisioning());
        assert!(!history.set_provisioning());
        assert!(history.set_deployed());
        assert_eq!(3, history.len());
    }

    #[test]
    fn failures_are_never_suppressed() {
        let mut history = ConditionHistory::new();
        history.set_failed(ReasonType::UpdateResourceFailed, &"conflict");
        history.set_failed(ReasonType::UpdateResourceFailed, &"conflict");
        assert_eq!(2, history.len());
        let last = history.last().unwrap();
        assert_eq!(ConditionStatus::False, last.status);
        assert_eq!(Some(ReasonType::UpdateResourceFailed), last.reason);
    }

    #[test]
    fn timestamps_never_decrease() {
        let mut history = ConditionHistory::new();
        let now = Utc::now();
        history.set_provisioning_at(now);
        history.set_deployed_at(now - Duration::minutes(5));
        let timestamps = history.iter().map(Condition::timestamp).collect::<Vec<_>>();
        assert_eq!(vec![now, now], timestamps);
    }

    #[test]
    fn persisted_history_is_truncated_when_read() {
        let conditions = (0..8)
            .map(|i| {
                json!({
                    "type": "Failed",
                    "status": "False",
                    "lastTransitionTime": "2020-05-01T10:00:00Z",
                    "reason": "CreateResourceFailed",
                    "message": format!("failure {}", i),
                })
            })
            .collect::<Vec<_>>();
        let history: ConditionHistory = serde_json::from_value(json!(conditions)).unwrap();
        assert_eq!(MAX_CONDITIONS, history.len());
        assert_eq!("failure 3", history.iter().next().unwrap().message);
        assert_eq!("failure 7", history.last().unwrap().message);
    }

    #[test]
    fn unknown_reasons_deserialize_as_unknown_reason() {
        let condition: Condition = serde_json::from_value(json!({
            "type": "Failed",
            "status": "False",
            "lastTransitionTime": "2020-05-01T10:00:00Z",
            "reason": "SomethingNew",
        }))
        .unwrap();
        assert_eq!(Some(ReasonType::UnknownReason), condition.reason);
    }
}
