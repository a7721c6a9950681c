//! Verification records persisted onto contexts

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Verification state of one target
///
/// `Unverified -> Verifying -> {Verified, Failed}`. Only the terminal states
/// are ever persisted; `Verifying` exists while a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyState {
    Unverified,
    Verifying,
    Verified,
    Failed,
}

impl VerifyState {
    /// Check whether moving to `next` is a legal transition
    pub fn can_transition_to(self, next: VerifyState) -> bool {
        matches!(
            (self, next),
            (Self::Unverified | Self::Verified | Self::Failed, Self::Verifying)
                | (Self::Verifying, Self::Verified | Self::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Failed)
    }
}

impl fmt::Display for VerifyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unverified => "unverified",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
            Self::Failed => "failed",
        })
    }
}

/// Why a target failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    pub message: String,
}

/// One artifact written during the last verify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Descriptor id (e.g. `apache.vhost`)
    pub id: String,
    pub path: PathBuf,
    #[serde(with = "octal")]
    pub mode: u32,
    /// blake3 hash of the written content
    pub digest: String,
}

/// Last recorded verification of a context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub state: VerifyState,
    pub verified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactRecord>,
}

/// Hex blake3 digest of artifact content
pub fn digest(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// File modes are stored as octal strings ("0440"), not decimal integers
pub(crate) mod octal {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(mode: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:04o}", mode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let raw = String::deserialize(deserializer)?;
        u32::from_str_radix(raw.trim_start_matches("0o"), 8).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_transitions() {
        assert!(VerifyState::Unverified.can_transition_to(VerifyState::Verifying));
        assert!(VerifyState::Verifying.can_transition_to(VerifyState::Verified));
        assert!(VerifyState::Verifying.can_transition_to(VerifyState::Failed));
        assert!(VerifyState::Failed.can_transition_to(VerifyState::Verifying));
        assert!(!VerifyState::Unverified.can_transition_to(VerifyState::Verified));
        assert!(!VerifyState::Verified.can_transition_to(VerifyState::Failed));
    }

    #[test]
    fn test_artifact_mode_is_octal_in_yaml() {
        let record = ArtifactRecord {
            id: "drupal.services".into(),
            path: PathBuf::from("/var/aegir/platforms/d10/sites/example.com/services.yml"),
            mode: 0o440,
            digest: digest("parameters: {}\n"),
        };
        let yaml = serde_yaml::to_string(&record).unwrap();
        assert!(yaml.contains("0440"), "{yaml}");

        let back: ArtifactRecord = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(digest("a"), digest("a"));
        assert_ne!(digest("a"), digest("b"));
        assert_eq!(digest("").len(), 64);
    }
}
