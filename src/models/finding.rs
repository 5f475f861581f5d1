use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::repo::Repository;

/// One raw finding as reported by the detection engine, before ignore rules
/// are applied. Absent fields in the engine output stay `None`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RawFinding {
    pub repository: Option<String>,
    pub commit: Option<String>,
    pub file: Option<String>,
    pub line: Option<i64>,
    pub email: Option<String>,
    pub detector_type: Option<String>,
    pub description: Option<String>,
    pub value: Option<String>,
}

/// One persisted secret instance, attributed to a commit/file/line of a
/// repository. `validated` is the only field mutated after creation.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Finding {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub repository: String,
    #[serde(rename = "type")]
    pub detector_type: String,
    pub value: String,
    pub description: String,
    pub file: String,
    pub line: Option<i64>,
    pub email: String,
    pub commit_hash: String,
    pub commit_url: Option<String>,
    pub validated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Finding {
    pub fn from_raw(scan_id: Uuid, repo: &Repository, raw: &RawFinding) -> Self {
        let repository = raw
            .repository
            .clone()
            .unwrap_or_else(|| repo.html_url.clone());
        let commit_hash = raw.commit.clone().unwrap_or_default();
        let commit_url = if commit_hash.is_empty() {
            None
        } else {
            Some(format!(
                "{}/commit/{}",
                repository.trim_end_matches(".git"),
                commit_hash
            ))
        };
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            scan_id,
            repository,
            detector_type: raw.detector_type.clone().unwrap_or_default(),
            value: raw.value.clone().unwrap_or_default(),
            description: raw.description.clone().unwrap_or_default(),
            file: raw.file.clone().unwrap_or_default(),
            line: raw.line,
            email: raw.email.clone().unwrap_or_default(),
            commit_hash,
            commit_url,
            validated: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Suppression rule matching a finding's detector type exactly.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IgnoreFindingType {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub value: String,
    pub created_at: DateTime<Utc>,
}

/// Suppression rule matching the domain of a finding's committer email.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IgnoreFindingDomain {
    pub id: Uuid,
    pub domain: String,
    pub created_at: DateTime<Utc>,
}
