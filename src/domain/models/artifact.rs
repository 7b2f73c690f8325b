//! Artifact domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of artifact produced during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Code,
    Document,
    Report,
    Data,
    Summary,
    Other,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Document => "document",
            Self::Report => "report",
            Self::Data => "data",
            Self::Summary => "summary",
            Self::Other => "other",
        }
    }
}

/// A produced output retained with the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique identifier
    pub id: Uuid,
    /// Artifact type
    pub artifact_type: ArtifactType,
    /// Display name
    pub name: String,
    /// Raw content
    pub content: String,
    /// MIME-ish content type (e.g. "text/markdown")
    pub content_type: String,
    /// Monotonically increasing version for same-name artifacts
    pub version: u32,
    /// Task that produced this artifact, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    /// Workspace path this artifact corresponds to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// When created
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        artifact_type: ArtifactType,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            artifact_type,
            name: name.into(),
            content: content.into(),
            content_type: "text/plain".to_string(),
            version: 1,
            task_id: None,
            file_path: None,
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_builder() {
        let task_id = Uuid::new_v4();
        let artifact = Artifact::new(ArtifactType::Summary, "task summary", "did the thing")
            .with_task(task_id)
            .with_content_type("text/markdown");
        assert_eq!(artifact.task_id, Some(task_id));
        assert_eq!(artifact.content_type, "text/markdown");
        assert_eq!(artifact.version, 1);
    }
}
