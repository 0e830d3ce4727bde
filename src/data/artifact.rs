use serde::{Deserialize, Serialize};

/// Whether an artifact replaces an existing file or adds a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    Update,
    Create,
}

/// Which path of the patch cycle produced a batch of artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactOrigin {
    Generated,
    Fallback,
}

/// One candidate output file.
///
/// `path` is repository-relative; it is checked against the repository
/// root before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformationArtifact {
    pub path: String,
    pub content: String,
    pub kind: ArtifactKind,
}

impl TransformationArtifact {
    pub fn update(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            kind: ArtifactKind::Update,
        }
    }

    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            kind: ArtifactKind::Create,
        }
    }

    pub fn is_python(&self) -> bool {
        self.path.ends_with(".py")
    }
}
