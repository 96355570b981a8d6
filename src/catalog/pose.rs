use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a pose in the classification model's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoseLabel(String);

impl PoseLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PoseLabel {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for PoseLabel {
    fn from(label: String) -> Self {
        Self(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub url: String,
    pub is_video: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoseMetadata {
    pub label: PoseLabel,
    pub name: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub instructions: Vec<String>,
    pub media: MediaReference,
}
