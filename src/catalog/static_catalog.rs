use indexmap::IndexMap;

use super::pose::{Difficulty, MediaReference, PoseLabel, PoseMetadata};
use super::PoseCatalog;

/// Read-only catalog backed by an insertion-ordered map.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    poses: IndexMap<PoseLabel, PoseMetadata>,
}

impl StaticCatalog {
    pub fn new(poses: impl IntoIterator<Item = PoseMetadata>) -> Self {
        Self {
            poses: poses
                .into_iter()
                .map(|pose| (pose.label.clone(), pose))
                .collect(),
        }
    }

    /// Parses a JSON array of pose entries.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let poses: Vec<PoseMetadata> = serde_json::from_str(json)?;
        Ok(Self::new(poses))
    }

    /// The five poses the bundled model vocabulary knows about.
    pub fn builtin() -> Self {
        Self::new([
            pose(
                "downdog",
                "A pose that stretches and strengthens the entire body",
                Difficulty::Beginner,
                &[
                    "Start on hands and knees",
                    "Lift your knees off the floor",
                    "Straighten your legs and arms",
                    "Push your heels toward the ground",
                    "Keep your head between your arms",
                ],
            ),
            pose(
                "goddess",
                "A powerful standing pose that opens the hips",
                Difficulty::Intermediate,
                &[
                    "Step feet wide apart",
                    "Turn toes out 45 degrees",
                    "Bend knees over ankles",
                    "Raise arms to shoulder height",
                    "Keep spine straight",
                ],
            ),
            pose(
                "plank",
                "A core strengthening pose that builds stability",
                Difficulty::Beginner,
                &[
                    "Start in push-up position",
                    "Keep body in straight line",
                    "Engage core muscles",
                    "Keep shoulders over wrists",
                    "Look slightly forward",
                ],
            ),
            pose(
                "tree",
                "A balancing pose that improves focus and stability",
                Difficulty::Beginner,
                &[
                    "Stand on one leg",
                    "Place other foot on inner thigh or calf",
                    "Never place foot on knee",
                    "Bring hands to heart center",
                    "Fix gaze on steady point",
                ],
            ),
            pose(
                "warrior2",
                "A standing pose that builds strength and stability",
                Difficulty::Beginner,
                &[
                    "Step feet wide apart",
                    "Turn front foot out 90 degrees",
                    "Bend front knee over ankle",
                    "Extend arms parallel to ground",
                    "Gaze over front hand",
                ],
            ),
        ])
    }
}

fn pose(
    label: &str,
    description: &str,
    difficulty: Difficulty,
    instructions: &[&str],
) -> PoseMetadata {
    PoseMetadata {
        label: PoseLabel::new(label),
        name: label.to_string(),
        description: description.to_string(),
        difficulty,
        instructions: instructions.iter().map(|s| s.to_string()).collect(),
        media: MediaReference {
            url: format!("{}-preview", label),
            is_video: false,
        },
    }
}

impl PoseCatalog for StaticCatalog {
    fn lookup(&self, label: &PoseLabel) -> Option<&PoseMetadata> {
        self.poses.get(label)
    }

    fn labels(&self) -> Vec<PoseLabel> {
        self.poses.keys().cloned().collect()
    }
}
