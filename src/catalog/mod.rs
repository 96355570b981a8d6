mod pose;
mod static_catalog;

pub use pose::{Difficulty, MediaReference, PoseLabel, PoseMetadata};
pub use static_catalog::StaticCatalog;

/// Read-only view over the pose catalog.
pub trait PoseCatalog: Send + Sync {
    fn lookup(&self, label: &PoseLabel) -> Option<&PoseMetadata>;
    fn labels(&self) -> Vec<PoseLabel>;

    fn contains(&self, label: &PoseLabel) -> bool {
        self.lookup(label).is_some()
    }
}
