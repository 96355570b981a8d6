pub mod machine;
pub mod state;

pub use machine::{ClassificationOutcome, FeedbackStateMachine};
pub use state::{FeedbackSnapshot, FeedbackStatus};
