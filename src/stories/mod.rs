//! Story feed, reactions and comments on top of the list layer.

pub mod api;
pub mod engagement;
pub mod reporting;
pub mod types;

pub use api::StoryApi;
pub use engagement::{Engagement, MutationOutcome, Optimistic};
pub use reporting::ListErrorReporter;
pub use types::{Comment, NewStory, Reaction, Story};
