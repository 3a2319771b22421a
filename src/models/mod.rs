mod event;
mod project;
mod window;

pub use event::{Event, NewEvent, PAGEVIEW};
pub use project::{PrivacySettings, Project};
pub use window::TimeRange;
