pub mod mailbox;
pub mod tracing;

pub use mailbox::*;
pub use tracing::*;
