mod conversation;
mod prompt;
mod types;

pub use conversation::*;
pub use prompt::*;
pub use types::*;
