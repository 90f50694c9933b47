mod clipboard;
mod config;
mod history;

pub use clipboard::*;
pub use config::*;
pub use history::*;
