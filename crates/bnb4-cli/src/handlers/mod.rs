//! Subcommand handlers.

mod convert;
mod models;
mod setup;

pub use convert::{handle_convert, ConvertArgs};
pub use models::list_models;
pub use setup::{handle_info, handle_setup};
