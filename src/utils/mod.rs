pub mod constants;
pub mod logger;

pub use self::logger::{display_warnings, set_display_text, set_display_warnings, Logger};
