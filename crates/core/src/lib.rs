pub mod config;
pub mod error;
pub mod file;

pub use config::Config;
pub use error::*;
pub use file::*;
