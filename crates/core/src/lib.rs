// Procline Core - Domain Types, Ports & Signal Hub
// NO infrastructure dependencies (hexagonal layout)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{ProcessError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
