// Port Layer - Interfaces for external dependencies

pub mod process_probe;

// Re-exports
pub use process_probe::ProcessProbe;
