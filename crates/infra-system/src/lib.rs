// Procline Infrastructure - System Adapters
// Implements: StreamingProcess (tokio process), ProcessProbe (sysinfo)

pub mod line_stream;
pub mod process_probe_impl;
pub mod standard_input;
pub mod streaming_process;

pub use line_stream::LineStream;
pub use process_probe_impl::SysinfoProcessProbe;
pub use standard_input::StandardInput;
pub use streaming_process::StreamingProcess;
