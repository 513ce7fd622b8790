pub mod check;
pub mod summarize;

pub use check::{probe_backend, run_config_check};
pub use summarize::{run_summarize, summarize_file};
