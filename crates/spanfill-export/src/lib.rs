//! Output sinks for spanfill

pub mod jsonl;
pub mod stdout;

pub use jsonl::{JsonlSink, JsonlSinkConfig};
pub use stdout::StdOutSink;
