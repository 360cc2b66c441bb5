//! Storage-facing stages that sit at the bottom of a streaming stack.

pub mod file_reader;

pub use file_reader::FileReadStage;
