//! Safe execution of external commands

pub mod guard;
pub mod runner;

pub use runner::{
    DEFAULT_TIMEOUT, OutputChunk, ProcessError, ProcessOptions, ProcessResult, ProcessRunner, StreamingHandle,
    kill_tree,
};
