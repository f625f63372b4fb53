//! Filesystem helpers for config loading, minidumps and auto-update logs

pub mod dir;
pub mod file;

pub use dir::Dir;
pub use file::File;
