//! Sandboxing primitives.
//!
//! | Module    | Responsibility                                             |
//! |-----------|------------------------------------------------------------|
//! | `path`    | `PathSandbox`: symlink-safe containment under a root      |
//! | `command` | `CommandSandbox`: allow-list, working dir, hard timeout   |
//! | `files`   | `FileSandbox`: read / write / mkdir / list under a root   |
//!
//! Every operation that accepts a caller-controlled path goes through
//! `PathSandbox::resolve` before touching the filesystem.

pub mod command;
pub mod files;
pub mod path;

pub use command::{CommandOutput, CommandSandbox, DEFAULT_COMMAND_TIMEOUT};
pub use files::{FileEntry, FileSandbox};
pub use path::PathSandbox;
