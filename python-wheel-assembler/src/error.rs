// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {
    crate::bytecode::CompileFailure,
    std::path::PathBuf,
    thiserror::Error,
};

/// Failure to walk or read the project tree.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("project root {0} is not a directory")]
    RootNotDirectory(PathBuf),

    #[error("invalid {kind} pattern {pattern:?}: {source}")]
    Pattern {
        kind: &'static str,
        pattern: String,
        source: glob::PatternError,
    },

    #[error("symbolic link cycle at {path}: loops back to {ancestor}")]
    Cycle { path: PathBuf, ancestor: PathBuf },

    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    #[error("path contains a line break: {0:?}")]
    LineBreakInPath(PathBuf),

    #[error("{path} is not under project root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The bytecode compiler rejected a module.
#[derive(Debug, Error)]
#[error("failed to compile module {module} ({}): {failure}", .path.display())]
pub struct CompilationError {
    /// Fully qualified name of the offending module.
    pub module: String,
    /// Filesystem path the module source was read from.
    pub path: PathBuf,
    /// What the compiler reported.
    pub failure: CompileFailure,
}

/// Failure to serialize or publish the archive.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("archive path {0} is produced more than once")]
    DuplicatePath(String),

    #[error("{field} cannot be written to wheel metadata: {value:?}")]
    InvalidMetadata { field: &'static str, value: String },

    #[error("archive path {0:?} contains a line break")]
    InvalidPath(String),

    #[error("archive member {0} is not an integrity manifest")]
    NotAManifest(String),

    #[error("timestamp {0} cannot be represented in a zip archive")]
    Timestamp(time::OffsetDateTime),

    #[error("zip error writing {entry}: {source}")]
    Zip {
        entry: String,
        source: zip::result::ZipError,
    },

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Terminal error of a pipeline run.
///
/// A run either produces a complete archive or fails with exactly one of
/// these.
#[derive(Debug, Error)]
pub enum WheelError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Compilation(#[from] CompilationError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

/// Non-fatal conditions reported alongside a successful run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WheelWarning {
    /// No file under the project root matched the selection patterns.
    EmptySelection { root: PathBuf },
}

impl std::fmt::Display for WheelWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySelection { root } => {
                write!(f, "no files selected under {}", root.display())
            }
        }
    }
}
