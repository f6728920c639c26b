// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
Scanning the project tree for files to package.

Selected files are ordered by their `/` separated path relative to the
project root. The order a directory walk happens to produce is never
relied upon.
*/

use {
    crate::{
        artifact::SourceUnit,
        error::{SelectionError, WheelWarning},
    },
    glob::{MatchOptions, Pattern},
    log::{debug, info, warn},
    std::{
        collections::{BTreeMap, HashSet},
        path::{Path, PathBuf},
    },
};

/// Include pattern used when none are given.
pub const DEFAULT_INCLUDE: &str = "**/*.py";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled include and exclude patterns.
#[derive(Clone, Debug)]
pub struct PatternSet {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl PatternSet {
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self, SelectionError> {
        let compile = |kind: &'static str, pattern: &str| {
            Pattern::new(pattern).map_err(|source| SelectionError::Pattern {
                kind,
                pattern: pattern.to_string(),
                source,
            })
        };

        let includes = if includes.is_empty() {
            vec![compile("include", DEFAULT_INCLUDE)?]
        } else {
            includes
                .iter()
                .map(|p| compile("include", p))
                .collect::<Result<Vec<_>, _>>()?
        };

        let excludes = excludes
            .iter()
            .map(|p| compile("exclude", p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { includes, excludes })
    }

    /// Whether a `/` separated relative path is selected.
    ///
    /// Excludes take precedence over includes.
    pub fn matches(&self, path: &str) -> bool {
        if self
            .excludes
            .iter()
            .any(|p| p.matches_with(path, MATCH_OPTIONS))
        {
            return false;
        }

        self.includes
            .iter()
            .any(|p| p.matches_with(path, MATCH_OPTIONS))
    }
}

/// Result of scanning a project tree.
#[derive(Debug)]
pub struct Selection {
    /// Selected files, ordered by archive path.
    pub units: Vec<SourceUnit>,
    pub warnings: Vec<WheelWarning>,
}

fn archive_path(root: &Path, path: &Path) -> Result<String, SelectionError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| SelectionError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?;

    let components = relative
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .ok_or_else(|| SelectionError::NonUtf8Path(path.to_path_buf()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let archive_path = components.join("/");

    // RECORD is line oriented.
    if archive_path.contains(|c: char| c == '\n' || c == '\r') {
        return Err(SelectionError::LineBreakInPath(path.to_path_buf()));
    }

    Ok(archive_path)
}

fn canonicalize(path: &Path) -> Result<PathBuf, SelectionError> {
    path.canonicalize().map_err(|e| SelectionError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn walk_error(root: &Path, err: walkdir::Error) -> SelectionError {
    let path = err
        .path()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| root.to_path_buf());

    if let Some(ancestor) = err.loop_ancestor() {
        return SelectionError::Cycle {
            path,
            ancestor: ancestor.to_path_buf(),
        };
    }

    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "directory walk failed"));

    SelectionError::Io { path, source }
}

/// Find files under `root` to package.
///
/// Symbolic links are followed. Each real directory is entered at most once;
/// a link back to one of its own ancestors is a cycle and an error.
/// `__pycache__` directories and `.pyc` files are never selected.
pub fn select_source_units(
    root: &Path,
    includes: &[String],
    excludes: &[String],
) -> Result<Selection, SelectionError> {
    let patterns = PatternSet::new(includes, excludes)?;

    let metadata = std::fs::metadata(root).map_err(|e| SelectionError::Io {
        path: root.to_path_buf(),
        source: e,
    })?;
    if !metadata.is_dir() {
        return Err(SelectionError::RootNotDirectory(root.to_path_buf()));
    }

    let mut visited_dirs = HashSet::new();
    visited_dirs.insert(canonicalize(root)?);

    let mut units = BTreeMap::new();

    let mut walker = walkdir::WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| walk_error(root, e))?;

        if entry.depth() == 0 {
            continue;
        }

        if entry.file_type().is_dir() {
            if entry.file_name() == "__pycache__" {
                walker.skip_current_dir();
                continue;
            }

            if !visited_dirs.insert(canonicalize(entry.path())?) {
                debug!(
                    "skipping {}: directory already visited through another link",
                    entry.path().display()
                );
                walker.skip_current_dir();
            }

            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }

        let path = archive_path(root, entry.path())?;

        if path.ends_with(".pyc") || !patterns.matches(&path) {
            continue;
        }

        units
            .entry(path.clone())
            .or_insert_with(|| SourceUnit::new(path, entry.path()));
    }

    let units = units.into_values().collect::<Vec<_>>();
    let mut warnings = vec![];

    if units.is_empty() {
        let warning = WheelWarning::EmptySelection {
            root: root.to_path_buf(),
        };
        warn!("{}", warning);
        warnings.push(warning);
    } else {
        info!("selected {} files from {}", units.len(), root.display());
    }

    Ok(Selection { units, warnings })
}
