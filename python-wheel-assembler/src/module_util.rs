// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Utility functions related to Python modules. */

use crate::bytecode::BytecodeOptimizationLevel;

/// The Python module defined by a source file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleIdentity {
    /// Fully qualified module name.
    pub name: String,
    /// Whether the file is a package's `__init__.py`.
    pub is_package: bool,
}

impl ModuleIdentity {
    /// Resolve the module defined by a `/` separated archive path.
    ///
    /// Returns `None` for anything that is not a `.py` file.
    pub fn from_archive_path(path: &str) -> Option<Self> {
        let without_suffix = path.strip_suffix(".py")?;

        let mut components = without_suffix.split('/').collect::<Vec<_>>();
        let stem = components.pop()?;

        if stem.is_empty() {
            return None;
        }

        let is_package = stem == "__init__";
        if !is_package {
            components.push(stem);
        }

        if components.is_empty() {
            return None;
        }

        Some(Self {
            name: itertools::join(components, "."),
            is_package,
        })
    }
}

/// Compute the PEP 3147 bytecode path for a source archive path.
///
/// `app/main.py` becomes `app/__pycache__/main.<cache_tag>.pyc`, with an
/// `.opt-N` marker for optimization levels above zero.
pub fn bytecode_path_for_source(
    source_path: &str,
    cache_tag: &str,
    optimize: BytecodeOptimizationLevel,
) -> String {
    let bytecode_tag = match optimize {
        BytecodeOptimizationLevel::Zero => cache_tag.to_string(),
        BytecodeOptimizationLevel::One => format!("{}.opt-1", cache_tag),
        BytecodeOptimizationLevel::Two => format!("{}.opt-2", cache_tag),
    };

    let (parent, file_name) = match source_path.rfind('/') {
        Some(idx) => (&source_path[0..=idx], &source_path[idx + 1..]),
        None => ("", source_path),
    };
    let stem = file_name.strip_suffix(".py").unwrap_or(file_name);

    format!("{}__pycache__/{}.{}.pyc", parent, stem, bytecode_tag)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn module_names() {
        assert_eq!(
            ModuleIdentity::from_archive_path("app/main.py"),
            Some(ModuleIdentity {
                name: "app.main".to_string(),
                is_package: false
            })
        );
        assert_eq!(
            ModuleIdentity::from_archive_path("app/sub/__init__.py"),
            Some(ModuleIdentity {
                name: "app.sub".to_string(),
                is_package: true
            })
        );
        assert_eq!(
            ModuleIdentity::from_archive_path("setup.py").map(|m| m.name),
            Some("setup".to_string())
        );
        assert_eq!(ModuleIdentity::from_archive_path("__init__.py"), None);
        assert_eq!(ModuleIdentity::from_archive_path("app/data.json"), None);
        assert_eq!(ModuleIdentity::from_archive_path("app/.py"), None);
    }

    #[test]
    fn bytecode_paths() {
        assert_eq!(
            bytecode_path_for_source("app/main.py", "cpython-311", BytecodeOptimizationLevel::Zero),
            "app/__pycache__/main.cpython-311.pyc"
        );
        assert_eq!(
            bytecode_path_for_source("app/__init__.py", "cpython-311", BytecodeOptimizationLevel::Two),
            "app/__pycache__/__init__.cpython-311.opt-2.pyc"
        );
        assert_eq!(
            bytecode_path_for_source("top.py", "cpython-39", BytecodeOptimizationLevel::One),
            "__pycache__/top.cpython-39.opt-1.pyc"
        );
    }
}
