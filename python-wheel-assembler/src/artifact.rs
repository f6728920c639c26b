// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Files flowing through the pipeline. */

use {
    crate::{error::SelectionError, module_util::ModuleIdentity},
    once_cell::sync::OnceCell,
    std::path::{Path, PathBuf},
};

/// One file selected from the project tree.
///
/// Content is read from disk on first access and cached.
#[derive(Debug)]
pub struct SourceUnit {
    archive_path: String,
    module: Option<ModuleIdentity>,
    source_path: PathBuf,
    content: OnceCell<Vec<u8>>,
}

impl SourceUnit {
    /// Define a unit backed by a file on disk.
    pub fn new(archive_path: impl ToString, source_path: impl AsRef<Path>) -> Self {
        let archive_path = archive_path.to_string();

        Self {
            module: ModuleIdentity::from_archive_path(&archive_path),
            archive_path,
            source_path: source_path.as_ref().to_path_buf(),
            content: OnceCell::new(),
        }
    }

    /// Define a unit whose content is already in memory.
    pub fn from_memory(archive_path: impl ToString, data: Vec<u8>) -> Self {
        let archive_path = archive_path.to_string();

        Self {
            module: ModuleIdentity::from_archive_path(&archive_path),
            source_path: PathBuf::from(&archive_path),
            archive_path,
            content: OnceCell::with_value(data),
        }
    }

    /// `/` separated path relative to the project root.
    pub fn archive_path(&self) -> &str {
        &self.archive_path
    }

    /// The Python module this file defines, if it is a `.py` file.
    pub fn module(&self) -> Option<&ModuleIdentity> {
        self.module.as_ref()
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Resolve the raw file content.
    pub fn content(&self) -> Result<&[u8], SelectionError> {
        self.content
            .get_or_try_init(|| {
                std::fs::read(&self.source_path).map_err(|e| SelectionError::Io {
                    path: self.source_path.clone(),
                    source: e,
                })
            })
            .map(|data| data.as_slice())
    }
}

/// What role a file plays in the archive.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ArtifactKind {
    Source,
    Bytecode,
    Metadata,
    Manifest,
}

/// A file destined for the archive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackagedArtifact {
    path: String,
    data: Vec<u8>,
    kind: ArtifactKind,
}

impl PackagedArtifact {
    pub fn new(path: impl ToString, data: impl Into<Vec<u8>>, kind: ArtifactKind) -> Self {
        Self {
            path: path.to_string(),
            data: data.into(),
            kind,
        }
    }

    /// `/` separated path of the archive member.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lazy_content() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("main.py");
        std::fs::write(&path, b"print('hi')\n")?;

        let unit = SourceUnit::new("app/main.py", &path);
        assert_eq!(unit.module().map(|m| m.name.as_str()), Some("app.main"));

        // Content is captured on first read.
        assert_eq!(unit.content()?, b"print('hi')\n");
        std::fs::write(&path, b"changed\n")?;
        assert_eq!(unit.content()?, b"print('hi')\n");

        Ok(())
    }

    #[test]
    fn missing_content() {
        let unit = SourceUnit::new("gone.py", "/nonexistent/gone.py");
        assert!(matches!(unit.content(), Err(SelectionError::Io { .. })));
    }

    #[test]
    fn resource_has_no_module() {
        let unit = SourceUnit::from_memory("app/py.typed", vec![]);
        assert!(unit.module().is_none());
    }
}
