// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Serializing wheel zip archives.

Archive bytes are a function of the artifacts alone:

* members appear in exactly the order handed in, with `RECORD` last;
* every member carries the same modification time (1980-01-01T00:00:00
  unless configured otherwise) and `0o644` permissions;
* members are Deflate compressed at level [COMPRESSION_LEVEL].

Wheels are written to a temporary file next to their destination and
renamed into place once complete, so a failed run never leaves a partial
archive behind.
*/

use {
    crate::{
        artifact::{ArtifactKind, PackagedArtifact},
        descriptor::ProjectDescriptor,
        error::AssemblyError,
    },
    log::info,
    once_cell::sync::Lazy,
    std::{
        collections::HashSet,
        io::{Seek, Write},
        path::{Path, PathBuf},
    },
    zip::CompressionMethod,
};

/// Deflate level used for every archive member.
pub const COMPRESSION_LEVEL: i32 = 6;

/// Modification time written for archive members by default.
///
/// This is the earliest time a zip archive can represent.
pub const DEFAULT_MODIFIED_TIME: time::OffsetDateTime = time::macros::datetime!(1980-01-01 0:00 UTC);

/// Wheel filename component escape regular expression.
static RE_FILENAME_ESCAPE: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"[^\w\d.]+").unwrap());

/// Escape a wheel file name component.
pub fn escape_component(s: &str) -> String {
    RE_FILENAME_ESCAPE.replace_all(s, "_").to_string()
}

/// The file name of a wheel.
///
/// The file name of a wheel is of the form
/// `{distribution}-{version}(-{build tag})?-{python tag}-{abi tag}-{platform tag}.whl`,
/// per PEP 427. Each component is escaped with a regular expression.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ArchiveName(String);

impl ArchiveName {
    pub fn from_descriptor(descriptor: &ProjectDescriptor) -> Self {
        let mut parts = vec![descriptor.normalized_name(), escape_component(&descriptor.version)];

        if let Some(v) = &descriptor.build_tag {
            parts.push(escape_component(v));
        }

        parts.push(escape_component(&descriptor.tag.python));
        parts.push(escape_component(&descriptor.tag.abi));
        parts.push(escape_component(&descriptor.tag.platform));

        Self(format!("{}.whl", parts.join("-")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Writes artifacts into wheel zip archives.
#[derive(Clone, Debug)]
pub struct ArchiveAssembler {
    modified_time: time::OffsetDateTime,
}

impl Default for ArchiveAssembler {
    fn default() -> Self {
        Self {
            modified_time: DEFAULT_MODIFIED_TIME,
        }
    }
}

impl ArchiveAssembler {
    /// Obtain the modified time for files in the wheel archive.
    pub fn modified_time(&self) -> time::OffsetDateTime {
        self.modified_time
    }

    /// Set the modified time for files in the wheel archive.
    pub fn set_modified_time(&mut self, v: time::OffsetDateTime) {
        self.modified_time = v;
    }

    fn zip_time(&self) -> Result<zip::DateTime, AssemblyError> {
        let t = self.modified_time.to_offset(time::UtcOffset::UTC);

        let year = u16::try_from(t.year()).map_err(|_| AssemblyError::Timestamp(t))?;

        zip::DateTime::from_date_and_time(
            year,
            t.month() as u8,
            t.day(),
            t.hour(),
            t.minute(),
            t.second(),
        )
        .map_err(|_| AssemblyError::Timestamp(t))
    }

    /// Writes the contents of a wheel to a writable destination.
    ///
    /// `artifacts` are written in the order given, followed by `manifest`.
    pub fn write_archive_data<W: Write + Seek>(
        &self,
        artifacts: &[PackagedArtifact],
        manifest: &PackagedArtifact,
        writer: W,
    ) -> Result<W, AssemblyError> {
        if manifest.kind() != ArtifactKind::Manifest {
            return Err(AssemblyError::NotAManifest(manifest.path().to_string()));
        }

        let mut seen = HashSet::new();
        for artifact in artifacts.iter().chain(std::iter::once(manifest)) {
            if artifact.path().contains(|c: char| c == '\n' || c == '\r') {
                return Err(AssemblyError::InvalidPath(artifact.path().to_string()));
            }
            if !seen.insert(artifact.path()) {
                return Err(AssemblyError::DuplicatePath(artifact.path().to_string()));
            }
        }

        let options = zip::write::FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(COMPRESSION_LEVEL))
            .unix_permissions(0o644)
            .last_modified_time(self.zip_time()?);

        let mut zf = zip::ZipWriter::new(writer);

        for artifact in artifacts.iter().chain(std::iter::once(manifest)) {
            let zip_error = |source| AssemblyError::Zip {
                entry: artifact.path().to_string(),
                source,
            };

            zf.start_file(artifact.path(), options).map_err(zip_error)?;
            zf.write_all(artifact.data())
                .map_err(|e| zip_error(zip::result::ZipError::Io(e)))?;
        }

        zf.finish().map_err(|source| AssemblyError::Zip {
            entry: manifest.path().to_string(),
            source,
        })
    }

    /// Write a wheel into `directory`, creating the directory if needed.
    ///
    /// Returns the path of the written wheel file on success.
    ///
    /// Content goes to a temporary file in `directory` which is renamed to
    /// its final name only after everything was written and synced. On
    /// failure the temporary file is removed and the destination is left
    /// untouched.
    pub fn write_wheel_into_directory(
        &self,
        directory: &Path,
        name: &ArchiveName,
        artifacts: &[PackagedArtifact],
        manifest: &PackagedArtifact,
    ) -> Result<PathBuf, AssemblyError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| AssemblyError::Io { path, source }
        };

        std::fs::create_dir_all(directory).map_err(io_error(directory))?;

        let path = directory.join(name.as_str());

        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(".tmp")
            .tempfile_in(directory)
            .map_err(io_error(directory))?;

        let mut file = self.write_archive_data(artifacts, manifest, temp)?;
        file.flush().map_err(io_error(&path))?;
        file.as_file().sync_all().map_err(io_error(&path))?;

        file.persist(&path)
            .map_err(|e| AssemblyError::Io {
                path: path.clone(),
                source: e.error,
            })?;

        info!("wrote {}", path.display());

        Ok(path)
    }
}
