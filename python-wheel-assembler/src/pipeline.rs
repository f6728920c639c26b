// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! End to end wheel building.

A run selects files, resolves artifacts and synthesizes metadata (the latter
concurrently with the former two), derives the integrity manifest, then
assembles the archive. Any error aborts the whole run: a wheel is either
complete or not written at all.
*/

use {
    crate::{
        archive::{ArchiveAssembler, ArchiveName},
        artifact::PackagedArtifact,
        bytecode::BytecodeCompiler,
        descriptor::ProjectDescriptor,
        error::{WheelError, WheelWarning},
        metadata::MetadataSynthesizer,
        record::{build_integrity_manifest, IntegrityManifest, IntegrityRecord},
        resolver::ArtifactResolver,
        selection::select_source_units,
        settings::PipelineSettings,
    },
    log::info,
    std::{
        io::{Seek, Write},
        path::PathBuf,
    },
};

/// Everything needed to write a wheel, before any byte is written.
#[derive(Clone, Debug)]
pub struct PreparedWheel {
    pub name: ArchiveName,
    /// Non-manifest members in archive order.
    pub artifacts: Vec<PackagedArtifact>,
    pub manifest: IntegrityManifest,
    pub warnings: Vec<WheelWarning>,
}

/// Outcome of a successful run.
#[derive(Clone, Debug)]
pub struct BuiltWheel {
    /// Path of the published wheel.
    pub path: PathBuf,
    pub name: ArchiveName,
    /// Integrity records, in archive order.
    pub records: Vec<IntegrityRecord>,
    pub warnings: Vec<WheelWarning>,
}

/// Builds a wheel for a project.
pub struct WheelPipeline<'a> {
    descriptor: &'a ProjectDescriptor,
    settings: &'a PipelineSettings,
    compiler: Option<&'a dyn BytecodeCompiler>,
}

impl<'a> WheelPipeline<'a> {
    pub fn new(descriptor: &'a ProjectDescriptor, settings: &'a PipelineSettings) -> Self {
        Self {
            descriptor,
            settings,
            compiler: None,
        }
    }

    /// Set the Python bytecode compiler to use to turn source code into bytecode.
    ///
    /// Required when the descriptor's policy asks for bytecode. If the
    /// compiler reports a cache tag, it replaces the one in the settings.
    pub fn set_bytecode_compiler(&mut self, compiler: &'a dyn BytecodeCompiler) {
        self.compiler = Some(compiler);
    }

    /// The cache tag bytecode is compiled for.
    ///
    /// A compiler that reports its own tag wins over the settings.
    fn cache_tag(&self) -> &str {
        self.compiler
            .and_then(|compiler| compiler.cache_tag())
            .unwrap_or_else(|| self.settings.cache_tag())
    }

    fn resolver(&self) -> ArtifactResolver<'a> {
        let mut resolver =
            ArtifactResolver::new(self.descriptor.bytecode_policy, self.cache_tag());
        resolver.set_optimize_level(self.settings.optimize_level());
        resolver.set_concurrency(self.settings.concurrency());

        if let Some(compiler) = self.compiler {
            resolver.set_compiler(compiler);
        }

        resolver
    }

    fn assembler(&self) -> ArchiveAssembler {
        let mut assembler = ArchiveAssembler::default();
        assembler.set_modified_time(self.settings.modified_time());
        assembler
    }

    /// Produce all archive members and the integrity manifest.
    pub fn prepare(&self) -> Result<PreparedWheel, WheelError> {
        let name = self.descriptor.archive_name();
        info!(
            "building {} from {}",
            name,
            self.descriptor.root.display()
        );

        let synthesizer = MetadataSynthesizer::new(self.settings.generator());

        let (resolved, metadata) = rayon::join(
            || -> Result<_, WheelError> {
                let selection = select_source_units(
                    &self.descriptor.root,
                    &self.descriptor.includes,
                    &self.descriptor.excludes,
                )?;
                let artifacts = self.resolver().resolve(&selection.units)?;

                Ok((artifacts, selection.warnings))
            },
            || synthesizer.synthesize(self.descriptor),
        );

        let (mut artifacts, warnings) = resolved?;
        artifacts.extend(metadata?);

        let manifest = build_integrity_manifest(&artifacts, &self.descriptor.dist_info_path());

        Ok(PreparedWheel {
            name,
            artifacts,
            manifest,
            warnings,
        })
    }

    /// Writes the wheel zip data to a writable destination.
    pub fn write_wheel_data<W: Write + Seek>(&self, writer: W) -> Result<W, WheelError> {
        let prepared = self.prepare()?;

        Ok(self.assembler().write_archive_data(
            &prepared.artifacts,
            &prepared.manifest.artifact,
            writer,
        )?)
    }

    /// Build the wheel and publish it into the configured output directory.
    pub fn run(&self) -> Result<BuiltWheel, WheelError> {
        let prepared = self.prepare()?;

        let path = self.assembler().write_wheel_into_directory(
            self.settings.output_dir(),
            &prepared.name,
            &prepared.artifacts,
            &prepared.manifest.artifact,
        )?;

        Ok(BuiltWheel {
            path,
            name: prepared.name,
            records: prepared.manifest.records,
            warnings: prepared.warnings,
        })
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            artifact::ArtifactKind, descriptor::BytecodePolicy, error::AssemblyError,
            testutil::FakeBytecodeCompiler,
        },
        anyhow::Result,
    };

    #[test]
    fn prepare_orders_members() -> Result<()> {
        let td = tempfile::tempdir()?;
        std::fs::create_dir_all(td.path().join("app"))?;
        std::fs::write(td.path().join("app/main.py"), b"print('hi')\n")?;
        std::fs::write(td.path().join("app/__init__.py"), b"")?;

        let mut descriptor = ProjectDescriptor::new("demo", "1.0", td.path());
        descriptor.bytecode_policy = BytecodePolicy::Both;
        let settings = PipelineSettings::default();
        let compiler = FakeBytecodeCompiler::default();

        let mut pipeline = WheelPipeline::new(&descriptor, &settings);
        pipeline.set_bytecode_compiler(&compiler);

        let prepared = pipeline.prepare()?;

        assert_eq!(prepared.name.as_str(), "demo-1.0-py3-none-any.whl");
        assert_eq!(
            prepared
                .artifacts
                .iter()
                .map(|a| (a.path(), a.kind()))
                .collect::<Vec<_>>(),
            vec![
                ("app/__init__.py", ArtifactKind::Source),
                ("app/__pycache__/__init__.cpython-311.pyc", ArtifactKind::Bytecode),
                ("app/main.py", ArtifactKind::Source),
                ("app/__pycache__/main.cpython-311.pyc", ArtifactKind::Bytecode),
                ("demo-1.0.dist-info/METADATA", ArtifactKind::Metadata),
                ("demo-1.0.dist-info/WHEEL", ArtifactKind::Metadata),
                ("demo-1.0.dist-info/entry_points.txt", ArtifactKind::Metadata),
            ]
        );
        assert_eq!(
            prepared
                .manifest
                .records
                .iter()
                .map(|r| r.path.as_str())
                .collect::<Vec<_>>(),
            prepared
                .artifacts
                .iter()
                .map(|a| a.path())
                .collect::<Vec<_>>()
        );
        assert!(prepared.warnings.is_empty());

        Ok(())
    }

    #[test]
    fn compiler_cache_tag_wins() -> Result<()> {
        let td = tempfile::tempdir()?;
        std::fs::write(td.path().join("main.py"), b"print('hi')\n")?;

        let mut descriptor = ProjectDescriptor::new("demo", "1.0", td.path());
        descriptor.bytecode_policy = BytecodePolicy::BytecodeOnly;
        let mut settings = PipelineSettings::default();
        settings.set_cache_tag("cpython-39");

        let mut pipeline = WheelPipeline::new(&descriptor, &settings);
        let paths = |prepared: &PreparedWheel| {
            prepared
                .artifacts
                .iter()
                .filter(|a| a.kind() == ArtifactKind::Bytecode)
                .map(|a| a.path().to_string())
                .collect::<Vec<_>>()
        };

        let untagged = FakeBytecodeCompiler::default();
        pipeline.set_bytecode_compiler(&untagged);
        assert_eq!(
            paths(&pipeline.prepare()?),
            vec!["__pycache__/main.cpython-39.pyc"]
        );

        let tagged = FakeBytecodeCompiler::default().with_cache_tag("cpython-312");
        pipeline.set_bytecode_compiler(&tagged);
        assert_eq!(
            paths(&pipeline.prepare()?),
            vec!["__pycache__/main.cpython-312.pyc"]
        );

        Ok(())
    }

    #[test]
    fn invalid_metadata_aborts() -> Result<()> {
        let td = tempfile::tempdir()?;
        std::fs::write(td.path().join("main.py"), b"")?;

        let mut descriptor = ProjectDescriptor::new("demo", "1.0", td.path());
        descriptor.dependencies = vec!["attrs\nRequires-Dist: evil-pkg".to_string()];
        let settings = PipelineSettings::default();

        assert!(matches!(
            WheelPipeline::new(&descriptor, &settings).prepare(),
            Err(WheelError::Assembly(AssemblyError::InvalidMetadata { .. }))
        ));

        Ok(())
    }
}
