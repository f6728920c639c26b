// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Turning selected files into archive members.

Each [SourceUnit] yields up to two [PackagedArtifact]s depending on the
[BytecodePolicy]: its raw source, and its compiled bytecode at the PEP 3147
`__pycache__` location. Files that are not Python modules are carried
verbatim.

Compilation runs on a bounded thread pool. Outputs are keyed by the unit's
index in the selection and emitted in that order, so completion order
never leaks into the archive.
*/

use {
    crate::{
        artifact::{ArtifactKind, PackagedArtifact, SourceUnit},
        bytecode::{BytecodeCompiler, BytecodeOptimizationLevel, CompileFailure, CompileRequest},
        descriptor::BytecodePolicy,
        error::{CompilationError, WheelError},
        module_util::bytecode_path_for_source,
    },
    log::{debug, info, warn},
    rayon::prelude::*,
    std::sync::atomic::{AtomicUsize, Ordering},
};

/// Applies a [BytecodePolicy] to selected files.
pub struct ArtifactResolver<'a> {
    policy: BytecodePolicy,
    compiler: Option<&'a dyn BytecodeCompiler>,
    cache_tag: String,
    optimize_level: BytecodeOptimizationLevel,
    concurrency: usize,
}

impl<'a> ArtifactResolver<'a> {
    pub fn new(policy: BytecodePolicy, cache_tag: impl ToString) -> Self {
        Self {
            policy,
            compiler: None,
            cache_tag: cache_tag.to_string(),
            optimize_level: BytecodeOptimizationLevel::Zero,
            concurrency: 1,
        }
    }

    /// Set the compiler used when the policy calls for bytecode.
    pub fn set_compiler(&mut self, compiler: &'a dyn BytecodeCompiler) {
        self.compiler = Some(compiler);
    }

    pub fn set_optimize_level(&mut self, v: BytecodeOptimizationLevel) {
        self.optimize_level = v;
    }

    /// Set the maximum number of files processed at once.
    pub fn set_concurrency(&mut self, v: usize) {
        self.concurrency = v.max(1);
    }

    fn resolve_unit(&self, unit: &SourceUnit) -> Result<Vec<PackagedArtifact>, WheelError> {
        let source = unit.content()?;

        let module = match unit.module() {
            Some(module) => module,
            None => {
                return Ok(vec![PackagedArtifact::new(
                    unit.archive_path(),
                    source,
                    ArtifactKind::Source,
                )]);
            }
        };

        let mut artifacts = Vec::with_capacity(2);

        if self.policy.emits_source() {
            artifacts.push(PackagedArtifact::new(
                unit.archive_path(),
                source,
                ArtifactKind::Source,
            ));
        }

        if self.policy.emits_bytecode() {
            let compiler = self.compiler.ok_or_else(|| CompilationError {
                module: module.name.clone(),
                path: unit.source_path().to_path_buf(),
                failure: CompileFailure::new("no bytecode compiler configured"),
            })?;

            debug!("compiling {}", module.name);

            let bytecode = compiler
                .compile(&CompileRequest {
                    source,
                    module: &module.name,
                    filename: unit.archive_path(),
                    target: &self.cache_tag,
                    optimize: self.optimize_level,
                })
                .map_err(|failure| CompilationError {
                    module: module.name.clone(),
                    path: unit.source_path().to_path_buf(),
                    failure,
                })?;

            artifacts.push(PackagedArtifact::new(
                bytecode_path_for_source(unit.archive_path(), &self.cache_tag, self.optimize_level),
                bytecode,
                ArtifactKind::Bytecode,
            ));
        }

        Ok(artifacts)
    }

    /// Resolve artifacts for units, preserving unit order.
    ///
    /// When several units fail, the error of the first one in selection
    /// order is returned. Units after a known failure are not started;
    /// units already in flight finish and their output is discarded.
    pub fn resolve(&self, units: &[SourceUnit]) -> Result<Vec<PackagedArtifact>, WheelError> {
        info!(
            "resolving {} files with policy {} ({} workers)",
            units.len(),
            self.policy,
            self.concurrency
        );

        let first_failure = AtomicUsize::new(usize::MAX);

        let work = |(index, unit): (usize, &SourceUnit)| {
            if index > first_failure.load(Ordering::SeqCst) {
                return (index, None);
            }

            let res = self.resolve_unit(unit);
            if res.is_err() {
                first_failure.fetch_min(index, Ordering::SeqCst);
            }

            (index, Some(res))
        };

        let mut results = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("wheel-resolve-{}", i))
            .build()
        {
            Ok(pool) => pool.install(|| units.par_iter().enumerate().map(work).collect::<Vec<_>>()),
            Err(e) => {
                warn!("unable to start worker pool ({}); resolving serially", e);
                units.iter().enumerate().map(work).collect::<Vec<_>>()
            }
        };

        results.sort_by_key(|(index, _)| *index);

        let mut artifacts = Vec::with_capacity(units.len());

        for (_, res) in results {
            match res {
                Some(Ok(unit_artifacts)) => artifacts.extend(unit_artifacts),
                Some(Err(e)) => return Err(e),
                // Skipped only after an earlier unit failed, so that error is
                // returned before we get here.
                None => {}
            }
        }

        Ok(artifacts)
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::testutil::{FailingBytecodeCompiler, FakeBytecodeCompiler},
        anyhow::Result,
    };

    fn units() -> Vec<SourceUnit> {
        vec![
            SourceUnit::from_memory("app/__init__.py", b"".to_vec()),
            SourceUnit::from_memory("app/data.json", b"{}".to_vec()),
            SourceUnit::from_memory("app/main.py", b"print('hi')\n".to_vec()),
        ]
    }

    fn summary(artifacts: &[PackagedArtifact]) -> Vec<(&str, ArtifactKind)> {
        artifacts.iter().map(|a| (a.path(), a.kind())).collect()
    }

    #[test]
    fn source_only() -> Result<()> {
        let resolver = ArtifactResolver::new(BytecodePolicy::SourceOnly, "cpython-311");
        let artifacts = resolver.resolve(&units())?;

        assert_eq!(
            summary(&artifacts),
            vec![
                ("app/__init__.py", ArtifactKind::Source),
                ("app/data.json", ArtifactKind::Source),
                ("app/main.py", ArtifactKind::Source),
            ]
        );
        assert_eq!(artifacts[2].data(), b"print('hi')\n");

        Ok(())
    }

    #[test]
    fn both() -> Result<()> {
        let compiler = FakeBytecodeCompiler::default();
        let mut resolver = ArtifactResolver::new(BytecodePolicy::Both, "cpython-311");
        resolver.set_compiler(&compiler);
        resolver.set_concurrency(4);

        let artifacts = resolver.resolve(&units())?;

        assert_eq!(
            summary(&artifacts),
            vec![
                ("app/__init__.py", ArtifactKind::Source),
                ("app/__pycache__/__init__.cpython-311.pyc", ArtifactKind::Bytecode),
                ("app/data.json", ArtifactKind::Source),
                ("app/main.py", ArtifactKind::Source),
                ("app/__pycache__/main.cpython-311.pyc", ArtifactKind::Bytecode),
            ]
        );
        assert_eq!(artifacts[4].data(), b"bc0print('hi')\n");

        Ok(())
    }

    #[test]
    fn bytecode_only_optimized() -> Result<()> {
        let compiler = FakeBytecodeCompiler::default();
        let mut resolver = ArtifactResolver::new(BytecodePolicy::BytecodeOnly, "cpython-311");
        resolver.set_compiler(&compiler);
        resolver.set_optimize_level(BytecodeOptimizationLevel::Two);

        let artifacts = resolver.resolve(&units())?;

        assert_eq!(
            summary(&artifacts),
            vec![
                (
                    "app/__pycache__/__init__.cpython-311.opt-2.pyc",
                    ArtifactKind::Bytecode
                ),
                ("app/data.json", ArtifactKind::Source),
                (
                    "app/__pycache__/main.cpython-311.opt-2.pyc",
                    ArtifactKind::Bytecode
                ),
            ]
        );
        assert_eq!(artifacts[2].data(), b"bc2print('hi')\n");

        Ok(())
    }

    #[test]
    fn missing_compiler() {
        let resolver = ArtifactResolver::new(BytecodePolicy::Both, "cpython-311");

        match resolver.resolve(&units()) {
            Err(WheelError::Compilation(e)) => assert_eq!(e.module, "app"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn first_failure_in_order_wins() {
        let units = (0..64)
            .map(|i| SourceUnit::from_memory(format!("pkg/m{:02}.py", i), b"x = 1\n".to_vec()))
            .collect::<Vec<_>>();

        let compiler = FailingBytecodeCompiler::new(["pkg.m40", "pkg.m07", "pkg.m55"]);
        let mut resolver = ArtifactResolver::new(BytecodePolicy::Both, "cpython-311");
        resolver.set_compiler(&compiler);
        resolver.set_concurrency(8);

        for _ in 0..8 {
            match resolver.resolve(&units) {
                Err(WheelError::Compilation(e)) => {
                    assert_eq!(e.module, "pkg.m07");
                    assert_eq!(e.failure.message, "rejected pkg.m07");
                }
                other => panic!("unexpected result: {:?}", other),
            }
        }
    }

    #[test]
    fn parallel_matches_serial() -> Result<()> {
        let units = (0..100)
            .map(|i| {
                SourceUnit::from_memory(format!("pkg/m{:03}.py", i), format!("v = {}\n", i).into())
            })
            .collect::<Vec<_>>();
        let compiler = FakeBytecodeCompiler::default();

        let mut serial = ArtifactResolver::new(BytecodePolicy::Both, "cpython-311");
        serial.set_compiler(&compiler);

        let mut parallel = ArtifactResolver::new(BytecodePolicy::Both, "cpython-311");
        parallel.set_compiler(&compiler);
        parallel.set_concurrency(16);

        assert_eq!(serial.resolve(&units)?, parallel.resolve(&units)?);

        Ok(())
    }
}
