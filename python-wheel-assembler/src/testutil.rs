// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Compiler doubles for exercising the pipeline without Python. */

use {
    crate::bytecode::{BytecodeCompiler, BytecodeOptimizationLevel, CompileFailure, CompileRequest},
    std::collections::BTreeSet,
};

/// Emits `bc<level>` followed by the module source.
#[derive(Clone, Debug, Default)]
pub struct FakeBytecodeCompiler {
    cache_tag: Option<String>,
}

impl FakeBytecodeCompiler {
    /// Report a cache tag, as an interpreter backed compiler would.
    pub fn with_cache_tag(mut self, tag: impl ToString) -> Self {
        self.cache_tag = Some(tag.to_string());
        self
    }
}

impl BytecodeCompiler for FakeBytecodeCompiler {
    fn cache_tag(&self) -> Option<&str> {
        self.cache_tag.as_deref()
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<Vec<u8>, CompileFailure> {
        let mut res = Vec::new();

        res.extend(match request.optimize {
            BytecodeOptimizationLevel::Zero => b"bc0",
            BytecodeOptimizationLevel::One => b"bc1",
            BytecodeOptimizationLevel::Two => b"bc2",
        });

        res.extend(request.source);

        Ok(res)
    }
}

/// Behaves like [FakeBytecodeCompiler] except for the named modules, which
/// fail with `rejected <module>` at line 1.
#[derive(Clone, Debug, Default)]
pub struct FailingBytecodeCompiler {
    modules: BTreeSet<String>,
}

impl FailingBytecodeCompiler {
    pub fn new(modules: impl IntoIterator<Item = impl ToString>) -> Self {
        Self {
            modules: modules.into_iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl BytecodeCompiler for FailingBytecodeCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<Vec<u8>, CompileFailure> {
        if self.modules.contains(request.module) {
            Err(CompileFailure::new(format!("rejected {}", request.module)).with_location(1, None))
        } else {
            FakeBytecodeCompiler::default().compile(request)
        }
    }
}
