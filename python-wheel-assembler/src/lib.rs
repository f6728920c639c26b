// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Deterministic Python wheel assembly.

This crate packages a Python project source tree into a wheel archive
(PEP 427). The work is split into stages that hand immutable data forward:

1. [selection] walks the project root and yields ordered [artifact::SourceUnit]s.
2. [resolver] turns units into source and/or bytecode [artifact::PackagedArtifact]s,
   compiling through a [bytecode::BytecodeCompiler].
3. [metadata] renders the `.dist-info` documents from a
   [descriptor::ProjectDescriptor].
4. [record] derives the `RECORD` integrity manifest.
5. [archive] serializes everything into a reproducible zip file and publishes it
   atomically.

[pipeline::WheelPipeline] wires the stages together.
*/

pub mod archive;
pub mod artifact;
pub mod bytecode;
pub mod descriptor;
pub mod error;
pub mod metadata;
pub mod module_util;
pub mod pipeline;
pub mod record;
pub mod resolver;
pub mod selection;
pub mod settings;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
