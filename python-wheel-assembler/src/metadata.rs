// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Synthesis of `.dist-info` documents.

Every wheel produced by this crate carries three metadata documents, in
this order:

1. `METADATA`: identity and dependency declarations (core metadata 2.1).
2. `WHEEL`: the wheel format version, generator and compatibility tag.
3. `entry_points.txt`: named callables, grouped by category.

Rendering is a pure function of the [ProjectDescriptor]. Values that would
change the structure of a document, such as a dependency containing a line
break, are rejected by [MetadataSynthesizer::synthesize].
*/

use {
    crate::{
        artifact::{ArtifactKind, PackagedArtifact},
        descriptor::ProjectDescriptor,
        error::AssemblyError,
    },
    std::collections::BTreeMap,
};

/// Default value of the `Generator` field of the `WHEEL` file.
pub const DEFAULT_GENERATOR: &str = concat!("python-wheel-assembler ", env!("CARGO_PKG_VERSION"));

/// Collapse line breaks so a value fits on a single header line.
fn header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Construct the contents of the `.dist-info/METADATA` file.
///
/// `Requires-Dist` entries keep the order in which they were declared.
pub fn derive_metadata_file(descriptor: &ProjectDescriptor) -> String {
    let mut s = format!(
        "Metadata-Version: 2.1\nName: {}\nVersion: {}\n",
        descriptor.name, descriptor.version
    );

    if let Some(summary) = &descriptor.summary {
        s.push_str(&format!("Summary: {}\n", header_value(summary)));
    }
    if let Some(license) = &descriptor.license {
        s.push_str(&format!("License: {}\n", header_value(license)));
    }
    if let Some(requires_python) = &descriptor.requires_python {
        s.push_str(&format!("Requires-Python: {}\n", requires_python.trim()));
    }

    for dependency in &descriptor.dependencies {
        s.push_str(&format!("Requires-Dist: {}\n", dependency.trim()));
    }

    s
}

/// Construct the contents of the `.dist-info/WHEEL` file.
pub fn derive_wheel_file(descriptor: &ProjectDescriptor, generator: &str) -> String {
    let mut s = format!(
        "Wheel-Version: 1.0\nGenerator: {}\nRoot-Is-Purelib: {}\nTag: {}\n",
        generator, descriptor.root_is_purelib, descriptor.tag
    );

    if let Some(build) = &descriptor.build_tag {
        s.push_str(&format!("Build: {}\n", build));
    }

    s
}

/// Construct the contents of the `.dist-info/entry_points.txt` file.
///
/// Groups and the names within each group are sorted. If a name is declared
/// twice within a group, the last declaration wins.
pub fn derive_entry_points_file(descriptor: &ProjectDescriptor) -> String {
    let mut groups: BTreeMap<&str, BTreeMap<&str, &str>> = BTreeMap::new();

    for entry in &descriptor.entry_points {
        groups
            .entry(entry.group.as_str())
            .or_default()
            .insert(entry.name.as_str(), entry.target.as_str());
    }

    groups
        .iter()
        .map(|(group, entries)| {
            let mut s = format!("[{}]\n", group);
            for (name, target) in entries {
                s.push_str(&format!("{} = {}\n", name, target));
            }
            s
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders the metadata documents of a wheel.
#[derive(Clone, Debug)]
pub struct MetadataSynthesizer {
    generator: String,
}

impl Default for MetadataSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_GENERATOR)
    }
}

impl MetadataSynthesizer {
    pub fn new(generator: impl ToString) -> Self {
        Self {
            generator: generator.to_string(),
        }
    }

    /// Render `METADATA`, `WHEEL` and `entry_points.txt`, in that order.
    pub fn synthesize(
        &self,
        descriptor: &ProjectDescriptor,
    ) -> Result<Vec<PackagedArtifact>, AssemblyError> {
        descriptor.validate()?;

        let dist_info = descriptor.dist_info_path();

        Ok(vec![
            PackagedArtifact::new(
                format!("{}/METADATA", dist_info),
                derive_metadata_file(descriptor),
                ArtifactKind::Metadata,
            ),
            PackagedArtifact::new(
                format!("{}/WHEEL", dist_info),
                derive_wheel_file(descriptor, &self.generator),
                ArtifactKind::Metadata,
            ),
            PackagedArtifact::new(
                format!("{}/entry_points.txt", dist_info),
                derive_entry_points_file(descriptor),
                ArtifactKind::Metadata,
            ),
        ])
    }
}
