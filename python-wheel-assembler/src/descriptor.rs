// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The resolved description of a project to package.

Configuration parsing happens elsewhere. By the time a [ProjectDescriptor]
reaches this crate, identity, dependencies and entry points are already
structured values.
*/

use {
    crate::{
        archive::{escape_component, ArchiveName},
        error::AssemblyError,
    },
    anyhow::{anyhow, Result},
    std::{
        fmt::{Display, Formatter},
        path::PathBuf,
        str::FromStr,
    },
};

/// Whether to package module source, bytecode or both.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Deserialize, serde::Serialize),
    serde(rename_all = "kebab-case")
)]
pub enum BytecodePolicy {
    /// Ship `.py` files only.
    #[default]
    SourceOnly,
    /// Ship `.pyc` files only.
    ///
    /// Bytecode lives at its `__pycache__` location, which CPython's import
    /// system only consults when the matching `.py` file exists. Wheels
    /// built with this policy are not importable as-is; an installer or
    /// custom loader must relocate the bytecode first.
    BytecodeOnly,
    /// Ship `.py` files and their `.pyc` counterparts.
    Both,
}

impl BytecodePolicy {
    pub fn emits_source(&self) -> bool {
        matches!(self, Self::SourceOnly | Self::Both)
    }

    pub fn emits_bytecode(&self) -> bool {
        matches!(self, Self::BytecodeOnly | Self::Both)
    }
}

impl Display for BytecodePolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::SourceOnly => "source-only",
            Self::BytecodeOnly => "bytecode-only",
            Self::Both => "both",
        })
    }
}

impl FromStr for BytecodePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "source-only" => Ok(Self::SourceOnly),
            "bytecode-only" => Ok(Self::BytecodeOnly),
            "both" => Ok(Self::Both),
            _ => Err(anyhow!("unknown bytecode policy: {}", s)),
        }
    }
}

/// The compatibility tag triple of a wheel (PEP 425).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Deserialize, serde::Serialize)
)]
pub struct CompatibilityTag {
    /// Python implementation and version, e.g. `py3` or `cp311`.
    pub python: String,
    /// ABI, e.g. `none` or `cp311`.
    pub abi: String,
    /// Platform, e.g. `any` or `linux_x86_64`.
    pub platform: String,
}

impl CompatibilityTag {
    pub fn new(python: impl ToString, abi: impl ToString, platform: impl ToString) -> Self {
        Self {
            python: python.to_string(),
            abi: abi.to_string(),
            platform: platform.to_string(),
        }
    }
}

/// `py3-none-any`, appropriate for pure Python 3 code.
impl Default for CompatibilityTag {
    fn default() -> Self {
        Self::new("py3", "none", "any")
    }
}

impl Display for CompatibilityTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.python, self.abi, self.platform)
    }
}

impl FromStr for CompatibilityTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '-');

        let python = parts
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow!("could not parse Python tag"))?;
        let abi = parts
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow!("could not parse ABI tag"))?;
        let platform = parts
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow!("could not parse Platform tag"))?;

        Ok(Self::new(python, abi, platform))
    }
}

/// A named callable exposed by the distribution.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Deserialize, serde::Serialize)
)]
pub struct EntryPoint {
    /// Category, e.g. `console_scripts`.
    pub group: String,
    /// Symbolic name, e.g. the command name of a console script.
    pub name: String,
    /// Callable target in `module:attr` form.
    pub target: String,
}

impl EntryPoint {
    pub fn new(group: impl ToString, name: impl ToString, target: impl ToString) -> Self {
        Self {
            group: group.to_string(),
            name: name.to_string(),
            target: target.to_string(),
        }
    }
}

/// Everything the pipeline needs to know about a project.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Deserialize, serde::Serialize)
)]
pub struct ProjectDescriptor {
    /// Distribution name, as declared.
    pub name: String,

    pub version: String,

    /// Optional build tag, which must start with a digit.
    #[cfg_attr(feature = "serialization", serde(default))]
    pub build_tag: Option<String>,

    #[cfg_attr(feature = "serialization", serde(default))]
    pub tag: CompatibilityTag,

    /// Directory whose contents become the archive root.
    pub root: PathBuf,

    /// Glob patterns selecting files relative to `root`.
    ///
    /// An empty list selects `**/*.py`.
    #[cfg_attr(feature = "serialization", serde(default))]
    pub includes: Vec<String>,

    /// Glob patterns removing files from the selection. These win over
    /// `includes`.
    #[cfg_attr(feature = "serialization", serde(default))]
    pub excludes: Vec<String>,

    #[cfg_attr(feature = "serialization", serde(default))]
    pub bytecode_policy: BytecodePolicy,

    /// PEP 508 requirement strings. Order is preserved in `METADATA`.
    #[cfg_attr(feature = "serialization", serde(default))]
    pub dependencies: Vec<String>,

    #[cfg_attr(feature = "serialization", serde(default))]
    pub entry_points: Vec<EntryPoint>,

    #[cfg_attr(feature = "serialization", serde(default))]
    pub summary: Option<String>,

    #[cfg_attr(feature = "serialization", serde(default))]
    pub license: Option<String>,

    #[cfg_attr(feature = "serialization", serde(default))]
    pub requires_python: Option<String>,

    /// Whether the archive is extracted into `purelib` (`true`) or
    /// `platlib` (`false`).
    #[cfg_attr(
        feature = "serialization",
        serde(default = "default_root_is_purelib")
    )]
    pub root_is_purelib: bool,
}

#[cfg(feature = "serialization")]
fn default_root_is_purelib() -> bool {
    true
}

impl ProjectDescriptor {
    /// Create an instance with a name, version and project root.
    ///
    /// Everything else starts at its default: `py3-none-any`, all `.py`
    /// files, source only, no dependencies or entry points.
    pub fn new(name: impl ToString, version: impl ToString, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            build_tag: None,
            tag: CompatibilityTag::default(),
            root: root.into(),
            includes: vec![],
            excludes: vec![],
            bytecode_policy: BytecodePolicy::default(),
            dependencies: vec![],
            entry_points: vec![],
            summary: None,
            license: None,
            requires_python: None,
            root_is_purelib: true,
        }
    }

    /// The distribution name as it appears in file and directory names.
    pub fn normalized_name(&self) -> String {
        escape_component(&self.name.to_lowercase().replace('-', "_"))
    }

    /// Archive path of the `.dist-info` directory, without a trailing slash.
    pub fn dist_info_path(&self) -> String {
        format!(
            "{}-{}.dist-info",
            self.normalized_name(),
            escape_component(&self.version)
        )
    }

    /// Name of the wheel file this descriptor produces.
    pub fn archive_name(&self) -> ArchiveName {
        ArchiveName::from_descriptor(self)
    }

    /// Ensure values can be rendered into `METADATA`, `WHEEL` and
    /// `entry_points.txt` without altering their structure.
    ///
    /// Single line fields may not contain line breaks. Entry point groups may
    /// not contain brackets and entry point names may not contain `=`.
    /// `summary` and `license` are exempt as their whitespace is collapsed
    /// on output.
    pub fn validate(&self) -> Result<(), AssemblyError> {
        let check = |field: &'static str, value: &str, forbidden: &[char]| {
            if value.contains(|c: char| c == '\n' || c == '\r' || forbidden.contains(&c)) {
                Err(AssemblyError::InvalidMetadata {
                    field,
                    value: value.to_string(),
                })
            } else {
                Ok(())
            }
        };

        check("name", &self.name, &[])?;
        check("version", &self.version, &[])?;
        if let Some(build_tag) = &self.build_tag {
            check("build tag", build_tag, &[])?;
        }
        check("python tag", &self.tag.python, &[])?;
        check("abi tag", &self.tag.abi, &[])?;
        check("platform tag", &self.tag.platform, &[])?;
        if let Some(requires_python) = &self.requires_python {
            check("requires-python", requires_python, &[])?;
        }

        for dependency in &self.dependencies {
            check("dependency", dependency, &[])?;
        }

        for entry in &self.entry_points {
            check("entry point group", &entry.group, &['[', ']'])?;
            check("entry point name", &entry.name, &['='])?;
            check("entry point target", &entry.target, &[])?;
        }

        Ok(())
    }
}
