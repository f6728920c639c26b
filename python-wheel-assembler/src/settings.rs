// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Knobs controlling how a pipeline run behaves.

None of these influence what a wheel *is* (that is the
[crate::descriptor::ProjectDescriptor]'s job), only how it gets built and
where it lands.
*/

use {
    crate::{
        archive::DEFAULT_MODIFIED_TIME,
        bytecode::BytecodeOptimizationLevel,
        metadata::DEFAULT_GENERATOR,
    },
    std::path::{Path, PathBuf},
    thiserror::Error,
};

/// Environment variable holding a UNIX timestamp for archive members.
pub const SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";

/// Environment variable overriding the output directory.
pub const OUTPUT_DIR_ENV: &str = "WHEEL_ASSEMBLER_OUTPUT";

/// Environment variable overriding the number of worker threads.
pub const JOBS_ENV: &str = "WHEEL_ASSEMBLER_JOBS";

/// Cache tag used for bytecode paths when neither the settings nor the
/// compiler name one.
pub const DEFAULT_CACHE_TAG: &str = "cpython-311";

/// Error resolving settings from the environment.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{name} is not a valid integer: {value:?}")]
    InvalidInteger { name: &'static str, value: String },

    #[error("{name} is out of range: {value}")]
    OutOfRange { name: &'static str, value: i64 },
}

/// How a pipeline run is executed.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    concurrency: usize,
    modified_time: time::OffsetDateTime,
    optimize_level: BytecodeOptimizationLevel,
    cache_tag: String,
    generator: String,
    output_dir: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            modified_time: DEFAULT_MODIFIED_TIME,
            optimize_level: BytecodeOptimizationLevel::Zero,
            cache_tag: DEFAULT_CACHE_TAG.to_string(),
            generator: DEFAULT_GENERATOR.to_string(),
            output_dir: PathBuf::from("dist"),
        }
    }
}

impl PipelineSettings {
    /// Construct default settings, then apply overrides from the process environment.
    ///
    /// Honors [SOURCE_DATE_EPOCH], [OUTPUT_DIR_ENV] and [JOBS_ENV].
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_env_vars(|name| std::env::var(name).ok())
    }

    /// Like [Self::from_env] with a custom variable lookup.
    pub fn from_env_vars(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        if let Some(value) = lookup(SOURCE_DATE_EPOCH).filter(|v| !v.trim().is_empty()) {
            let epoch = value
                .trim()
                .parse::<i64>()
                .map_err(|_| SettingsError::InvalidInteger {
                    name: SOURCE_DATE_EPOCH,
                    value: value.clone(),
                })?;

            let t = time::OffsetDateTime::from_unix_timestamp(epoch).map_err(|_| {
                SettingsError::OutOfRange {
                    name: SOURCE_DATE_EPOCH,
                    value: epoch,
                }
            })?;

            // Zip archives cannot represent times before 1980.
            settings.modified_time = t.max(DEFAULT_MODIFIED_TIME);
        }

        if let Some(value) = lookup(OUTPUT_DIR_ENV).filter(|v| !v.is_empty()) {
            settings.output_dir = PathBuf::from(value);
        }

        if let Some(value) = lookup(JOBS_ENV).filter(|v| !v.trim().is_empty()) {
            let jobs = value
                .trim()
                .parse::<usize>()
                .map_err(|_| SettingsError::InvalidInteger {
                    name: JOBS_ENV,
                    value: value.clone(),
                })?;
            settings.set_concurrency(jobs);
        }

        Ok(settings)
    }

    /// Maximum number of files resolved or compiled at once.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Set the maximum number of worker threads. Values below 1 mean 1.
    pub fn set_concurrency(&mut self, v: usize) {
        self.concurrency = v.max(1);
    }

    /// Obtain the modified time for files in the wheel archive.
    pub fn modified_time(&self) -> time::OffsetDateTime {
        self.modified_time
    }

    /// Set the modified time for files in the wheel archive.
    pub fn set_modified_time(&mut self, v: time::OffsetDateTime) {
        self.modified_time = v;
    }

    pub fn optimize_level(&self) -> BytecodeOptimizationLevel {
        self.optimize_level
    }

    pub fn set_optimize_level(&mut self, v: BytecodeOptimizationLevel) {
        self.optimize_level = v;
    }

    /// Bytecode cache tag targeted by compilation, e.g. `cpython-311`.
    ///
    /// Only used with compilers that do not report a tag of their own.
    pub fn cache_tag(&self) -> &str {
        &self.cache_tag
    }

    pub fn set_cache_tag(&mut self, v: impl ToString) {
        self.cache_tag = v.to_string();
    }

    /// Obtain the `Generator` value for the `WHEEL` file.
    pub fn generator(&self) -> &str {
        &self.generator
    }

    /// Set the `Generator` value for the `WHEEL` file.
    pub fn set_generator(&mut self, v: impl ToString) {
        self.generator = v.to_string();
    }

    /// Directory wheels are written into.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn set_output_dir(&mut self, v: impl AsRef<Path>) {
        self.output_dir = v.as_ref().to_path_buf();
    }
}
