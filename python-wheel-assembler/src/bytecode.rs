// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Work with Python bytecode.

Compilation is delegated to a [BytecodeCompiler]. This crate never
generates bytecode itself: the only bundled implementation,
[PythonProcessCompiler], drives a real Python interpreter.
*/

use {
    anyhow::{anyhow, Context, Result},
    std::{
        io::{BufRead, BufReader, Read, Write},
        path::{Path, PathBuf},
        process,
        sync::Mutex,
    },
};

pub const BYTECODE_COMPILER: &[u8] = include_bytes!("bytecodecompiler.py");

/// An optimization level for Python bytecode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BytecodeOptimizationLevel {
    #[default]
    Zero,
    One,
    Two,
}

impl TryFrom<i32> for BytecodeOptimizationLevel {
    type Error = &'static str;

    fn try_from(i: i32) -> Result<Self, Self::Error> {
        match i {
            0 => Ok(BytecodeOptimizationLevel::Zero),
            1 => Ok(BytecodeOptimizationLevel::One),
            2 => Ok(BytecodeOptimizationLevel::Two),
            _ => Err("unsupported bytecode optimization level"),
        }
    }
}

impl From<BytecodeOptimizationLevel> for i32 {
    fn from(level: BytecodeOptimizationLevel) -> Self {
        match level {
            BytecodeOptimizationLevel::Zero => 0,
            BytecodeOptimizationLevel::One => 1,
            BytecodeOptimizationLevel::Two => 2,
        }
    }
}

/// A request to compile one module.
#[derive(Clone, Copy, Debug)]
pub struct CompileRequest<'a> {
    /// Raw module source.
    pub source: &'a [u8],
    /// Fully qualified module name.
    pub module: &'a str,
    /// File name recorded in the emitted code objects.
    ///
    /// This is the archive path, never a machine specific absolute path.
    pub filename: &'a str,
    /// Bytecode cache tag of the interpreter being targeted, e.g. `cpython-311`.
    pub target: &'a str,
    /// Optimization level to compile with.
    pub optimize: BytecodeOptimizationLevel,
}

/// Position of a compilation problem within module source.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: Option<u32>,
}

/// A compiler's refusal to produce bytecode for a module.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompileFailure {
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl CompileFailure {
    pub fn new(message: impl ToString) -> Self {
        Self {
            message: message.to_string(),
            location: None,
        }
    }

    pub fn with_location(mut self, line: u32, column: Option<u32>) -> Self {
        self.location = Some(SourceLocation { line, column });
        self
    }
}

impl std::fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)?;

        match self.location {
            Some(SourceLocation {
                line,
                column: Some(column),
            }) => write!(f, " (line {}, column {})", line, column),
            Some(SourceLocation { line, column: None }) => write!(f, " (line {})", line),
            None => Ok(()),
        }
    }
}

impl std::error::Error for CompileFailure {}

/// An entity that turns Python source into `.pyc` file content.
///
/// Implementations must be deterministic: identical requests against an
/// identical compiler version must yield identical bytes. They are called
/// concurrently from multiple threads.
pub trait BytecodeCompiler: Send + Sync {
    /// Compile module source into the content of a `.pyc` file.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<Vec<u8>, CompileFailure>;

    /// The bytecode cache tag this compiler targets, e.g. `cpython-311`.
    ///
    /// `None` if the compiler does not know, in which case the caller picks.
    fn cache_tag(&self) -> Option<&str> {
        None
    }
}

/// A single Python interpreter speaking the compiler pipe protocol.
struct CompilerProcess {
    command: process::Child,
    stdin: process::ChildStdin,
    stdout: BufReader<process::ChildStdout>,
}

impl CompilerProcess {
    fn spawn(python: &Path, script_path: &Path) -> Result<Self> {
        let mut command = process::Command::new(python)
            .arg(script_path)
            .stdin(process::Stdio::piped())
            .stdout(process::Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning {}", python.display()))?;

        let stdin = command
            .stdin
            .take()
            .ok_or_else(|| anyhow!("unable to get stdin"))?;
        let stdout = command
            .stdout
            .take()
            .ok_or_else(|| anyhow!("unable to get stdout"))?;

        Ok(Self {
            command,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        self.stdout.read_line(&mut line)?;

        if line.is_empty() {
            return Err(anyhow!("compiler process exited unexpectedly"));
        }

        Ok(line.trim_end().to_string())
    }

    fn read_payload(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        (&mut self.stdout).take(len).read_to_end(&mut data)?;

        if data.len() as u64 != len {
            return Err(anyhow!(
                "compiler process sent {} bytes; expected {}",
                data.len(),
                len
            ));
        }

        Ok(data)
    }

    fn cache_tag(&mut self) -> Result<String> {
        self.stdin.write_all(b"cache_tag\n")?;
        self.stdin.flush()?;

        self.read_line()
    }

    /// Compile source.
    ///
    /// The outer error is a protocol or I/O failure. The inner one is the
    /// interpreter rejecting the source.
    fn compile(
        &mut self,
        request: &CompileRequest<'_>,
    ) -> Result<std::result::Result<Vec<u8>, CompileFailure>> {
        self.stdin.write_all(b"compile\n")?;
        self.stdin
            .write_all(request.filename.len().to_string().as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin
            .write_all(request.source.len().to_string().as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin
            .write_all(i32::from(request.optimize).to_string().as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.write_all(request.filename.as_bytes())?;
        self.stdin.write_all(request.source)?;
        self.stdin.flush()?;

        let status = self.read_line()?;
        let mut parts = status.split(' ');

        match parts.next() {
            Some("ok") => {
                let len = parts
                    .next()
                    .ok_or_else(|| anyhow!("missing bytecode length"))?
                    .parse::<u64>()
                    .context("parsing bytecode length")?;

                Ok(Ok(self.read_payload(len)?))
            }
            Some("error") => {
                let fields = parts
                    .map(|v| v.parse::<u64>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .context("parsing compile error header")?;

                if fields.len() != 3 {
                    return Err(anyhow!("malformed compile error header: {}", status));
                }

                let message = String::from_utf8_lossy(&self.read_payload(fields[2])?).to_string();
                let mut failure = CompileFailure::new(message);

                if fields[0] > 0 {
                    let column = if fields[1] > 0 {
                        Some(fields[1] as u32)
                    } else {
                        None
                    };
                    failure = failure.with_location(fields[0] as u32, column);
                }

                Ok(Err(failure))
            }
            _ => Err(anyhow!("unexpected compiler response: {}", status)),
        }
    }
}

impl Drop for CompilerProcess {
    fn drop(&mut self) {
        let _ = self.stdin.write_all(b"exit\n");
        let _ = self.stdin.flush();
        let _ = self.command.wait();
    }
}

/// A [BytecodeCompiler] backed by Python interpreter processes.
///
/// Python processes are started on demand and execute a helper script
/// embedded in this crate. Each process interacts with this object via a
/// pipe, which is used to send compilation requests and receive `.pyc`
/// content. Idle processes are pooled, so concurrent callers each get their
/// own interpreter. Processes are terminated when this object is dropped.
///
/// Emitted `.pyc` files use unchecked hash based headers (PEP 552), which
/// keeps them independent of file modification times.
pub struct PythonProcessCompiler {
    python: PathBuf,
    script_path: PathBuf,
    cache_tag: String,
    idle: Mutex<Vec<CompilerProcess>>,
    // Dropped after `idle` so processes exit before the script is removed.
    _temp_dir: tempfile::TempDir,
}

impl PythonProcessCompiler {
    /// Create a compiler using a Python executable.
    pub fn new(python: impl AsRef<Path>) -> Result<Self> {
        let python = python.as_ref().to_path_buf();

        let temp_dir = tempfile::Builder::new()
            .prefix("bytecode-compiler")
            .tempdir()
            .context("creating temporary directory")?;
        let script_path = temp_dir.path().join("bytecodecompiler.py");
        std::fs::write(&script_path, BYTECODE_COMPILER)
            .with_context(|| format!("writing {}", script_path.display()))?;

        let mut process = CompilerProcess::spawn(&python, &script_path)?;
        let cache_tag = process
            .cache_tag()
            .context("querying interpreter cache tag")?;

        Ok(Self {
            python,
            script_path,
            cache_tag,
            idle: Mutex::new(vec![process]),
            _temp_dir: temp_dir,
        })
    }

    fn checkout(&self) -> Result<CompilerProcess> {
        let existing = self
            .idle
            .lock()
            .map_err(|_| anyhow!("compiler process pool poisoned"))?
            .pop();

        match existing {
            Some(process) => Ok(process),
            None => CompilerProcess::spawn(&self.python, &self.script_path),
        }
    }

    fn checkin(&self, process: CompilerProcess) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(process);
        }
    }
}

impl BytecodeCompiler for PythonProcessCompiler {
    fn cache_tag(&self) -> Option<&str> {
        Some(&self.cache_tag)
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<Vec<u8>, CompileFailure> {
        if request.target != self.cache_tag {
            return Err(CompileFailure::new(format!(
                "interpreter {} targets {}; requested {}",
                self.python.display(),
                self.cache_tag,
                request.target
            )));
        }

        let mut process = self
            .checkout()
            .map_err(|e| CompileFailure::new(format!("{:#}", e)))?;

        match process.compile(request) {
            Ok(res) => {
                self.checkin(process);
                res
            }
            // A process that failed mid-protocol is dropped rather than reused.
            Err(e) => Err(CompileFailure::new(format!(
                "communicating with {}: {:#}",
                self.python.display(),
                e
            ))),
        }
    }
}
