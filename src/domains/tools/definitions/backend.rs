//! Atomistic backends behind the calculation tools.
//!
//! Energies, forces and relaxations come from an [`AtomisticBackend`]. The
//! production backend is [`CommandBackend`], which runs an external program
//! (typically an ASE script) once per request.
//!
//! ## Command protocol
//!
//! The request is one JSON object on the program's stdin, tagged by `task`:
//!
//! - `{"task": "energy", "structure": "<CIF/XYZ/POSCAR text>"}`
//! - `{"task": "static", "atoms": {...}, "compute_forces": true, "compute_virial": false}`
//! - `{"task": "optimize", "atoms": {...}, "fmax": 0.05, "max_steps": 200, ...}`
//!
//! The last non-empty line of stdout is the JSON result: a number for
//! `energy`, a [`StaticResult`] or an [`OptimizeResult`] object otherwise.
//! A non-zero exit status is a failure whose reason is the last line of
//! stderr.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::structure::AtomsDict;

/// Dependency name tools use to require an atomistic backend.
pub const ASE_DEPENDENCY: &str = "ase";

/// Default time a backend may take for one request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings of a static (single-point) calculation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaticRequest {
    pub atoms: AtomsDict,
    pub compute_forces: bool,
    pub compute_virial: bool,
}

/// Result of a static calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticResult {
    /// Total potential energy in eV.
    pub energy: f64,
    /// Forces in eV/Å, when requested.
    #[serde(default)]
    pub forces: Option<Vec<[f64; 3]>>,
    /// Virial tensor in eV, when requested and supported.
    #[serde(default)]
    pub virial: Option<[[f64; 3]; 3]>,
}

/// Settings of a geometry optimization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizeRequest {
    pub atoms: AtomsDict,
    pub fmax: f64,
    pub max_steps: u32,
    pub optimizer: String,
    pub relax_cell: bool,
    pub fix_symmetry: bool,
}

/// Result of a geometry optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeResult {
    /// Relaxed structure.
    pub atoms: AtomsDict,
    /// Largest force component after the last step, in eV/Å.
    pub final_fmax: f64,
    pub steps: u32,
    #[serde(default)]
    pub initial_energy: Option<f64>,
    pub final_energy: f64,
}

/// Energy, force and relaxation provider.
///
/// Failures are human-readable reasons; the tools wrap them into their own
/// failure envelopes.
#[async_trait::async_trait]
pub trait AtomisticBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Potential energy in eV of structure file content.
    async fn potential_energy(&self, structure: &str) -> Result<f64, String>;

    async fn static_calculation(&self, _request: &StaticRequest) -> Result<StaticResult, String> {
        Err(format!("backend '{}' does not support static calculations", self.name()))
    }

    async fn optimize(&self, _request: &OptimizeRequest) -> Result<OptimizeResult, String> {
        Err(format!("backend '{}' does not support geometry optimization", self.name()))
    }
}

#[derive(Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
enum BackendRequest<'a> {
    Energy {
        structure: &'a str,
    },
    Static {
        #[serde(flatten)]
        request: &'a StaticRequest,
    },
    Optimize {
        #[serde(flatten)]
        request: &'a OptimizeRequest,
    },
}

/// Runs an external program per request.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Split a whitespace-separated command line. `None` if it is blank.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one request and read the result from the last stdout line.
    ///
    /// The child is killed when the timeout expires or the calling future is
    /// dropped.
    async fn run<T: DeserializeOwned>(&self, request: &BackendRequest<'_>) -> Result<T, String> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| format!("failed to encode backend request: {}", e))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start backend '{}': {}", self.program, e))?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        let (fed, output) = tokio::time::timeout(self.timeout, async move {
            tokio::join!(feed, child.wait_with_output())
        })
        .await
        .map_err(|_| {
            warn!("Backend '{}' timed out", self.program);
            format!(
                "backend '{}' timed out after {}s",
                self.program,
                self.timeout.as_secs_f64()
            )
        })?;

        let output = output.map_err(|e| format!("backend did not finish: {}", e))?;
        match fed {
            // The program may answer without reading all of its input.
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!("Backend '{}' closed stdin early", self.program)
            }
            Err(e) => return Err(format!("failed to send request to backend: {}", e)),
            Ok(()) => {}
        }

        if !output.status.success() {
            return Err(last_line(&output.stderr)
                .unwrap_or_else(|| format!("backend exited with {}", output.status)));
        }

        let line = last_line(&output.stdout).ok_or_else(|| "backend produced no output".to_string())?;
        serde_json::from_str(&line)
            .map_err(|_| format!("backend returned an unreadable result: {}", line))
    }
}

fn last_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(String::from)
}

#[async_trait::async_trait]
impl AtomisticBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.program
    }

    async fn potential_energy(&self, structure: &str) -> Result<f64, String> {
        self.run(&BackendRequest::Energy { structure }).await
    }

    async fn static_calculation(&self, request: &StaticRequest) -> Result<StaticResult, String> {
        self.run(&BackendRequest::Static { request }).await
    }

    async fn optimize(&self, request: &OptimizeRequest) -> Result<OptimizeResult, String> {
        self.run(&BackendRequest::Optimize { request }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> CommandBackend {
        CommandBackend::new("sh", vec!["-c".into(), script.into()])
    }

    fn atoms() -> AtomsDict {
        AtomsDict {
            positions: vec![[0.0, 0.0, 0.0]],
            numbers: vec![18],
            cell: None,
            pbc: [false; 3],
        }
    }

    #[test]
    fn test_command_line_parsing() {
        assert!(CommandBackend::from_command_line("   ").is_none());
        let backend = CommandBackend::from_command_line("python3 -m ase_backend").unwrap();
        assert_eq!(backend.name(), "python3");
        assert_eq!(backend.args, vec!["-m", "ase_backend"]);
        assert_eq!(backend.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_request_encoding() {
        let value = serde_json::to_value(BackendRequest::Energy { structure: "data_x" }).unwrap();
        assert_eq!(value, serde_json::json!({ "task": "energy", "structure": "data_x" }));

        let request = StaticRequest {
            atoms: atoms(),
            compute_forces: true,
            compute_virial: false,
        };
        let value = serde_json::to_value(BackendRequest::Static { request: &request }).unwrap();
        assert_eq!(value["task"], "static");
        assert_eq!(value["atoms"]["numbers"], serde_json::json!([18]));
        assert_eq!(value["compute_forces"], true);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reads_last_stdout_line() {
        let backend = sh("cat > /dev/null; echo starting; echo -7.25");
        assert_eq!(backend.potential_energy("data_x").await.unwrap(), -7.25);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_uses_stderr() {
        let backend = sh("cat > /dev/null; echo 'bad CIF block' >&2; exit 3");
        assert_eq!(backend.potential_energy("data_x").await.unwrap_err(), "bad CIF block");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_result() {
        let backend = sh("cat > /dev/null; echo not-a-number");
        let err = backend.potential_energy("data_x").await.unwrap_err();
        assert!(err.contains("unreadable result"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_backend_that_ignores_stdin() {
        // Exits without reading a large request; the broken pipe is not an error.
        let backend = sh("echo -2.5");
        let structure = "H 0 0 0\n".repeat(200_000);
        assert_eq!(backend.potential_energy(&structure).await.unwrap(), -2.5);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_output_before_reading_input() {
        // Fills the stdout pipe before consuming stdin.
        let backend = sh("head -c 300000 /dev/zero | tr '\\0' x; echo; cat > /dev/null; echo -1.5");
        let structure = "H 0 0 0\n".repeat(200_000);
        assert_eq!(backend.potential_energy(&structure).await.unwrap(), -1.5);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_backend() {
        let backend = sh("sleep 30").with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let err = backend.potential_energy("data_x").await.unwrap_err();
        assert!(err.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_static_and_optimize_results() {
        let backend = sh(
            r#"cat > /dev/null; echo '{"energy": -3.0, "forces": [[0.1, -0.2, 0.0]]}'"#,
        );
        let result = backend
            .static_calculation(&StaticRequest {
                atoms: atoms(),
                compute_forces: true,
                compute_virial: false,
            })
            .await
            .unwrap();
        assert_eq!(result.energy, -3.0);
        assert_eq!(result.forces, Some(vec![[0.1, -0.2, 0.0]]));
        assert_eq!(result.virial, None);

        let backend = sh(
            r#"cat > /dev/null; echo '{"atoms": {"positions": [[0,0,0]], "numbers": [18]}, "final_fmax": 0.01, "steps": 4, "final_energy": -3.5}'"#,
        );
        let result = backend
            .optimize(&OptimizeRequest {
                atoms: atoms(),
                fmax: 0.05,
                max_steps: 200,
                optimizer: "BFGS".into(),
                relax_cell: false,
                fix_symmetry: true,
            })
            .await
            .unwrap();
        assert_eq!(result.steps, 4);
        assert_eq!(result.atoms.numbers, vec![18]);
        assert_eq!(result.initial_energy, None);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let backend = CommandBackend::new("definitely-not-an-ase-backend", vec![]);
        let err = backend.potential_energy("data_x").await.unwrap_err();
        assert!(err.contains("failed to start"));
    }
}
