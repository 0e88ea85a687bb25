//! Asynchronous execution of external tools with captured output.

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::process::Command;

use crate::shell;

/// Status reported when the child process could not be started at all.
pub const LAUNCH_FAILURE_STATUS: i32 = -1;

/// Marker line separating stdout from stderr in [`CommandResult::combined`].
pub const STDERR_MARKER: &str = "[stderr]";

/// Outcome of a single tool invocation.
///
/// Launch failures are values too: callers branch on `status`, never on a
/// `Result`. `status == 0` is the sole success signal — some tools print to
/// stderr on success, so output content must not be used to infer failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn launch_failed(&self) -> bool {
        self.status == LAUNCH_FAILURE_STATUS
    }

    /// Single-string form kept for transcripts: stdout, then a `[stderr]`
    /// marker line and stderr when stderr is non-empty.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}\n{}", self.stdout, STDERR_MARKER, self.stderr)
        }
    }

    pub fn launch_failure(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            status: LAUNCH_FAILURE_STATUS,
        }
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    LAUNCH_FAILURE_STATUS
}

/// Runs external tools with a deterministic search path.
///
/// The runner itself enforces no timeout and never retries; deadline and
/// retry policy belong to its callers.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    search_dirs: Vec<PathBuf>,
    envs: Vec<(OsString, OsString)>,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self {
            search_dirs: shell::default_search_dirs(),
            envs: Vec::new(),
        }
    }
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the directories prepended to the inherited `PATH`.
    pub fn with_search_dirs(dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs: dirs,
            envs: Vec::new(),
        }
    }

    /// Adds an environment variable to every spawned child.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// Resolves `program` against the runner's search path.
    pub fn resolve(&self, program: &str) -> Option<PathBuf> {
        shell::resolve_executable(program, &self.search_dirs)
    }

    /// Argv-mode invocation: the program runs directly, without a shell, with
    /// `cwd` expressed as a spawn parameter.
    pub async fn run<I, S>(&self, program: &str, args: I, cwd: Option<&Path>) -> CommandResult
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let Some(resolved) = self.resolve(program) else {
            return CommandResult::launch_failure(format!("{program}: executable not found"));
        };

        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        tracing::trace!(program, resolved = %resolved.display(), ?args, "spawning tool");

        let mut command = Command::new(&resolved);
        command.args(&args);
        self.spawn_and_wait(command, cwd).await
    }

    /// Shell-mode invocation for genuinely compound command lines.
    pub async fn run_shell(&self, script: &str, cwd: Option<&Path>) -> CommandResult {
        let (shell_program, shell_flag) = shell::get_shell_command();
        tracing::trace!(script, "spawning shell");

        let mut command = Command::new(shell_program);
        command.arg(shell_flag).arg(script);
        self.spawn_and_wait(command, cwd).await
    }

    async fn spawn_and_wait(&self, mut command: Command, cwd: Option<&Path>) -> CommandResult {
        command
            .env("PATH", shell::search_path(&self.search_dirs))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        match command.output().await {
            Ok(output) => CommandResult {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                status: exit_code(output.status),
            },
            Err(err) => CommandResult::launch_failure(err.to_string()),
        }
    }
}
