// ABOUTME: Explicit process launch requests: program, directory, args, env and output policy.
// ABOUTME: Nothing goes through a shell; every argument reaches the child verbatim.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Where a child's stdout and stderr go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    /// Share the parent's stdout and stderr
    Inherit,
    /// Drop stdout, and fold stderr into the same sink
    Discard,
    /// Append stdout and stderr to a file, creating it and its directory
    Append(PathBuf),
}

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub output: OutputSink,
    /// Start the child as the leader of a new process group
    pub new_process_group: bool,
}

impl LaunchRequest {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
            output: OutputSink::Inherit,
            new_process_group: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    pub fn in_new_process_group(mut self) -> Self {
        self.new_process_group = true;
        self
    }

    /// Program and arguments joined for log lines
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> std::io::Result<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        match &self.output {
            OutputSink::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            OutputSink::Discard => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
            OutputSink::Append(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                let err = file.try_clone()?;
                cmd.stdout(Stdio::from(file)).stderr(Stdio::from(err));
            }
        }

        if self.new_process_group {
            cmd.process_group(0);
        }

        Ok(cmd)
    }

    /// Start the process. Must be called from within a tokio runtime.
    pub fn spawn(&self) -> std::io::Result<Child> {
        self.command()?.spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_display_joins_program_and_args() {
        let request = LaunchRequest::new("augur").args(["server", "worker", "--kind", "x"]);
        assert_eq!(request.display(), "augur server worker --kind x");
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_interpreted() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out.log");
        let request = LaunchRequest::new("echo")
            .arg("$HOME && rm -rf /")
            .output(OutputSink::Append(out.clone()));

        let status = request.spawn().unwrap().wait().await.unwrap();
        assert!(status.success());
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "$HOME && rm -rf /\n");
    }

    #[tokio::test]
    async fn test_append_creates_directory_and_folds_stderr() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("logs").join("server.log");
        let request = LaunchRequest::new("sh")
            .args(["-c", "echo out; echo err 1>&2"])
            .output(OutputSink::Append(out.clone()));

        request.spawn().unwrap().wait().await.unwrap();
        let content = std::fs::read_to_string(&out).unwrap();
        assert!(content.contains("out"));
        assert!(content.contains("err"));
    }

    #[tokio::test]
    async fn test_env_and_working_directory() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("env.log");
        let request = LaunchRequest::new("sh")
            .args(["-c", "echo $AUGUR_WORKER_PORT; pwd"])
            .env("AUGUR_WORKER_PORT", "5010")
            .current_dir(tmp.path())
            .output(OutputSink::Append(out.clone()));

        request.spawn().unwrap().wait().await.unwrap();
        let content = std::fs::read_to_string(&out).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("5010"));
        let cwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
        assert_eq!(cwd, std::fs::canonicalize(tmp.path()).unwrap());
    }

    #[tokio::test]
    async fn test_new_process_group() {
        let request = LaunchRequest::new("sleep")
            .arg("30")
            .output(OutputSink::Discard)
            .in_new_process_group();
        let mut child = request.spawn().unwrap();
        let pid = child.id().unwrap() as i32;

        let pgid = nix::unistd::getpgid(Some(nix::unistd::Pid::from_raw(pid))).unwrap();
        assert_eq!(pgid.as_raw(), pid);

        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let request = LaunchRequest::new("augur-no-such-program-xyz");
        assert!(request.spawn().is_err());
    }
}
