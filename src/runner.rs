// src/runner.rs

//! External command execution
//!
//! Every tool the compose drives (solver, indexer, ISO mastering, SCM
//! exports) goes through [`run`]. Output is captured, optionally copied to
//! a log file, and a non-zero exit is an error unless the caller marked
//! the invocation as allowed to fail.
//!
//! [`Executor`] decides *where* a command runs: locally, or wrapped into a
//! build-system runroot task. The command itself is identical either way.

use crate::config::ComposeConf;
use crate::error::{Error, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info};

/// A command as an argument vector or a shell snippet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    Args(Vec<String>),
    Shell(String),
}

impl CommandSpec {
    pub fn args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::Args(args.into_iter().map(Into::into).collect())
    }

    pub fn shell(cmd: impl Into<String>) -> Self {
        CommandSpec::Shell(cmd.into())
    }

    /// Single shell-safe string
    pub fn to_shell(&self) -> String {
        match self {
            CommandSpec::Args(args) => join_quoted(args),
            CommandSpec::Shell(cmd) => cmd.clone(),
        }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_shell())
    }
}

/// Quote `s` for a POSIX shell
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

pub fn join_quoted<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub workdir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    /// Return the exit code instead of failing
    pub can_fail: bool,
    /// Write the command line at the top of the log file
    pub show_cmd: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn log_file_opt(mut self, path: Option<PathBuf>) -> Self {
        self.log_file = path;
        self
    }

    pub fn can_fail(mut self) -> Self {
        self.can_fail = true;
        self
    }

    pub fn show_cmd(mut self) -> Self {
        self.show_cmd = true;
        self
    }
}

/// Exit status and combined output of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

fn append_log(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io_path(parent, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::io_path(path, e))?;
    file.write_all(text.as_bytes())
        .map_err(|e| Error::io_path(path, e))
}

/// Run `cmd` to completion
pub fn run(cmd: &CommandSpec, opts: &RunOptions) -> Result<CommandOutput> {
    let mut command = match cmd {
        CommandSpec::Args(args) => {
            let (program, rest) = args.split_first().ok_or_else(|| {
                Error::InvalidValue("Cannot run an empty command".to_string())
            })?;
            let mut command = Command::new(program);
            command.args(rest);
            command
        }
        CommandSpec::Shell(script) => {
            let mut command = Command::new("/bin/sh");
            command.arg("-c").arg(script);
            command
        }
    };
    if let Some(dir) = &opts.workdir {
        command.current_dir(dir);
    }

    let cmdline = cmd.to_shell();
    debug!("Running: {}", cmdline);
    if let (Some(log), true) = (&opts.log_file, opts.show_cmd) {
        append_log(log, &format!("COMMAND: {}\n", cmdline))?;
    }

    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| Error::CommandFailed {
            command: format!("{} ({})", cmdline, e),
            exit_code: None,
            log_file: opts.log_file.clone(),
        })?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if let Some(log) = &opts.log_file {
        append_log(log, &text)?;
    }

    let result = CommandOutput {
        exit_code: output.status.code(),
        output: text,
    };
    if !result.success() && !opts.can_fail {
        return Err(Error::CommandFailed {
            command: cmdline,
            exit_code: result.exit_code,
            log_file: opts.log_file.clone(),
        });
    }
    Ok(result)
}

/// Delay before the `num`-th runroot submission of a phase, so a burst of
/// tasks does not hit the build system at once
pub fn stagger_delay(num: usize) -> Duration {
    Duration::from_secs(num as u64 * 3)
}

/// Build-system runroot settings taken from the configuration
#[derive(Debug, Clone)]
pub struct Runroot {
    pub koji_profile: String,
    pub tag: String,
    pub channel: Option<String>,
    pub weight: Option<i64>,
}

/// Where commands of a phase execute
#[derive(Debug, Clone)]
pub enum Executor {
    Local,
    Runroot(Runroot),
}

/// Result of an executed command; `task_id` is set for runroot tasks
#[derive(Debug, Clone)]
pub struct Execution {
    pub task_id: Option<u64>,
    pub output: String,
}

impl Executor {
    /// Runroot when `runroot = true`, otherwise local execution
    pub fn from_conf(conf: &ComposeConf) -> Result<Self> {
        if !conf.get_bool("runroot", false) {
            return Ok(Executor::Local);
        }
        Ok(Executor::Runroot(Runroot {
            koji_profile: conf.get_str("koji_profile").unwrap_or("koji").to_string(),
            tag: conf.require_str("runroot_tag")?.to_string(),
            channel: conf.get_str("runroot_channel").map(str::to_string),
            weight: None,
        }))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Executor::Local)
    }

    /// Run `cmd` for `arch`
    ///
    /// `packages` are installed into the runroot buildroot and `mounts`
    /// made visible in it; both are ignored locally. A non-zero exit is
    /// fatal and names the log file.
    pub fn execute(
        &self,
        cmd: &CommandSpec,
        arch: &str,
        packages: &[String],
        mounts: &[PathBuf],
        opts: &RunOptions,
    ) -> Result<Execution> {
        match self {
            Executor::Local => {
                let output = run(cmd, opts)?;
                Ok(Execution {
                    task_id: None,
                    output: output.output,
                })
            }
            Executor::Runroot(runroot) => {
                let koji = crate::wrappers::koji::KojiWrapper::new(&runroot.koji_profile);
                let wrapped = koji.runroot_cmd(
                    &runroot.tag,
                    arch,
                    cmd,
                    runroot.channel.as_deref(),
                    packages,
                    mounts,
                    runroot.weight,
                );
                info!("Submitting runroot task for {}", arch);
                let result = koji.run_runroot_cmd(&wrapped, opts.log_file.as_deref())?;
                if result.exit_code != Some(0) {
                    return Err(Error::CommandFailed {
                        command: format!("runroot task {:?}", result.task_id),
                        exit_code: result.exit_code,
                        log_file: opts.log_file.clone(),
                    });
                }
                Ok(Execution {
                    task_id: result.task_id,
                    output: result.output,
                })
            }
        }
    }
}
