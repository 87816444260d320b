// src/wrappers/koji.rs

//! Build-system client
//!
//! The hub is reached through its command-line client: task submission via
//! `runroot`/`spin-*` subcommands, and XML-RPC queries through
//! `call --json-output`, whose JSON reply is decoded with serde.

use crate::error::{Error, Result};
use crate::runner::{self, CommandSpec, RunOptions, join_quoted};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static CREATED_TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Created task: (\d+)").unwrap());

/// Mount point of the build system's storage
pub const DEFAULT_TOPDIR: &str = "/mnt/koji";

const RUNROOT_PREAMBLE: &str = "rm -f /var/lib/rpm/__db*; rm -rf /var/cache/yum/*; set -x; ";

/// Outcome of a runroot task; `task_id` comes from the first output line
#[derive(Debug, Clone)]
pub struct RunrootResult {
    pub exit_code: Option<i32>,
    pub output: String,
    pub task_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CreateImageResult {
    pub exit_code: Option<i32>,
    pub output: String,
    pub task_id: u64,
}

/// Image flavour built by `spin-*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ImageKind {
    Live,
    Appliance,
}

#[derive(Debug, Clone)]
pub struct CreateImageRequest<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub target: &'a str,
    pub arch: &'a str,
    pub ks_file: &'a Path,
    pub repos: Vec<String>,
    pub kind: ImageKind,
    /// Import the result as a build; scratch otherwise
    pub archive: bool,
    pub wait: bool,
    pub image_format: Option<&'a str>,
    pub release: Option<&'a str>,
}

/// Event the package set is pinned to
#[derive(Debug, Clone, PartialEq, Deserialize, serde::Serialize)]
pub struct KojiEvent {
    pub id: u64,
    pub ts: f64,
}

/// One entry of a tag listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KojiRpm {
    pub name: String,
    pub version: String,
    pub release: String,
    pub epoch: Option<u64>,
    pub arch: String,
    pub build_id: u64,
}

impl KojiRpm {
    pub fn nvr(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.release)
    }

    /// Last path component of the package file
    pub fn file_name(&self) -> String {
        format!("{}.{}.rpm", self.nvr(), self.arch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KojiBuild {
    pub build_id: u64,
    pub name: String,
    pub version: String,
    pub release: String,
}

#[derive(Debug, Clone)]
pub struct KojiWrapper {
    pub profile: String,
    executable: String,
    topdir: PathBuf,
}

impl KojiWrapper {
    pub fn new(profile: &str) -> Self {
        Self {
            profile: profile.to_string(),
            executable: profile.replace('_', "-"),
            topdir: PathBuf::from(DEFAULT_TOPDIR),
        }
    }

    pub fn with_topdir(mut self, topdir: impl Into<PathBuf>) -> Self {
        self.topdir = topdir.into();
        self
    }

    pub fn topdir(&self) -> &Path {
        &self.topdir
    }

    pub fn runroot_cmd(
        &self,
        target: &str,
        arch: &str,
        command: &CommandSpec,
        channel: Option<&str>,
        packages: &[String],
        mounts: &[PathBuf],
        weight: Option<i64>,
    ) -> CommandSpec {
        let mut cmd = vec![
            self.executable.clone(),
            "runroot".into(),
            "--use-shell".into(),
            "--task-id".into(),
            format!("--channel-override={}", channel.unwrap_or("runroot-local")),
        ];
        if let Some(weight) = weight.filter(|w| *w != 0) {
            cmd.push(format!("--weight={}", weight));
        }
        cmd.extend(packages.iter().map(|p| format!("--package={}", p)));
        cmd.extend(mounts.iter().map(|m| format!("--mount={}", m.display())));
        cmd.push(target.to_string());
        cmd.push(arch.to_string());
        cmd.push(format!("{}{}", RUNROOT_PREAMBLE, command.to_shell()));
        CommandSpec::Args(cmd)
    }

    /// Run a command built by [`Self::runroot_cmd`]; failure of the task is
    /// reported through `exit_code`, not as an error
    pub fn run_runroot_cmd(&self, cmd: &CommandSpec, log_file: Option<&Path>) -> Result<RunrootResult> {
        let out = runner::run(
            cmd,
            &RunOptions::new()
                .log_file_opt(log_file.map(Path::to_path_buf))
                .can_fail(),
        )?;

        let with_task_id = matches!(cmd, CommandSpec::Args(args) if args.iter().any(|a| a == "--task-id"));
        let (task_id, output) = if with_task_id {
            split_task_id(&out.output)
        } else {
            (None, out.output)
        };
        Ok(RunrootResult {
            exit_code: out.exit_code,
            output,
            task_id,
        })
    }

    pub fn create_image_cmd(&self, req: &CreateImageRequest<'_>) -> CommandSpec {
        let mut cmd = vec![self.executable.clone()];
        cmd.push(
            match req.kind {
                ImageKind::Live => "spin-livecd",
                ImageKind::Appliance => "spin-appliance",
            }
            .into(),
        );
        if !req.archive {
            cmd.push("--scratch".into());
        }
        cmd.push("--noprogress".into());
        cmd.push(if req.wait { "--wait" } else { "--nowait" }.into());
        cmd.extend(req.repos.iter().map(|r| format!("--repo={}", r)));
        // only appliances take a disk format
        if req.kind == ImageKind::Appliance {
            if let Some(format) = req.image_format {
                cmd.push(format!("--format={}", format));
            }
        }
        if let Some(release) = req.release {
            cmd.push(format!("--release={}", release));
        }
        cmd.push(req.name.to_string());
        cmd.push(req.version.to_string());
        cmd.push(req.target.to_string());
        cmd.push(req.arch.to_string());
        cmd.push(req.ks_file.display().to_string());
        CommandSpec::Args(cmd)
    }

    pub fn run_create_image_cmd(&self, cmd: &CommandSpec, log_file: Option<&Path>) -> Result<CreateImageResult> {
        let out = runner::run(
            cmd,
            &RunOptions::new()
                .log_file_opt(log_file.map(Path::to_path_buf))
                .can_fail(),
        )?;
        let task_id = parse_created_task(&out.output).ok_or_else(|| {
            Error::Compose(format!(
                "Could not find task ID in output. Command '{}' returned '{}'.",
                cmd, out.output
            ))
        })?;
        Ok(CreateImageResult {
            exit_code: out.exit_code,
            output: out.output,
            task_id,
        })
    }

    /// Invoke a hub method and decode its JSON reply
    ///
    /// Arguments use the client's syntax: positional values, or `key=value`
    /// keyword arguments such as `inherit=True`.
    pub fn call(&self, method: &str, args: &[String]) -> Result<Value> {
        let mut cmd = vec![
            self.executable.clone(),
            "call".to_string(),
            "--json-output".to_string(),
            method.to_string(),
        ];
        cmd.extend(args.iter().cloned());
        debug!("hub call: {}", join_quoted(&cmd));
        let out = runner::run(&CommandSpec::Args(cmd), &RunOptions::new())?;
        Ok(serde_json::from_str(&out.output)?)
    }

    fn call_as<T: for<'de> Deserialize<'de>>(&self, method: &str, args: &[String]) -> Result<T> {
        let value = self.call(method, args)?;
        serde_json::from_value(value).map_err(|e| Error::parse(method, e.to_string()))
    }

    pub fn get_last_event(&self) -> Result<KojiEvent> {
        self.call_as("getLastEvent", &[])
    }

    pub fn get_event(&self, id: u64) -> Result<KojiEvent> {
        self.call_as("getEvent", &[id.to_string()])
    }

    pub fn get_tag(&self, tag: &str) -> Result<Value> {
        let value = self.call("getTag", &[tag.to_string()])?;
        if value.is_null() {
            return Err(Error::NotFound(format!("Unknown koji tag: {}", tag)));
        }
        Ok(value)
    }

    /// Latest RPMs tagged into `tag` as of `event`
    pub fn list_tagged_rpms(
        &self,
        tag: &str,
        event: u64,
        inherit: bool,
    ) -> Result<(Vec<KojiRpm>, Vec<KojiBuild>)> {
        self.call_as(
            "listTaggedRPMS",
            &[
                tag.to_string(),
                format!("event={}", event),
                format!("inherit={}", py_bool(inherit)),
                "latest=True".to_string(),
            ],
        )
    }

    /// `nvr.arch` of every RPM in the buildroot of `task_id`, or of the
    /// local system when no task is given; sorted
    pub fn list_buildroot_rpms(&self, task_id: Option<u64>) -> Result<Vec<String>> {
        let mut result = Vec::new();
        match task_id {
            Some(task_id) => {
                let buildroots: Vec<Value> = self.call_as("listBuildroots", &[format!("taskID={}", task_id)])?;
                if let Some(buildroot_id) = buildroots.last().and_then(|b| b.get("id")).and_then(Value::as_u64) {
                    let rpms: Vec<KojiRpm> = self.call_as(
                        "listRPMs",
                        &[format!("componentBuildrootID={}", buildroot_id)],
                    )?;
                    result.extend(rpms.iter().map(|r| format!("{}.{}", r.nvr(), r.arch)));
                }
            }
            None => {
                let out = runner::run(
                    &CommandSpec::args([
                        "rpm",
                        "-qa",
                        "--qf=%{name}-%{version}-%{release}.%{arch}\\n",
                    ]),
                    &RunOptions::new(),
                )?;
                result.extend(
                    out.output
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string),
                );
            }
        }
        result.sort();
        Ok(result)
    }

    /// Files produced by an image task, as paths on the build system storage
    pub fn get_image_paths(&self, task_id: u64) -> Result<Vec<PathBuf>> {
        let mut tasks = vec![self.call("getTaskInfo", &[task_id.to_string(), "request=True".into()])?];
        if let Value::Array(children) =
            self.call("getTaskChildren", &[task_id.to_string(), "request=True".into()])?
        {
            tasks.extend(children);
        }

        let task = tasks
            .iter()
            .find(|t| {
                matches!(
                    t.get("method").and_then(Value::as_str),
                    Some("createAppliance" | "createLiveCD" | "createImage")
                )
            })
            .ok_or_else(|| Error::NotFound(format!("No image task found under task {}", task_id)))?;
        let image_task_id = task
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::parse("getTaskInfo", "task without id"))?;
        let scratch = task
            .get("request")
            .and_then(Value::as_array)
            .and_then(|req| req.last())
            .and_then(|opts| opts.get("scratch"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let task_result = self.call("getTaskResult", &[image_task_id.to_string()])?;
        let topdir = if scratch {
            self.work_dir().join(taskrelpath(image_task_id))
        } else {
            let field = |name: &str| {
                task_result
                    .get(name)
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::parse("getTaskResult", format!("missing '{}'", name)))
            };
            self.imagebuild_dir(field("name")?, field("version")?, field("release")?)
        };

        let files = task_result
            .get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|f| topdir.join(f))
                    .collect()
            })
            .unwrap_or_default();
        Ok(files)
    }

    pub fn build_dir(&self, name: &str, version: &str, release: &str) -> PathBuf {
        self.topdir.join("packages").join(name).join(version).join(release)
    }

    pub fn imagebuild_dir(&self, name: &str, version: &str, release: &str) -> PathBuf {
        self.build_dir(name, version, release).join("images")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.topdir.join("work")
    }

    /// Signed copy of `rpm` under its build directory
    pub fn signed_rpm_path(&self, build: &KojiBuild, rpm: &KojiRpm, sigkey: &str) -> PathBuf {
        self.build_dir(&build.name, &build.version, &build.release)
            .join("data/signed")
            .join(sigkey)
            .join(&rpm.arch)
            .join(rpm.file_name())
    }

    pub fn unsigned_rpm_path(&self, build: &KojiBuild, rpm: &KojiRpm) -> PathBuf {
        self.build_dir(&build.name, &build.version, &build.release)
            .join(&rpm.arch)
            .join(rpm.file_name())
    }
}

fn py_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

/// Task directory relative to the work dir
pub fn taskrelpath(task_id: u64) -> PathBuf {
    PathBuf::from(format!("tasks/{}/{}", task_id % 10000, task_id))
}

fn split_task_id(output: &str) -> (Option<u64>, String) {
    let mut lines = output.lines();
    match lines.next().and_then(|first| first.trim().parse::<u64>().ok()) {
        Some(id) => {
            let rest: Vec<&str> = lines.collect();
            (Some(id), rest.join("\n"))
        }
        None => (None, output.to_string()),
    }
}

pub fn parse_created_task(output: &str) -> Option<u64> {
    CREATED_TASK_RE
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: CommandSpec) -> Vec<String> {
        match cmd {
            CommandSpec::Args(args) => args,
            CommandSpec::Shell(_) => unreachable!(),
        }
    }

    #[test]
    fn test_runroot_cmd() {
        let koji = KojiWrapper::new("stg_koji");
        let cmd = args(koji.runroot_cmd(
            "f21-build",
            "x86_64",
            &CommandSpec::args(["lorax", "--product=Fedora", "/out dir"]),
            None,
            &["lorax".to_string()],
            &[PathBuf::from("/compose")],
            Some(2),
        ));
        assert_eq!(
            cmd,
            vec![
                "stg-koji",
                "runroot",
                "--use-shell",
                "--task-id",
                "--channel-override=runroot-local",
                "--weight=2",
                "--package=lorax",
                "--mount=/compose",
                "f21-build",
                "x86_64",
                "rm -f /var/lib/rpm/__db*; rm -rf /var/cache/yum/*; set -x; lorax --product=Fedora '/out dir'",
            ]
        );
    }

    #[test]
    fn test_split_task_id() {
        assert_eq!(
            split_task_id("12345\nline one\nline two"),
            (Some(12345), "line one\nline two".to_string())
        );
        assert_eq!(split_task_id("oops\n"), (None, "oops\n".to_string()));
    }

    #[test]
    fn test_create_image_cmd() {
        let koji = KojiWrapper::new("koji");
        let ks = PathBuf::from("/work/live.ks");
        let mut req = CreateImageRequest {
            name: "Fedora-Live",
            version: "21",
            target: "f21-candidate",
            arch: "x86_64",
            ks_file: &ks,
            repos: vec!["http://example.com/repo".into()],
            kind: ImageKind::Live,
            archive: false,
            wait: true,
            image_format: Some("qcow2"),
            release: None,
        };
        let cmd = args(koji.create_image_cmd(&req));
        assert_eq!(
            cmd,
            vec![
                "koji",
                "spin-livecd",
                "--scratch",
                "--noprogress",
                "--wait",
                "--repo=http://example.com/repo",
                "Fedora-Live",
                "21",
                "f21-candidate",
                "x86_64",
                "/work/live.ks",
            ]
        );

        req.kind = ImageKind::Appliance;
        req.archive = true;
        req.release = Some("3");
        let cmd = args(koji.create_image_cmd(&req));
        assert_eq!(cmd[1], "spin-appliance");
        assert!(!cmd.contains(&"--scratch".to_string()));
        assert!(cmd.contains(&"--format=qcow2".to_string()));
        assert!(cmd.contains(&"--release=3".to_string()));
    }

    #[test]
    fn test_parse_created_task() {
        assert_eq!(parse_created_task("Created task: 9876\nWatching tasks"), Some(9876));
        assert_eq!(parse_created_task("error: no target"), None);
    }

    #[test]
    fn test_pathinfo() {
        let koji = KojiWrapper::new("koji");
        let build = KojiBuild {
            build_id: 1,
            name: "bash".into(),
            version: "4.2".into(),
            release: "1.fc21".into(),
        };
        let rpm = KojiRpm {
            name: "bash".into(),
            version: "4.2".into(),
            release: "1.fc21".into(),
            epoch: None,
            arch: "x86_64".into(),
            build_id: 1,
        };
        assert_eq!(
            koji.signed_rpm_path(&build, &rpm, "abcd1234"),
            PathBuf::from("/mnt/koji/packages/bash/4.2/1.fc21/data/signed/abcd1234/x86_64/bash-4.2-1.fc21.x86_64.rpm")
        );
        assert_eq!(
            koji.unsigned_rpm_path(&build, &rpm),
            PathBuf::from("/mnt/koji/packages/bash/4.2/1.fc21/x86_64/bash-4.2-1.fc21.x86_64.rpm")
        );
        assert_eq!(taskrelpath(123456), PathBuf::from("tasks/3456/123456"));
    }
}
