// src/scm.rs

//! Fetching files and directories from source control
//!
//! A source is either a plain path (a local file, relative paths resolved
//! against the configuration directory) or a table:
//!
//! ```toml
//! comps_file = { scm = "git", repo = "https://example.com/comps.git", branch = "f21", file = "comps-f21.xml" }
//! ```
//!
//! Supported kinds are `file`, `git`, `cvs` and `rpm`. `file` paths and
//! `rpm` repos may be globs. Checkouts from remote repositories are retried.

use crate::config::ComposeConf;
use crate::error::{Error, Result};
use crate::linker::{copy_dir_contents, copy_preserving_mtime};
use crate::runner::{self, CommandSpec, RunOptions, shell_quote};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use toml::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ScmKind {
    File,
    Git,
    Cvs,
    Rpm,
}

/// Where to fetch a file or directory from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScmSource {
    pub kind: ScmKind,
    /// Repository location; several package files (or a glob) for `rpm`
    pub repo: Vec<String>,
    /// Files, or a single directory, inside the repository
    pub paths: Vec<String>,
    pub branch: Option<String>,
}

/// Bounded retry for checkouts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(60),
        }
    }
}

fn strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

impl ScmSource {
    /// Local file or directory
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            kind: ScmKind::File,
            repo: Vec::new(),
            paths: vec![path.into()],
            branch: None,
        }
    }

    /// Read a source from a configuration value; `key` is `"file"` or `"dir"`
    pub fn from_value(conf: &ComposeConf, value: &Value, key: &str) -> Result<Self> {
        if let Some(path) = value.as_str() {
            return Ok(Self::local(conf.resolve_path(path).display().to_string()));
        }
        let table = value.as_table().ok_or_else(|| {
            Error::Config(vec![format!("SCM source must be a path or a table, got {}", value)])
        })?;
        let kind_name = table.get("scm").and_then(Value::as_str).unwrap_or("file");
        let kind = ScmKind::from_str(kind_name)
            .map_err(|_| Error::Config(vec![format!("Unknown SCM type: {}", kind_name)]))?;
        let paths = table.get(key).map(strings).unwrap_or_default();
        if paths.is_empty() {
            return Err(Error::Config(vec![format!("SCM source is missing '{}'", key)]));
        }
        let paths = if kind == ScmKind::File && table.get("repo").is_none() {
            paths
                .iter()
                .map(|p| conf.resolve_path(p).display().to_string())
                .collect()
        } else {
            paths
        };
        Ok(Self {
            kind,
            repo: table.get("repo").map(strings).unwrap_or_default(),
            paths,
            branch: table.get("branch").and_then(Value::as_str).map(str::to_string),
        })
    }

    /// Read the option `name`, if set
    pub fn from_conf(conf: &ComposeConf, name: &str, key: &str) -> Result<Option<Self>> {
        conf.get(name)
            .map(|value| Self::from_value(conf, value, key))
            .transpose()
    }
}

/// Run `cmd`, retrying failed attempts after a fixed delay
pub fn retry_run(cmd: &CommandSpec, opts: &RunOptions, policy: RetryPolicy) -> Result<()> {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        debug!("Retrying execution {}/{} of '{}'", attempt, attempts, cmd);
        match runner::run(cmd, opts) {
            Ok(_) => return Ok(()),
            Err(e) if attempt == attempts => return Err(e),
            Err(e) => {
                warn!("Attempt {} of '{}' failed: {}", attempt, cmd, e);
                std::thread::sleep(policy.delay);
            }
        }
    }
    Ok(())
}

fn glob_paths(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern)
        .map_err(|e| Error::InvalidValue(format!("Invalid glob '{}': {}", pattern, e)))?;
    let mut result: Vec<PathBuf> = paths.filter_map(|p| p.ok()).collect();
    result.sort();
    Ok(result)
}

fn copy_into(src: &Path, target_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(target_dir).map_err(|e| Error::io_path(target_dir, e))?;
    let name = src
        .file_name()
        .ok_or_else(|| Error::InvalidValue(format!("No file name in {}", src.display())))?;
    let dst = target_dir.join(name);
    if dst.exists() {
        std::fs::remove_file(&dst).map_err(|e| Error::io_path(&dst, e))?;
    }
    copy_preserving_mtime(src, &dst)?;
    Ok(dst)
}

/// Fetches from one kind of repository into a scratch directory
struct Exporter<'a> {
    source: &'a ScmSource,
    retry: RetryPolicy,
    log_file: Option<&'a Path>,
}

impl Exporter<'_> {
    fn run_opts(&self, workdir: &Path) -> RunOptions {
        RunOptions::new()
            .workdir(workdir)
            .log_file_opt(self.log_file.map(Path::to_path_buf))
            .show_cmd()
    }

    fn repo(&self) -> Result<&str> {
        self.source
            .repo
            .first()
            .map(String::as_str)
            .ok_or_else(|| Error::Config(vec![format!("SCM type {} needs 'repo'", self.source.kind)]))
    }

    /// Materialize `path` of the repository under `checkout`
    fn checkout(&self, path: &str, checkout: &Path) -> Result<()> {
        let path = path.trim_start_matches('/');
        match self.source.kind {
            ScmKind::Git => {
                let repo = self.repo()?;
                let repo = if repo.contains("://") {
                    repo.to_string()
                } else {
                    format!("file://{}", repo)
                };
                let branch = self.source.branch.as_deref().unwrap_or("master");
                debug!("Exporting {} from git {} (branch {})...", path, repo, branch);
                let cmd = CommandSpec::shell(format!(
                    "/usr/bin/git archive --remote={} {} {} | tar xf -",
                    shell_quote(&repo),
                    shell_quote(branch),
                    shell_quote(path)
                ));
                retry_run(&cmd, &self.run_opts(checkout), self.retry)
            }
            ScmKind::Cvs => {
                let repo = self.repo()?;
                let branch = self.source.branch.as_deref().unwrap_or("HEAD");
                debug!("Exporting {} from CVS {} (branch {})...", path, repo, branch);
                let cmd = CommandSpec::args(["/usr/bin/cvs", "-q", "-d", repo, "export", "-r", branch, path]);
                retry_run(&cmd, &self.run_opts(checkout), self.retry)
            }
            ScmKind::File | ScmKind::Rpm => Ok(()),
        }
    }

    /// Package files named by the (possibly globbed) repo entries
    fn rpm_files(&self) -> Result<Vec<PathBuf>> {
        let mut result = Vec::new();
        for repo in &self.source.repo {
            let matches = glob_paths(repo)?;
            if matches.is_empty() {
                return Err(Error::NotFound(format!("No package matches {}", repo)));
            }
            result.extend(matches);
        }
        Ok(result)
    }

    fn explode_rpm(&self, rpm: &Path, dest: &Path) -> Result<()> {
        debug!("Extracting {} into {}", rpm.display(), dest.display());
        let cmd = CommandSpec::shell(format!(
            "rpm2cpio {} | cpio -iuvmd --quiet",
            shell_quote(&rpm.display().to_string())
        ));
        runner::run(&cmd, &self.run_opts(dest)).map(|_| ())
    }

    fn export_file(&self, path: &str, target_dir: &Path) -> Result<Vec<PathBuf>> {
        match self.source.kind {
            ScmKind::File => {
                if !self.source.repo.is_empty() {
                    return Err(Error::Config(vec!["SCM type file takes no 'repo'".into()]));
                }
                glob_paths(path)?
                    .iter()
                    .map(|src| copy_into(src, target_dir))
                    .collect()
            }
            ScmKind::Git | ScmKind::Cvs => {
                let tmp = tempfile::Builder::new().prefix("scm_checkout_").tempdir()?;
                self.checkout(path, tmp.path())?;
                let src = tmp.path().join(path.trim_start_matches('/'));
                Ok(vec![copy_into(&src, target_dir)?])
            }
            ScmKind::Rpm => {
                let mut result = Vec::new();
                for rpm in self.rpm_files()? {
                    let tmp = tempfile::Builder::new().prefix("scm_rpm_").tempdir()?;
                    self.explode_rpm(&rpm, tmp.path())?;
                    let pattern = tmp.path().join(path.trim_start_matches('/'));
                    for src in glob_paths(&pattern.display().to_string())? {
                        result.push(copy_into(&src, target_dir)?);
                    }
                }
                Ok(result)
            }
        }
    }

    fn export_dir(&self, path: &str, target_dir: &Path) -> Result<()> {
        match self.source.kind {
            ScmKind::File => {
                for dir in glob_paths(path)? {
                    copy_dir_contents(&dir, target_dir)?;
                }
                Ok(())
            }
            ScmKind::Git | ScmKind::Cvs => {
                let tmp = tempfile::Builder::new().prefix("scm_checkout_").tempdir()?;
                self.checkout(path, tmp.path())?;
                copy_dir_contents(&tmp.path().join(path.trim_start_matches('/')), target_dir)
            }
            ScmKind::Rpm => {
                // "dir" copies the directory itself, "dir/" only its content
                let contents_only = path.ends_with('/');
                let rel = path.trim_start_matches('/').trim_end_matches('/');
                for rpm in self.rpm_files()? {
                    let tmp = tempfile::Builder::new().prefix("scm_rpm_").tempdir()?;
                    self.explode_rpm(&rpm, tmp.path())?;
                    let src = tmp.path().join(rel);
                    if contents_only {
                        copy_dir_contents(&src, target_dir)?;
                    } else {
                        let name = src.file_name().map(PathBuf::from).unwrap_or_default();
                        copy_dir_contents(&src, &target_dir.join(name))?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Fetch every file of `source` into `target_dir`, returning the copies
pub fn get_file_from_scm(source: &ScmSource, target_dir: &Path, log_file: Option<&Path>) -> Result<Vec<PathBuf>> {
    get_file_from_scm_with(source, target_dir, log_file, RetryPolicy::default())
}

pub fn get_file_from_scm_with(
    source: &ScmSource,
    target_dir: &Path,
    log_file: Option<&Path>,
    retry: RetryPolicy,
) -> Result<Vec<PathBuf>> {
    let exporter = Exporter {
        source,
        retry,
        log_file,
    };
    let mut result = Vec::new();
    for path in &source.paths {
        let files = exporter.export_file(path, target_dir)?;
        if files.is_empty() {
            return Err(Error::NotFound(format!("No file matches {} in {} source", path, source.kind)));
        }
        result.extend(files);
    }
    Ok(result)
}

/// Fetch the directory of `source` and copy its contents into `target_dir`
pub fn get_dir_from_scm(source: &ScmSource, target_dir: &Path, log_file: Option<&Path>) -> Result<()> {
    let exporter = Exporter {
        source,
        retry: RetryPolicy::default(),
        log_file,
    };
    let dir = source
        .paths
        .first()
        .ok_or_else(|| Error::Config(vec!["SCM source has no directory".into()]))?;
    exporter.export_dir(dir, target_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(dir: &Path) -> ComposeConf {
        ComposeConf::parse(
            r#"
            comps_file = "comps.xml"
            variants_file = { scm = "git", repo = "https://example.com/variants.git", file = "variants.xml", branch = "f21" }
            bad = { scm = "svn", file = "x" }
            "#,
            dir,
        )
        .unwrap()
    }

    #[test]
    fn test_source_from_conf() {
        let c = conf(Path::new("/etc/compose"));
        let comps = ScmSource::from_conf(&c, "comps_file", "file").unwrap().unwrap();
        assert_eq!(comps.kind, ScmKind::File);
        assert_eq!(comps.paths, vec!["/etc/compose/comps.xml"]);

        let variants = ScmSource::from_conf(&c, "variants_file", "file").unwrap().unwrap();
        assert_eq!(variants.kind, ScmKind::Git);
        assert_eq!(variants.repo, vec!["https://example.com/variants.git"]);
        assert_eq!(variants.branch.as_deref(), Some("f21"));

        assert!(ScmSource::from_conf(&c, "bad", "file").is_err());
        assert!(ScmSource::from_conf(&c, "missing", "file").unwrap().is_none());
    }

    #[test]
    fn test_file_source_glob() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.cfg"), "a").unwrap();
        std::fs::write(src.join("b.cfg"), "b").unwrap();
        std::fs::write(src.join("c.txt"), "c").unwrap();

        let target = tmp.path().join("target");
        let source = ScmSource::local(src.join("*.cfg").display().to_string());
        let files = get_file_from_scm(&source, &target, None).unwrap();
        assert_eq!(files, vec![target.join("a.cfg"), target.join("b.cfg")]);
        assert!(!target.join("c.txt").exists());

        let missing = ScmSource::local(src.join("*.nope").display().to_string());
        assert!(get_file_from_scm(&missing, &target, None).is_err());
    }

    #[test]
    fn test_file_source_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("extra");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("GPL"), "license").unwrap();
        std::fs::write(src.join("sub/README"), "readme").unwrap();

        let target = tmp.path().join("target");
        get_dir_from_scm(&ScmSource::local(src.display().to_string()), &target, None).unwrap();
        assert_eq!(std::fs::read_to_string(target.join("GPL")).unwrap(), "license");
        assert!(target.join("sub/README").is_file());
    }

    #[test]
    fn test_retry_gives_up() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("count");
        let cmd = CommandSpec::shell(format!("echo x >> {}; exit 1", marker.display()));
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        assert!(retry_run(&cmd, &RunOptions::new(), policy).is_err());
        assert_eq!(std::fs::read_to_string(&marker).unwrap().lines().count(), 3);
    }
}
