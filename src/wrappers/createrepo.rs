// src/wrappers/createrepo.rs

//! Repository indexer commands (`createrepo`, `mergerepo`, `modifyrepo`)

use super::as_url;
use crate::runner::CommandSpec;
use std::path::{Path, PathBuf};

/// Options of a `createrepo` run; `Default` matches the compose defaults
#[derive(Debug, Clone)]
pub struct CreaterepoOpts {
    pub baseurl: Option<String>,
    pub outputdir: Option<PathBuf>,
    pub excludes: Vec<String>,
    pub pkglist: Option<PathBuf>,
    pub groupfile: Option<PathBuf>,
    pub cachedir: Option<PathBuf>,
    pub update: bool,
    pub update_md_path: Option<PathBuf>,
    pub skip_stat: bool,
    pub checkts: bool,
    pub split: bool,
    pub pretty: bool,
    pub database: bool,
    pub checksum: Option<String>,
    pub unique_md_filenames: bool,
    pub distro: Vec<String>,
    pub content: Vec<String>,
    pub repo: Vec<String>,
    pub revision: Option<String>,
    pub workers: Option<u32>,
}

impl Default for CreaterepoOpts {
    fn default() -> Self {
        Self {
            baseurl: None,
            outputdir: None,
            excludes: Vec::new(),
            pkglist: None,
            groupfile: None,
            cachedir: None,
            update: true,
            update_md_path: None,
            skip_stat: false,
            checkts: false,
            split: false,
            pretty: true,
            database: true,
            checksum: None,
            unique_md_filenames: true,
            distro: Vec::new(),
            content: Vec::new(),
            repo: Vec::new(),
            revision: None,
            workers: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreaterepoWrapper {
    createrepo: &'static str,
    mergerepo: &'static str,
    modifyrepo: &'static str,
}

fn opt(name: &str, value: impl AsRef<std::ffi::OsStr>) -> String {
    format!("--{}={}", name, Path::new(value.as_ref()).display())
}

impl CreaterepoWrapper {
    /// `createrepo_c` selects the C implementation of the indexer
    pub fn new(createrepo_c: bool) -> Self {
        if createrepo_c {
            Self {
                createrepo: "createrepo_c",
                mergerepo: "mergerepo_c",
                modifyrepo: "modifyrepo",
            }
        } else {
            Self {
                createrepo: "createrepo",
                mergerepo: "mergerepo",
                modifyrepo: "modifyrepo",
            }
        }
    }

    pub fn createrepo_cmd(&self, directory: &Path, opts: &CreaterepoOpts) -> CommandSpec {
        let mut cmd = vec![self.createrepo.to_string(), directory.display().to_string()];

        if let Some(baseurl) = &opts.baseurl {
            cmd.push(format!("--baseurl={}", baseurl));
        }
        if let Some(dir) = &opts.outputdir {
            cmd.push(opt("outputdir", dir));
        }
        for exclude in &opts.excludes {
            cmd.push(format!("--excludes={}", exclude));
        }
        if let Some(pkglist) = &opts.pkglist {
            cmd.push(opt("pkglist", pkglist));
        }
        if let Some(groupfile) = &opts.groupfile {
            cmd.push(opt("groupfile", groupfile));
        }
        if let Some(cachedir) = &opts.cachedir {
            cmd.push(opt("cachedir", cachedir));
        }
        if opts.update {
            cmd.push("--update".into());
        }
        if let Some(path) = &opts.update_md_path {
            cmd.push(opt("update-md-path", path));
        }
        if opts.skip_stat {
            cmd.push("--skip-stat".into());
        }
        if opts.checkts {
            cmd.push("--checkts".into());
        }
        if opts.split {
            cmd.push("--split".into());
        }
        // createrepo_c has no --pretty
        if opts.pretty && self.createrepo != "createrepo_c" {
            cmd.push("--pretty".into());
        }
        cmd.push(if opts.database { "--database" } else { "--no-database" }.into());
        if let Some(checksum) = &opts.checksum {
            cmd.push(format!("--checksum={}", checksum));
        }
        cmd.push(
            if opts.unique_md_filenames {
                "--unique-md-filenames"
            } else {
                "--simple-md-filenames"
            }
            .into(),
        );
        cmd.extend(opts.distro.iter().map(|d| format!("--distro={}", d)));
        cmd.extend(opts.content.iter().map(|c| format!("--content={}", c)));
        cmd.extend(opts.repo.iter().map(|r| format!("--repo={}", r)));
        if let Some(revision) = &opts.revision {
            cmd.push(format!("--revision={}", revision));
        }
        if let Some(workers) = opts.workers {
            cmd.push(format!("--workers={}", workers));
        }
        CommandSpec::Args(cmd)
    }

    pub fn mergerepo_cmd(
        &self,
        outputdir: &Path,
        repos: &[String],
        database: bool,
        pkglist: Option<&Path>,
        nogroups: bool,
        noupdateinfo: bool,
    ) -> CommandSpec {
        let mut cmd = vec![self.mergerepo.to_string(), opt("outputdir", outputdir)];
        cmd.extend(repos.iter().map(|r| format!("--repo={}", as_url(r))));
        cmd.push(if database { "--database" } else { "--nodatabase" }.into());
        if let Some(pkglist) = pkglist {
            cmd.push(opt("pkglist", pkglist));
        }
        if nogroups {
            cmd.push("--nogroups".into());
        }
        if noupdateinfo {
            cmd.push("--noupdateinfo".into());
        }
        CommandSpec::Args(cmd)
    }

    /// Add (or with `remove`, drop) `file_path` in the repodata at `repo_path`
    pub fn modifyrepo_cmd(
        &self,
        repo_path: &Path,
        file_path: &Path,
        mdtype: Option<&str>,
        compress_type: Option<&str>,
        remove: bool,
    ) -> CommandSpec {
        let mut cmd = vec![
            self.modifyrepo.to_string(),
            file_path.display().to_string(),
            repo_path.display().to_string(),
        ];
        if let Some(mdtype) = mdtype {
            cmd.push(format!("--mdtype={}", mdtype));
        }
        if remove {
            cmd.push("--remove".into());
        }
        if let Some(compress_type) = compress_type {
            cmd.push("--compress".into());
            cmd.push(format!("--compress-type={}", compress_type));
        }
        CommandSpec::Args(cmd)
    }
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
    fn test_createrepo_defaults() {
        let repo = CreaterepoWrapper::new(false);
        let cmd = args(repo.createrepo_cmd(
            Path::new("/prefix/"),
            &CreaterepoOpts {
                pkglist: Some(PathBuf::from("/work/global/package_list/global.conf")),
                outputdir: Some(PathBuf::from("/work/global/repo")),
                baseurl: Some("file:///prefix/".into()),
                workers: Some(5),
                checksum: Some("sha256".into()),
                ..Default::default()
            },
        ));
        assert_eq!(cmd[0], "createrepo");
        assert_eq!(cmd[1], "/prefix/");
        assert!(cmd.contains(&"--update".to_string()));
        assert!(cmd.contains(&"--pretty".to_string()));
        assert!(cmd.contains(&"--database".to_string()));
        assert!(cmd.contains(&"--unique-md-filenames".to_string()));
        assert!(cmd.contains(&"--pkglist=/work/global/package_list/global.conf".to_string()));
        assert!(cmd.contains(&"--workers=5".to_string()));
        assert!(cmd.contains(&"--checksum=sha256".to_string()));
    }

    #[test]
    fn test_createrepo_c_drops_pretty() {
        let repo = CreaterepoWrapper::new(true);
        let cmd = args(repo.createrepo_cmd(
            Path::new("/repo"),
            &CreaterepoOpts {
                database: false,
                ..Default::default()
            },
        ));
        assert_eq!(cmd[0], "createrepo_c");
        assert!(!cmd.contains(&"--pretty".to_string()));
        assert!(cmd.contains(&"--no-database".to_string()));
    }

    #[test]
    fn test_modifyrepo_and_mergerepo() {
        let repo = CreaterepoWrapper::new(false);
        let cmd = args(repo.modifyrepo_cmd(
            Path::new("/repo/repodata"),
            Path::new("/work/productid"),
            None,
            Some("gz"),
            false,
        ));
        assert_eq!(
            cmd,
            vec![
                "modifyrepo",
                "/work/productid",
                "/repo/repodata",
                "--compress",
                "--compress-type=gz"
            ]
        );

        let cmd = args(repo.mergerepo_cmd(
            Path::new("/out"),
            &["/a".to_string(), "http://b".to_string()],
            true,
            None,
            true,
            false,
        ));
        assert!(cmd.contains(&"--repo=file:///a".to_string()));
        assert!(cmd.contains(&"--repo=http://b".to_string()));
        assert!(cmd.contains(&"--nogroups".to_string()));
    }
}
