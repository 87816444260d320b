// src/kickstart.rs

//! Solver input document
//!
//! The closure solver reads a kickstart-like file: `repo` lines, a
//! `%packages` section, and four list sections understood only by the
//! solver:
//!
//! ```text
//! %fulltree-excludes      source package names kept out of fulltree
//! %multilib-blacklist     packages never made multilib
//! %multilib-whitelist     packages always made multilib
//! %prepopulate            name.arch entries added as input
//! ```
//!
//! Each section is a newline-delimited list closed by `%end`; anything
//! after `#` on a line is a comment.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KsRepo {
    pub name: String,
    pub baseurl: String,
    /// Do not read comps groups from this repository
    pub ignore_groups: bool,
}

/// Parsed or to-be-written solver kickstart
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolverKickstart {
    pub repos: Vec<KsRepo>,
    pub groups: BTreeSet<String>,
    pub packages: BTreeSet<String>,
    pub exclude_packages: BTreeSet<String>,
    pub fulltree_excludes: BTreeSet<String>,
    pub multilib_blacklist: BTreeSet<String>,
    pub multilib_whitelist: BTreeSet<String>,
    pub prepopulate: BTreeSet<String>,
}

/// `file://` URL for local paths, anything with a scheme is kept
pub fn repo_url(path_or_url: &str) -> String {
    if path_or_url.contains("://") {
        return path_or_url.to_string();
    }
    let path = Path::new(path_or_url);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    format!("file://{}", absolute.display())
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or_default().trim_end()
}

#[derive(Clone, Copy)]
enum Section {
    Packages,
    FulltreeExcludes,
    MultilibBlacklist,
    MultilibWhitelist,
    Prepopulate,
}

impl SolverKickstart {
    /// Add repositories; `comps_repo` is the only one whose groups are read
    pub fn add_repos<'a>(
        &mut self,
        repos: impl IntoIterator<Item = (&'a str, &'a str)>,
        comps_repo: Option<&str>,
    ) {
        for (name, url) in repos {
            self.repos.push(KsRepo {
                name: name.to_string(),
                baseurl: repo_url(url),
                ignore_groups: comps_repo.is_some_and(|comps| comps != name),
            });
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for repo in &self.repos {
            let _ = write!(out, "repo --name={} --baseurl={}", repo.name, repo.baseurl);
            if repo.ignore_groups {
                out.push_str(" --ignoregroups=true");
            }
            out.push('\n');
        }

        out.push_str("\n%packages\n");
        for group in &self.groups {
            let _ = writeln!(out, "@{} --optional", group);
        }
        for package in &self.packages {
            let _ = writeln!(out, "{}", package);
        }
        for package in &self.exclude_packages {
            let _ = writeln!(out, "-{}", package);
        }
        out.push_str("%end\n");

        let sections = [
            ("%fulltree-excludes", &self.fulltree_excludes),
            ("%multilib-blacklist", &self.multilib_blacklist),
            ("%multilib-whitelist", &self.multilib_whitelist),
            ("%prepopulate", &self.prepopulate),
        ];
        for (header, items) in sections {
            if items.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n{}", header);
            for item in items {
                let _ = writeln!(out, "{}", item);
            }
            out.push_str("%end\n");
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_path(parent, e))?;
        }
        std::fs::write(path, self.render()).map_err(|e| Error::io_path(path, e))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut ks = SolverKickstart::default();
        let mut section: Option<Section> = None;

        for (lineno, raw) in content.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            if line == "%end" {
                if section.take().is_none() {
                    return Err(Error::parse(
                        "kickstart",
                        format!("line {}: %end outside of a section", lineno + 1),
                    ));
                }
                continue;
            }

            let Some(current) = section else {
                let keyword = line.split_whitespace().next().unwrap_or_default();
                section = match keyword {
                    "%packages" => Some(Section::Packages),
                    "%fulltree-excludes" => Some(Section::FulltreeExcludes),
                    "%multilib-blacklist" => Some(Section::MultilibBlacklist),
                    "%multilib-whitelist" => Some(Section::MultilibWhitelist),
                    "%prepopulate" => Some(Section::Prepopulate),
                    "repo" => {
                        ks.repos.push(parse_repo_line(line)?);
                        None
                    }
                    // other kickstart commands are not used by the solver
                    _ => None,
                };
                continue;
            };

            let item = line.to_string();
            match current {
                Section::Packages => {
                    if let Some(group) = line.strip_prefix('@') {
                        let name = group.split_whitespace().next().unwrap_or_default();
                        ks.groups.insert(name.to_string());
                    } else if let Some(excluded) = line.strip_prefix('-') {
                        ks.exclude_packages.insert(excluded.to_string());
                    } else {
                        ks.packages.insert(item);
                    }
                }
                Section::FulltreeExcludes => {
                    ks.fulltree_excludes.insert(item);
                }
                Section::MultilibBlacklist => {
                    ks.multilib_blacklist.insert(item);
                }
                Section::MultilibWhitelist => {
                    ks.multilib_whitelist.insert(item);
                }
                Section::Prepopulate => {
                    ks.prepopulate.insert(item);
                }
            }
        }

        if section.is_some() {
            return Err(Error::parse("kickstart", "section not closed with %end"));
        }
        Ok(ks)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io_path(path, e))?;
        Self::parse(&content)
    }
}

fn parse_repo_line(line: &str) -> Result<KsRepo> {
    let mut name = None;
    let mut baseurl = None;
    let mut ignore_groups = false;
    for token in line.split_whitespace().skip(1) {
        if let Some(value) = token.strip_prefix("--name=") {
            name = Some(value.to_string());
        } else if let Some(value) = token.strip_prefix("--baseurl=") {
            baseurl = Some(value.to_string());
        } else if let Some(value) = token.strip_prefix("--ignoregroups=") {
            ignore_groups = value == "true";
        }
    }
    match (name, baseurl) {
        (Some(name), Some(baseurl)) => Ok(KsRepo {
            name,
            baseurl,
            ignore_groups,
        }),
        _ => Err(Error::parse(
            "kickstart",
            format!("repo line needs --name and --baseurl: {}", line),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_sections() {
        let mut ks = SolverKickstart::default();
        ks.add_repos(
            [("compose-repo", "/mnt/repo"), ("lookaside-repo-0", "http://example.com/repo")],
            Some("compose-repo"),
        );
        ks.groups.insert("core".into());
        ks.packages.insert("bash".into());
        ks.exclude_packages.insert("kernel-debug".into());
        ks.fulltree_excludes.insert("glibc".into());

        let text = ks.render();
        assert!(text.starts_with("repo --name=compose-repo --baseurl=file:///mnt/repo\n"));
        assert!(text.contains(
            "repo --name=lookaside-repo-0 --baseurl=http://example.com/repo --ignoregroups=true\n"
        ));
        assert!(text.contains("%packages\n@core --optional\nbash\n-kernel-debug\n%end\n"));
        assert!(text.contains("%fulltree-excludes\nglibc\n%end\n"));
        assert!(!text.contains("%prepopulate"));
    }

    #[test]
    fn test_parse_strips_comments() {
        let text = "\
repo --name=r --baseurl=file:///r

%packages
@core --optional
bash # shell
-foo
%end

%multilib-whitelist
libfoo  # needed on i686
%end

%prepopulate
kernel.x86_64
%end
";
        let ks = SolverKickstart::parse(text).unwrap();
        assert_eq!(ks.repos.len(), 1);
        assert!(ks.groups.contains("core"));
        assert!(ks.packages.contains("bash"));
        assert!(ks.exclude_packages.contains("foo"));
        assert!(ks.multilib_whitelist.contains("libfoo"));
        assert!(ks.prepopulate.contains("kernel.x86_64"));
    }

    #[test]
    fn test_unclosed_section_rejected() {
        assert!(SolverKickstart::parse("%prepopulate\nfoo.x86_64\n").is_err());
        assert!(SolverKickstart::parse("%end\n").is_err());
    }
}
