// src/wrappers/repoclosure.rs

//! `repoclosure` command builder

use super::as_url;
use crate::runner::CommandSpec;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct RepoclosureOpts {
    pub arches: Vec<String>,
    pub basearch: Option<String>,
    pub builddeps: bool,
    /// repo id -> path or URL
    pub repos: BTreeMap<String, String>,
    /// repo id -> path or URL, used only to satisfy dependencies
    pub lookaside: BTreeMap<String, String>,
    pub tempcache: bool,
    pub quiet: bool,
    pub newest: bool,
}

pub fn repoclosure_cmd(opts: &RepoclosureOpts) -> CommandSpec {
    let mut cmd = vec!["/usr/bin/repoclosure".to_string()];
    cmd.extend(opts.arches.iter().map(|a| format!("--arch={}", a)));
    if let Some(basearch) = &opts.basearch {
        cmd.push(format!("--basearch={}", basearch));
    }
    if opts.builddeps {
        cmd.push("--builddeps".into());
    }
    if opts.tempcache {
        cmd.push("--tempcache".into());
    }
    if opts.quiet {
        cmd.push("--quiet".into());
    }
    if opts.newest {
        cmd.push("--newest".into());
    }
    for (id, path) in &opts.repos {
        cmd.push(format!("--repofrompath={},{}", id, as_url(path)));
        cmd.push(format!("--repoid={}", id));
    }
    for (id, path) in &opts.lookaside {
        cmd.push(format!("--repofrompath={},{}", id, as_url(path)));
        cmd.push(format!("--lookaside={}", id));
    }
    CommandSpec::Args(cmd)
}
