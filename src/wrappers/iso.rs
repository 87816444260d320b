// src/wrappers/iso.rs

//! ISO 9660 mastering: `genisoimage` arguments, boot options per arch,
//! embedded MD5 tools and graft-point files

use crate::error::{Error, Result};
use crate::runner::{self, CommandSpec, RunOptions, shell_quote};
use crate::util::VOLID_MAX_LEN;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// ISO-relative path -> source path; directories carry a trailing `/`
pub type GraftPoints = BTreeMap<String, PathBuf>;

/// El Torito and platform options for `genisoimage`
///
/// `createfrom` is the tree holding the PowerPC `mapping` and `magic` files.
pub fn get_boot_options(arch: &str, createfrom: &Path) -> Result<Vec<String>> {
    let efi = || {
        vec![
            "-eltorito-alt-boot".to_string(),
            "-e".into(),
            "images/efiboot.img".into(),
            "-no-emul-boot".into(),
        ]
    };
    let to_vec = |opts: &[&str]| opts.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let options = match arch {
        "aarch64" => efi(),
        "i386" | "i686" | "x86_64" => {
            let mut opts = to_vec(&[
                "-b",
                "isolinux/isolinux.bin",
                "-c",
                "isolinux/boot.cat",
                "-no-emul-boot",
                "-boot-load-size",
                "4",
                "-boot-info-table",
            ]);
            if arch == "x86_64" {
                opts.extend(efi());
            }
            opts
        }
        "ia64" => to_vec(&["-b", "images/boot.img", "-no-emul-boot"]),
        "ppc" | "ppc64" | "ppc64le" => {
            let mut opts = to_vec(&[
                "-part",
                "-hfs",
                "-r",
                "-l",
                "-sysid",
                "PPC",
                "-no-desktop",
                "-allow-multidot",
                "-chrp-boot",
            ]);
            opts.push("-map".into());
            opts.push(createfrom.join("mapping").display().to_string());
            opts.push("-magic".into());
            opts.push(createfrom.join("magic").display().to_string());
            // -hfs-bless must come last
            opts.push("-hfs-bless".into());
            opts.push("/ppc/mac".into());
            opts
        }
        "sparc" => to_vec(&[
            "-G",
            "/boot/isofs.b",
            "-B",
            "...",
            "-s",
            "/boot/silo.conf",
            "-sparc-label",
            "\"sparc\"",
        ]),
        "s390" | "s390x" => Vec::new(),
        _ => return Err(Error::InvalidValue(format!("Unknown arch: {}", arch))),
    };
    Ok(options)
}

/// Shorten a volume ID to fit the ISO 9660 limit by dropping dashes, then
/// spaces, then abbreviating "Supplementary"
pub fn truncate_volid(volid: &str) -> Result<String> {
    let mut volid = volid.to_string();
    let steps: [(&str, &str); 3] = [("-", ""), (" ", ""), ("Supplementary", "Supp")];
    for (from, to) in steps {
        if volid.len() <= VOLID_MAX_LEN {
            break;
        }
        let shorter = volid.replace(from, to);
        warn!("Truncating volume ID from '{}' to '{}'", volid, shorter);
        volid = shorter;
    }
    if volid.len() > VOLID_MAX_LEN {
        return Err(Error::InvalidValue(format!(
            "Volume ID must be less than {} characters: {}",
            VOLID_MAX_LEN, volid
        )));
    }
    Ok(volid)
}

#[derive(Debug, Clone, Default)]
pub struct MkisofsOpts {
    pub appid: Option<String>,
    pub volid: Option<String>,
    pub volset: Option<String>,
    pub exclude: Vec<String>,
    pub verbose: bool,
    pub boot_args: Vec<String>,
    /// `-path-list` file; when set, `paths` is ignored
    pub graft_points: Option<PathBuf>,
}

pub fn mkisofs_cmd(iso: &Path, paths: &[PathBuf], opts: &MkisofsOpts) -> Result<CommandSpec> {
    let mut cmd = vec!["/usr/bin/genisoimage".to_string()];
    if let Some(appid) = &opts.appid {
        cmd.push("-appid".into());
        cmd.push(appid.clone());
    }
    cmd.push("-untranslated-filenames".into());
    if let Some(volid) = &opts.volid {
        cmd.push("-volid".into());
        cmd.push(truncate_volid(volid)?);
    }
    cmd.push("-J".into());
    cmd.push("-joliet-long".into());
    if let Some(volset) = &opts.volset {
        cmd.push("-volset".into());
        cmd.push(volset.clone());
    }
    cmd.push("-rational-rock".into());
    if opts.verbose {
        cmd.push("-verbose".into());
    }
    cmd.push("-translation-table".into());
    cmd.push("-input-charset".into());
    cmd.push("utf-8".into());
    for exclude in &opts.exclude {
        cmd.push("-x".into());
        cmd.push(exclude.clone());
    }
    cmd.extend(opts.boot_args.iter().cloned());
    cmd.push("-o".into());
    cmd.push(iso.display().to_string());

    match &opts.graft_points {
        Some(list) => {
            cmd.push("-graft-points".into());
            cmd.push("-path-list".into());
            cmd.push(list.display().to_string());
        }
        None => cmd.extend(paths.iter().map(|p| p.display().to_string())),
    }
    Ok(CommandSpec::Args(cmd))
}

pub fn implantisomd5_cmd(iso: &Path, supported: bool) -> CommandSpec {
    let mut cmd = vec!["/usr/bin/implantisomd5".to_string()];
    if supported {
        cmd.push("--supported-iso".into());
    }
    cmd.push(iso.display().to_string());
    CommandSpec::Args(cmd)
}

pub fn checkisomd5_cmd(iso: &Path, just_print: bool) -> CommandSpec {
    let mut cmd = vec!["/usr/bin/checkisomd5".to_string()];
    if just_print {
        cmd.push("--md5sumonly".into());
    }
    cmd.push(iso.display().to_string());
    CommandSpec::Args(cmd)
}

/// MD5 implanted into `iso`, read back with `checkisomd5`
pub fn get_implanted_md5(iso: &Path) -> Result<String> {
    let out = runner::run(&checkisomd5_cmd(iso, true), &RunOptions::new())?;
    parse_implanted_md5(&out.output)
        .ok_or_else(|| Error::parse("checkisomd5", format!("no checksum for {}", iso.display())))
}

fn parse_implanted_md5(output: &str) -> Option<String> {
    let line = output.lines().next()?;
    let md5 = line.rsplit(':').next()?.trim();
    (!md5.is_empty()).then(|| md5.to_string())
}

/// Shell pipeline appending the sorted file listing of `iso_name` to
/// `<iso_name>.manifest`; run from the ISO directory
pub fn manifest_cmd(iso_name: &str) -> CommandSpec {
    let quoted = shell_quote(iso_name);
    CommandSpec::Shell(format!(
        "isoinfo -R -f -i {} | grep -v '/TRANS.TBL$' | sort >> {}.manifest",
        quoted, quoted
    ))
}

pub fn get_volume_id(iso: &Path) -> Result<String> {
    let out = runner::run(
        &CommandSpec::args(["isoinfo".to_string(), "-d".into(), "-i".into(), iso.display().to_string()]),
        &RunOptions::new(),
    )?;
    parse_volume_id(&out.output)
        .ok_or_else(|| Error::parse("isoinfo", "Could not read Volume ID"))
}

fn parse_volume_id(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("Volume id:"))
        .map(|v| v.trim().to_string())
}

fn dirname(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Every file under `root`, plus every subdirectory as `dir/`
pub fn scan_tree(root: &Path) -> Result<GraftPoints> {
    let mut result = GraftPoints::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().into_owned();
        if entry.file_type().is_dir() {
            result.insert(format!("{}/", rel), entry.path().to_path_buf());
        } else {
            result.insert(rel, entry.path().to_path_buf());
        }
    }
    Ok(result)
}

/// Merge `high` over `low`
///
/// With `exclusive`, any directory present in `high` hides everything
/// `low` has below it.
pub fn merge_trees(low: &GraftPoints, high: &GraftPoints, exclusive: bool) -> GraftPoints {
    let mut result = high.clone();
    let high_dirs: BTreeSet<&str> = high
        .keys()
        .map(|k| dirname(k).trim_end_matches('/'))
        .filter(|d| !d.is_empty())
        .collect();

    for (key, source) in low {
        let dir = dirname(key);
        if exclusive
            && high_dirs
                .iter()
                .any(|d| dir == *d || dir.starts_with(&format!("{}/", d)))
        {
            continue;
        }
        result.entry(key.clone()).or_insert_with(|| source.clone());
    }
    result
}

/// Merge trees in ascending priority, then overlay the exclusive trees
pub fn get_graft_points(paths: &[PathBuf], exclusive_paths: &[PathBuf]) -> Result<GraftPoints> {
    let mut result = GraftPoints::new();
    for path in paths {
        result = merge_trees(&result, &scan_tree(path)?, false);
    }
    for path in exclusive_paths {
        result = merge_trees(&result, &scan_tree(path)?, true);
    }
    Ok(result)
}

fn is_rpm(path: &str) -> bool {
    path.ends_with(".rpm")
}

fn is_image(path: &str) -> bool {
    ["images/", "isolinux/", "EFI/", "etc/", "ppc/"]
        .iter()
        .any(|p| path.starts_with(p))
        || path.ends_with(".img")
        || path.ends_with(".ins")
}

/// Boot files first, packages last, everything else in between
pub fn cmp_graft_points(x: &str, y: &str) -> Ordering {
    let rank = |p: &str| {
        if is_rpm(p) {
            2
        } else if is_image(p) {
            0
        } else {
            1
        }
    };
    rank(x).cmp(&rank(y)).then_with(|| x.cmp(y))
}

/// Render a `-path-list` file
///
/// Directory entries already implied by a file below them are dropped;
/// entries matching an `exclude` glob are skipped.
pub fn render_graft_points(points: &GraftPoints, exclude: &[String]) -> String {
    let patterns: Vec<glob::Pattern> = exclude
        .iter()
        .filter_map(|e| glob::Pattern::new(e).ok())
        .collect();

    let mut kept: Vec<&str> = Vec::new();
    let mut seen_dirs: BTreeSet<&str> = BTreeSet::new();
    for key in points.keys().rev() {
        let dir = dirname(key);
        if !key.ends_with('/') {
            kept.push(key);
            seen_dirs.insert(dir);
            continue;
        }
        if !seen_dirs.iter().any(|seen| seen.starts_with(dir)) {
            kept.push(key);
        }
        seen_dirs.insert(dir);
    }

    kept.sort_by(|a, b| cmp_graft_points(a, b));
    let mut out = String::new();
    for key in kept {
        if patterns.iter().any(|p| p.matches(key)) {
            continue;
        }
        let _ = writeln!(out, "{}={}", key, points[key].display());
    }
    out
}

pub fn write_graft_points(path: &Path, points: &GraftPoints, exclude: &[String]) -> Result<()> {
    std::fs::write(path, render_graft_points(points, exclude)).map_err(|e| Error::io_path(path, e))
}
