// src/wrappers/lorax.rs

//! Installer tree builders: `lorax` and the legacy `buildinstall`

use super::as_url;
use crate::runner::CommandSpec;
use std::path::Path;

/// Inputs shared by both installer builders
#[derive(Debug, Clone, Default)]
pub struct InstallerOpts<'a> {
    pub product: &'a str,
    pub version: &'a str,
    pub release: &'a str,
    pub repo_baseurls: Vec<String>,
    pub variant: Option<&'a str>,
    pub bugurl: Option<&'a str>,
    pub nomacboot: bool,
    pub noupgrade: bool,
    pub is_final: bool,
    pub buildarch: Option<&'a str>,
    pub volid: Option<&'a str>,
}

pub fn lorax_cmd(opts: &InstallerOpts<'_>, output_dir: &Path) -> CommandSpec {
    let mut cmd = vec![
        "lorax".to_string(),
        format!("--product={}", opts.product),
        format!("--version={}", opts.version),
        format!("--release={}", opts.release),
    ];
    cmd.extend(
        opts.repo_baseurls
            .iter()
            .map(|url| format!("--source={}", as_url(url))),
    );
    if let Some(variant) = opts.variant {
        cmd.push(format!("--variant={}", variant));
    }
    if let Some(bugurl) = opts.bugurl {
        cmd.push(format!("--bugurl={}", bugurl));
    }
    if opts.nomacboot {
        cmd.push("--nomacboot".into());
    }
    if opts.noupgrade {
        cmd.push("--noupgrade".into());
    }
    if opts.is_final {
        cmd.push("--isfinal".into());
    }
    if let Some(volid) = opts.volid {
        cmd.push(format!("--volid={}", volid));
    }
    cmd.push(output_dir.display().to_string());
    CommandSpec::Args(cmd)
}

/// Legacy anaconda `buildinstall`; the release string is derived from the
/// brand and version
pub fn buildinstall_cmd(opts: &InstallerOpts<'_>, output_dir: &Path, brand: Option<&str>) -> CommandSpec {
    let brand = brand.unwrap_or("redhat");
    let release = format!("{} {}", brand, opts.version);
    let bugurl = opts.bugurl.unwrap_or("https://bugzilla.redhat.com");

    let mut cmd = vec![
        "/usr/lib/anaconda-runtime/buildinstall".to_string(),
        "--debug".into(),
        "--version".into(),
        opts.version.to_string(),
        "--brand".into(),
        brand.to_string(),
        "--product".into(),
        opts.product.to_string(),
        "--release".into(),
        release,
    ];
    if opts.is_final {
        cmd.push("--final".into());
    }
    if let Some(arch) = opts.buildarch {
        cmd.push("--buildarch".into());
        cmd.push(arch.to_string());
    }
    cmd.push("--bugurl".into());
    cmd.push(bugurl.to_string());
    cmd.push("--output".into());
    cmd.push(output_dir.display().to_string());
    cmd.extend(opts.repo_baseurls.iter().map(|url| as_url(url)));
    CommandSpec::Args(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> InstallerOpts<'static> {
        InstallerOpts {
            product: "Fedora",
            version: "21",
            release: "21",
            repo_baseurls: vec!["/work/x86_64/repo".into()],
            nomacboot: true,
            noupgrade: true,
            is_final: true,
            buildarch: Some("x86_64"),
            volid: Some("Fedora-21 x86_64"),
            ..Default::default()
        }
    }

    #[test]
    fn test_lorax_cmd() {
        let CommandSpec::Args(args) = lorax_cmd(&opts(), Path::new("/work/x86_64/buildinstall"))
        else {
            panic!("expected args")
        };
        assert_eq!(args[0], "lorax");
        assert!(args.contains(&"--source=file:///work/x86_64/repo".to_string()));
        assert!(args.contains(&"--isfinal".to_string()));
        assert!(args.contains(&"--volid=Fedora-21 x86_64".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/work/x86_64/buildinstall"));
    }

    #[test]
    fn test_buildinstall_cmd() {
        let CommandSpec::Args(args) =
            buildinstall_cmd(&opts(), Path::new("/work/x86_64/buildinstall"), None)
        else {
            panic!("expected args")
        };
        let release = args.iter().position(|a| a == "--release").unwrap();
        assert_eq!(args[release + 1], "redhat 21");
        assert!(args.contains(&"--final".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("file:///work/x86_64/repo"));
    }
}
