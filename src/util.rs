// src/util.rs

//! Small helpers shared by the phases: package name classification,
//! NVRA parsing and ISO volume ids.

use crate::config::ComposeConf;
use crate::error::{Error, Result};
use crate::variants::{Variant, VariantType};
use std::fmt;

/// Maximum length of an ISO 9660 volume id
pub const VOLID_MAX_LEN: usize = 32;

/// Whether a package string (N.A, N-V-R.A or a file name) is a source package
pub fn pkg_is_srpm(pkg: &str) -> bool {
    [".src", ".nosrc", ".src.rpm", ".nosrc.rpm"]
        .iter()
        .any(|suffix| pkg.ends_with(suffix))
}

pub fn pkg_is_debug(pkg: &str) -> bool {
    !pkg_is_srpm(pkg) && pkg.contains("-debuginfo")
}

/// Binary package that is neither a source nor a debuginfo package
pub fn pkg_is_rpm(pkg: &str) -> bool {
    !pkg_is_srpm(pkg) && !pkg_is_debug(pkg)
}

/// Major component of a dotted version ("7.1" -> "7")
pub fn get_major_version(version: &str) -> String {
    version.split('.').next().unwrap_or(version).to_string()
}

/// Parsed `[epoch:]name-version-release.arch[.rpm]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nvra {
    pub name: String,
    pub epoch: Option<String>,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl fmt::Display for Nvra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}.{}", self.name, self.version, self.release, self.arch)
    }
}

impl Nvra {
    /// `name-[epoch:]version-release.arch`, epoch 0 when unset
    pub fn nevra(&self) -> String {
        format!(
            "{}-{}:{}-{}.{}",
            self.name,
            self.epoch.as_deref().unwrap_or("0"),
            self.version,
            self.release,
            self.arch
        )
    }
}

/// Parse a package identity; a leading directory and `.rpm` suffix are ignored
///
/// The epoch may be given as a `N:` prefix or a `:N` suffix.
pub fn parse_nvra(input: &str) -> Result<Nvra> {
    let base = input.rsplit('/').next().unwrap_or(input);
    let base = base.strip_suffix(".rpm").unwrap_or(base);

    let (mut epoch, mut rest) = (None, base);
    if let Some((e, r)) = rest.split_once(':') {
        if !e.contains('-') && !e.is_empty() {
            epoch = Some(e.to_string());
            rest = r;
        }
    }
    if let Some((r, e)) = rest.rsplit_once(':') {
        epoch = Some(e.to_string());
        rest = r;
    }

    let invalid = || Error::parse("NVRA", format!("not a valid package identity: {}", input));
    let (nvr, arch) = rest.rsplit_once('.').ok_or_else(invalid)?;
    let (nv, release) = nvr.rsplit_once('-').ok_or_else(invalid)?;
    let (name, version) = nv.rsplit_once('-').ok_or_else(invalid)?;
    if name.is_empty() || version.is_empty() || release.is_empty() || arch.is_empty() {
        return Err(invalid());
    }

    Ok(Nvra {
        name: name.to_string(),
        epoch,
        version: version.to_string(),
        release: release.to_string(),
        arch: arch.to_string(),
    })
}

/// Product identity used for volume ids
struct VolidProduct {
    short: String,
    version: String,
    is_layered: bool,
    base_short: String,
    base_version: String,
    variant_uid: Option<String>,
}

/// ISO volume id for `arch` and optionally `variant`, at most 32 characters
///
/// Addons live on their parent's media and have no volume id (`Ok(None)`).
/// Templates are tried from longest to shortest; layered products try the
/// variants carrying the base product first.
pub fn get_volid(
    conf: &ComposeConf,
    arch: &str,
    variant: Option<&Variant>,
    escape_spaces: bool,
) -> Result<Option<String>> {
    if variant.is_some_and(|v| v.is_type(VariantType::Addon)) {
        return Ok(None);
    }

    let product = match variant {
        Some(v) if v.is_type(VariantType::LayeredProduct) => {
            let info = v.product.as_ref().ok_or_else(|| {
                Error::VariantTree(format!("Layered product {} has no product info", v.uid))
            })?;
            VolidProduct {
                short: info.short.clone(),
                version: info.version.clone(),
                is_layered: true,
                base_short: conf.require_str("product_short")?.to_string(),
                base_version: get_major_version(conf.require_str("product_version")?),
                variant_uid: v.parent_uid.clone(),
            }
        }
        _ => VolidProduct {
            short: conf.require_str("product_short")?.to_string(),
            version: conf.require_str("product_version")?.to_string(),
            is_layered: conf.get_bool("product_is_layered", false),
            base_short: conf.get_str("base_product_short").unwrap_or_default().to_string(),
            base_version: conf.get_str("base_product_version").unwrap_or_default().to_string(),
            variant_uid: variant.map(|v| v.uid.clone()),
        },
    };

    let mut candidates: Vec<Option<String>> = Vec::new();
    let head = format!("{}-{}", product.short, product.version);
    let base = format!("{}-{}", product.base_short, product.base_version);
    if product.is_layered {
        candidates.push(
            product
                .variant_uid
                .as_ref()
                .map(|uid| format!("{} {} {}.{}", head, base, uid, arch)),
        );
        candidates.push(Some(format!("{} {} {}", head, base, arch)));
    }
    candidates.push(
        product
            .variant_uid
            .as_ref()
            .map(|uid| format!("{} {}.{}", head, uid, arch)),
    );
    candidates.push(Some(format!("{} {}", head, arch)));

    let mut volid = None;
    for candidate in candidates.into_iter().flatten() {
        let fits = candidate.len() <= VOLID_MAX_LEN;
        volid = Some(candidate);
        if fits {
            break;
        }
    }

    let volid = match volid {
        Some(v) if v.len() <= VOLID_MAX_LEN => v,
        _ => {
            return Err(Error::InvalidValue(format!(
                "Could not create volume ID <= {} characters",
                VOLID_MAX_LEN
            )));
        }
    };

    if escape_spaces {
        return Ok(Some(volid.replace(' ', "\\x20")));
    }
    Ok(Some(volid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variants::ProductInfo;

    fn conf(extra: &str) -> ComposeConf {
        let text = format!(
            "product_short = \"RHEL\"\nproduct_version = \"7.1\"\nproduct_is_layered = false\n{}",
            extra
        );
        ComposeConf::parse(&text, "/tmp").unwrap()
    }

    fn variant(id: &str, kind: VariantType) -> Variant {
        Variant::new(id, id, kind, vec!["x86_64".into()], vec![], vec![]).unwrap()
    }

    #[test]
    fn test_pkg_classification() {
        assert!(pkg_is_srpm("bash-4.2-1.src.rpm"));
        assert!(pkg_is_srpm("bash.nosrc"));
        assert!(!pkg_is_srpm("bash-4.2-1.x86_64.rpm"));
        assert!(pkg_is_debug("bash-debuginfo-4.2-1.x86_64.rpm"));
        assert!(!pkg_is_debug("bash-debuginfo-4.2-1.src.rpm"));
        assert!(pkg_is_rpm("bash-4.2-1.x86_64.rpm"));
    }

    #[test]
    fn test_parse_nvra() {
        let nvra = parse_nvra("/mnt/koji/glibc-common-2.17-55.el7.x86_64.rpm").unwrap();
        assert_eq!(nvra.name, "glibc-common");
        assert_eq!(nvra.version, "2.17");
        assert_eq!(nvra.release, "55.el7");
        assert_eq!(nvra.arch, "x86_64");
        assert_eq!(nvra.epoch, None);
        assert_eq!(nvra.to_string(), "glibc-common-2.17-55.el7.x86_64");

        let with_epoch = parse_nvra("1:bash-4.2-1.src").unwrap();
        assert_eq!(with_epoch.epoch.as_deref(), Some("1"));
        assert_eq!(with_epoch.nevra(), "bash-1:4.2-1.src");

        let suffix_epoch = parse_nvra("bash-4.2-1.x86_64:2").unwrap();
        assert_eq!(suffix_epoch.epoch.as_deref(), Some("2"));
        assert_eq!(suffix_epoch.arch, "x86_64");

        assert!(parse_nvra("bash").is_err());
    }

    #[test]
    fn test_volid_templates() {
        let c = conf("");
        assert_eq!(
            get_volid(&c, "x86_64", None, false).unwrap().as_deref(),
            Some("RHEL-7.1 x86_64")
        );
        let server = variant("Server", VariantType::Variant);
        assert_eq!(
            get_volid(&c, "x86_64", Some(&server), true).unwrap().as_deref(),
            Some("RHEL-7.1\\x20Server.x86_64")
        );
        let addon = variant("HA", VariantType::Addon);
        assert_eq!(get_volid(&c, "x86_64", Some(&addon), false).unwrap(), None);
    }

    #[test]
    fn test_volid_falls_back_to_shorter_template() {
        let c = conf("");
        let long = variant("ComputeNodeWithVeryLongName", VariantType::Variant);
        let volid = get_volid(&c, "x86_64", Some(&long), false).unwrap().unwrap();
        assert_eq!(volid, "RHEL-7.1 x86_64");
        assert!(volid.len() <= VOLID_MAX_LEN);
    }

    #[test]
    fn test_volid_layered_product_uses_parent_uid() {
        let c = conf("");
        let mut server = variant("Server", VariantType::Variant);
        let mut sap = variant("SAP", VariantType::LayeredProduct);
        sap.product = Some(ProductInfo {
            name: "SAP".into(),
            short: "SAP".into(),
            version: "1.0".into(),
        });
        server.add_variant(sap).unwrap();
        let sap = server.child("SAP").unwrap();
        assert_eq!(
            get_volid(&c, "x86_64", Some(sap), false).unwrap().as_deref(),
            Some("SAP-1.0 RHEL-7 Server.x86_64")
        );
    }

    #[test]
    fn test_volid_too_long_fails() {
        let c = ComposeConf::parse(
            "product_short = \"ExtremelyLongProductShortName\"\nproduct_version = \"10.0\"",
            "/tmp",
        )
        .unwrap();
        assert!(matches!(
            get_volid(&c, "x86_64", None, false),
            Err(Error::InvalidValue(_))
        ));
    }
}
