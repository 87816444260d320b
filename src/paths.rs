// src/paths.rs

//! Canonical on-disk layout of a compose
//!
//! Every function here is pure: it maps (arch, variant, artifact) to a
//! path and never touches the filesystem. Callers that need the directory
//! to exist chain [`EnsureDir::ensure_dir`] or [`EnsureDir::ensure_parent`].
//!
//! ```text
//! <topdir>/
//!   COMPOSE_ID  STATUS
//!   logs/<arch|global>/<name>.<arch>.log
//!   work/<arch|global>/...
//!   compose/<variant uid>/<arch>/{os,debug,iso,jigdo}
//!   compose/metadata/
//! ```

use crate::error::{Error, Result};
use crate::variants::{Variant, VariantType};
use std::path::{Path, PathBuf};

/// Directory creation for computed paths
pub trait EnsureDir: Sized {
    /// Create the directory (and parents) and hand the path back
    fn ensure_dir(self) -> Result<Self>;
    /// Create the parent directory of a file path
    fn ensure_parent(self) -> Result<Self>;
}

impl EnsureDir for PathBuf {
    fn ensure_dir(self) -> Result<Self> {
        std::fs::create_dir_all(&self).map_err(|e| Error::io_path(&self, e))?;
        Ok(self)
    }

    fn ensure_parent(self) -> Result<Self> {
        if let Some(parent) = self.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_path(parent, e))?;
        }
        Ok(self)
    }
}

/// "src" and "source" both name the source tree
pub fn normalize_arch(arch: &str) -> &str {
    if arch == "src" { "source" } else { arch }
}

fn is_source(arch: &str) -> bool {
    matches!(arch, "src" | "source")
}

/// Media kinds an image path may be built for
pub const DISC_TYPES: &[&str] = &["cd", "dvd", "ec2", "live", "boot"];

/// Identity pieces needed to name images
#[derive(Debug, Clone, Default)]
pub struct ComposeIdentity {
    pub compose_id: String,
    pub date: String,
    pub type_suffix: String,
    pub respin: u32,
    pub product_short: String,
    pub product_version: String,
}

impl ComposeIdentity {
    /// Compose id as seen by `variant`; a layered product is named as if
    /// it had been composed on its own on top of this product
    pub fn for_variant(&self, variant: &Variant) -> String {
        match (&variant.variant_type, &variant.product) {
            (VariantType::LayeredProduct, Some(product)) => format!(
                "{}-{}-{}-{}-{}{}.{}",
                product.short,
                product.version,
                self.product_short,
                crate::util::get_major_version(&self.product_version),
                self.date,
                self.type_suffix,
                self.respin
            ),
            _ => self.compose_id.clone(),
        }
    }
}

/// All path families of one compose
#[derive(Debug, Clone)]
pub struct Paths {
    pub log: LogPaths,
    pub work: WorkPaths,
    pub compose: ComposePaths,
}

impl Paths {
    pub fn new(topdir: &Path, identity: ComposeIdentity, create_optional_isos: bool) -> Self {
        Self {
            log: LogPaths {
                topdir: topdir.to_path_buf(),
            },
            work: WorkPaths {
                topdir: topdir.to_path_buf(),
                identity: identity.clone(),
                create_optional_isos,
            },
            compose: ComposePaths {
                topdir: topdir.to_path_buf(),
                identity,
                create_optional_isos,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogPaths {
    topdir: PathBuf,
}

impl LogPaths {
    /// `logs/<arch>`; `None` means `global`
    pub fn topdir(&self, arch: Option<&str>) -> PathBuf {
        self.topdir.join("logs").join(arch.unwrap_or("global"))
    }

    /// `logs/<arch>/<name>.<arch>.log`
    pub fn log_file(&self, arch: Option<&str>, name: &str) -> PathBuf {
        let arch = arch.unwrap_or("global");
        let name = name.strip_suffix(".log").unwrap_or(name);
        self.topdir(Some(arch)).join(format!("{}.{}.log", name, arch))
    }
}

#[derive(Debug, Clone)]
pub struct WorkPaths {
    topdir: PathBuf,
    identity: ComposeIdentity,
    create_optional_isos: bool,
}

fn with_variant(variant: Option<&Variant>, arch: &str) -> String {
    match variant {
        Some(v) => format!("{}.{}", v.uid, arch),
        None => arch.to_string(),
    }
}

impl WorkPaths {
    /// `work/<arch>`; `None` means `global`
    pub fn topdir(&self, arch: Option<&str>) -> PathBuf {
        self.topdir.join("work").join(arch.unwrap_or("global"))
    }

    pub fn global_dir(&self) -> PathBuf {
        self.topdir(None)
    }

    pub fn variants_file(&self) -> PathBuf {
        self.global_dir().join("variants.xml")
    }

    /// `work/<arch>/comps/comps-<arch>.xml` or `comps-<uid>.<arch>.xml`
    pub fn comps(&self, arch: Option<&str>, variant: Option<&Variant>) -> PathBuf {
        let arch = arch.unwrap_or("global");
        self.topdir(Some(arch))
            .join("comps")
            .join(format!("comps-{}.xml", with_variant(variant, arch)))
    }

    /// Solver input document
    pub fn solver_conf(&self, arch: Option<&str>, variant: Option<&Variant>) -> PathBuf {
        let arch = arch.unwrap_or("global");
        self.topdir(Some(arch))
            .join("solver")
            .join(format!("{}.conf", with_variant(variant, arch)))
    }

    pub fn solver_log(&self, arch: Option<&str>, variant: Option<&Variant>) -> PathBuf {
        self.solver_conf(arch, variant).with_extension("log")
    }

    /// Solver cache; per-variant to keep equally named repos apart
    pub fn solver_cache_dir(&self, arch: &str, variant: Option<&Variant>) -> PathBuf {
        let path = self.topdir(Some(arch)).join("solver-cache");
        match variant {
            Some(v) => path.join(&v.uid),
            None => path,
        }
    }

    pub fn comps_repo(&self, arch: Option<&str>) -> PathBuf {
        self.topdir(arch).join("comps_repo")
    }

    pub fn arch_repo(&self, arch: Option<&str>) -> PathBuf {
        self.topdir(arch).join("repo")
    }

    /// `work/<arch>/package_list/[<uid>.]<arch>[.<type>].conf`
    pub fn package_list(
        &self,
        arch: Option<&str>,
        variant: Option<&Variant>,
        pkg_type: Option<&str>,
    ) -> PathBuf {
        let arch = arch.unwrap_or("global");
        let mut name = with_variant(variant, arch);
        if let Some(pkg_type) = pkg_type {
            name.push('.');
            name.push_str(pkg_type);
        }
        name.push_str(".conf");
        self.topdir(Some(arch)).join("package_list").join(name)
    }

    pub fn solver_download_dir(&self, arch: &str) -> PathBuf {
        self.topdir(Some(arch)).join("solver_download")
    }

    /// Flat pool of downloaded packages for the repos package source
    pub fn download_dir(&self) -> PathBuf {
        self.global_dir().join("download")
    }

    pub fn buildinstall_dir(&self, arch: &str) -> Result<PathBuf> {
        if arch == "global" {
            return Err(Error::InvalidValue(
                "Global buildinstall dir makes no sense.".to_string(),
            ));
        }
        Ok(self.topdir(Some(arch)).join("buildinstall"))
    }

    pub fn extra_files_dir(&self, arch: &str, variant: &Variant) -> Result<PathBuf> {
        if arch == "global" {
            return Err(Error::InvalidValue(
                "Global extra files dir makes no sense.".to_string(),
            ));
        }
        Ok(self
            .topdir(Some(arch))
            .join(&variant.uid)
            .join("extra-files"))
    }

    pub fn repo_package_list(&self, arch: &str, variant: &Variant, pkg_type: Option<&str>) -> PathBuf {
        let mut name = format!("{}.{}", variant.uid, arch);
        if let Some(pkg_type) = pkg_type {
            name.push('.');
            name.push_str(pkg_type);
        }
        name.push_str(".conf");
        self.topdir(Some(arch)).join("repo_package_list").join(name)
    }

    pub fn product_img(&self, variant: &Variant) -> PathBuf {
        self.global_dir()
            .join(format!("product-{}.img", variant.uid))
    }

    /// Staging directory for one ISO, named after the final image
    pub fn iso_dir(
        &self,
        arch: &str,
        variant: &Variant,
        disc_type: &str,
        disc_num: Option<u32>,
    ) -> Result<PathBuf> {
        let compose = ComposePaths {
            topdir: self.topdir.clone(),
            identity: self.identity.clone(),
            create_optional_isos: true,
        };
        let name = compose.iso_file_name(arch, variant, disc_type, disc_num, ".iso")?;
        Ok(self.topdir(Some(arch)).join("iso").join(name))
    }

    pub fn tmp_dir(&self, arch: &str, variant: Option<&Variant>) -> PathBuf {
        let name = match variant {
            Some(v) => format!("tmp-{}", v.uid),
            None => "tmp".to_string(),
        };
        self.topdir(Some(arch)).join(name)
    }

    /// Product certificate staged for modifyrepo, which keeps the file name
    pub fn product_id(&self, arch: &str, variant: &Variant) -> PathBuf {
        self.topdir(Some(arch))
            .join("product_id")
            .join(format!("{}.{}.pem", variant.uid, arch))
            .join("productid")
    }

    pub fn create_optional_isos(&self) -> bool {
        self.create_optional_isos
    }
}

#[derive(Debug, Clone)]
pub struct ComposePaths {
    topdir: PathBuf,
    identity: ComposeIdentity,
    create_optional_isos: bool,
}

impl ComposePaths {
    /// `compose/`
    pub fn root(&self) -> PathBuf {
        self.topdir.join("compose")
    }

    /// `compose/<uid>/<arch>`; addons live inside their parent's tree
    pub fn topdir(&self, arch: &str, variant: &Variant) -> PathBuf {
        let uid = match (&variant.variant_type, &variant.parent_uid) {
            (VariantType::Addon, Some(parent)) => parent.as_str(),
            _ => variant.uid.as_str(),
        };
        self.root().join(uid).join(normalize_arch(arch))
    }

    /// `os` for binary arches, `tree` for sources
    pub fn tree_dir(&self, arch: &str, variant: &Variant) -> PathBuf {
        let name = if is_source(arch) { "tree" } else { "os" };
        self.topdir(arch, variant).join(name)
    }

    pub fn os_tree(&self, arch: &str, variant: &Variant) -> PathBuf {
        self.tree_dir(arch, variant)
    }

    pub fn repository(&self, arch: &str, variant: &Variant) -> PathBuf {
        if variant.is_type(VariantType::Addon) {
            self.packages(arch, variant)
        } else {
            self.tree_dir(arch, variant)
        }
    }

    pub fn packages(&self, arch: &str, variant: &Variant) -> PathBuf {
        let tree = self.tree_dir(arch, variant);
        if variant.is_type(VariantType::Addon) {
            tree.join("addons").join(&variant.id)
        } else {
            tree.join("Packages")
        }
    }

    pub fn debug_topdir(&self, arch: &str, variant: &Variant) -> PathBuf {
        self.topdir(arch, variant).join("debug")
    }

    pub fn debug_tree(&self, arch: &str, variant: &Variant) -> PathBuf {
        self.debug_topdir(arch, variant).join("tree")
    }

    /// `None` for sources, which have no debug tree
    pub fn debug_packages(&self, arch: &str, variant: &Variant) -> Option<PathBuf> {
        if is_source(arch) {
            return None;
        }
        let tree = self.debug_tree(arch, variant);
        Some(if variant.is_type(VariantType::Addon) {
            tree.join("addons").join(&variant.id)
        } else {
            tree.join("Packages")
        })
    }

    pub fn debug_repository(&self, arch: &str, variant: &Variant) -> Option<PathBuf> {
        if is_source(arch) {
            return None;
        }
        let tree = self.debug_tree(arch, variant);
        Some(if variant.is_type(VariantType::Addon) {
            tree.join("addons").join(&variant.id)
        } else {
            tree
        })
    }

    fn has_media(&self, variant: &Variant) -> bool {
        match variant.variant_type {
            VariantType::Addon => false,
            VariantType::Optional => self.create_optional_isos,
            _ => true,
        }
    }

    /// ISO directory; addons never get media, optional only on request
    pub fn iso_dir(&self, arch: &str, variant: &Variant) -> Option<PathBuf> {
        if !self.has_media(variant) {
            return None;
        }
        Some(self.topdir(arch, variant).join("iso"))
    }

    /// File name of an image, e.g. `RHEL-7.0-20120127.0-Server-x86_64-dvd1.iso`
    pub fn iso_file_name(
        &self,
        arch: &str,
        variant: &Variant,
        disc_type: &str,
        disc_num: Option<u32>,
        suffix: &str,
    ) -> Result<String> {
        if !DISC_TYPES.contains(&disc_type) {
            return Err(Error::InvalidValue(format!(
                "Unsupported disc type: {}",
                disc_type
            )));
        }
        let compose_id = self.identity.for_variant(variant);
        let uid = match (&variant.variant_type, &variant.parent_uid) {
            (VariantType::LayeredProduct, Some(parent)) => parent.as_str(),
            _ => variant.uid.as_str(),
        };
        let num = disc_num.map(|n| n.to_string()).unwrap_or_default();
        Ok(format!(
            "{}-{}-{}-{}{}{}",
            compose_id,
            uid,
            normalize_arch(arch),
            disc_type,
            num,
            suffix
        ))
    }

    /// Full image path, `None` when the variant has no media
    pub fn iso_path(
        &self,
        arch: &str,
        variant: &Variant,
        disc_type: &str,
        disc_num: Option<u32>,
        suffix: &str,
    ) -> Result<Option<PathBuf>> {
        let name = self.iso_file_name(arch, variant, disc_type, disc_num, suffix)?;
        Ok(self.iso_dir(arch, variant).map(|dir| dir.join(name)))
    }

    /// Create the ISO directory, optionally as a symlink into `symlink_to`
    ///
    /// An existing symlink is accepted only if it already points at the
    /// expected target.
    pub fn ensure_iso_dir(
        &self,
        arch: &str,
        variant: &Variant,
        symlink_to: Option<&Path>,
    ) -> Result<Option<PathBuf>> {
        let Some(path) = self.iso_dir(arch, variant) else {
            return Ok(None);
        };
        let Some(symlink_to) = symlink_to else {
            return path.ensure_dir().map(Some);
        };

        let relative = path.strip_prefix(&self.topdir).unwrap_or(&path);
        let target = symlink_to.join(&self.identity.compose_id).join(relative);
        target.clone().ensure_dir()?;
        path.clone().ensure_parent()?;

        match std::os::unix::fs::symlink(&target, &path) {
            Ok(()) => Ok(Some(path)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let points_to = std::fs::read_link(&path).ok();
                if points_to.as_deref() == Some(target.as_path()) {
                    Ok(Some(path))
                } else {
                    Err(Error::Compose(format!(
                        "Symlink pointing to '{}' expected: {}",
                        target.display(),
                        path.display()
                    )))
                }
            }
            Err(e) => Err(Error::io_path(&path, e)),
        }
    }

    pub fn jigdo_dir(&self, arch: &str, variant: &Variant) -> Option<PathBuf> {
        if !self.has_media(variant) {
            return None;
        }
        Some(self.topdir(arch, variant).join("jigdo"))
    }

    /// `compose/metadata[/<file>]`
    pub fn metadata(&self, file_name: Option<&str>) -> PathBuf {
        let dir = self.root().join("metadata");
        match file_name {
            Some(name) => dir.join(name),
            None => dir,
        }
    }

    /// `path` relative to `compose/`, as recorded in metadata
    pub fn relative(&self, path: &Path) -> PathBuf {
        let root = self.root();
        path.strip_prefix(&root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variants::ProductInfo;

    fn identity() -> ComposeIdentity {
        ComposeIdentity {
            compose_id: "RHEL-7.0-20120127.0".to_string(),
            date: "20120127".to_string(),
            type_suffix: String::new(),
            respin: 0,
            product_short: "RHEL".to_string(),
            product_version: "7.0".to_string(),
        }
    }

    fn forest() -> Variant {
        let mut server =
            Variant::new("Server", "Server", VariantType::Variant, vec!["x86_64".into()], vec![], vec![])
                .unwrap();
        let addon =
            Variant::new("LoadBalancer", "LB", VariantType::Addon, vec!["x86_64".into()], vec![], vec![])
                .unwrap();
        let optional =
            Variant::new("optional", "optional", VariantType::Optional, vec!["x86_64".into()], vec![], vec![])
                .unwrap();
        let mut sap =
            Variant::new("SAP", "SAP", VariantType::LayeredProduct, vec!["x86_64".into()], vec![], vec![])
                .unwrap();
        sap.product = Some(ProductInfo {
            name: "SAP".into(),
            short: "SAP".into(),
            version: "1.0".into(),
        });
        server.add_variant(addon).unwrap();
        server.add_variant(optional).unwrap();
        server.add_variant(sap).unwrap();
        server
    }

    #[test]
    fn test_log_file() {
        let paths = Paths::new(Path::new("/c"), identity(), false);
        assert_eq!(
            paths.log.log_file(Some("x86_64"), "createrepo.log"),
            PathBuf::from("/c/logs/x86_64/createrepo.x86_64.log")
        );
        assert_eq!(
            paths.log.log_file(None, "init"),
            PathBuf::from("/c/logs/global/init.global.log")
        );
    }

    #[test]
    fn test_work_paths() {
        let paths = Paths::new(Path::new("/c"), identity(), false);
        let server = forest();
        assert_eq!(
            paths.work.comps(Some("x86_64"), Some(&server)),
            PathBuf::from("/c/work/x86_64/comps/comps-Server.x86_64.xml")
        );
        assert_eq!(
            paths.work.solver_log(Some("x86_64"), Some(&server)),
            PathBuf::from("/c/work/x86_64/solver/Server.x86_64.log")
        );
        assert_eq!(
            paths.work.package_list(Some("x86_64"), Some(&server), Some("rpm")),
            PathBuf::from("/c/work/x86_64/package_list/Server.x86_64.rpm.conf")
        );
        assert_eq!(
            paths.work.product_id("x86_64", &server),
            PathBuf::from("/c/work/x86_64/product_id/Server.x86_64.pem/productid")
        );
        assert!(paths.work.buildinstall_dir("global").is_err());
    }

    #[test]
    fn test_addon_redirects_to_parent_tree() {
        let paths = Paths::new(Path::new("/c"), identity(), false);
        let server = forest();
        let addon = server.child("LoadBalancer").unwrap();
        assert_eq!(
            paths.compose.repository("x86_64", addon),
            PathBuf::from("/c/compose/Server/x86_64/os/addons/LoadBalancer")
        );
        assert_eq!(
            paths.compose.debug_packages("x86_64", addon),
            Some(PathBuf::from("/c/compose/Server/x86_64/debug/tree/addons/LoadBalancer"))
        );
        assert_eq!(paths.compose.iso_dir("x86_64", addon), None);
    }

    #[test]
    fn test_source_normalization() {
        let paths = Paths::new(Path::new("/c"), identity(), false);
        let server = forest();
        assert_eq!(
            paths.compose.packages("src", &server),
            PathBuf::from("/c/compose/Server/source/tree/Packages")
        );
        assert_eq!(paths.compose.debug_repository("source", &server), None);
    }

    #[test]
    fn test_iso_paths() {
        let paths = Paths::new(Path::new("/c"), identity(), false);
        let server = forest();
        assert_eq!(
            paths
                .compose
                .iso_path("x86_64", &server, "dvd", Some(1), ".iso")
                .unwrap(),
            Some(PathBuf::from(
                "/c/compose/Server/x86_64/iso/RHEL-7.0-20120127.0-Server-x86_64-dvd1.iso"
            ))
        );
        let optional = server.child("optional").unwrap();
        assert_eq!(
            paths.compose.iso_path("x86_64", optional, "dvd", Some(1), ".iso").unwrap(),
            None
        );
        let sap = server.child("SAP").unwrap();
        assert_eq!(
            paths.compose.iso_file_name("x86_64", sap, "dvd", None, ".iso").unwrap(),
            "SAP-1.0-RHEL-7-20120127.0-Server-x86_64-dvd.iso"
        );
        assert!(
            paths
                .compose
                .iso_path("x86_64", &server, "floppy", Some(1), ".iso")
                .is_err()
        );
    }

    #[test]
    fn test_ensure_iso_dir_symlink() {
        let tmp = tempfile::tempdir().unwrap();
        let top = tmp.path().join("compose-top");
        let elsewhere = tmp.path().join("isos");
        let paths = Paths::new(&top, identity(), false);
        let server = forest();
        let dir = paths
            .compose
            .ensure_iso_dir("x86_64", &server, Some(&elsewhere))
            .unwrap()
            .unwrap();
        assert!(std::fs::symlink_metadata(&dir).unwrap().file_type().is_symlink());
        // a second call accepts the existing, matching link
        assert!(
            paths
                .compose
                .ensure_iso_dir("x86_64", &server, Some(&elsewhere))
                .is_ok()
        );
    }
}
