// src/compose.rs

//! Compose directory and run state
//!
//! A compose lives in `<target_dir>/<compose_id>`. The id is derived from
//! the product, the date, the compose type and a respin counter that is
//! bumped until an unused directory name is found, so ids are never
//! reused. `STATUS` moves from STARTED to FINISHED or DOOMED and can no
//! longer change once FINISHED.

use crate::config::ComposeConf;
use crate::error::{Error, Result};
use crate::metadata::manifest::{ImageManifest, ManifestCompose, RpmManifest, read_json, write_json};
use crate::paths::{ComposeIdentity, EnsureDir, Paths};
use crate::scm::{self, ScmSource};
use crate::variants::{self, Variant, VariantForest, VariantType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const STATUS_STARTED: &str = "STARTED";
pub const STATUS_FINISHED: &str = "FINISHED";
pub const STATUS_DOOMED: &str = "DOOMED";

const KNOWN_STATUSES: &[&str] = &[STATUS_STARTED, STATUS_FINISHED, STATUS_DOOMED];

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::Display,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ComposeType {
    #[default]
    Production,
    Test,
    Nightly,
    Ci,
}

impl ComposeType {
    /// Suffix placed between the date and the respin
    pub fn suffix(self) -> &'static str {
        match self {
            ComposeType::Production => "",
            ComposeType::Test => ".t",
            ComposeType::Nightly => ".n",
            ComposeType::Ci => ".ci",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRelease {
    pub name: String,
    pub short: String,
    pub version: String,
    #[serde(default)]
    pub is_layered: bool,
}

/// Identity of a compose, persisted as `work/global/composeinfo-base.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeInfo {
    pub id: String,
    pub date: String,
    #[serde(rename = "type")]
    pub compose_type: ComposeType,
    pub respin: u32,
    pub label: Option<String>,
    pub product: ProductRelease,
    pub base_product: Option<ProductRelease>,
}

impl ComposeInfo {
    /// Product identity from the configuration; the id is filled in for respin 0
    pub fn from_conf(
        conf: &ComposeConf,
        compose_type: ComposeType,
        label: Option<&str>,
        date: &str,
    ) -> Result<Self> {
        let is_layered = conf.get_bool("product_is_layered", false);
        let product = ProductRelease {
            name: conf.require_str("product_name")?.to_string(),
            short: conf.require_str("product_short")?.to_string(),
            version: conf.require_str("product_version")?.to_string(),
            is_layered,
        };
        let base_product = if is_layered {
            Some(ProductRelease {
                name: conf.require_str("base_product_name")?.to_string(),
                short: conf.require_str("base_product_short")?.to_string(),
                version: conf.require_str("base_product_version")?.to_string(),
                is_layered: false,
            })
        } else {
            None
        };
        let mut info = Self {
            id: String::new(),
            date: date.to_string(),
            compose_type,
            respin: 0,
            label: label.map(str::to_string),
            product,
            base_product,
        };
        info.id = info.compose_id();
        Ok(info)
    }

    /// `<short>-<version>[-<base_short>-<base_version>]-<date><suffix>.<respin>`
    pub fn compose_id(&self) -> String {
        let mut id = format!("{}-{}", self.product.short, self.product.version);
        if let Some(base) = &self.base_product {
            id.push_str(&format!("-{}-{}", base.short, base.version));
        }
        format!("{}-{}{}.{}", id, self.date, self.compose_type.suffix(), self.respin)
    }

    pub fn set_respin(&mut self, respin: u32) {
        self.respin = respin;
        self.id = self.compose_id();
    }

    pub fn identity(&self) -> ComposeIdentity {
        ComposeIdentity {
            compose_id: self.id.clone(),
            date: self.date.clone(),
            type_suffix: self.compose_type.suffix().to_string(),
            respin: self.respin,
            product_short: self.product.short.clone(),
            product_version: self.product.version.clone(),
        }
    }

    pub fn manifest_compose(&self) -> ManifestCompose {
        ManifestCompose {
            id: self.id.clone(),
            date: self.date.clone(),
            compose_type: self.compose_type.to_string(),
            respin: self.respin,
        }
    }
}

pub fn composeinfo_base_path(topdir: &Path) -> PathBuf {
    topdir.join("work").join("global").join("composeinfo-base.json")
}

/// Allocate a new compose directory under `target_dir`
///
/// The respin is incremented until the directory can be created, so two
/// concurrent invocations never share a compose.
pub fn create_compose_dir(
    target_dir: &Path,
    conf: &ComposeConf,
    compose_type: ComposeType,
    label: Option<&str>,
    date: Option<&str>,
) -> Result<PathBuf> {
    let today = chrono::Local::now().format("%Y%m%d").to_string();
    let mut info = ComposeInfo::from_conf(conf, compose_type, label, date.unwrap_or(&today))?;
    std::fs::create_dir_all(target_dir).map_err(|e| Error::io_path(target_dir, e))?;

    let topdir = loop {
        let candidate = target_dir.join(&info.id);
        match std::fs::create_dir(&candidate) {
            Ok(()) => break candidate,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!("Compose directory {} exists, trying next respin", candidate.display());
                info.set_respin(info.respin + 1);
            }
            Err(e) => return Err(Error::io_path(&candidate, e)),
        }
    };

    let id_file = topdir.join("COMPOSE_ID");
    std::fs::write(&id_file, &info.id).map_err(|e| Error::io_path(&id_file, e))?;
    write_json(&composeinfo_base_path(&topdir), &info)?;
    info!("Created compose directory {}", topdir.display());
    Ok(topdir)
}

/// Most recent FINISHED or DOOMED compose of the product in `dirs`
///
/// Compose names sort by date and respin, so the lexicographically last
/// match wins. Symlinks are ignored.
pub fn find_old_compose(
    dirs: &[PathBuf],
    product_short: &str,
    product_version: &str,
    base_product: Option<(&str, &str)>,
) -> Option<PathBuf> {
    let mut pattern = format!("{}-{}", product_short, product_version);
    if let Some((short, version)) = base_product {
        pattern.push_str(&format!("-{}-{}", short, version));
    }

    let mut composes: Vec<(String, PathBuf)> = Vec::new();
    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&pattern) {
                continue;
            }
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_symlink() || !file_type.is_dir() {
                continue;
            }
            let Ok(status) = std::fs::read_to_string(path.join("STATUS")) else {
                continue;
            };
            if matches!(status.trim(), STATUS_FINISHED | STATUS_DOOMED) {
                let path = std::path::absolute(&path).unwrap_or(path);
                composes.push((name, path));
            }
        }
    }
    composes.sort();
    composes.pop().map(|(_, path)| path)
}

/// Invocation options of a compose run
#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    pub debug: bool,
    pub supported: bool,
    pub skip_phases: Vec<String>,
    pub just_phases: Vec<String>,
    pub old_composes: Vec<PathBuf>,
    pub koji_event: Option<u64>,
}

fn poisoned(what: &str) -> Error {
    Error::Worker {
        pool: "compose".to_string(),
        reason: format!("{} lock poisoned", what),
    }
}

/// One compose run
///
/// Shared by every phase. The variant tree is read once by
/// [`Compose::read_variants`]; the manifests are mutated from worker
/// threads through [`Compose::rpms`] and [`Compose::images`].
pub struct Compose {
    pub conf: ComposeConf,
    pub topdir: PathBuf,
    pub info: ComposeInfo,
    pub paths: Paths,
    pub debug: bool,
    pub supported: bool,
    pub skip_phases: Vec<String>,
    pub just_phases: Vec<String>,
    pub old_composes: Vec<PathBuf>,
    pub koji_event: Option<u64>,
    variants: VariantForest,
    images: Mutex<ImageManifest>,
    rpms: Mutex<RpmManifest>,
}

impl std::fmt::Debug for Compose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compose")
            .field("compose_id", &self.info.id)
            .field("topdir", &self.topdir)
            .field("debug", &self.debug)
            .field("supported", &self.supported)
            .finish_non_exhaustive()
    }
}

impl Compose {
    /// Open an existing compose directory created by [`create_compose_dir`]
    pub fn open(conf: ComposeConf, topdir: &Path, opts: ComposeOptions) -> Result<Self> {
        let topdir = std::path::absolute(topdir).map_err(|e| Error::io_path(topdir, e))?;
        let info: ComposeInfo = read_json(&composeinfo_base_path(&topdir))?;
        let paths = Paths::new(
            &topdir,
            info.identity(),
            conf.get_bool("create_optional_isos", false),
        );

        let supported = opts.supported
            || info
                .label
                .as_deref()
                .is_some_and(|label| label.starts_with("RC-"));
        if supported && !opts.supported {
            info!("Automatically setting 'supported' flag for a Release Candidate ({:?}) compose.", info.label);
        }

        let images_path = paths.compose.metadata(Some("images.json"));
        let images = if opts.debug && images_path.is_file() {
            info!("[SKIP ] Loading image manifest from {}", images_path.display());
            ImageManifest::load(&images_path)?
        } else {
            ImageManifest::new(info.manifest_compose())
        };
        let rpms = RpmManifest::new(info.manifest_compose());

        Ok(Self {
            conf,
            topdir,
            paths,
            debug: opts.debug,
            supported,
            skip_phases: opts.skip_phases,
            just_phases: opts.just_phases,
            old_composes: opts.old_composes,
            koji_event: opts.koji_event,
            variants: VariantForest::default(),
            images: Mutex::new(images),
            rpms: Mutex::new(rpms),
            info,
        })
    }

    pub fn compose_id(&self) -> &str {
        &self.info.id
    }

    pub fn has_comps(&self) -> bool {
        self.conf.contains("comps_file")
    }

    fn tree_arches(&self) -> Option<Vec<String>> {
        let arches = self.conf.get_str_list("tree_arches");
        (!arches.is_empty()).then_some(arches)
    }

    /// Fetch `variants_file` into the work tree and parse it
    pub fn read_variants(&mut self) -> Result<()> {
        let variants_file = self.paths.work.variants_file().ensure_parent()?;
        let log_file = self.log_file(None, "variants")?;

        if self.debug && variants_file.is_file() {
            info!("[SKIP ] Writing variants file: {}", variants_file.display());
        } else {
            let source = ScmSource::from_conf(&self.conf, "variants_file", "file")?
                .ok_or_else(|| Error::Config(vec!["Config option not set: variants_file".to_string()]))?;
            let tmp_dir = tempfile::Builder::new()
                .prefix("variants_file_")
                .tempdir_in(self.paths.work.topdir(None))
                .map_err(Error::Io)?;
            let fetched = scm::get_file_from_scm(&source, tmp_dir.path(), Some(&log_file))?;
            let fetched = fetched
                .first()
                .ok_or_else(|| Error::NotFound("variants file".to_string()))?;
            std::fs::copy(fetched, &variants_file).map_err(|e| Error::io_path(&variants_file, e))?;
            info!("Writing variants file: {}", variants_file.display());
        }

        let content =
            std::fs::read_to_string(&variants_file).map_err(|e| Error::io_path(&variants_file, e))?;
        let tree_arches = self.tree_arches();
        self.variants = variants::parse_variants(&content, tree_arches.as_deref())?;
        Ok(())
    }

    /// Use an already parsed variant tree
    pub fn set_variants(&mut self, variants: VariantForest) {
        self.variants = variants;
    }

    pub fn variants(&self) -> &VariantForest {
        &self.variants
    }

    pub fn variant(&self, uid: &str) -> Option<&Variant> {
        self.variants.by_uid(uid)
    }

    pub fn parent_of(&self, variant: &Variant) -> Option<&Variant> {
        self.variants.parent_of(variant)
    }

    /// Sorted, deduplicated variants of the given types (all when empty)
    pub fn get_variants(&self, types: &[VariantType], arch: Option<&str>, recursive: bool) -> Vec<&Variant> {
        self.variants.get_variants(types, arch, recursive)
    }

    /// Sorted union of variant arches, restricted to `tree_arches`
    pub fn get_arches(&self) -> Vec<String> {
        let tree_arches = self.tree_arches();
        self.variants
            .arches()
            .into_iter()
            .filter(|arch| tree_arches.as_ref().is_none_or(|allowed| allowed.contains(arch)))
            .collect()
    }

    fn status_path(&self) -> PathBuf {
        self.topdir.join("STATUS")
    }

    /// Current status, `None` before the first write
    pub fn get_status(&self) -> Option<String> {
        std::fs::read_to_string(self.status_path())
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// Write `STATUS`; writing the current status again is a no-op and a
    /// FINISHED compose can no longer change
    pub fn write_status(&self, status: &str) -> Result<()> {
        let status = status.trim().to_uppercase();
        if !KNOWN_STATUSES.contains(&status.as_str()) {
            warn!("Writing nonstandard compose status: {}", status);
        }
        let old_status = self.get_status();
        if old_status.as_deref() == Some(status.as_str()) {
            return Ok(());
        }
        if old_status.as_deref() == Some(STATUS_FINISHED) {
            return Err(Error::Compose(format!(
                "Could not modify a FINISHED compose: {}",
                self.topdir.display()
            )));
        }
        let path = self.status_path();
        std::fs::write(&path, format!("{}\n", status)).map_err(|e| Error::io_path(&path, e))
    }

    /// Log file path with its directory created
    pub fn log_file(&self, arch: Option<&str>, name: &str) -> Result<PathBuf> {
        self.paths.log.log_file(arch, name).ensure_parent()
    }

    /// Most recent finished compose of the same product in `old_composes`
    pub fn find_old_compose(&self) -> Option<PathBuf> {
        let base = self
            .info
            .base_product
            .as_ref()
            .map(|b| (b.short.as_str(), b.version.as_str()));
        find_old_compose(
            &self.old_composes,
            &self.info.product.short,
            &self.info.product.version,
            base,
        )
    }

    pub fn rpms(&self) -> Result<MutexGuard<'_, RpmManifest>> {
        self.rpms.lock().map_err(|_| poisoned("rpm manifest"))
    }

    pub fn images(&self) -> Result<MutexGuard<'_, ImageManifest>> {
        self.images.lock().map_err(|_| poisoned("image manifest"))
    }

    pub fn write_rpm_manifest(&self) -> Result<PathBuf> {
        let path = self.paths.compose.metadata(Some("rpms.json"));
        self.rpms()?.dump(&path)?;
        Ok(path)
    }

    pub fn write_image_manifest(&self) -> Result<PathBuf> {
        let path = self.paths.compose.metadata(Some("images.json"));
        self.images()?.dump(&path)?;
        Ok(path)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn conf(extra: &str) -> ComposeConf {
        let text = format!(
            "product_name = \"Fedora\"\nproduct_short = \"F\"\nproduct_version = \"21\"\n{}",
            extra
        );
        ComposeConf::parse(&text, "/tmp").unwrap()
    }

    #[test]
    fn test_compose_id_and_respin() {
        let dir = tempdir().unwrap();
        let conf = conf("");
        let first = create_compose_dir(dir.path(), &conf, ComposeType::Nightly, None, Some("20140101")).unwrap();
        let second = create_compose_dir(dir.path(), &conf, ComposeType::Nightly, None, Some("20140101")).unwrap();
        assert_eq!(first.file_name().unwrap(), "F-21-20140101.n.0");
        assert_eq!(second.file_name().unwrap(), "F-21-20140101.n.1");
        assert_eq!(std::fs::read_to_string(second.join("COMPOSE_ID")).unwrap(), "F-21-20140101.n.1");

        let info: ComposeInfo = read_json(&composeinfo_base_path(&second)).unwrap();
        assert_eq!(info.respin, 1);
        assert_eq!(info.compose_type, ComposeType::Nightly);
    }

    #[test]
    fn test_layered_compose_id() {
        let conf = conf(
            "product_is_layered = true\nbase_product_name = \"RHEL\"\nbase_product_short = \"RHEL\"\nbase_product_version = \"7\"\n",
        );
        let info = ComposeInfo::from_conf(&conf, ComposeType::Ci, None, "20150505").unwrap();
        assert_eq!(info.id, "F-21-RHEL-7-20150505.ci.0");
    }

    #[test]
    fn test_rc_label_forces_supported() {
        let dir = tempdir().unwrap();
        let conf = conf("");
        let topdir =
            create_compose_dir(dir.path(), &conf, ComposeType::Production, Some("RC-1.0"), None).unwrap();
        let compose = Compose::open(conf, &topdir, ComposeOptions::default()).unwrap();
        assert!(compose.supported);
    }

    #[test]
    fn test_status_transitions() {
        let dir = tempdir().unwrap();
        let conf = conf("");
        let topdir = create_compose_dir(dir.path(), &conf, ComposeType::Test, None, None).unwrap();
        let compose = Compose::open(conf, &topdir, ComposeOptions::default()).unwrap();

        assert_eq!(compose.get_status(), None);
        compose.write_status("STARTED").unwrap();
        compose.write_status("STARTED").unwrap();
        assert_eq!(compose.get_status().as_deref(), Some("STARTED"));
        compose.write_status("FINISHED").unwrap();
        compose.write_status("FINISHED").unwrap();

        let err = compose.write_status("DOOMED").unwrap_err();
        assert!(err.to_string().contains("Could not modify a FINISHED compose"));
        assert_eq!(std::fs::read_to_string(topdir.join("STATUS")).unwrap(), "FINISHED\n");
    }

    #[test]
    fn test_find_old_compose() {
        let dir = tempdir().unwrap();
        for (name, status) in [
            ("F-21-20140101.0", Some("FINISHED")),
            ("F-21-20140102.0", Some("DOOMED")),
            ("F-21-20140103.0", Some("STARTED")),
            ("F-21-20140104.0", None),
            ("RHEL-7-20140105.0", Some("FINISHED")),
        ] {
            let path = dir.path().join(name);
            std::fs::create_dir(&path).unwrap();
            if let Some(status) = status {
                std::fs::write(path.join("STATUS"), status).unwrap();
            }
        }
        let found = find_old_compose(&[dir.path().to_path_buf()], "F", "21", None).unwrap();
        assert_eq!(found.file_name().unwrap(), "F-21-20140102.0");
        assert!(find_old_compose(&[dir.path().to_path_buf()], "F", "22", None).is_none());
    }

    #[test]
    fn test_debug_shows_identity() {
        let (_dir, compose) = testing::compose_with(
            "",
            r#"<variants><variant id="Server" name="Server" type="variant"><arches><arch>x86_64</arch></arches></variant></variants>"#,
        );
        let text = format!("{:?}", compose);
        assert!(text.starts_with("Compose {"));
        assert!(text.contains("F-21-20150101.t.0"));
        assert!(text.ends_with(".. }"));
    }
}
