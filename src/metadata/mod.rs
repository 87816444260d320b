// src/metadata/mod.rs

//! Compose metadata
//!
//! Per-tree files (`.discinfo`, `media.repo`, `.treeinfo`) and the
//! compose-wide `composeinfo.json`. Addons have no tree of their own and
//! get none of the per-tree files.

pub mod checksum;
pub mod discinfo;
pub mod manifest;
pub mod treeinfo;

use crate::compose::{Compose, ProductRelease};
use crate::error::Result;
use crate::metadata::checksum::{ChecksumType, compute_file_checksums};
use crate::metadata::manifest::{MANIFEST_VERSION, ManifestHeader, write_json};
use crate::metadata::treeinfo::{IniDocument, TREEINFO_VERSION};
use crate::paths::EnsureDir;
use crate::util::get_major_version;
use crate::variants::{Variant, VariantType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Human readable tree description
///
/// `product_discinfo_description` may use `%(variant_name)s` and `%(arch)s`.
pub fn get_description(compose: &Compose, variant: &Variant, arch: &str) -> String {
    let conf = &compose.conf;
    let template = if let Some(description) = conf.get_str("product_discinfo_description") {
        description.to_string()
    } else if let (VariantType::LayeredProduct, Some(product)) = (variant.variant_type, &variant.product) {
        format!(
            "{} {} for {} {}",
            product.name,
            product.version,
            compose.info.product.name,
            get_major_version(&compose.info.product.version)
        )
    } else {
        let mut result = format!("{} {}", compose.info.product.name, compose.info.product.version);
        if let Some(base) = &compose.info.base_product {
            result.push_str(&format!(" for {} {}", base.name, base.version));
        }
        result
    };
    template
        .replace("%(variant_name)s", &variant.name)
        .replace("%(arch)s", arch)
}

/// Write `.discinfo` into the os tree, returning its timestamp
pub fn write_discinfo(compose: &Compose, arch: &str, variant: &Variant) -> Result<Option<String>> {
    if variant.is_type(VariantType::Addon) {
        return Ok(None);
    }
    let os_tree = compose.paths.compose.os_tree(arch, variant).ensure_dir()?;
    let description = get_description(compose, variant, arch);
    discinfo::write_discinfo(&os_tree.join(".discinfo"), &description, arch, None, None).map(Some)
}

pub fn write_media_repo(
    compose: &Compose,
    arch: &str,
    variant: &Variant,
    timestamp: &str,
) -> Result<()> {
    if variant.is_type(VariantType::Addon) {
        return Ok(());
    }
    let os_tree = compose.paths.compose.os_tree(arch, variant);
    let description = get_description(compose, variant, arch);
    discinfo::write_media_repo(&os_tree.join("media.repo"), &description, timestamp)
}

#[derive(Debug, Serialize)]
struct CiCompose<'a> {
    id: &'a str,
    date: &'a str,
    #[serde(rename = "type")]
    compose_type: String,
    respin: u32,
    label: Option<&'a str>,
}

#[derive(Debug, Default, Serialize)]
struct CiVariantPaths {
    os_tree: BTreeMap<String, String>,
    repository: BTreeMap<String, String>,
    packages: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    isos: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    jigdos: BTreeMap<String, String>,
    source_tree: BTreeMap<String, String>,
    source_repository: BTreeMap<String, String>,
    source_packages: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    source_isos: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    source_jigdos: BTreeMap<String, String>,
    debug_tree: BTreeMap<String, String>,
    debug_repository: BTreeMap<String, String>,
    debug_packages: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct CiVariant {
    id: String,
    uid: String,
    name: String,
    #[serde(rename = "type")]
    variant_type: String,
    arches: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    product: Option<ProductRelease>,
    paths: CiVariantPaths,
}

#[derive(Debug, Serialize)]
struct CiPayload<'a> {
    compose: CiCompose<'a>,
    product: &'a ProductRelease,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_product: Option<&'a ProductRelease>,
    /// Every variant keyed by uid
    variants: BTreeMap<String, CiVariant>,
}

#[derive(Debug, Serialize)]
struct ComposeInfoDocument<'a> {
    header: ManifestHeader,
    payload: CiPayload<'a>,
}

fn rel(compose: &Compose, path: &Path) -> String {
    compose.paths.compose.relative(path).display().to_string()
}

/// Directory recorded only if it was actually created
fn existing_rel(compose: &Compose, path: Option<PathBuf>) -> Option<String> {
    path.filter(|p| p.is_dir()).map(|p| rel(compose, &p))
}

fn dump_variant(compose: &Compose, variant: &Variant, out: &mut BTreeMap<String, CiVariant>) {
    let tree_arches = compose.conf.get_str_list("tree_arches");
    if !tree_arches.is_empty() && !variant.arches.iter().any(|a| tree_arches.contains(a)) {
        return;
    }
    let cp = &compose.paths.compose;
    let mut paths = CiVariantPaths::default();
    for arch in &variant.arches {
        let a = arch.clone();
        paths.os_tree.insert(a.clone(), rel(compose, &cp.os_tree(arch, variant)));
        paths.repository.insert(a.clone(), rel(compose, &cp.repository(arch, variant)));
        paths.packages.insert(a.clone(), rel(compose, &cp.packages(arch, variant)));
        if let Some(dir) = existing_rel(compose, cp.iso_dir(arch, variant)) {
            paths.isos.insert(a.clone(), dir);
        }
        if let Some(dir) = existing_rel(compose, cp.jigdo_dir(arch, variant)) {
            paths.jigdos.insert(a.clone(), dir);
        }

        paths.source_tree.insert(a.clone(), rel(compose, &cp.os_tree("source", variant)));
        paths
            .source_repository
            .insert(a.clone(), rel(compose, &cp.repository("source", variant)));
        paths
            .source_packages
            .insert(a.clone(), rel(compose, &cp.packages("source", variant)));
        if let Some(dir) = existing_rel(compose, cp.iso_dir("source", variant)) {
            paths.source_isos.insert(a.clone(), dir);
        }
        if let Some(dir) = existing_rel(compose, cp.jigdo_dir("source", variant)) {
            paths.source_jigdos.insert(a.clone(), dir);
        }

        paths.debug_tree.insert(a.clone(), rel(compose, &cp.debug_tree(arch, variant)));
        if let Some(repo) = cp.debug_repository(arch, variant) {
            paths.debug_repository.insert(a.clone(), rel(compose, &repo));
        }
        if let Some(packages) = cp.debug_packages(arch, variant) {
            paths.debug_packages.insert(a, rel(compose, &packages));
        }
    }

    let product = variant.product.as_ref().map(|p| ProductRelease {
        name: p.name.clone(),
        short: p.short.clone(),
        version: p.version.clone(),
        is_layered: true,
    });
    out.insert(
        variant.uid.clone(),
        CiVariant {
            id: variant.id.clone(),
            uid: variant.uid.clone(),
            name: variant.name.clone(),
            variant_type: variant.variant_type.to_string(),
            arches: variant.arches.clone(),
            parent: variant.parent_uid.clone(),
            product,
            paths,
        },
    );
    for child in variant.children() {
        dump_variant(compose, child, out);
    }
}

/// Write `compose/metadata/composeinfo.json`
pub fn write_compose_info(compose: &Compose) -> Result<PathBuf> {
    let msg = "Writing composeinfo";
    info!("[BEGIN] {}", msg);
    let mut variants = BTreeMap::new();
    for variant in compose.variants().top_level() {
        dump_variant(compose, variant, &mut variants);
    }
    let doc = ComposeInfoDocument {
        header: ManifestHeader {
            version: MANIFEST_VERSION.to_string(),
        },
        payload: CiPayload {
            compose: CiCompose {
                id: &compose.info.id,
                date: &compose.info.date,
                compose_type: compose.info.compose_type.to_string(),
                respin: compose.info.respin,
                label: compose.info.label.as_deref(),
            },
            product: &compose.info.product,
            base_product: compose.info.base_product.as_ref(),
            variants,
        },
    };
    let path = compose.paths.compose.metadata(Some("composeinfo.json"));
    write_json(&path, &doc)?;
    info!("[DONE ] {}", msg);
    Ok(path)
}

/// `path` relative to `base`, `.` when they are the same directory
fn rel_to(path: &Path, base: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(p) if p.as_os_str().is_empty() => ".".to_string(),
        Ok(p) => p.display().to_string(),
        Err(_) => crate::linker::relative_path(path, base).display().to_string(),
    }
}

/// Record the sha256 of `os_tree/relative` in the `checksums` section
pub(crate) fn add_checksum(doc: &mut IniDocument, os_tree: &Path, relative: &str) -> Result<()> {
    let full = os_tree.join(relative);
    if !full.is_file() {
        debug!("Not adding checksum of missing file {}", full.display());
        return Ok(());
    }
    let sums = compute_file_checksums(&full, &[ChecksumType::Sha256])?;
    if let Some(sum) = sums.get(&ChecksumType::Sha256) {
        doc.set("checksums", relative, format!("sha256:{}", sum));
    }
    Ok(())
}

fn set_product(doc: &mut IniDocument, section: &str, product: &ProductRelease) {
    doc.set(section, "name", product.name.as_str());
    doc.set(section, "short", product.short.as_str());
    doc.set(section, "version", product.version.as_str());
    doc.set(section, "is_layered", if product.is_layered { "true" } else { "false" });
}

/// Write `.treeinfo` into the os tree of `variant`
///
/// A layered product is described as if it was composed on its own on top
/// of this product. Plain variants also get the installer images listed in
/// the buildinstall `.treeinfo` and `images/product.img` when present.
pub fn write_tree_info(
    compose: &Compose,
    arch: &str,
    variant: &Variant,
    timestamp: Option<i64>,
) -> Result<Option<PathBuf>> {
    if variant.is_type(VariantType::Addon) {
        return Ok(None);
    }
    let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
    let cp = &compose.paths.compose;
    let os_tree = cp.os_tree(arch, variant).ensure_dir()?;
    let info = &compose.info;

    let mut doc = IniDocument::new();
    doc.set("header", "version", TREEINFO_VERSION);

    match (variant.variant_type, &variant.product) {
        (VariantType::LayeredProduct, Some(product)) => {
            set_product(
                &mut doc,
                "release",
                &ProductRelease {
                    name: product.name.clone(),
                    short: product.short.clone(),
                    version: product.version.clone(),
                    is_layered: true,
                },
            );
            set_product(
                &mut doc,
                "base_product",
                &ProductRelease {
                    name: info.product.name.clone(),
                    short: info.product.short.clone(),
                    version: get_major_version(&info.product.version),
                    is_layered: false,
                },
            );
        }
        _ => {
            set_product(&mut doc, "release", &info.product);
            if let Some(base) = &info.base_product {
                set_product(&mut doc, "base_product", base);
            }
        }
    }

    doc.set("tree", "arch", arch);
    doc.set("tree", "build_timestamp", timestamp.to_string());

    // a layered product presents itself as its parent variant
    let main = match variant.variant_type {
        VariantType::LayeredProduct => compose.parent_of(variant).unwrap_or(variant),
        _ => variant,
    };
    let main_type = match variant.variant_type {
        VariantType::LayeredProduct => VariantType::Variant,
        other => other,
    };
    let section = format!("variant-{}", main.uid);
    doc.set(&section, "id", main.id.as_str());
    doc.set(&section, "uid", main.uid.as_str());
    doc.set(&section, "name", main.name.as_str());
    doc.set(&section, "type", main_type.to_string());
    let repository = rel_to(&cp.repository(arch, variant), &os_tree);
    doc.set(&section, "packages", rel_to(&cp.packages(arch, variant), &os_tree));
    doc.set(&section, "repository", repository.as_str());
    let mut checksum_files = vec![format!("{}/repodata/repomd.xml", repository)];

    let addons = variant.get_addons(Some(arch));
    let mut addon_uids = Vec::new();
    for addon in &addons {
        let addon_section = format!("variant-{}", addon.uid);
        let addon_repo = rel_to(&cp.repository(arch, addon), &os_tree);
        doc.set(&addon_section, "id", addon.id.as_str());
        doc.set(&addon_section, "uid", addon.uid.as_str());
        doc.set(&addon_section, "name", addon.name.as_str());
        doc.set(&addon_section, "type", addon.variant_type.to_string());
        doc.set(&addon_section, "packages", rel_to(&cp.packages(arch, addon), &os_tree));
        doc.set(&addon_section, "repository", addon_repo.as_str());
        checksum_files.push(format!("{}/repodata/repomd.xml", addon_repo));
        addon_uids.push(addon.uid.clone());
    }
    if !addon_uids.is_empty() {
        doc.set(&section, "addons", addon_uids.join(","));
    }
    doc.set("tree", "variants", main.uid.as_str());

    let mut platforms = Vec::new();
    if variant.is_type(VariantType::Variant) {
        let bi_treeinfo = compose.paths.work.buildinstall_dir(arch)?.join(".treeinfo");
        let mut image_sections = Vec::new();
        if bi_treeinfo.is_file() {
            let bi = IniDocument::load(&bi_treeinfo)?;
            for key in ["mainimage", "instimage"] {
                if let Some(image) = bi.get("stage2", key) {
                    doc.set("stage2", key, image);
                    checksum_files.push(image.to_string());
                }
            }
            for name in bi.section_names() {
                let Some(platform) = name.strip_prefix("images-") else {
                    continue;
                };
                platforms.push(platform.to_string());
                image_sections.push(name.to_string());
                for (image, path) in bi.section(name).unwrap_or_default() {
                    doc.set(name, image, path.as_str());
                    checksum_files.push(path.clone());
                }
            }
        }

        let product_img = os_tree.join("images").join("product.img");
        if product_img.is_file() {
            for name in &image_sections {
                doc.set(name, "product.img", "images/product.img");
            }
            if !image_sections.is_empty() {
                checksum_files.push("images/product.img".to_string());
            }
        }
    }
    if !platforms.is_empty() {
        doc.set("tree", "platforms", platforms.join(","));
    }

    checksum_files.sort();
    checksum_files.dedup();
    for file in &checksum_files {
        let file = file.strip_prefix("./").unwrap_or(file);
        add_checksum(&mut doc, &os_tree, file)?;
    }

    let path = os_tree.join(".treeinfo");
    info!("Writing treeinfo: {}", path.display());
    doc.write(&path)?;
    Ok(Some(path))
}
