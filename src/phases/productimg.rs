// src/phases/productimg.rs

//! `product.img` for bootable products
//!
//! The installer picks up product branding and install classes from a
//! small FAT image next to its boot images. One image is built per
//! top-level variant and copied into `os/images/` of every arch.

use super::{Phase, skipped_by_request};
use crate::compose::Compose;
use crate::config::checks::{OptionSpec, ValueKind, is_true};
use crate::error::{Error, Result};
use crate::paths::EnsureDir;
use crate::runner::{self, CommandSpec, RunOptions, shell_quote};
use crate::variants::{Variant, VariantType};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Size of the FAT image in KiB
const IMAGE_SIZE_KB: u32 = 5760;

pub struct ProductimgPhase;

impl Phase for ProductimgPhase {
    fn name(&self) -> &'static str {
        "productimg"
    }

    fn config_options(&self, _compose: &Compose) -> Vec<OptionSpec> {
        vec![
            OptionSpec::optional("productimg", &[ValueKind::Bool]).requires(is_true, &["bootable"]),
            OptionSpec::optional("productimg_install_class", &[ValueKind::Str]),
        ]
    }

    fn skip(&self, compose: &Compose) -> bool {
        if skipped_by_request(compose, self.name()) {
            return true;
        }
        if !compose.conf.get_bool("bootable", false) {
            info!("Not a bootable product. Skipping creating product images.");
            return true;
        }
        !compose.conf.get_bool("productimg", false)
    }

    fn run(&mut self, compose: &Arc<Compose>) -> Result<()> {
        for variant in compose.get_variants(&[VariantType::Variant], None, false) {
            let image = create_product_img(compose, variant)?;
            for arch in &variant.arches {
                install_product_img(compose, arch, variant, &image)?;
            }
        }
        Ok(())
    }
}

/// Default groups of a variant; every listed group when none is marked
pub fn default_groups(variant: &Variant) -> Vec<&str> {
    let defaults: Vec<&str> = variant
        .groups
        .iter()
        .filter(|g| g.default == Some(true))
        .map(|g| g.name.as_str())
        .collect();
    if !defaults.is_empty() {
        return defaults;
    }
    variant.groups.iter().map(|g| g.name.as_str()).collect()
}

/// Install class description read by the installer
pub fn install_class(compose: &Compose, variant: &Variant) -> String {
    let class_name = compose
        .conf
        .get_str("productimg_install_class")
        .unwrap_or("distcompose");
    let mut out = String::new();
    let _ = writeln!(out, "[Main]");
    let _ = writeln!(out, "id = {}", variant.uid.to_lowercase());
    let _ = writeln!(out, "name = {}", variant.name);
    let _ = writeln!(out, "class = {}", class_name);
    let _ = writeln!(out, "default_groups = {}", default_groups(variant).join(","));
    out
}

fn build_stamp(compose: &Compose, variant: &Variant) -> String {
    let conf = &compose.conf;
    format!(
        "[Main]\nProduct={}\nVersion={}\nIsFinal={}\nUUID={}.{}\nVariant={}\n",
        conf.get_str("product_name").unwrap_or_default(),
        conf.get_str("product_version").unwrap_or_default(),
        compose.supported,
        compose.info.date,
        compose.info.respin,
        variant.uid,
    )
}

/// Blank FAT image filled with the staged directory contents
pub fn product_img_cmd(image: &Path, staging: &Path) -> CommandSpec {
    let image = shell_quote(&image.display().to_string());
    CommandSpec::shell(format!(
        "dd if=/dev/zero of={img} bs=1k count={size} && mkfs.msdos -n product {img} && MTOOLS_SKIP_CHECK=1 mcopy -s -i {img} {src}/. ::/",
        img = image,
        size = IMAGE_SIZE_KB,
        src = shell_quote(&staging.display().to_string()),
    ))
}

/// Build `work/global/product-<uid>.img`
pub fn create_product_img(compose: &Compose, variant: &Variant) -> Result<std::path::PathBuf> {
    let image = compose.paths.work.product_img(variant).ensure_parent()?;
    let msg = format!("Creating product.img (variant: {})", variant.uid);
    if compose.debug && image.is_file() {
        warn!("[SKIP ] {}", msg);
        return Ok(image);
    }
    info!("[BEGIN] {}", msg);

    let staging = tempfile::Builder::new().prefix("productimg_").tempdir()?;
    let classes = staging.path().join("installclasses");
    fs::create_dir_all(&classes).map_err(|e| Error::io_path(&classes, e))?;
    let class_file = classes.join(format!("{}.conf", variant.uid.to_lowercase()));
    fs::write(&class_file, install_class(compose, variant)).map_err(|e| Error::io_path(&class_file, e))?;
    let stamp = staging.path().join(".buildstamp");
    fs::write(&stamp, build_stamp(compose, variant)).map_err(|e| Error::io_path(&stamp, e))?;

    if image.exists() {
        fs::remove_file(&image).map_err(|e| Error::io_path(&image, e))?;
    }
    runner::run(
        &product_img_cmd(&image, staging.path()),
        &RunOptions::new()
            .log_file(compose.log_file(None, &format!("productimg-{}", variant.uid))?)
            .show_cmd(),
    )?;
    info!("[DONE ] {}", msg);
    Ok(image)
}

pub fn install_product_img(compose: &Compose, arch: &str, variant: &Variant, image: &Path) -> Result<()> {
    let target = compose
        .paths
        .compose
        .os_tree(arch, variant)
        .join("images")
        .join("product.img")
        .ensure_parent()?;
    info!("Copying {} to {}", image.display(), target.display());
    fs::copy(image, &target).map_err(|e| Error::io_path(&target, e))?;
    Ok(())
}
