// src/metadata/manifest.rs

//! Compose-wide manifests: `rpms.json` and `images.json`
//!
//! Both are written under `compose/metadata/` and share a versioned
//! envelope `{"header": {"version"}, "payload": {"compose", ...}}`. Phases
//! record into them from worker threads, so the compose keeps each one
//! behind a mutex and every `add` is a single short critical section.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const MANIFEST_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestHeader {
    pub version: String,
}

impl Default for ManifestHeader {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
        }
    }
}

/// Compose identity repeated in every manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestCompose {
    pub id: String,
    pub date: String,
    #[serde(rename = "type")]
    pub compose_type: String,
    pub respin: u32,
}

/// Role of a package in the RPM manifest
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RpmCategory {
    Binary,
    Debug,
    Source,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpmEntry {
    /// Relative to `compose/`
    pub path: String,
    pub sigkey: Option<String>,
    pub category: RpmCategory,
}

/// variant uid -> arch -> srpm nevra -> rpm nevra -> entry
pub type RpmMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeMap<String, RpmEntry>>>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpmPayload {
    pub compose: ManifestCompose,
    pub rpms: RpmMap,
}

/// Every package placed into the compose
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpmManifest {
    pub header: ManifestHeader,
    pub payload: RpmPayload,
}

impl RpmManifest {
    pub fn new(compose: ManifestCompose) -> Self {
        Self {
            header: ManifestHeader::default(),
            payload: RpmPayload {
                compose,
                rpms: BTreeMap::new(),
            },
        }
    }

    /// Record one package; a source package is filed under its own nevra
    pub fn add(
        &mut self,
        arch: &str,
        variant_uid: &str,
        nevra: &str,
        srpm_nevra: Option<&str>,
        entry: RpmEntry,
    ) -> Result<()> {
        let srpm_nevra = match (entry.category, srpm_nevra) {
            (RpmCategory::Source, _) => nevra,
            (_, Some(srpm)) => srpm,
            (_, None) => {
                return Err(Error::InvalidValue(format!(
                    "Binary package {} has no source package",
                    nevra
                )));
            }
        };
        self.payload
            .rpms
            .entry(variant_uid.to_string())
            .or_default()
            .entry(arch.to_string())
            .or_default()
            .entry(srpm_nevra.to_string())
            .or_default()
            .insert(nevra.to_string(), entry);
        Ok(())
    }

    /// Packages recorded for one variant and arch, flattened to (srpm, rpm, entry)
    pub fn packages(&self, variant_uid: &str, arch: &str) -> Vec<(&str, &str, &RpmEntry)> {
        let Some(by_srpm) = self
            .payload
            .rpms
            .get(variant_uid)
            .and_then(|arches| arches.get(arch))
        else {
            return Vec::new();
        };
        by_srpm
            .iter()
            .flat_map(|(srpm, rpms)| {
                rpms.iter()
                    .map(move |(rpm, entry)| (srpm.as_str(), rpm.as_str(), entry))
            })
            .collect()
    }

    pub fn dump(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

/// Image kind recorded in `images.json`
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImageType {
    Dvd,
    Boot,
    Live,
}

/// One bootable or installable image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Relative to `compose/`
    pub path: String,
    pub mtime: i64,
    pub size: u64,
    pub arch: String,
    #[serde(rename = "type")]
    pub image_type: ImageType,
    pub format: String,
    pub disc_number: u32,
    pub disc_count: u32,
    pub checksums: BTreeMap<String, String>,
    pub bootable: bool,
    pub implant_md5: Option<String>,
    pub volume_id: Option<String>,
}

impl Image {
    /// Image record with size and mtime read from `full_path`
    pub fn from_file(
        full_path: &Path,
        relative_path: &Path,
        arch: &str,
        image_type: ImageType,
    ) -> Result<Self> {
        let meta = std::fs::metadata(full_path).map_err(|e| Error::io_path(full_path, e))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Ok(Self {
            path: relative_path.to_string_lossy().into_owned(),
            mtime,
            size: meta.len(),
            arch: arch.to_string(),
            image_type,
            format: "iso".to_string(),
            disc_number: 1,
            disc_count: 1,
            checksums: BTreeMap::new(),
            bootable: false,
            implant_md5: None,
            volume_id: None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub compose: ManifestCompose,
    /// variant uid -> arch -> images
    pub images: BTreeMap<String, BTreeMap<String, Vec<Image>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub header: ManifestHeader,
    pub payload: ImagePayload,
}

impl ImageManifest {
    pub fn new(compose: ManifestCompose) -> Self {
        Self {
            header: ManifestHeader::default(),
            payload: ImagePayload {
                compose,
                images: BTreeMap::new(),
            },
        }
    }

    /// Add an image; a second image with the same path replaces the first
    pub fn add(&mut self, arch: &str, variant_uid: &str, image: Image) {
        let images = self
            .payload
            .images
            .entry(variant_uid.to_string())
            .or_default()
            .entry(arch.to_string())
            .or_default();
        images.retain(|existing| existing.path != image.path);
        images.push(image);
    }

    pub fn images(&self, variant_uid: &str, arch: &str) -> &[Image] {
        self.payload
            .images
            .get(variant_uid)
            .and_then(|arches| arches.get(arch))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn dump(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io_path(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json + "\n").map_err(|e| Error::io_path(path, e))
}

pub(crate) fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io_path(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compose() -> ManifestCompose {
        ManifestCompose {
            id: "F-21-20140101.0".to_string(),
            date: "20140101".to_string(),
            compose_type: "production".to_string(),
            respin: 0,
        }
    }

    #[test]
    fn test_rpm_manifest_groups_by_source() {
        let mut manifest = RpmManifest::new(compose());
        manifest
            .add(
                "src",
                "Server",
                "bash-0:4.2-1.src",
                None,
                RpmEntry {
                    path: "Server/source/tree/Packages/bash-4.2-1.src.rpm".into(),
                    sigkey: Some("fd431d51".into()),
                    category: RpmCategory::Source,
                },
            )
            .unwrap();
        manifest
            .add(
                "x86_64",
                "Server",
                "bash-0:4.2-1.x86_64",
                Some("bash-0:4.2-1.src"),
                RpmEntry {
                    path: "Server/x86_64/os/Packages/bash-4.2-1.x86_64.rpm".into(),
                    sigkey: None,
                    category: RpmCategory::Binary,
                },
            )
            .unwrap();

        let src = manifest.packages("Server", "src");
        assert_eq!(src.len(), 1);
        assert_eq!(src[0].0, "bash-0:4.2-1.src");
        let bin = manifest.packages("Server", "x86_64");
        assert_eq!(bin[0].0, "bash-0:4.2-1.src");
        assert_eq!(bin[0].1, "bash-0:4.2-1.x86_64");
    }

    #[test]
    fn test_binary_without_source_rejected() {
        let mut manifest = RpmManifest::new(compose());
        let result = manifest.add(
            "x86_64",
            "Server",
            "bash-0:4.2-1.x86_64",
            None,
            RpmEntry {
                path: "x".into(),
                sigkey: None,
                category: RpmCategory::Binary,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_manifests_persist() {
        let tmp = tempfile::tempdir().unwrap();
        let iso = tmp.path().join("boot.iso");
        std::fs::write(&iso, b"0123456789").unwrap();

        let mut images = ImageManifest::new(compose());
        let mut image =
            Image::from_file(&iso, Path::new("Server/x86_64/iso/boot.iso"), "x86_64", ImageType::Boot)
                .unwrap();
        image.bootable = true;
        images.add("x86_64", "Server", image.clone());
        images.add("x86_64", "Server", image);
        assert_eq!(images.images("Server", "x86_64").len(), 1);

        let path = tmp.path().join("metadata/images.json");
        images.dump(&path).unwrap();
        let loaded = ImageManifest::load(&path).unwrap();
        assert_eq!(loaded, images);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"type\": \"boot\""));
        assert!(raw.contains("\"version\": \"1.0\""));
    }
}
