// src/gather/link.rs

//! Place gathered packages into the compose tree

use crate::compose::Compose;
use crate::error::{Error, Result};
use crate::linker::{LinkType, LinkerPool};
use crate::metadata::manifest::{RpmCategory, RpmEntry};
use crate::pkgset::{PkgsetResult, RpmRecord};
use crate::util::parse_nvra;
use crate::variants::Variant;
use crate::wrappers::solver::{PkgMap, PkgType};
use std::path::PathBuf;
use tracing::info;

const LINKER_THREADS: usize = 10;

/// Nevra of the source package `record` was built from
fn srpm_nevra(pkgset: &PkgsetResult, record: &RpmRecord) -> Result<Option<String>> {
    let Some(sourcerpm) = &record.sourcerpm else {
        return Ok(None);
    };
    if let Some(srpm) = pkgset.global().and_then(|g| g.srpm_by_file_name(sourcerpm)) {
        return Ok(Some(srpm.nevra()));
    }
    Ok(Some(parse_nvra(sourcerpm)?.to_string()))
}

/// Link every file of `pkg_map` into the tree of (arch, variant) and
/// record it in the rpm manifest
pub fn link_files(
    compose: &Compose,
    arch: &str,
    variant: &Variant,
    pkg_map: &PkgMap,
    pkgset: &PkgsetResult,
) -> Result<()> {
    let global = pkgset
        .global()
        .ok_or_else(|| Error::NotFound("global package set".to_string()))?;
    let mut pool = LinkerPool::new(LinkType::from_conf(&compose.conf)?, LINKER_THREADS);

    for pkg_type in PkgType::ALL {
        let (dst_dir, category) = match pkg_type {
            PkgType::Rpm => (compose.paths.compose.packages(arch, variant), RpmCategory::Binary),
            PkgType::Srpm => (compose.paths.compose.packages("src", variant), RpmCategory::Source),
            PkgType::Debuginfo => (
                compose
                    .paths
                    .compose
                    .debug_packages(arch, variant)
                    .ok_or_else(|| Error::InvalidValue(format!("No debug tree for arch {}", arch)))?,
                RpmCategory::Debug,
            ),
        };
        for entry in pkg_map.get(pkg_type) {
            let record = global.get(&entry.path).ok_or_else(|| {
                Error::NotFound(format!("{} is not in the package set", entry.path.display()))
            })?;
            let dst: PathBuf = dst_dir.join(record.file_name());
            pool.queue_put(entry.path.clone(), dst.clone());

            let srpm = srpm_nevra(pkgset, record)?;
            let manifest_arch = if pkg_type == PkgType::Srpm { "src" } else { arch };
            compose.rpms()?.add(
                manifest_arch,
                &variant.uid,
                &record.nevra(),
                srpm.as_deref(),
                RpmEntry {
                    path: compose.paths.compose.relative(&dst).display().to_string(),
                    sigkey: record.sigkey.clone(),
                    category,
                },
            )?;
        }
    }

    let msg = format!("Linking packages (arch: {}, variant: {})", arch, variant.uid);
    info!("[BEGIN] {}", msg);
    pool.start()?;
    pool.stop()?;
    info!("[DONE ] {}", msg);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::testing::compose_with;
    use crate::pkgset::PackageSet;
    use crate::pkgset::package_set::tests::record;
    use crate::wrappers::solver::PackageEntry;

    #[test]
    fn test_link_files_places_and_records() {
        let (dir, compose) = compose_with(
            "link_type = \"copy\"\n",
            r#"<variants><variant id="Server" name="Server" type="variant"><arches><arch>x86_64</arch></arches></variant></variants>"#,
        );
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();

        let mut global = PackageSet::new(vec![None], None);
        let mut files = Vec::new();
        for (file, srpm) in [
            ("bash-4.2-1.src.rpm", None),
            ("bash-4.2-1.x86_64.rpm", Some("bash-4.2-1.src.rpm")),
            ("bash-debuginfo-4.2-1.x86_64.rpm", Some("bash-4.2-1.src.rpm")),
        ] {
            let mut rec = record(file, srpm);
            rec.file_path = repo.join(file);
            std::fs::write(&rec.file_path, file).unwrap();
            files.push(rec.file_path.clone());
            global.insert(rec);
        }
        let mut pkgset = PkgsetResult::default();
        pkgset.package_sets.insert(crate::pkgset::GLOBAL.to_string(), global);

        let pkg_map = PkgMap {
            srpm: vec![PackageEntry::new(&files[0], &[])],
            rpm: vec![PackageEntry::new(&files[1], &["input"])],
            debuginfo: vec![PackageEntry::new(&files[2], &[])],
        };
        let server = compose.variant("Server").unwrap();
        link_files(&compose, "x86_64", server, &pkg_map, &pkgset).unwrap();

        let rpm_dst = compose.paths.compose.packages("x86_64", server).join("bash-4.2-1.x86_64.rpm");
        assert_eq!(std::fs::read_to_string(&rpm_dst).unwrap(), "bash-4.2-1.x86_64.rpm");
        assert!(compose.paths.compose.packages("src", server).join("bash-4.2-1.src.rpm").is_file());
        assert!(
            compose
                .paths
                .compose
                .debug_packages("x86_64", server)
                .unwrap()
                .join("bash-debuginfo-4.2-1.x86_64.rpm")
                .is_file()
        );

        let rpms = compose.rpms().unwrap();
        let recorded = rpms.packages("Server", "x86_64");
        assert_eq!(recorded.len(), 2);
        assert!(recorded.iter().all(|(srpm, _, _)| *srpm == "bash-4.2-1.src"));
        assert_eq!(rpms.packages("Server", "src").len(), 1);
    }
}
