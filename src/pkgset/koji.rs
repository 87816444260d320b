// src/pkgset/koji.rs

//! Package set from a build-system tag
//!
//! The tag is listed at a fixed event so a rerun sees the same builds.
//! The event and tag records are stored in `work/global` and reused in
//! DEBUG mode.

use super::{PackageSet, PathResolver, PkgsetResult};
use crate::compose::Compose;
use crate::config::checks::{OptionSpec, ValueKind};
use crate::error::{Error, Result};
use crate::metadata::manifest::{read_json, write_json};
use crate::wrappers::koji::{KojiBuild, KojiEvent, KojiRpm, KojiWrapper};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const EVENT_FILE: &str = "koji-event";
const TAG_FILE: &str = "koji-tag";
const SNAPSHOT_FILE: &str = "pkgset_global.json";

pub fn config_options() -> Vec<OptionSpec> {
    vec![
        OptionSpec::required("koji_profile", &[ValueKind::Str]),
        OptionSpec::required("pkgset_koji_tag", &[ValueKind::Str]),
        OptionSpec::optional("pkgset_koji_inherit", &[ValueKind::Bool]),
        OptionSpec::required("pkgset_koji_path_prefix", &[ValueKind::Str]),
    ]
}

/// Pick the package file for a tag listing entry
///
/// Signed copies are tried in `sigkey_ordering`; an unsigned copy is only
/// acceptable when the ordering contains `None`.
pub fn resolve_rpm_path(
    koji: &KojiWrapper,
    sigkey_ordering: &[Option<String>],
    rpm: &KojiRpm,
    build: &KojiBuild,
) -> Result<(PathBuf, Option<String>)> {
    for sigkey in sigkey_ordering.iter().flatten() {
        let sigkey = sigkey.to_lowercase();
        let path = koji.signed_rpm_path(build, rpm, &sigkey);
        if path.is_file() {
            return Ok((path, Some(sigkey)));
        }
    }

    if !sigkey_ordering.iter().any(Option::is_none) {
        return Err(Error::NotFound(format!(
            "RPM {} not found for sigs: {:?}",
            rpm.file_name(),
            sigkey_ordering
        )));
    }
    let path = koji.unsigned_rpm_path(build, rpm);
    if path.is_file() {
        Ok((path, None))
    } else {
        Err(Error::NotFound(format!("Package not found: {}", rpm.file_name())))
    }
}

/// Event the tag is listed at; `--koji-event` overrides the latest one
pub fn get_koji_event_info(compose: &Compose, koji: &KojiWrapper) -> Result<KojiEvent> {
    let event_file = compose.paths.work.global_dir().join(EVENT_FILE);
    let msg = "Getting koji event";

    let event = if let Some(id) = compose.koji_event {
        info!("Setting koji event to a custom value: {}", id);
        let event = koji.get_event(id)?;
        write_json(&event_file, &event)?;
        event
    } else if compose.debug && event_file.exists() {
        warn!("[SKIP ] {}", msg);
        read_json(&event_file)?
    } else {
        info!("{}", msg);
        let event = koji.get_last_event()?;
        write_json(&event_file, &event)?;
        event
    };
    info!("Koji event: {}", event.id);
    Ok(event)
}

/// Tag record as returned by the hub, with `name` filled in
pub fn get_koji_tag_info(compose: &Compose, koji: &KojiWrapper) -> Result<Value> {
    let tag_file = compose.paths.work.global_dir().join(TAG_FILE);
    let msg = "Getting a koji tag info";

    let tag = if compose.debug && tag_file.exists() {
        warn!("[SKIP ] {}", msg);
        read_json(&tag_file)?
    } else {
        info!("{}", msg);
        let tag_name = compose.conf.require_str("pkgset_koji_tag")?;
        let mut tag = koji.get_tag(tag_name)?;
        if let Some(obj) = tag.as_object_mut() {
            obj.insert("name".to_string(), Value::from(tag_name));
        }
        write_json(&tag_file, &tag)?;
        tag
    };
    let tag_name = tag.get("name").and_then(Value::as_str).unwrap_or_default();
    let tag_id = tag.get("id").map(Value::to_string).unwrap_or_default();
    info!("Koji compose tag: {} (ID: {})", tag_name, tag_id);
    Ok(tag)
}

fn populate_global_pkgset(
    compose: &Compose,
    koji: &KojiWrapper,
    path_prefix: &str,
    event: &KojiEvent,
) -> Result<PackageSet> {
    let tag = compose.conf.require_str("pkgset_koji_tag")?;
    let inherit = compose.conf.get_bool("pkgset_koji_inherit", true);
    let msg = format!("Populating the global package set from tag '{}'", tag);

    super::load_or_populate_global(compose, SNAPSHOT_FILE, &msg, path_prefix, |pkgset| {
        let msg = format!(
            "Getting latest RPMs (tag: {}, event: {}, inherit: {})",
            tag, event.id, inherit
        );
        info!("[BEGIN] {}", msg);
        let (rpms, builds) = koji.list_tagged_rpms(tag, event.id, inherit)?;
        let builds: HashMap<u64, KojiBuild> = builds.into_iter().map(|b| (b.build_id, b)).collect();

        let mut rpm_items = Vec::new();
        let mut srpm_items = Vec::new();
        for rpm in rpms {
            if let Some(arches) = &pkgset.arches {
                if !arches.contains(&rpm.arch) {
                    continue;
                }
            }
            let Some(build) = builds.get(&rpm.build_id) else {
                warn!("Build {} of {} missing from the tag listing", rpm.build_id, rpm.file_name());
                continue;
            };
            let item = (rpm, build.clone());
            if item.0.arch == "src" || item.0.arch == "nosrc" {
                srpm_items.push(item);
            } else {
                rpm_items.push(item);
            }
        }

        let wrapper = koji.clone();
        let sigkeys = pkgset.sigkey_ordering.clone();
        let resolve: PathResolver<(KojiRpm, KojiBuild)> =
            Arc::new(move |item: &(KojiRpm, KojiBuild)| {
                resolve_rpm_path(&wrapper, &sigkeys, &item.0, &item.1)
            });
        pkgset.read_packages(rpm_items, srpm_items, resolve)?;
        info!("[DONE ] {}", msg);
        Ok(())
    })
}

pub fn get_pkgset_from_koji(compose: &Compose) -> Result<PkgsetResult> {
    let koji = KojiWrapper::new(compose.conf.require_str("koji_profile")?);
    let path_prefix = format!(
        "{}/",
        compose.conf.require_str("pkgset_koji_path_prefix")?.trim_end_matches('/')
    );

    let event = get_koji_event_info(compose, &koji)?;
    get_koji_tag_info(compose, &koji)?;
    let global = populate_global_pkgset(compose, &koji, &path_prefix, &event)?;
    super::finish(compose, global, path_prefix)
}
