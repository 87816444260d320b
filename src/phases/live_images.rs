// src/phases/live_images.rs

//! Live images built by the build system
//!
//! ```toml
//! live_target = "f21-live"
//! live_images = [
//!     ["^Workstation$", { x86_64 = { kickstart = "fedora-live-workstation.ks", additional_repos = [] } }],
//! ]
//! ```
//!
//! `__GROUPS__` in the kickstart is replaced by the groups of the default
//! environment of the variant, or by its default groups.

use super::{Phase, skipped_by_request};
use crate::comps::CompsWrapper;
use crate::compose::Compose;
use crate::config::checks::{OptionSpec, ValueKind};
use crate::error::{Error, Result};
use crate::metadata::checksum::write_checksum_files;
use crate::metadata::manifest::{Image, ImageType};
use crate::paths::EnsureDir;
use crate::pool::WorkerPool;
use crate::runner::{self, Executor, RunOptions, stagger_delay};
use crate::scm::{ScmSource, get_file_from_scm};
use crate::variants::Variant;
use crate::wrappers::as_url;
use crate::wrappers::iso;
use crate::wrappers::koji::{CreateImageRequest, ImageKind, KojiWrapper};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use toml::Value;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct LiveImageJob {
    pub arch: String,
    pub variant_uid: String,
    pub iso_path: PathBuf,
    pub relative_iso_path: PathBuf,
    pub ks_file: PathBuf,
    pub repos: Vec<String>,
}

#[derive(Default)]
pub struct LiveImagesPhase {
    pool: Option<WorkerPool<LiveImageJob>>,
}

impl Phase for LiveImagesPhase {
    fn name(&self) -> &'static str {
        "live_images"
    }

    fn config_options(&self, _compose: &Compose) -> Vec<OptionSpec> {
        vec![
            OptionSpec::optional("live_images", &[ValueKind::List]).requires(|_| true, &["live_target"]),
            OptionSpec::optional("live_target", &[ValueKind::Str]),
        ]
    }

    fn skip(&self, compose: &Compose) -> bool {
        skipped_by_request(compose, self.name()) || !compose.conf.contains("live_images")
    }

    fn run(&mut self, compose: &Arc<Compose>) -> Result<()> {
        let jobs = live_jobs(compose)?;
        let mut pool = WorkerPool::new("live_images", jobs.len());
        for job in jobs {
            pool.queue_put(job);
        }
        let executor = Executor::from_conf(&compose.conf)?;
        let compose = Arc::clone(compose);
        pool.start(move |job: &LiveImageJob, num| {
            if executor.is_local() {
                return Err(Error::Compose(
                    "Live images can only be built with runroot enabled".to_string(),
                ));
            }
            std::thread::sleep(stagger_delay(num));
            create_live_image(&compose, job)
        })?;
        self.pool = Some(pool);
        Ok(())
    }

    fn stop(&mut self, _compose: &Arc<Compose>) -> Result<()> {
        match self.pool.as_mut() {
            Some(pool) => pool.stop(),
            None => Ok(()),
        }
    }
}

fn live_jobs(compose: &Compose) -> Result<Vec<LiveImageJob>> {
    let cp = &compose.paths.compose;
    let symlink_to = compose.conf.get_str("symlink_isos_to").map(Path::new);
    let mut jobs = Vec::new();
    for variant in compose.get_variants(&[], None, true) {
        for arch in &variant.arches {
            let data = compose.conf.get_arch_variant_data("live_images", arch, Some(&variant.uid))?;
            let Some(entry) = data.first() else {
                continue;
            };
            if cp.ensure_iso_dir(arch, variant, symlink_to)?.is_none() {
                continue;
            }
            let Some(iso_path) = cp.iso_path(arch, variant, "live", None, ".iso")? else {
                continue;
            };
            if iso_path.is_file() {
                warn!("Skipping creating live image, it already exists: {}", iso_path.display());
                continue;
            }

            let ks_in = get_ks_in(compose, arch, variant, entry)?;
            let ks_file = tweak_ks(compose, arch, variant, &ks_in)?;
            let mut repos = vec![as_url(&cp.repository(arch, variant).display().to_string())];
            if let Some(extra) = entry.get("additional_repos").and_then(Value::as_array) {
                repos.extend(extra.iter().filter_map(Value::as_str).map(str::to_string));
            }
            jobs.push(LiveImageJob {
                arch: arch.clone(),
                variant_uid: variant.uid.clone(),
                relative_iso_path: cp.relative(&iso_path),
                iso_path,
                ks_file,
                repos,
            });
        }
    }
    Ok(jobs)
}

/// Fetch the configured kickstart to `work/<arch>/liveimage-<uid>.<arch>.ks.in`
pub fn get_ks_in(compose: &Compose, arch: &str, variant: &Variant, entry: &Value) -> Result<PathBuf> {
    let kickstart = entry.get("kickstart").ok_or_else(|| {
        Error::Config(vec![format!("live_images entry for {}.{} has no kickstart", variant.uid, arch)])
    })?;
    let source = ScmSource::from_value(&compose.conf, kickstart, "file")?;
    let tmp = tempfile::Builder::new().prefix("ks_in_").tempdir()?;
    let fetched = get_file_from_scm(&source, tmp.path(), None)?;
    let first = fetched
        .first()
        .ok_or_else(|| Error::NotFound(format!("kickstart for {}.{}", variant.uid, arch)))?;

    let ks_in = compose
        .paths
        .work
        .topdir(Some(arch))
        .join(format!("liveimage-{}.{}.ks.in", variant.uid, arch))
        .ensure_parent()?;
    fs::copy(first, &ks_in).map_err(|e| Error::io_path(&ks_in, e))?;
    Ok(ks_in)
}

/// Groups installed into the live image
pub fn live_groups(compose: &Compose, arch: &str, variant: &Variant) -> Result<Vec<String>> {
    if !variant.environments.is_empty() {
        let comps_file = compose.paths.work.comps(Some(arch), Some(variant));
        if comps_file.is_file() {
            if let Some(groups) = CompsWrapper::load(&comps_file)?.default_environment_groups() {
                return Ok(groups);
            }
        }
    }
    let mut groups: Vec<String> = variant
        .groups
        .iter()
        .filter(|g| g.default == Some(true))
        .map(|g| g.name.clone())
        .collect();
    groups.sort();
    Ok(groups)
}

/// Kickstart with `__GROUPS__` expanded, next to its `.ks.in`
pub fn tweak_ks(compose: &Compose, arch: &str, variant: &Variant, ks_in: &Path) -> Result<PathBuf> {
    let groups = live_groups(compose, arch, variant)?;
    let contents = fs::read_to_string(ks_in).map_err(|e| Error::io_path(ks_in, e))?;
    let group_lines: Vec<String> = groups.iter().map(|g| format!("@{}", g)).collect();
    let ks_file = ks_in.with_extension("");
    fs::write(&ks_file, contents.replace("__GROUPS__", &group_lines.join("\n")))
        .map_err(|e| Error::io_path(&ks_file, e))?;
    Ok(ks_file)
}

fn create_live_image(compose: &Compose, job: &LiveImageJob) -> Result<()> {
    let iso_name = job
        .iso_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let msg = format!(
        "Creating live image (arch: {}, variant: {}): {}",
        job.arch, job.variant_uid, iso_name
    );
    info!("[BEGIN] {}", msg);

    let (name, version) = compose
        .info
        .id
        .rsplit_once('-')
        .ok_or_else(|| Error::InvalidValue(format!("Malformed compose id: {}", compose.info.id)))?;
    let koji = KojiWrapper::new(compose.conf.get_str("koji_profile").unwrap_or("koji"));
    let cmd = koji.create_image_cmd(&CreateImageRequest {
        name,
        version,
        target: compose.conf.require_str("live_target")?,
        arch: &job.arch,
        ks_file: &job.ks_file,
        repos: job.repos.clone(),
        kind: ImageKind::Live,
        archive: false,
        wait: true,
        image_format: None,
        release: None,
    });
    let log_file = compose.log_file(Some(&job.arch), &format!("liveimage-{}", iso_name))?;
    let result = koji.run_create_image_cmd(&cmd, Some(&log_file))?;
    if result.exit_code != Some(0) {
        error!("LiveImage failed, removing ISO: {}", job.iso_path.display());
        let _ = fs::remove_file(&job.iso_path);
        return Err(Error::CommandFailed {
            command: format!("live image task {}", result.task_id),
            exit_code: result.exit_code,
            log_file: Some(log_file),
        });
    }

    let paths = koji.get_image_paths(result.task_id)?;
    let image_path = paths
        .iter()
        .find(|p| p.extension().is_some_and(|e| e == "iso"))
        .or_else(|| paths.first())
        .ok_or_else(|| Error::NotFound(format!("Image of task {}", result.task_id)))?;
    fs::copy(image_path, &job.iso_path).map_err(|e| Error::io_path(&job.iso_path, e))?;

    let sums = write_checksum_files(&job.iso_path)?;
    if let Some(iso_dir) = job.iso_path.parent() {
        runner::run(
            &iso::manifest_cmd(&iso_name),
            &RunOptions::new().workdir(iso_dir).log_file(&log_file),
        )?;
    }

    let mut image = Image::from_file(&job.iso_path, &job.relative_iso_path, &job.arch, ImageType::Live)?;
    image.checksums = sums
        .into_iter()
        .map(|(kind, value)| (kind.name().to_string(), value))
        .collect();
    image.bootable = true;
    image.volume_id = iso::get_volume_id(&job.iso_path).ok();
    compose.images()?.add(&job.arch, &job.variant_uid, image);

    info!("[DONE ] {}", msg);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::testing::compose_with;

    const VARIANTS: &str = r#"<variants>
  <variant id="Workstation" name="Workstation" type="variant">
    <arches><arch>x86_64</arch></arches>
    <groups>
      <group default="true">gnome-desktop</group>
      <group default="true">core</group>
      <group>games</group>
    </groups>
  </variant>
  <variant id="Server" name="Server" type="variant"><arches><arch>x86_64</arch></arches></variant>
</variants>"#;

    const LIVE: &str = r#"live_target = "f21-live"
live_images = [["^Workstation$", { x86_64 = { kickstart = "live.ks", additional_repos = ["http://example.com/extra/"] } }]]
"#;

    #[test]
    fn test_skipped_without_live_images() {
        let (_dir, compose) = compose_with("", VARIANTS);
        assert!(LiveImagesPhase::default().skip(&compose));
        let (_dir, compose) = compose_with(LIVE, VARIANTS);
        assert!(!LiveImagesPhase::default().skip(&compose));
    }

    #[test]
    fn test_live_target_required() {
        let (_dir, compose) = compose_with(
            "live_images = [[\"^Workstation$\", { x86_64 = { kickstart = \"live.ks\" } }]]\n",
            VARIANTS,
        );
        let errors = LiveImagesPhase::default().validate(&compose);
        assert!(errors.iter().any(|e| e.contains("live_target")), "{:?}", errors);
    }

    #[test]
    fn test_jobs_with_tweaked_kickstart() {
        let (dir, compose) = compose_with(LIVE, VARIANTS);
        fs::write(dir.path().join("live.ks"), "lang en_US\n%packages\n__GROUPS__\n%end\n").unwrap();

        let jobs = live_jobs(&compose).unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.variant_uid, "Workstation");
        assert!(job.repos[0].starts_with("file:///"));
        assert_eq!(job.repos[1], "http://example.com/extra/");
        assert!(job.iso_path.to_string_lossy().ends_with("-Workstation-x86_64-live.iso"));
        assert_eq!(
            job.ks_file.file_name().unwrap(),
            "liveimage-Workstation.x86_64.ks"
        );
        assert_eq!(
            fs::read_to_string(&job.ks_file).unwrap(),
            "lang en_US\n%packages\n@core\n@gnome-desktop\n%end\n"
        );
    }

    #[test]
    fn test_local_execution_fails() {
        let (dir, compose) = compose_with(LIVE, VARIANTS);
        fs::write(dir.path().join("live.ks"), "__GROUPS__\n").unwrap();
        let compose = Arc::new(compose);
        let mut phase = LiveImagesPhase::default();
        phase.run(&compose).unwrap();
        assert!(phase.stop(&compose).is_err());
    }
}
