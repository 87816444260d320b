// src/phases/mod.rs

//! Compose phases
//!
//! A compose is a fixed sequence of phases, see [`all_phases`]. Each phase
//! moves from INIT either to SKIPPED or through RUNNING to FINISHED, and
//! phase N+1 never starts before phase N has been stopped. Phases hand
//! data to each other only through the compose tree on disk, except the
//! package set, which is kept in memory once the pkgset phase read it.

pub mod buildinstall;
pub mod createiso;
pub mod createrepo;
pub mod extra_files;
pub mod gather;
pub mod init;
pub mod live_images;
pub mod pkgset;
pub mod productimg;

use crate::compose::Compose;
use crate::config::checks::{OptionSpec, validate_options};
use crate::error::Result;
use crate::pkgset::PkgsetResult;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// Package set populated by the pkgset phase and read by later phases
pub type SharedPkgset = Arc<OnceLock<PkgsetResult>>;

/// Phase names in run order
pub const PHASE_NAMES: &[&str] = &[
    "init",
    "pkgset",
    "gather",
    "createrepo",
    "productimg",
    "buildinstall",
    "extra_files",
    "createiso",
    "live_images",
    "test",
];

pub trait Phase: Send {
    fn name(&self) -> &'static str;

    /// Options this phase reads
    fn config_options(&self, _compose: &Compose) -> Vec<OptionSpec> {
        Vec::new()
    }

    /// Every configuration problem of this phase
    fn validate(&self, compose: &Compose) -> Vec<String> {
        validate_options(&compose.conf, &self.config_options(compose))
    }

    fn skip(&self, compose: &Compose) -> bool {
        skipped_by_request(compose, self.name())
    }

    fn run(&mut self, compose: &Arc<Compose>) -> Result<()>;

    /// Wait for outstanding work; only called after a successful `run`
    fn stop(&mut self, _compose: &Arc<Compose>) -> Result<()> {
        Ok(())
    }
}

/// Skipped on the command line, in the configuration, or left out of an
/// explicit phase list
pub fn skipped_by_request(compose: &Compose, name: &str) -> bool {
    if !compose.just_phases.is_empty() && !compose.just_phases.iter().any(|p| p == name) {
        return true;
    }
    compose.skip_phases.iter().any(|p| p == name)
        || compose
            .conf
            .get_str_list("skip_phases")
            .iter()
            .any(|p| p == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    Init,
    Skipped,
    Running,
    Finished,
}

/// Drives one phase through its states
pub struct PhaseRunner {
    phase: Box<dyn Phase>,
    status: PhaseStatus,
    banner: String,
}

impl PhaseRunner {
    pub fn new(phase: Box<dyn Phase>) -> Self {
        let banner = format!("---------- PHASE: {} ----------", phase.name().to_uppercase());
        Self {
            phase,
            status: PhaseStatus::Init,
            banner,
        }
    }

    pub fn name(&self) -> &'static str {
        self.phase.name()
    }

    pub fn status(&self) -> PhaseStatus {
        self.status
    }

    pub fn validate(&self, compose: &Compose) -> Vec<String> {
        self.phase.validate(compose)
    }

    pub fn start(&mut self, compose: &Arc<Compose>) -> Result<()> {
        if self.status != PhaseStatus::Init {
            return Ok(());
        }
        if self.phase.skip(compose) {
            warn!("[SKIP ] {}", self.banner);
            self.status = PhaseStatus::Skipped;
            return Ok(());
        }
        info!("[BEGIN] {}", self.banner);
        self.status = PhaseStatus::Running;
        self.phase.run(compose)
    }

    /// Idempotent; a skipped or finished phase is left alone
    pub fn stop(&mut self, compose: &Arc<Compose>) -> Result<()> {
        if self.status != PhaseStatus::Running {
            return Ok(());
        }
        self.status = PhaseStatus::Finished;
        self.phase.stop(compose)?;
        info!("[DONE ] {}", self.banner);
        Ok(())
    }
}

/// Every phase in run order
pub fn all_phases(pkgset: &SharedPkgset) -> Vec<PhaseRunner> {
    let phases: Vec<Box<dyn Phase>> = vec![
        Box::new(init::InitPhase),
        Box::new(pkgset::PkgsetPhase::new(pkgset.clone())),
        Box::new(gather::GatherPhase::new(pkgset.clone())),
        Box::new(createrepo::CreaterepoPhase::default()),
        Box::new(productimg::ProductimgPhase),
        Box::new(buildinstall::BuildinstallPhase::default()),
        Box::new(extra_files::ExtraFilesPhase::new(pkgset.clone())),
        Box::new(createiso::CreateisoPhase::default()),
        Box::new(live_images::LiveImagesPhase::default()),
        Box::new(test::TestPhase),
    ];
    phases.into_iter().map(PhaseRunner::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::testing::compose_with;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VARIANTS: &str = r#"<variants><variant id="Server" name="Server" type="variant"><arches><arch>x86_64</arch></arches></variant></variants>"#;

    struct Counting {
        runs: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    impl Phase for Counting {
        fn name(&self) -> &'static str {
            "createrepo"
        }

        fn run(&mut self, _compose: &Arc<Compose>) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self, _compose: &Arc<Compose>) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting() -> (PhaseRunner, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let runner = PhaseRunner::new(Box::new(Counting {
            runs: runs.clone(),
            stops: stops.clone(),
        }));
        (runner, runs, stops)
    }

    #[test]
    fn test_phase_order() {
        let names: Vec<&str> = all_phases(&SharedPkgset::default())
            .iter()
            .map(PhaseRunner::name)
            .collect();
        assert_eq!(names, PHASE_NAMES);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (_dir, compose) = compose_with("", VARIANTS);
        let compose = Arc::new(compose);
        let (mut runner, runs, stops) = counting();
        runner.start(&compose).unwrap();
        assert_eq!(runner.status(), PhaseStatus::Running);
        runner.stop(&compose).unwrap();
        runner.stop(&compose).unwrap();
        runner.start(&compose).unwrap();
        assert_eq!(runner.status(), PhaseStatus::Finished);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_skip_rules() {
        let (_dir, mut compose) = compose_with("skip_phases = [\"test\"]\n", VARIANTS);
        assert!(skipped_by_request(&compose, "test"));
        assert!(!skipped_by_request(&compose, "createrepo"));

        compose.skip_phases = vec!["createrepo".to_string()];
        assert!(skipped_by_request(&compose, "createrepo"));

        compose.skip_phases.clear();
        compose.just_phases = vec!["gather".to_string()];
        assert!(skipped_by_request(&compose, "createrepo"));
        assert!(!skipped_by_request(&compose, "gather"));
    }

    #[test]
    fn test_skipped_phase_never_runs() {
        let (_dir, mut compose) = compose_with("", VARIANTS);
        compose.skip_phases = vec!["createrepo".to_string()];
        let compose = Arc::new(compose);
        let (mut runner, runs, stops) = counting();
        runner.start(&compose).unwrap();
        runner.stop(&compose).unwrap();
        assert_eq!(runner.status(), PhaseStatus::Skipped);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(stops.load(Ordering::SeqCst), 0);
    }
}
