// tests/compose.rs

//! Integration tests for compose directories and their status

mod common;

use distcompose::compose::{
    ComposeOptions, STATUS_FINISHED, STATUS_STARTED, create_compose_dir, find_old_compose,
};
use distcompose::{Compose, ComposeConf, ComposeType, Error, prepare_compose};

fn conf(dir: &std::path::Path) -> ComposeConf {
    ComposeConf::parse(
        "product_name = \"Fedora\"\nproduct_short = \"F\"\nproduct_version = \"21\"\n",
        dir,
    )
    .unwrap()
}

#[test]
fn test_respins_never_share_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let conf = conf(dir.path());
    let names: Vec<String> = (0..3)
        .map(|_| {
            create_compose_dir(dir.path(), &conf, ComposeType::Production, None, Some("20150101"))
                .unwrap()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert_eq!(names, vec!["F-21-20150101.0", "F-21-20150101.1", "F-21-20150101.2"]);
}

#[test]
fn test_finished_compose_cannot_change_status() {
    let dir = tempfile::tempdir().unwrap();
    let conf = conf(dir.path());
    let topdir = create_compose_dir(dir.path(), &conf, ComposeType::Test, None, Some("20150101")).unwrap();
    let compose = Compose::open(conf, &topdir, ComposeOptions::default()).unwrap();
    assert_eq!(compose.get_status(), None);

    compose.write_status(STATUS_STARTED).unwrap();
    compose.write_status(STATUS_STARTED).unwrap();
    compose.write_status(STATUS_FINISHED).unwrap();
    compose.write_status(STATUS_FINISHED).unwrap();

    let err = compose.write_status(STATUS_STARTED).unwrap_err();
    assert!(matches!(err, Error::Compose(_)));
    assert_eq!(
        std::fs::read_to_string(topdir.join("STATUS")).unwrap(),
        "FINISHED\n"
    );
}

#[test]
fn test_find_old_compose_picks_latest_finished() {
    let dir = tempfile::tempdir().unwrap();
    let conf = conf(dir.path());
    let mut topdirs = Vec::new();
    for date in ["20150101", "20150102", "20150103"] {
        topdirs.push(create_compose_dir(dir.path(), &conf, ComposeType::Production, None, Some(date)).unwrap());
    }
    std::fs::write(topdirs[0].join("STATUS"), "FINISHED\n").unwrap();
    std::fs::write(topdirs[1].join("STATUS"), "DOOMED\n").unwrap();
    std::fs::write(topdirs[2].join("STATUS"), "STARTED\n").unwrap();

    let old = find_old_compose(&[dir.path().to_path_buf()], "F", "21", None);
    assert_eq!(old, Some(topdirs[1].clone()));
}

#[test]
fn test_prepare_compose_reads_variants() {
    let (dir, config) = common::setup_config("");
    let compose = prepare_compose(&common::request(dir.path(), &config)).unwrap();

    assert!(compose.topdir.starts_with(dir.path().join("composes")));
    let today = chrono::Local::now().format("%Y%m%d").to_string();
    assert_eq!(compose.compose_id(), format!("F-21-{}.t.0", today));
    assert_eq!(compose.get_arches(), vec!["i386".to_string(), "x86_64".to_string()]);
    assert!(compose.variant("Server-LoadBalancer").is_some());
    assert!(compose.paths.work.variants_file().is_file());
}

#[test]
fn test_prepare_compose_resumes_existing_directory() {
    let (dir, config) = common::setup_config("");
    let first = prepare_compose(&common::request(dir.path(), &config)).unwrap();

    let mut request = common::request(dir.path(), &config);
    request.compose_dir = Some(first.topdir.clone());
    let resumed = prepare_compose(&request).unwrap();
    assert_eq!(resumed.topdir, first.topdir);
    assert_eq!(resumed.compose_id(), first.compose_id());
}

#[test]
fn test_prepare_compose_requires_variants_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("compose.toml");
    std::fs::write(
        &config,
        "product_name = \"Fedora\"\nproduct_short = \"F\"\nproduct_version = \"21\"\n",
    )
    .unwrap();
    let err = prepare_compose(&common::request(dir.path(), &config)).unwrap_err();
    assert!(err.to_string().contains("variants_file"), "{}", err);
}
