// tests/pipeline.rs

//! Integration tests for whole compose runs

mod common;

use distcompose::compose::{STATUS_DOOMED, STATUS_FINISHED};
use distcompose::{Error, prepare_compose, run_compose};
use std::sync::Arc;

const MINIMAL: &str = r#"
sigkeys = []
pkgset_source = "repos"
gather_source = "json"
gather_source_mapping = "mapping.json"
gather_method = "nodeps"

[pkgset_repos]
x86_64 = ["repo/x86_64"]
"#;

#[test]
fn test_init_only_compose_finishes() {
    let (dir, config) = common::setup_config(MINIMAL);
    let mut request = common::request(dir.path(), &config);
    request.options.just_phases = vec!["init".to_string()];
    let compose = Arc::new(prepare_compose(&request).unwrap());

    run_compose(Arc::clone(&compose)).unwrap();
    assert_eq!(compose.get_status().as_deref(), Some(STATUS_FINISHED));

    let metadata = compose.topdir.join("compose").join("metadata");
    let composeinfo: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(metadata.join("composeinfo.json")).unwrap()).unwrap();
    assert_eq!(composeinfo["payload"]["compose"]["id"], compose.compose_id());
    assert!(composeinfo["payload"]["variants"]["Server"].is_object());
    assert!(metadata.join("images.json").is_file());

    let server = compose.variant("Server").unwrap();
    let os_tree = compose.paths.compose.os_tree("x86_64", server);
    assert!(os_tree.join(".treeinfo").is_file());
    assert!(os_tree.join(".discinfo").is_file());
}

#[test]
fn test_missing_required_options_doom_the_compose() {
    let (dir, config) = common::setup_config("");
    let compose = Arc::new(prepare_compose(&common::request(dir.path(), &config)).unwrap());

    let err = run_compose(Arc::clone(&compose)).unwrap_err();
    let Error::Config(errors) = err else {
        panic!("expected a configuration error, got {}", err);
    };
    assert!(errors.iter().any(|e| e.contains("pkgset_source")), "{:?}", errors);
    assert!(errors.iter().any(|e| e.contains("gather_method")), "{:?}", errors);
    assert_eq!(compose.get_status().as_deref(), Some(STATUS_DOOMED));
}
