// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

use distcompose::compose::ComposeOptions;
use distcompose::{ComposeRequest, ComposeType};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const VARIANTS_XML: &str = r#"<variants>
  <variant id="Server" name="Server" type="variant">
    <arches><arch>x86_64</arch></arches>
    <groups><group default="true">core</group></groups>
    <variants>
      <variant id="LoadBalancer" name="Load Balancer" type="addon">
        <arches><arch>x86_64</arch><arch>ppc64</arch></arches>
      </variant>
    </variants>
  </variant>
  <variant id="Client" name="Client" type="variant">
    <arches><arch>x86_64</arch><arch>i386</arch></arches>
  </variant>
</variants>
"#;

/// Write a configuration and the variants document into a fresh directory
///
/// Returns (TempDir, config path) - keep the TempDir alive to prevent cleanup.
pub fn setup_config(conf_extra: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("variants.xml"), VARIANTS_XML).unwrap();
    let config = dir.path().join("compose.toml");
    std::fs::write(
        &config,
        format!(
            "product_name = \"Fedora\"\nproduct_short = \"F\"\nproduct_version = \"21\"\nvariants_file = \"variants.xml\"\n{}",
            conf_extra
        ),
    )
    .unwrap();
    (dir, config)
}

/// A request creating its compose under `<dir>/composes`
pub fn request(dir: &Path, config: &Path) -> ComposeRequest {
    ComposeRequest {
        config: config.to_path_buf(),
        target_dir: dir.join("composes"),
        compose_dir: None,
        compose_type: ComposeType::Test,
        label: None,
        options: ComposeOptions::default(),
    }
}
