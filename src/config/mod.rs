// src/config/mod.rs

//! Compose configuration
//!
//! The configuration is a flat TOML document. Keys are validated per phase
//! through [`checks::OptionSpec`] lists rather than a fixed struct, because
//! each phase owns its own options and the set of phases decides which
//! options are legal. Per-arch and per-arch-per-variant data have fixed
//! shapes, read through [`ComposeConf::get_arch_data`] and
//! [`ComposeConf::get_arch_variant_data`].

pub mod checks;

use crate::error::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use toml::Value;

/// Loaded compose configuration
#[derive(Debug, Clone)]
pub struct ComposeConf {
    table: toml::Table,
    config_dir: PathBuf,
}

impl ComposeConf {
    /// Load a configuration file; relative references resolve against its directory
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io_path(path, e))?;
        let config_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let config_dir = std::fs::canonicalize(&config_dir).unwrap_or(config_dir);
        Self::parse(&content, config_dir)
    }

    /// Parse a configuration document held in memory
    pub fn parse(content: &str, config_dir: impl Into<PathBuf>) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        Ok(Self {
            table,
            config_dir: config_dir.into(),
        })
    }

    pub fn from_table(table: toml::Table, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            table,
            config_dir: config_dir.into(),
        }
    }

    /// Directory the configuration was loaded from
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn table(&self) -> &toml::Table {
        &self.table
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.table.get(name)
    }

    /// Override or add an option (command line overrides, tests)
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.table.insert(name.to_string(), value.into());
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.table.get(name).and_then(Value::as_str)
    }

    /// String option that must be present
    pub fn require_str(&self, name: &str) -> Result<&str> {
        self.get_str(name)
            .ok_or_else(|| Error::Config(vec![format!("Config option not set: {}", name)]))
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        self.table
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.table.get(name).and_then(Value::as_integer)
    }

    /// List of strings; a single string is treated as a one-element list
    pub fn get_str_list(&self, name: &str) -> Vec<String> {
        match self.table.get(name) {
            Some(value) => value_to_strings(value),
            None => Vec::new(),
        }
    }

    /// Signing keys in preference order; an empty string means "unsigned"
    pub fn sigkeys(&self) -> Vec<Option<String>> {
        match self.table.get("sigkeys").and_then(Value::as_array) {
            Some(keys) => keys
                .iter()
                .map(|k| match k.as_str() {
                    Some("") | None => None,
                    Some(key) => Some(key.to_string()),
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Values of a `{arch | "*" = [..]}` option that apply to `arch`
    ///
    /// `"*"` never matches the `src` arch; source data has to be listed
    /// explicitly.
    pub fn get_arch_data(&self, name: &str, arch: &str) -> Vec<Value> {
        let mut result = Vec::new();
        let Some(table) = self.table.get(name).and_then(Value::as_table) else {
            return result;
        };
        for (conf_arch, data) in table {
            if !arch_key_matches(conf_arch, arch) {
                continue;
            }
            extend_flat(&mut result, data);
        }
        result
    }

    /// Values of a `[[uid_regex, {arch | "*" = [..]}], ..]` option
    ///
    /// With `variant_uid` of `None` every regex matches. Regexes are
    /// anchored at the start of the uid only.
    pub fn get_arch_variant_data(
        &self,
        name: &str,
        arch: &str,
        variant_uid: Option<&str>,
    ) -> Result<Vec<Value>> {
        let mut result = Vec::new();
        let Some(entries) = self.table.get(name).and_then(Value::as_array) else {
            return Ok(result);
        };
        for entry in entries {
            let pair = entry.as_array().filter(|pair| pair.len() == 2).ok_or_else(|| {
                Error::Config(vec![format!(
                    "Config option '{}' must be a list of [variant_regex, {{arch = [..]}}] pairs",
                    name
                )])
            })?;
            let (Some(pattern), Some(data)) = (pair[0].as_str(), pair[1].as_table()) else {
                return Err(Error::Config(vec![format!(
                    "Config option '{}' has invalid type",
                    name
                )]));
            };
            if let Some(uid) = variant_uid {
                let re = Regex::new(&format!("^(?:{})", pattern))?;
                if !re.is_match(uid) {
                    continue;
                }
            }
            for (conf_arch, values) in data {
                if !arch_key_matches(conf_arch, arch) {
                    continue;
                }
                extend_flat(&mut result, values);
            }
        }
        Ok(result)
    }

    /// String flavour of [`Self::get_arch_variant_data`]
    pub fn get_arch_variant_strings(
        &self,
        name: &str,
        arch: &str,
        variant_uid: Option<&str>,
    ) -> Result<Vec<String>> {
        Ok(self
            .get_arch_variant_data(name, arch, variant_uid)?
            .iter()
            .flat_map(value_to_strings)
            .collect())
    }

    pub fn get_arch_strings(&self, name: &str, arch: &str) -> Vec<String> {
        self.get_arch_data(name, arch)
            .iter()
            .flat_map(value_to_strings)
            .collect()
    }

    /// Resolve a path option relative to the configuration directory
    pub fn resolve_path(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }
}

fn arch_key_matches(conf_arch: &str, arch: &str) -> bool {
    if conf_arch == "*" {
        return arch != "src";
    }
    conf_arch == arch
}

fn extend_flat(result: &mut Vec<Value>, data: &Value) {
    match data {
        Value::Array(items) => result.extend(items.iter().cloned()),
        other => result.push(other.clone()),
    }
}

pub(crate) fn value_to_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(text: &str) -> ComposeConf {
        ComposeConf::parse(text, "/etc/compose").unwrap()
    }

    #[test]
    fn test_arch_data_star_skips_src() {
        let c = conf(
            r#"
            [multilib_whitelist]
            "*" = ["libgcc"]
            x86_64 = ["glibc"]
            src = "kernel"
            "#,
        );
        let x86 = c.get_arch_strings("multilib_whitelist", "x86_64");
        assert_eq!(x86, vec!["libgcc", "glibc"]);
        assert_eq!(c.get_arch_strings("multilib_whitelist", "src"), vec!["kernel"]);
        assert_eq!(c.get_arch_strings("multilib_whitelist", "ppc64"), vec!["libgcc"]);
    }

    #[test]
    fn test_arch_variant_data_matches_uid_prefix() {
        let c = conf(
            r#"
            additional_packages = [
                ["^Server$", { "*" = ["httpd"] }],
                ["Client", { x86_64 = ["firefox"], src = ["kernel"] }],
            ]
            "#,
        );
        let server = c
            .get_arch_variant_strings("additional_packages", "x86_64", Some("Server"))
            .unwrap();
        assert_eq!(server, vec!["httpd"]);

        let client = c
            .get_arch_variant_strings("additional_packages", "x86_64", Some("Client-optional"))
            .unwrap();
        assert_eq!(client, vec!["firefox"]);

        let all = c
            .get_arch_variant_strings("additional_packages", "src", None)
            .unwrap();
        assert_eq!(all, vec!["kernel"]);
    }

    #[test]
    fn test_arch_variant_data_rejects_malformed_entry() {
        let c = conf(r#"additional_packages = [["^Server$"]]"#);
        assert!(matches!(
            c.get_arch_variant_data("additional_packages", "x86_64", Some("Server")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_sigkeys_empty_string_is_unsigned() {
        let c = conf(r#"sigkeys = ["FD431D51", ""]"#);
        assert_eq!(c.sigkeys(), vec![Some("FD431D51".to_string()), None]);
    }

    #[test]
    fn test_resolve_path() {
        let c = conf("");
        assert_eq!(c.resolve_path("comps.xml"), PathBuf::from("/etc/compose/comps.xml"));
        assert_eq!(c.resolve_path("/abs/comps.xml"), PathBuf::from("/abs/comps.xml"));
    }
}
