// src/metadata/treeinfo.rs

//! `.treeinfo` documents
//!
//! INI with ordered sections. Installer builders emit their own
//! `.treeinfo`; its `images-*` and `stage2` sections are carried over into
//! the tree we write.

use crate::error::{Error, Result};
use std::fmt::Write as _;
use std::path::Path;

pub const TREEINFO_VERSION: &str = "1.0";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl IniDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut doc = Self::new();
        let mut current: Option<String> = None;
        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                doc.section_mut(name.trim());
                current = Some(name.trim().to_string());
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::parse(".treeinfo", format!("line {}: expected key = value", lineno + 1)));
            };
            let Some(section) = current.as_deref() else {
                return Err(Error::parse(".treeinfo", format!("line {}: option outside of a section", lineno + 1)));
            };
            doc.set(section, key.trim(), value.trim());
        }
        Ok(doc)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io_path(path, e))?;
        Self::parse(&content)
    }

    fn section_mut(&mut self, name: &str) -> &mut Vec<(String, String)> {
        let idx = match self.sections.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                self.sections.push((name.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        };
        &mut self.sections[idx].1
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        let value = value.into();
        let entries = self.section_mut(section);
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key.to_string(), value)),
        }
    }

    /// Drop `key` from `section`, returning its value
    pub fn remove(&mut self, section: &str, key: &str) -> Option<String> {
        let (_, entries) = self.sections.iter_mut().find(|(n, _)| n == section)?;
        let idx = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(idx).1)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn section(&self, name: &str) -> Option<&[(String, String)]> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, entries)| entries.as_slice())
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|(n, _)| n.as_str())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, (name, entries)) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "[{}]", name);
            for (key, value) in entries {
                let _ = writeln!(out, "{} = {}", key, value);
            }
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render()).map_err(|e| Error::io_path(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lorax_treeinfo() {
        let doc = IniDocument::parse(
            "[general]\nfamily = Fedora\n\n[images-x86_64]\nkernel = images/pxeboot/vmlinuz\nboot.iso = images/boot.iso\n\n[stage2]\nmainimage = LiveOS/squashfs.img\n",
        )
        .unwrap();
        assert_eq!(doc.get("stage2", "mainimage"), Some("LiveOS/squashfs.img"));
        assert_eq!(doc.section("images-x86_64").unwrap().len(), 2);
        assert_eq!(
            doc.section_names().collect::<Vec<_>>(),
            vec!["general", "images-x86_64", "stage2"]
        );
    }

    #[test]
    fn test_render_keeps_order_and_overwrites() {
        let mut doc = IniDocument::new();
        doc.set("header", "version", "1.0");
        doc.set("tree", "arch", "x86_64");
        doc.set("header", "version", "1.1");
        assert_eq!(doc.render(), "[header]\nversion = 1.1\n\n[tree]\narch = x86_64\n");
    }

    #[test]
    fn test_option_outside_section_rejected() {
        assert!(IniDocument::parse("key = value\n").is_err());
    }
}
