// src/comps.rs

//! Comps (package group) documents
//!
//! Only the parts the compose touches are modelled: group ids and their
//! `default`/`uservisible` flags, package requirements, categories and
//! environments. Everything else in the document is carried through
//! untouched when the file is written back.

use crate::error::{Error, Result};
use crate::variants::{EnvironmentRef, GroupRef};
use crate::xml::{self, Element};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

pub const COMPS_DOCTYPE: &str =
    r#"comps PUBLIC "-//Red Hat, Inc.//DTD Comps info//EN" "comps.dtd""#;

#[derive(Debug, Clone)]
pub struct CompsWrapper {
    root: Element,
}

fn child_id(element: &Element) -> Option<&str> {
    element.child_text("id").map(str::trim)
}

fn bool_text(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

impl CompsWrapper {
    pub fn parse(content: &str) -> Result<Self> {
        let root = xml::parse("comps", content)?;
        if root.name != "comps" {
            return Err(Error::parse("comps", format!("unexpected root element <{}>", root.name)));
        }
        Ok(Self { root })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io_path(path, e))?;
        Self::parse(&content)
    }

    fn groups(&self) -> impl Iterator<Item = &Element> {
        self.root.children_named("group")
    }

    pub fn group_ids(&self) -> Vec<String> {
        self.groups()
            .filter_map(child_id)
            .map(str::to_string)
            .collect()
    }

    pub fn environment_ids(&self) -> Vec<String> {
        self.root
            .children_named("environment")
            .filter_map(child_id)
            .map(str::to_string)
            .collect()
    }

    /// Sorted groups of the environment with the lowest display order;
    /// environments without an order sort last
    pub fn default_environment_groups(&self) -> Option<Vec<String>> {
        let env = self.root.children_named("environment").min_by_key(|env| {
            env.child_text("display_order")
                .and_then(|o| o.trim().parse::<i64>().ok())
                .unwrap_or(i64::MAX)
        })?;
        let mut groups: Vec<String> = env
            .child("grouplist")
            .map(|list| {
                list.children_named("groupid")
                    .map(|g| g.text.trim().to_string())
                    .collect()
            })
            .unwrap_or_default();
        groups.sort();
        Some(groups)
    }

    /// Every package named in any group
    pub fn packages(&self) -> BTreeSet<String> {
        self.groups()
            .filter_map(|g| g.child("packagelist"))
            .flat_map(|list| list.children_named("packagereq"))
            .map(|req| req.text.trim().to_string())
            .collect()
    }

    /// Keep only groups matched by `refs`, applying their flag overrides;
    /// returns the removed group ids
    pub fn filter_groups(&mut self, refs: &[GroupRef]) -> Result<Vec<String>> {
        let patterns = refs
            .iter()
            .map(|r| {
                if r.glob {
                    glob::Pattern::new(&r.name)
                        .map(Some)
                        .map_err(|e| Error::InvalidValue(format!("Invalid group glob '{}': {}", r.name, e)))
                } else {
                    Ok(None)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let mut removed = Vec::new();
        self.root.children.retain_mut(|element| {
            if element.name != "group" {
                return true;
            }
            let id = child_id(element).unwrap_or_default().to_string();
            let matched = refs.iter().zip(&patterns).find(|(r, pattern)| match pattern {
                Some(p) => p.matches(&id),
                None => r.name == id,
            });
            match matched {
                Some((group_ref, _)) => {
                    if let Some(default) = group_ref.default {
                        element.set_child_text("default", bool_text(default));
                    }
                    if let Some(visible) = group_ref.uservisible {
                        element.set_child_text("uservisible", bool_text(visible));
                    }
                    true
                }
                None => {
                    removed.push(id);
                    false
                }
            }
        });
        if !removed.is_empty() {
            debug!("Removed comps groups: {}", removed.join(", "));
            self.prune_group_references();
        }
        Ok(removed)
    }

    /// Keep only environments listed in `refs`, applying display order overrides
    pub fn filter_environments(&mut self, refs: &[EnvironmentRef]) -> Vec<String> {
        let mut removed = Vec::new();
        self.root.children.retain_mut(|element| {
            if element.name != "environment" {
                return true;
            }
            let id = child_id(element).unwrap_or_default().to_string();
            match refs.iter().find(|r| r.name == id) {
                Some(env) => {
                    if let Some(order) = env.display_order {
                        element.set_child_text("display_order", &order.to_string());
                    }
                    true
                }
                None => {
                    removed.push(id);
                    false
                }
            }
        });
        removed
    }

    /// Drop references to groups no longer present from categories and
    /// environments; categories left empty are removed
    fn prune_group_references(&mut self) {
        let present: BTreeSet<String> = self.group_ids().into_iter().collect();
        for element in self.root.children.iter_mut() {
            if element.name != "category" && element.name != "environment" {
                continue;
            }
            if let Some(list) = element.child_mut("grouplist") {
                list.children
                    .retain(|g| g.name != "groupid" || present.contains(g.text.trim()));
            }
        }
        self.root.children.retain(|element| {
            element.name != "category"
                || element
                    .child("grouplist")
                    .is_some_and(|list| list.children_named("groupid").next().is_some())
        });
    }

    pub fn to_xml(&self) -> Result<String> {
        xml::write(&self.root, Some(COMPS_DOCTYPE))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_path(parent, e))?;
        }
        std::fs::write(path, self.to_xml()?).map_err(|e| Error::io_path(path, e))
    }
}
