// src/variants.rs

//! Variant tree model
//!
//! A compose is split into variants (Server, Workstation, ...). Top-level
//! variants own addons, layered products and an optional variant; a child
//! refers to its parent only by uid. The tree is parsed once from the
//! variants document and is read-only afterwards.

use crate::error::{Error, Result};
use crate::xml::{self, Element};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Kind of variant
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::EnumString,
    strum_macros::Display,
    strum_macros::AsRefStr,
)]
pub enum VariantType {
    #[strum(serialize = "variant")]
    Variant,
    #[strum(serialize = "addon")]
    Addon,
    #[strum(serialize = "layered-product")]
    LayeredProduct,
    #[strum(serialize = "optional")]
    Optional,
}

impl VariantType {
    pub const ALL: [VariantType; 4] = [
        VariantType::Variant,
        VariantType::Optional,
        VariantType::Addon,
        VariantType::LayeredProduct,
    ];

    /// Display rank: variant < addon/layered-product < optional
    fn rank(self) -> u8 {
        match self {
            VariantType::Variant => 0,
            VariantType::Addon | VariantType::LayeredProduct => 1,
            VariantType::Optional => 2,
        }
    }
}

/// Reference to a comps group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRef {
    pub name: String,
    pub glob: bool,
    /// Override of the group's `default` flag
    pub default: Option<bool>,
    /// Override of the group's `uservisible` flag
    pub uservisible: Option<bool>,
}

impl GroupRef {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            glob: false,
            default: None,
            uservisible: None,
        }
    }
}

/// Reference to a comps environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentRef {
    pub name: String,
    pub display_order: Option<i64>,
}

/// Product identity carried by a layered product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
    pub name: String,
    pub short: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct Variant {
    pub id: String,
    pub name: String,
    pub variant_type: VariantType,
    pub arches: Vec<String>,
    pub groups: Vec<GroupRef>,
    pub environments: Vec<EnvironmentRef>,
    pub uid: String,
    pub parent_uid: Option<String>,
    pub product: Option<ProductInfo>,
    children: BTreeMap<String, Variant>,
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.variant_type == other.variant_type && self.uid == other.uid
    }
}

impl Eq for Variant {}

impl PartialOrd for Variant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Variant {
    fn cmp(&self, other: &Self) -> Ordering {
        self.variant_type
            .rank()
            .cmp(&other.variant_type.rank())
            .then_with(|| self.uid.cmp(&other.uid))
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uid)
    }
}

/// Filter for [`Variant::get_variants`]
///
/// An empty `types` list matches every type.
#[derive(Debug, Clone, Default)]
pub struct VariantQuery<'a> {
    pub arch: Option<&'a str>,
    pub types: Vec<VariantType>,
    pub include_self: bool,
    pub recursive: bool,
}

impl<'a> VariantQuery<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arch(mut self, arch: &'a str) -> Self {
        self.arch = Some(arch);
        self
    }

    pub fn arch_opt(mut self, arch: Option<&'a str>) -> Self {
        self.arch = arch;
        self
    }

    pub fn types(mut self, types: &[VariantType]) -> Self {
        self.types = types.to_vec();
        self
    }

    pub fn include_self(mut self) -> Self {
        self.include_self = true;
        self
    }

    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    fn type_matches(&self, variant_type: VariantType) -> bool {
        self.types.is_empty() || self.types.contains(&variant_type)
    }
}

fn arch_allowed(arches: &[String], arch: Option<&str>) -> bool {
    match arch {
        None => true,
        Some("src") => true,
        Some(arch) => arches.iter().any(|a| a == arch),
    }
}

impl Variant {
    pub fn new(
        id: &str,
        name: &str,
        variant_type: VariantType,
        arches: Vec<String>,
        groups: Vec<GroupRef>,
        environments: Vec<EnvironmentRef>,
    ) -> Result<Self> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::VariantTree(format!(
                "Variant ID must contain only alphanumeric characters: {}",
                id
            )));
        }
        let mut arches = arches;
        arches.sort();
        arches.dedup();
        let mut groups = groups;
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        let mut environments = environments;
        environments.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            variant_type,
            arches,
            groups,
            environments,
            uid: id.to_string(),
            parent_uid: None,
            product: None,
            children: BTreeMap::new(),
        })
    }

    pub fn is_type(&self, variant_type: VariantType) -> bool {
        self.variant_type == variant_type
    }

    /// Child variant by id
    pub fn child(&self, id: &str) -> Option<&Variant> {
        self.children.get(id)
    }

    pub fn children(&self) -> impl Iterator<Item = &Variant> {
        self.children.values()
    }

    fn reparent(&mut self, parent_uid: &str) {
        self.uid = format!("{}-{}", parent_uid, self.id);
        self.parent_uid = Some(parent_uid.to_string());
        let uid = self.uid.clone();
        for child in self.children.values_mut() {
            child.reparent(&uid);
        }
    }

    /// Nest `child` under this variant
    ///
    /// A child with an id already present is ignored. The child's arches
    /// are narrowed to the intersection with ours.
    pub fn add_variant(&mut self, mut child: Variant) -> Result<()> {
        if self.children.contains_key(&child.id) {
            return Ok(());
        }
        if self.variant_type != VariantType::Variant {
            return Err(Error::VariantTree(
                "Only 'variant' can contain another variants.".to_string(),
            ));
        }
        if child.id == self.id {
            return Err(Error::VariantTree(format!(
                "Child variant id must be different than parent variant id: {}",
                child.id
            )));
        }
        let ours: BTreeSet<&String> = self.arches.iter().collect();
        let arches: Vec<String> = child
            .arches
            .iter()
            .filter(|a| ours.contains(a))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !self.arches.is_empty() && arches.is_empty() {
            return Err(Error::VariantTree(format!(
                "{}: arch list {:?} does not intersect with parent arch list: {:?}",
                child.id, child.arches, self.arches
            )));
        }
        child.arches = arches;
        child.reparent(&self.uid);
        self.children.insert(child.id.clone(), child);
        Ok(())
    }

    /// Variants under (and optionally including) this one that match `query`
    ///
    /// The `src` arch always matches. Recursion descends only into matched
    /// children and never re-adds them as "self".
    pub fn get_variants(&self, query: &VariantQuery<'_>) -> Vec<&Variant> {
        let mut result = Vec::new();
        if !arch_allowed(&self.arches, query.arch) {
            return result;
        }
        if query.include_self {
            result.push(self);
        }
        let nested = VariantQuery {
            include_self: false,
            ..query.clone()
        };
        for child in self.children.values() {
            if !query.type_matches(child.variant_type) {
                continue;
            }
            if !arch_allowed(&child.arches, query.arch) {
                continue;
            }
            result.push(child);
            if query.recursive {
                // descendants are not filtered by arch, only by type
                let deeper = VariantQuery {
                    arch: None,
                    ..nested.clone()
                };
                result.extend(child.get_variants(&deeper));
            }
        }
        result
    }

    pub fn get_addons(&self, arch: Option<&str>) -> Vec<&Variant> {
        self.get_variants(&VariantQuery::new().arch_opt(arch).types(&[VariantType::Addon]))
    }

    pub fn get_layered_products(&self, arch: Option<&str>) -> Vec<&Variant> {
        self.get_variants(
            &VariantQuery::new()
                .arch_opt(arch)
                .types(&[VariantType::LayeredProduct]),
        )
    }

    pub fn get_optional(&self, arch: Option<&str>) -> Vec<&Variant> {
        self.get_variants(&VariantQuery::new().arch_opt(arch).types(&[VariantType::Optional]))
    }

    /// Own groups plus groups of matching descendants, without duplicates
    pub fn get_groups(&self, query: &VariantQuery<'_>) -> Vec<GroupRef> {
        let mut result = self.groups.clone();
        for variant in self.get_variants(query) {
            if variant.uid == self.uid {
                continue;
            }
            for group in variant.get_groups(query) {
                if !result.contains(&group) {
                    result.push(group);
                }
            }
        }
        result
    }
}

/// Parsed variants document: top-level variants keyed by id
#[derive(Debug, Clone, Default)]
pub struct VariantForest {
    top_level: BTreeMap<String, Variant>,
}

impl VariantForest {
    pub fn new(variants: impl IntoIterator<Item = Variant>) -> Self {
        Self {
            top_level: variants.into_iter().map(|v| (v.id.clone(), v)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.top_level.is_empty()
    }

    pub fn top_level(&self) -> impl Iterator<Item = &Variant> {
        self.top_level.values()
    }

    pub fn get(&self, id: &str) -> Option<&Variant> {
        self.top_level.get(id)
    }

    /// Look a variant up anywhere in the forest by uid
    pub fn by_uid(&self, uid: &str) -> Option<&Variant> {
        let mut parts = uid.split('-');
        let mut current = self.top_level.get(parts.next()?)?;
        for id in parts {
            current = current.child(id)?;
        }
        Some(current)
    }

    /// Parent of `variant`, if it has one
    pub fn parent_of(&self, variant: &Variant) -> Option<&Variant> {
        variant.parent_uid.as_deref().and_then(|uid| self.by_uid(uid))
    }

    /// Every variant of the given types (all types when empty), sorted
    /// and deduplicated
    ///
    /// Top-level variants are matched against `arch` directly; their
    /// children are collected through [`Variant::get_variants`].
    pub fn get_variants(
        &self,
        types: &[VariantType],
        arch: Option<&str>,
        recursive: bool,
    ) -> Vec<&Variant> {
        let types: Vec<VariantType> = if types.is_empty() {
            VariantType::ALL.to_vec()
        } else {
            types.to_vec()
        };
        let mut result: Vec<&Variant> = Vec::new();
        for variant in self.top_level.values() {
            if types.contains(&variant.variant_type) && arch_allowed(&variant.arches, arch) {
                result.push(variant);
            }
            let mut query = VariantQuery::new().arch_opt(arch).types(&types);
            query.recursive = recursive;
            result.extend(variant.get_variants(&query));
        }
        result.sort();
        result.dedup_by(|a, b| a.uid == b.uid);
        result
    }

    /// Sorted union of all variant arches
    pub fn arches(&self) -> Vec<String> {
        let arches: BTreeSet<String> = self
            .get_variants(&[], None, false)
            .iter()
            .flat_map(|v| v.arches.iter().cloned())
            .collect();
        arches.into_iter().collect()
    }
}

fn parse_bool(value: &str, errors: &mut Vec<String>) -> bool {
    match value {
        "true" => true,
        "false" => false,
        other => {
            errors.push(format!("Invalid boolean value in variants XML: {}", other));
            false
        }
    }
}

const VARIANT_ELEMENTS: &[&str] = &["arches", "groups", "environments", "product", "variants"];

fn validate_variant(node: &Element, path: &str, errors: &mut Vec<String>) {
    let id = node.attr("id").unwrap_or("?");
    let here = format!("{}/variant[@id='{}']", path, id);
    for attr in ["id", "name", "type"] {
        if node.attr(attr).is_none() {
            errors.push(format!("{}: missing attribute '{}'", here, attr));
        }
    }
    for (key, _) in &node.attrs {
        if !matches!(key.as_str(), "id" | "name" | "type" | "has_optional") {
            errors.push(format!("{}: unexpected attribute '{}'", here, key));
        }
    }
    if let Some(kind) = node.attr("type") {
        match VariantType::from_str(kind) {
            Ok(VariantType::LayeredProduct) => match node.child("product") {
                Some(product) => {
                    for attr in ["name", "short", "version"] {
                        if product.attr(attr).is_none() {
                            errors.push(format!("{}/product: missing attribute '{}'", here, attr));
                        }
                    }
                }
                None => errors.push(format!("{}: layered-product requires a product element", here)),
            },
            Ok(_) => {}
            Err(_) => errors.push(format!("{}: invalid variant type '{}'", here, kind)),
        }
    }
    if let Some(value) = node.attr("has_optional") {
        parse_bool(value, errors);
    }
    for child in &node.children {
        if !VARIANT_ELEMENTS.contains(&child.name.as_str()) {
            errors.push(format!("{}: unexpected element '{}'", here, child.name));
        }
    }
    match node.child("arches") {
        Some(arches) if arches.children_named("arch").next().is_some() => {}
        _ => errors.push(format!("{}: at least one arch is required", here)),
    }
    if let Some(groups) = node.child("groups") {
        for group in groups.children_named("group") {
            for attr in ["glob", "default", "uservisible"] {
                if let Some(value) = group.attr(attr) {
                    parse_bool(value, errors);
                }
            }
        }
    }
    if let Some(envs) = node.child("environments") {
        for env in envs.children_named("environment") {
            if let Some(order) = env.attr("display_order") {
                if order.parse::<i64>().is_err() {
                    errors.push(format!("{}: invalid display_order '{}'", here, order));
                }
            }
        }
    }
    if let Some(nested) = node.child("variants") {
        for child in &nested.children {
            match child.name.as_str() {
                "variant" => validate_variant(child, &here, errors),
                "ref" if child.attr("id").is_some() => {}
                "ref" => errors.push(format!("{}/ref: missing attribute 'id'", here)),
                other => errors.push(format!("{}: unexpected element '{}'", here, other)),
            }
        }
    }
}

/// Structural checks over the whole document, collecting every problem
pub fn validate_document(root: &Element) -> Vec<String> {
    let mut errors = Vec::new();
    if root.name != "variants" {
        errors.push(format!("root element must be 'variants', found '{}'", root.name));
        return errors;
    }
    for node in &root.children {
        if node.name == "variant" {
            validate_variant(node, "/variants", &mut errors);
        } else {
            errors.push(format!("/variants: unexpected element '{}'", node.name));
        }
    }
    errors
}

struct VariantsParser<'a> {
    refs: BTreeMap<String, &'a Element>,
    tree_arches: Option<&'a [String]>,
}

impl<'a> VariantsParser<'a> {
    fn parse_node(&self, node: &'a Element) -> Result<Variant> {
        let mut errors = Vec::new();
        let id = node.attr("id").unwrap_or_default();
        let name = node.attr("name").unwrap_or_default();
        let variant_type = VariantType::from_str(node.attr("type").unwrap_or_default())
            .map_err(|e| Error::VariantTree(e.to_string()))?;

        let mut arches: Vec<String> = node
            .child("arches")
            .map(|a| a.children_named("arch").map(|c| c.text.clone()).collect())
            .unwrap_or_default();
        if let Some(tree_arches) = self.tree_arches {
            arches.retain(|a| tree_arches.contains(a));
        }

        let mut groups = Vec::new();
        for list in node.children_named("groups") {
            for group in list.children_named("group") {
                groups.push(GroupRef {
                    name: group.text.clone(),
                    glob: parse_bool(group.attr("glob").unwrap_or("false"), &mut errors),
                    default: group.attr("default").map(|v| parse_bool(v, &mut errors)),
                    uservisible: group.attr("uservisible").map(|v| parse_bool(v, &mut errors)),
                });
            }
        }

        let mut environments = Vec::new();
        for list in node.children_named("environments") {
            for env in list.children_named("environment") {
                environments.push(EnvironmentRef {
                    name: env.text.clone(),
                    display_order: env.attr("display_order").and_then(|v| v.parse().ok()),
                });
            }
        }

        let has_optional = parse_bool(node.attr("has_optional").unwrap_or("false"), &mut errors);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        let mut variant = Variant::new(id, name, variant_type, arches, groups, environments)?;
        if variant_type == VariantType::LayeredProduct {
            if let Some(product) = node.child("product") {
                variant.product = Some(ProductInfo {
                    name: product.attr("name").unwrap_or_default().to_string(),
                    short: product.attr("short").unwrap_or_default().to_string(),
                    version: product.attr("version").unwrap_or_default().to_string(),
                });
            }
        }

        let mut contains_optional = false;
        if let Some(nested) = node.child("variants") {
            for child_node in nested.children_named("variant") {
                let child = self.parse_node(child_node)?;
                if child.variant_type == VariantType::Optional {
                    contains_optional = true;
                }
                variant.add_variant(child)?;
            }
        }

        if has_optional && !contains_optional {
            let optional = Variant::new(
                "optional",
                "optional",
                VariantType::Optional,
                variant.arches.clone(),
                Vec::new(),
                Vec::new(),
            )?;
            variant.add_variant(optional)?;
        }

        if let Some(nested) = node.child("variants") {
            for reference in nested.children_named("ref") {
                let ref_id = reference.attr("id").unwrap_or_default();
                let target: &'a Element = *self.refs.get(ref_id).ok_or_else(|| {
                    Error::VariantTree(format!("Unknown variant reference: {}", ref_id))
                })?;
                let child = self.parse_node(target)?;
                variant.add_variant(child)?;
            }
        }

        Ok(variant)
    }
}

/// Parse a variants document into a forest
///
/// Top-level addons and layered products are only definitions for
/// `<ref id=".."/>` elements; any other top-level type is an error.
pub fn parse_variants(content: &str, tree_arches: Option<&[String]>) -> Result<VariantForest> {
    let root = xml::parse("variants document", content)?;
    let errors = validate_document(&root);
    if !errors.is_empty() {
        return Err(Error::Validation(errors));
    }

    let mut refs = BTreeMap::new();
    for node in root.children_named("variant") {
        if matches!(node.attr("type"), Some("addon") | Some("layered-product")) {
            refs.insert(node.attr("id").unwrap_or_default().to_string(), node);
        }
    }

    let parser = VariantsParser { refs, tree_arches };
    let mut variants = Vec::new();
    for node in root.children_named("variant") {
        match node.attr("type") {
            Some("variant") => variants.push(parser.parse_node(node)?),
            Some("addon") | Some("layered-product") => {}
            other => {
                return Err(Error::VariantTree(format!(
                    "Invalid variant type at the top-level: {}",
                    other.unwrap_or_default()
                )));
            }
        }
    }
    Ok(VariantForest::new(variants))
}

/// Human-readable dump of the forest, one block per variant
pub fn describe(forest: &VariantForest) -> String {
    let mut out = String::new();
    let query = VariantQuery::new().include_self().recursive();
    for top in forest.top_level() {
        for variant in top.get_variants(&query) {
            out.push_str(&format!(
                "ID: {:<30} NAME: {:<40} TYPE: {:<16} UID: {}\n",
                variant.id, variant.name, variant.variant_type, variant.uid
            ));
            out.push_str(&format!("    ARCHES: {}\n", variant.arches.join(", ")));
            for group in &variant.groups {
                out.push_str(&format!(
                    "    GROUP:  {:<40} GLOB: {:<5} DEFAULT: {:<5} USERVISIBLE: {:<5}\n",
                    group.name,
                    group.glob,
                    describe_flag(group.default),
                    describe_flag(group.uservisible)
                ));
            }
            for env in &variant.environments {
                out.push_str(&format!(
                    "    ENV:    {:<40} DISPLAY_ORDER: {}\n",
                    env.name,
                    env.display_order
                        .map(|o| o.to_string())
                        .unwrap_or_else(|| "None".to_string())
                ));
            }
            out.push('\n');
        }
    }
    out
}

fn describe_flag(flag: Option<bool>) -> String {
    flag.map(|f| f.to_string()).unwrap_or_else(|| "None".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arches(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    fn variant(id: &str, kind: VariantType, list: &[&str]) -> Variant {
        Variant::new(id, id, kind, arches(list), Vec::new(), Vec::new()).unwrap()
    }

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<variants>
  <variant id="ResilientStorage" name="Resilient Storage" type="addon">
    <arches><arch>x86_64</arch></arches>
    <groups><group>resilient-storage</group></groups>
  </variant>
  <variant id="SAP" name="SAP" type="layered-product">
    <arches><arch>x86_64</arch><arch>ppc64</arch></arches>
    <product name="SAP" short="sap" version="1.0"/>
  </variant>
  <variant id="Server" name="Server" type="variant" has_optional="true">
    <arches><arch>x86_64</arch><arch>s390x</arch></arches>
    <groups>
      <group default="true">core</group>
      <group glob="true">base*</group>
    </groups>
    <environments><environment display_order="10">minimal</environment></environments>
    <variants>
      <ref id="ResilientStorage"/>
      <ref id="SAP"/>
    </variants>
  </variant>
  <variant id="Client" name="Client" type="variant">
    <arches><arch>i386</arch><arch>x86_64</arch></arches>
  </variant>
</variants>
"#;

    #[test]
    fn test_child_arches_are_intersection() {
        let mut server = variant("Server", VariantType::Variant, &["x86_64"]);
        server
            .add_variant(variant("LoadBalancer", VariantType::Addon, &["x86_64", "ppc64"]))
            .unwrap();
        let lb = server.child("LoadBalancer").unwrap();
        assert_eq!(lb.arches, vec!["x86_64"]);
        assert_eq!(lb.uid, "Server-LoadBalancer");
        assert_eq!(lb.parent_uid.as_deref(), Some("Server"));
    }

    #[test]
    fn test_empty_intersection_fails() {
        let mut server = variant("Server", VariantType::Variant, &["x86_64"]);
        let err = server
            .add_variant(variant("HA", VariantType::Addon, &["ppc64"]))
            .unwrap_err();
        assert!(matches!(err, Error::VariantTree(_)));
    }

    #[test]
    fn test_nesting_rules() {
        let mut addon = variant("HA", VariantType::Addon, &["x86_64"]);
        assert!(addon.add_variant(variant("X", VariantType::Addon, &["x86_64"])).is_err());

        let mut server = variant("Server", VariantType::Variant, &["x86_64"]);
        assert!(server.add_variant(variant("Server", VariantType::Addon, &["x86_64"])).is_err());

        // duplicate child ids are ignored
        server.add_variant(variant("HA", VariantType::Addon, &["x86_64"])).unwrap();
        server.add_variant(variant("HA", VariantType::Addon, &["ppc64"])).unwrap();
        assert_eq!(server.children().count(), 1);
    }

    #[test]
    fn test_non_alphanumeric_id_rejected() {
        assert!(Variant::new("Server-1", "x", VariantType::Variant, vec![], vec![], vec![]).is_err());
    }

    #[test]
    fn test_ordering() {
        let mut list = vec![
            variant("optional", VariantType::Optional, &[]),
            variant("B", VariantType::Addon, &[]),
            variant("Z", VariantType::Variant, &[]),
            variant("A", VariantType::LayeredProduct, &[]),
        ];
        list.sort();
        let ids: Vec<&str> = list.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["Z", "A", "B", "optional"]);
    }

    #[test]
    fn test_parse_document() {
        let forest = parse_variants(DOC, None).unwrap();
        let server = forest.get("Server").unwrap();
        assert_eq!(server.arches, vec!["s390x", "x86_64"]);
        assert_eq!(server.groups[0].name, "base*");
        assert!(server.groups[0].glob);
        assert_eq!(server.groups[1].default, Some(true));
        assert_eq!(server.environments[0].display_order, Some(10));

        let optional = forest.by_uid("Server-optional").unwrap();
        assert_eq!(optional.variant_type, VariantType::Optional);
        assert_eq!(optional.arches, server.arches);
        assert!(optional.groups.is_empty());

        let sap = forest.by_uid("Server-SAP").unwrap();
        assert_eq!(sap.arches, vec!["x86_64"]);
        assert_eq!(sap.product.as_ref().unwrap().short, "sap");
        assert_eq!(forest.parent_of(sap).unwrap().uid, "Server");

        // top-level addon definitions are not variants by themselves
        assert!(forest.get("ResilientStorage").is_none());
    }

    #[test]
    fn test_parse_with_tree_arches() {
        let filter = arches(&["x86_64"]);
        let forest = parse_variants(DOC, Some(&filter)).unwrap();
        assert_eq!(forest.get("Client").unwrap().arches, vec!["x86_64"]);
        assert_eq!(forest.arches(), vec!["x86_64"]);
    }

    #[test]
    fn test_invalid_documents() {
        let bad_bool = DOC.replace(r#"has_optional="true""#, r#"has_optional="yes""#);
        assert!(matches!(parse_variants(&bad_bool, None), Err(Error::Validation(_))));

        let top_optional = r#"<variants><variant id="O" name="O" type="optional"><arches><arch>x86_64</arch></arches></variant></variants>"#;
        assert!(matches!(parse_variants(top_optional, None), Err(Error::VariantTree(_))));

        let no_arches = r#"<variants><variant id="S" name="S" type="variant"/></variants>"#;
        let Err(Error::Validation(errors)) = parse_variants(no_arches, None) else {
            panic!("expected validation error");
        };
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_get_variants_filters() {
        let forest = parse_variants(DOC, None).unwrap();
        let server = forest.get("Server").unwrap();

        let addons = server.get_addons(Some("x86_64"));
        assert_eq!(addons.len(), 1);
        assert!(server.get_addons(Some("s390x")).is_empty());
        // src is always allowed
        assert_eq!(server.get_addons(Some("src")).len(), 1);
        // unknown arch on self returns nothing, even with include_self
        assert!(
            server
                .get_variants(&VariantQuery::new().arch("ppc64").include_self())
                .is_empty()
        );

        let uids: Vec<&str> = forest
            .get_variants(&[], Some("x86_64"), false)
            .iter()
            .map(|v| v.uid.as_str())
            .collect();
        assert_eq!(
            uids,
            vec!["Client", "Server", "Server-ResilientStorage", "Server-SAP", "Server-optional"]
        );

        let optional: Vec<&str> = forest
            .get_variants(&[VariantType::Optional], None, false)
            .iter()
            .map(|v| v.uid.as_str())
            .collect();
        assert_eq!(optional, vec!["Server-optional"]);
    }

    #[test]
    fn test_get_groups_collects_children() {
        let forest = parse_variants(DOC, None).unwrap();
        let server = forest.get("Server").unwrap();
        let groups = server.get_groups(
            &VariantQuery::new()
                .types(&[VariantType::Addon])
                .include_self(),
        );
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["base*", "core", "resilient-storage"]);
    }
}
