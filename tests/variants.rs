// tests/variants.rs

//! Integration tests for variant trees and volume ids

mod common;

use distcompose::util::{VOLID_MAX_LEN, get_volid};
use distcompose::variants::{describe, parse_variants};
use distcompose::{ComposeConf, Error, Variant, VariantType};

fn arches(list: &[&str]) -> Vec<String> {
    list.iter().map(|a| a.to_string()).collect()
}

#[test]
fn test_addon_arches_intersect_with_parent() {
    let mut server = Variant::new("Server", "Server", VariantType::Variant, arches(&["x86_64"]), Vec::new(), Vec::new()).unwrap();
    let lb = Variant::new(
        "LoadBalancer",
        "Load Balancer",
        VariantType::Addon,
        arches(&["x86_64", "ppc64"]),
        Vec::new(),
        Vec::new(),
    )
    .unwrap();
    server.add_variant(lb).unwrap();

    let lb = server.child("LoadBalancer").unwrap();
    assert_eq!(lb.arches, arches(&["x86_64"]));
    assert_eq!(lb.uid, "Server-LoadBalancer");
    assert_eq!(lb.parent_uid.as_deref(), Some("Server"));
}

#[test]
fn test_disjoint_arches_are_rejected() {
    let mut server = Variant::new("Server", "Server", VariantType::Variant, arches(&["x86_64"]), Vec::new(), Vec::new()).unwrap();
    let ppc = Variant::new("PPC", "PPC", VariantType::Addon, arches(&["ppc64"]), Vec::new(), Vec::new()).unwrap();
    let err = server.add_variant(ppc).unwrap_err();
    assert!(matches!(err, Error::VariantTree(_)));
}

#[test]
fn test_document_tree_arches_filter() {
    let forest = parse_variants(common::VARIANTS_XML, None).unwrap();
    assert_eq!(forest.arches(), arches(&["i386", "x86_64"]));
    assert!(forest.by_uid("Server-LoadBalancer").is_some());

    let only = arches(&["i386"]);
    let forest = parse_variants(common::VARIANTS_XML, Some(&only)).unwrap();
    assert_eq!(forest.arches(), only);

    let text = describe(&forest);
    assert!(text.contains("UID: Client"), "{}", text);
}

fn volid_conf(product_short: &str) -> ComposeConf {
    ComposeConf::parse(
        &format!(
            "product_name = \"Fedora\"\nproduct_short = \"{}\"\nproduct_version = \"21\"\n",
            product_short
        ),
        "/tmp",
    )
    .unwrap()
}

#[test]
fn test_volid_length_bound() {
    let forest = parse_variants(common::VARIANTS_XML, None).unwrap();
    let server = forest.by_uid("Server").unwrap();

    let conf = volid_conf("F");
    let volid = get_volid(&conf, "x86_64", Some(server), false).unwrap().unwrap();
    assert_eq!(volid, "F-21 Server.x86_64");
    assert!(volid.len() <= VOLID_MAX_LEN);

    // falls back to the shorter template without the variant
    let conf = volid_conf("Fedora-Workstation");
    let volid = get_volid(&conf, "x86_64", Some(server), false).unwrap().unwrap();
    assert_eq!(volid, "Fedora-Workstation-21 x86_64");

    let conf = volid_conf("Fedora-Workstation-Extra-Long");
    assert!(get_volid(&conf, "x86_64", Some(server), false).is_err());

    let addon = forest.by_uid("Server-LoadBalancer").unwrap();
    assert_eq!(get_volid(&conf, "x86_64", Some(addon), false).unwrap(), None);
}
