// src/arch.rs

//! Architecture compatibility tables
//!
//! Tree arches (the arch a compose tree is built for) map to the list of
//! package arches installable on them. Multilib arches are the secondary
//! (usually 32-bit) arches a 64-bit tree may carry.

/// Package arch -> next compatible arch, walked to build a compat list
const ARCH_PARENTS: &[(&str, &str)] = &[
    // ia32
    ("athlon", "i686"),
    ("i686", "i586"),
    ("geode", "i686"),
    ("i586", "i486"),
    ("i486", "i386"),
    ("i386", "noarch"),
    // amd64
    ("x86_64", "athlon"),
    ("amd64", "x86_64"),
    ("ia32e", "x86_64"),
    // ppc64le
    ("ppc64le", "noarch"),
    // ppc
    ("ppc64p7", "ppc64"),
    ("ppc64pseries", "ppc64"),
    ("ppc64iseries", "ppc64"),
    ("ppc64", "ppc"),
    ("ppc", "noarch"),
    // s390
    ("s390x", "s390"),
    ("s390", "noarch"),
    // sparc
    ("sparc64v", "sparcv9v"),
    ("sparc64", "sparcv9"),
    ("sparcv9v", "sparcv9"),
    ("sparcv9", "sparcv8"),
    ("sparcv8", "sparc"),
    ("sparc", "noarch"),
    // ia64
    ("ia64", "noarch"),
    // arm
    ("armv7hnl", "armv7hl"),
    ("armv7hl", "armv6hl"),
    ("armv6hl", "noarch"),
    ("armv7l", "armv6l"),
    ("armv6l", "armv5tejl"),
    ("armv5tejl", "armv5tel"),
    ("armv5tel", "noarch"),
    // aarch64
    ("aarch64", "noarch"),
];

/// Primary arch -> (multilib arch, ...) for arches that carry a second ABI
const MULTILIB_ARCHES: &[(&str, &str)] = &[
    ("x86_64", "athlon"),
    ("sparc64v", "sparcv9v"),
    ("sparc64", "sparcv9"),
    ("ppc64", "ppc"),
    ("s390x", "s390"),
];

/// Tree arches whose newest package arch differs from the tree arch name
const TREE_ARCH_YUM_ARCH: &[(&str, &str)] = &[
    ("i386", "athlon"),
    ("ppc64", "ppc64p7"),
    ("sparc", "sparc64v"),
    ("arm", "armv7l"),
    ("armhfp", "armv7hnl"),
];

fn lookup(table: &[(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Whether `arch` is a package arch known to the compat tables
pub fn is_known_arch(arch: &str) -> bool {
    matches!(arch, "noarch" | "src" | "nosrc") || lookup(ARCH_PARENTS, arch).is_some()
}

/// Map a tree arch to the newest package arch it can install
pub fn tree_arch_to_yum_arch(tree_arch: &str) -> String {
    lookup(TREE_ARCH_YUM_ARCH, tree_arch)
        .unwrap_or(tree_arch)
        .to_string()
}

/// Map a package arch to the tree arch it belongs to (i686 -> i386)
pub fn get_base_arch(arch: &str) -> String {
    let base = match arch {
        "i386" | "i486" | "i586" | "i686" | "athlon" | "geode" => "i386",
        "x86_64" | "amd64" | "ia32e" => "x86_64",
        "ppc64" | "ppc64p7" | "ppc64pseries" | "ppc64iseries" => "ppc64",
        "sparc64" | "sparc64v" | "sparcv9" | "sparcv9v" | "sparcv8" => "sparc",
        "armv7hnl" | "armv7hl" | "armv6hl" => "armhfp",
        "armv7l" | "armv6l" | "armv5tejl" | "armv5tel" => "arm",
        other => other,
    };
    base.to_string()
}

/// Walk the compat table from `arch`; unknown arches get `noarch` appended
pub fn get_arch_list(arch: &str) -> Vec<String> {
    let mut result = vec![arch.to_string()];
    let mut current = arch;
    while let Some(parent) = lookup(ARCH_PARENTS, current) {
        result.push(parent.to_string());
        current = parent;
    }
    if result[0] == "sparc64v" {
        result.insert(1, "sparc64".to_string());
    }
    if result.len() == 1 {
        result.push("noarch".to_string());
    }
    result
}

/// The secondary ABI arch for a package arch, if it has one
pub fn get_multilib_arch(yum_arch: &str) -> Option<String> {
    let mut current = yum_arch;
    loop {
        if let Some(multilib) = lookup(MULTILIB_ARCHES, current) {
            return Some(multilib.to_string());
        }
        match lookup(ARCH_PARENTS, current) {
            Some(parent) if parent != "noarch" => current = parent,
            _ => return None,
        }
    }
}

/// Package arches that only appear on a tree arch through multilib
pub fn get_valid_multilib_arches(tree_arch: &str) -> Vec<String> {
    let yum_arch = tree_arch_to_yum_arch(tree_arch);
    match get_multilib_arch(&yum_arch) {
        Some(multilib) => get_arch_list(&multilib)
            .into_iter()
            .filter(|a| a != "noarch" && a != "src")
            .collect(),
        None => Vec::new(),
    }
}

/// All package arches that may go into a tree of `tree_arch`
pub fn get_valid_arches(
    tree_arch: &str,
    multilib: bool,
    add_noarch: bool,
    add_src: bool,
) -> Vec<String> {
    let yum_arch = tree_arch_to_yum_arch(tree_arch);
    let mut result: Vec<String> = Vec::new();
    for arch in get_arch_list(&yum_arch) {
        if !result.contains(&arch) {
            result.push(arch);
        }
    }

    if !multilib {
        let multilib_arches = get_valid_multilib_arches(tree_arch);
        result.retain(|a| !multilib_arches.contains(a));
    }

    if add_noarch && !result.iter().any(|a| a == "noarch") {
        result.push("noarch".to_string());
    }

    if add_src && !result.iter().any(|a| a == "src") {
        result.push("src".to_string());
    }
    result
}

/// Package arches compatible with `arch` (its tree arch is derived first)
pub fn get_compatible_arches(arch: &str, multilib: bool) -> Vec<String> {
    let tree_arch = get_base_arch(arch);
    get_valid_arches(&tree_arch, multilib, true, false)
}

/// Split "name.arch" into (name, Some(arch)); a suffix that is not a
/// known arch stays part of the name
pub fn split_name_arch(name_arch: &str) -> (String, Option<String>) {
    if let Some((name, arch)) = name_arch.rsplit_once('.') {
        if is_known_arch(arch) {
            return (name.to_string(), Some(arch.to_string()));
        }
    }
    (name_arch.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x86_64_with_multilib() {
        let arches = get_valid_arches("x86_64", true, true, false);
        assert_eq!(
            arches,
            vec!["x86_64", "athlon", "i686", "i586", "i486", "i386", "noarch"]
        );
    }

    #[test]
    fn test_x86_64_without_multilib() {
        assert_eq!(
            get_valid_arches("x86_64", false, true, true),
            vec!["x86_64", "noarch", "src"]
        );
        // the compat walk always ends in noarch
        assert_eq!(
            get_valid_arches("x86_64", false, false, false),
            vec!["x86_64", "noarch"]
        );
    }

    #[test]
    fn test_ppc64_uses_newest_cpu() {
        assert_eq!(
            get_valid_arches("ppc64", true, true, false),
            vec!["ppc64p7", "ppc64", "ppc", "noarch"]
        );
        assert_eq!(get_valid_multilib_arches("ppc64"), vec!["ppc"]);
    }

    #[test]
    fn test_no_multilib_for_i386() {
        assert!(get_valid_multilib_arches("i386").is_empty());
        assert_eq!(get_compatible_arches("i686", false)[0], "athlon");
    }

    #[test]
    fn test_unknown_arch_gets_noarch() {
        assert_eq!(get_arch_list("riscv64"), vec!["riscv64", "noarch"]);
    }

    #[test]
    fn test_split_name_arch() {
        assert_eq!(
            split_name_arch("glibc.i686"),
            ("glibc".to_string(), Some("i686".to_string()))
        );
        assert_eq!(split_name_arch("python3.11"), ("python3.11".to_string(), None));
        assert_eq!(split_name_arch("bash"), ("bash".to_string(), None));
    }
}
