// src/wrappers/jigdo.rs

//! `jigdo-file` templates for ISO images

use crate::runner::CommandSpec;
use std::path::Path;

/// Template and `.jigdo` file for `image`, with `<tree>//` as the file
/// source so paths in the `.jigdo` are relative to the tree
pub fn make_template_cmd(image: &Path, tree: &Path, jigdo_dir: &Path) -> CommandSpec {
    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut cmd = vec![
        "jigdo-file".to_string(),
        "make-template".into(),
        "--force".into(),
        format!("--image={}", image.display()),
        format!("--jigdo={}", jigdo_dir.join(format!("{}.jigdo", name)).display()),
        format!("--template={}", jigdo_dir.join(format!("{}.template", name)).display()),
        "--no-servers-section".into(),
        "--report=noprogress".into(),
    ];
    cmd.push(format!("{}//", tree.display().to_string().trim_end_matches('/')));
    CommandSpec::Args(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_template_cmd() {
        let cmd = make_template_cmd(
            Path::new("/c/Server/x86_64/iso/F-21-Server-x86_64-dvd1.iso"),
            Path::new("/c/Server/x86_64/os/"),
            Path::new("/c/Server/x86_64/jigdo"),
        );
        assert_eq!(
            cmd.to_shell(),
            "jigdo-file make-template --force \
             --image=/c/Server/x86_64/iso/F-21-Server-x86_64-dvd1.iso \
             --jigdo=/c/Server/x86_64/jigdo/F-21-Server-x86_64-dvd1.iso.jigdo \
             --template=/c/Server/x86_64/jigdo/F-21-Server-x86_64-dvd1.iso.template \
             --no-servers-section --report=noprogress /c/Server/x86_64/os//"
        );
    }
}
