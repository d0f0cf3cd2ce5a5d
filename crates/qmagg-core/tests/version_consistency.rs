//! Workspace crates share one version, declared in the root manifest.

use std::path::Path;

fn workspace_root() -> &'static Path {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .unwrap()
}

fn manifest(dir: &Path) -> toml::Value {
    let text = std::fs::read_to_string(dir.join("Cargo.toml")).unwrap();
    text.parse().unwrap()
}

#[test]
fn members_inherit_workspace_version() {
    let root = manifest(workspace_root());
    let members = root["workspace"]["members"].as_array().unwrap();
    assert!(!members.is_empty());

    for member in members {
        let member = member.as_str().unwrap();
        let doc = manifest(&workspace_root().join(member));
        let inherits = doc["package"]["version"]
            .as_table()
            .and_then(|t| t.get("workspace"))
            .and_then(|v| v.as_bool());
        assert_eq!(
            inherits,
            Some(true),
            "{member} should use version.workspace = true"
        );
    }
}

#[test]
fn workspace_version_matches_crate_version() {
    let root = manifest(workspace_root());
    let version = root["workspace"]["package"]["version"].as_str().unwrap();
    assert_eq!(version, env!("CARGO_PKG_VERSION"));
    assert_eq!(version, qmagg_core::VERSION);
}

#[test]
fn internal_dependency_pins_workspace_version() {
    let root = manifest(workspace_root());
    let version = root["workspace"]["package"]["version"].as_str().unwrap();
    let core = &root["workspace"]["dependencies"]["qmagg-core"];
    assert_eq!(core["version"].as_str(), Some(version));
}
