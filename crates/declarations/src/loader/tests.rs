//! Tests for the declaration loader module.

use std::fs;

use tempfile::TempDir;

use super::*;

const HUB_YAML: &str = r#"
- hub_firmware:
    name: Hub Firmware
    installed_version: "{{ states('sensor.hub_version') }}"
    latest_version: "{{ state_attr('sensor.hub_version', 'latest') }}"
"#;

const BULBS_YAML: &str = r#"
- bulbs:
    for_each:
      - device_id: "1"
      - device_id: "2"
      - device_id: "3"
    update:
      name: "{{ item.device_id }} Firmware"
      installed_version: "{{ states('sensor.bulb_' ~ item.device_id) }}"
      latest_version: "4.0"
"#;

fn temp_dir() -> TempDir {
    TempDir::new().expect("create tempdir")
}

fn loaded_slugs(report: &LoadReport) -> Vec<(String, usize)> {
    report
        .results
        .iter()
        .filter_map(|r| match &r.status {
            LoadStatus::Loaded { slug, entities } => Some((slug.clone(), *entities)),
            _ => None,
        })
        .collect()
}

#[test]
fn load_single_file() {
    let dir = temp_dir();
    let path = dir.path().join("template_update.yaml");
    fs::write(&path, format!("{HUB_YAML}{BULBS_YAML}")).unwrap();

    let loader = DeclarationLoader::new(path.clone());
    let report = loader.load_all().unwrap();

    assert_eq!(report.specs.len(), 4);
    assert_eq!(
        loaded_slugs(&report),
        vec![("hub_firmware".to_string(), 1), ("bulbs".to_string(), 3)]
    );
    assert_eq!(report.failed(), 0);
    assert!(report.results.iter().all(|r| r.path == path));
}

#[test]
fn load_directory_skips_dotfiles_and_non_yaml() {
    let dir = temp_dir();
    fs::write(dir.path().join("hub.yml"), HUB_YAML).unwrap();
    fs::write(dir.path().join(".hidden.yml"), BULBS_YAML).unwrap();
    fs::write(dir.path().join("readme.txt"), "not a declaration").unwrap();

    let sub = dir.path().join("lights");
    fs::create_dir(&sub).unwrap();
    fs::write(sub.join("bulbs.yaml"), BULBS_YAML).unwrap();

    let report = DeclarationLoader::new(dir.path().to_path_buf())
        .load_all()
        .unwrap();

    let skipped = report
        .results
        .iter()
        .filter(|r| matches!(r.status, LoadStatus::Skipped { .. }))
        .count();
    assert_eq!(skipped, 2);
    assert_eq!(report.loaded(), 2);
    assert_eq!(report.specs.len(), 4);
}

#[test]
fn broken_file_does_not_block_other_files() {
    let dir = temp_dir();
    fs::write(dir.path().join("a_broken.yaml"), "key: [unclosed").unwrap();
    fs::write(dir.path().join("b_hub.yaml"), HUB_YAML).unwrap();

    let report = DeclarationLoader::new(dir.path().to_path_buf())
        .load_all()
        .unwrap();

    assert_eq!(report.loaded(), 1);
    assert_eq!(report.failed(), 1);
    let failed = report
        .results
        .iter()
        .find(|r| matches!(r.status, LoadStatus::Failed { .. }))
        .unwrap();
    assert!(failed.path.ends_with("a_broken.yaml"));
}

#[test]
fn expansion_errors_are_reported_per_declaration() {
    let dir = temp_dir();
    let yaml = r#"
- empty_batch:
    for_each: []
    update:
      installed_version: "1"
      latest_version: "1"
- missing_latest:
    installed_version: "1"
- fine:
    installed_version: "1"
    latest_version: "2"
"#;
    let path = dir.path().join("decl.yaml");
    fs::write(&path, yaml).unwrap();

    let report = DeclarationLoader::new(path).load_all().unwrap();
    assert_eq!(report.specs.len(), 1);
    assert_eq!(report.specs[0].object_id, "fine");

    let failed: Vec<_> = report
        .results
        .iter()
        .filter_map(|r| match &r.status {
            LoadStatus::Failed { slug, error } => Some((slug.clone(), error.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0].0.as_deref(), Some("empty_batch"));
    assert!(failed[1].1.contains("latest_version"));
}

#[test]
fn duplicate_slugs_across_files_keep_the_first() {
    let dir = temp_dir();
    fs::write(dir.path().join("a.yaml"), HUB_YAML).unwrap();
    fs::write(dir.path().join("b.yaml"), HUB_YAML).unwrap();

    let report = DeclarationLoader::new(dir.path().to_path_buf())
        .load_all()
        .unwrap();
    assert_eq!(report.specs.len(), 1);
    assert_eq!(report.loaded(), 1);
    assert_eq!(report.failed(), 1);
}

#[test]
fn missing_path_is_an_error() {
    let dir = temp_dir();
    let loader = DeclarationLoader::new(dir.path().join("nope.yaml"));
    assert!(matches!(loader.load_all(), Err(LoaderError::Io(_))));
}

#[test]
fn empty_file_loads_nothing() {
    let dir = temp_dir();
    let path = dir.path().join("empty.yaml");
    fs::write(&path, "").unwrap();

    let report = DeclarationLoader::new(path).load_all().unwrap();
    assert!(report.specs.is_empty());
    assert!(report.results.is_empty());
}
