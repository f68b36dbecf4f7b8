use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;

const DOCKER: &str = r#"
description: Docker on a VM
version: "1.2"
aliases: [containers]
instances:
  docker:
    image: "release:noble"
    limits:
      min-cpu: 2
      min-mem: 4G
      min-disk: 40G
    timeout: 900
    cloud-init:
      vendor-data: |
        packages:
          - docker.io
"#;

const ARCH_ONLY: &str = "description: Only on arch\nversion: '0.1'\nruns-on: [arch]\n";

fn herd() -> assert_cmd::Command {
    cargo_bin_cmd!("herd").into()
}

fn write_archive(path: &Path) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, contents) in [
        ("bundle-main/v1/docker.yaml", DOCKER),
        ("bundle-main/v1/arch-only.yaml", ARCH_ONLY),
        ("bundle-main/v1/broken.yaml", "version: '1'\n"),
    ] {
        zip.start_file(name, SimpleFileOptions::default()).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// Config pointing at a `file://` archive inside `dir`.
fn write_test_config(dir: &tempfile::TempDir, arch: &str) -> PathBuf {
    let archive = dir.path().join("bundle.zip");
    write_archive(&archive);

    let config_path = dir.path().join("herd.toml");
    let mut f = std::fs::File::create(&config_path).unwrap();
    write!(
        f,
        r#"
[workflows]
url = "file://{}"
cache_dir = "{}"
arch = "{arch}"
"#,
        archive.display(),
        dir.path().join("cache").display(),
    )
    .unwrap();
    config_path
}

fn run(config: &Path, args: &[&str]) -> assert_cmd::assert::Assert {
    herd()
        .arg("--config")
        .arg(config)
        .args(args)
        .assert()
}

#[test]
fn help_works() {
    herd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Workflow catalog"));
}

#[test]
fn missing_config_shows_error() {
    herd()
        .args(["--config", "/nonexistent/herd.toml", "workflows", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn invalid_url_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("herd.toml");
    std::fs::write(&config_path, "[workflows]\nurl = \"ftp://example.com/w.zip\"\n").unwrap();

    run(&config_path, &["workflows", "list"])
        .failure()
        .stderr(predicate::str::contains("http, https or file"));
}

#[test]
fn list_shows_valid_workflows() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_test_config(&dir, "x86_64");

    run(&config, &["workflows", "list"])
        .success()
        .stdout(predicate::str::contains("docker, containers"))
        .stdout(predicate::str::contains("Docker on a VM"))
        .stdout(predicate::str::contains("arch-only").not())
        .stdout(predicate::str::contains("broken").not())
        .stderr(predicate::str::contains(
            "Invalid workflow: The 'description' key is required for the broken workflow",
        ));

    // Archive was cached under the configured directory
    let cached: Vec<_> = std::fs::read_dir(dir.path().join("cache"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(cached.len(), 1);
    assert!(cached[0].starts_with("workflows-") && cached[0].ends_with(".zip"));
}

#[test]
fn list_filters_by_arch() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_test_config(&dir, "arch");

    run(&config, &["workflows", "list", "--refresh"])
        .success()
        .stdout(predicate::str::contains("arch-only"))
        .stdout(predicate::str::contains("Only on arch"));
}

#[test]
fn list_json() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_test_config(&dir, "x86_64");

    run(&config, &["--output", "json", "workflows", "list"])
        .success()
        .stdout(predicate::str::starts_with("["))
        .stdout(predicate::str::contains("\"Docker on a VM\""));
}

#[test]
fn info_resolves_alias() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_test_config(&dir, "x86_64");

    run(&config, &["workflows", "info", "containers"])
        .success()
        .stdout(predicate::str::contains("Name:        docker"))
        .stdout(predicate::str::contains("Version:     1.2"));
}

#[test]
fn info_unknown_workflow_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_test_config(&dir, "x86_64");

    run(&config, &["workflows", "info", "phony"])
        .failure()
        .stderr(predicate::str::contains("Unknown workflow 'phony'"));
}

#[test]
fn info_incompatible_workflow_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_test_config(&dir, "x86_64");

    run(&config, &["workflows", "info", "arch-only"])
        .failure()
        .stderr(predicate::str::contains("arch-only"));
}

#[test]
fn plan_applies_minimums() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_test_config(&dir, "x86_64");

    run(&config, &["workflows", "plan", "docker", "--cpus", "8"])
        .success()
        .stdout(predicate::str::contains("Image:    release:noble"))
        .stdout(predicate::str::contains("CPUs:     8"))
        .stdout(predicate::str::contains("Memory:   4G"))
        .stdout(predicate::str::contains("Disk:     40G"))
        .stdout(predicate::str::contains("Timeout:  900s"))
        .stdout(predicate::str::contains("docker.io"));
}

#[test]
fn plan_below_minimum_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_test_config(&dir, "x86_64");

    run(&config, &["workflows", "plan", "docker", "--memory", "1G"])
        .failure()
        .stderr(predicate::str::contains(
            "Memory size value is less than workflow minimum of 4G",
        ));
}

#[test]
fn unreachable_archive_lists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("herd.toml");
    std::fs::write(
        &config_path,
        format!(
            "[workflows]\nurl = \"file://{}\"\ncache_dir = \"{}\"\n",
            dir.path().join("missing.zip").display(),
            dir.path().join("cache").display(),
        ),
    )
    .unwrap();

    run(&config_path, &["workflows", "list"])
        .success()
        .stdout(predicate::str::contains("No workflows found."))
        .stderr(predicate::str::contains("Error fetching workflows"));
}
