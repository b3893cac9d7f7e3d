//! Smoke tests -- verify the binary runs and each subcommand is wired up.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn vectrace(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("vectrace").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("VECTRACE_CONFIG")
        .env_remove("VECTRACE_LOG_JSON")
        .env_remove("RUST_LOG");
    cmd
}

fn write_square_png(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("square.png");
    let img = image::RgbaImage::from_fn(48, 48, |x, y| {
        if (12..36).contains(&x) && (12..36).contains(&y) {
            image::Rgba([0, 0, 0, 255])
        } else {
            image::Rgba([255, 255, 255, 255])
        }
    });
    img.save(&path).unwrap();
    path
}

#[test]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    vectrace(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Trace raster images into SVG"));
}

#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    vectrace(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vectrace"));
}

#[test]
fn test_subcommands_exist() {
    let dir = TempDir::new().unwrap();
    for sub in ["trace", "capabilities", "validate", "presets", "backends"] {
        vectrace(&dir).args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_settings_loading_is_logged() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("quiet.toml"), "[logging]\nlevel = \"warn\"\n").unwrap();
    vectrace(&dir)
        .args(["--settings", "quiet.toml", "presets"])
        .assert()
        .success()
        .stderr(predicate::str::contains("loaded engine settings"));
}

#[test]
fn test_broken_local_settings_warns_and_uses_defaults() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("vectrace.toml"), "[processing\n").unwrap();
    vectrace(&dir)
        .arg("presets")
        .assert()
        .success()
        .stdout(predicate::str::contains("line_art"))
        .stderr(predicate::str::contains("could not be loaded"));
}

#[test]
fn test_presets_lists_all() {
    let dir = TempDir::new().unwrap();
    vectrace(&dir)
        .arg("presets")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("line_art")
                .and(predicate::str::contains("stippling"))
                .and(predicate::str::contains("regions")),
        );
}

#[test]
fn test_validate_reports_every_bad_field() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.json");
    std::fs::write(&config, r#"{"detail": 2.0, "stroke_width": 0}"#).unwrap();
    vectrace(&dir)
        .args(["validate", "bad.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("detail").and(predicate::str::contains("stroke_width")));
}

#[test]
fn test_validate_accepts_toml() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("good.toml");
    std::fs::write(
        &config,
        "backend = \"dots\"\ndetail = 0.6\ndensity = 0.5\n\n[multipass]\nenabled = false\n",
    )
    .unwrap();
    vectrace(&dir)
        .args(["validate", "good.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn test_capabilities_from_snapshot() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("tab.json"),
        r#"{"environment_type": "browser", "shared_array_buffer": true,
            "shared_array_buffer_functional": true, "cross_origin_isolated": false,
            "atomics": true, "web_workers": true}"#,
    )
    .unwrap();
    vectrace(&dir)
        .args(["capabilities", "--json", "--snapshot", "tab.json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains(r#""threading_supported": false"#)
                .and(predicate::str::contains("Cross-Origin-Opener-Policy: same-origin")),
        );
}

#[test]
fn test_trace_writes_svg() {
    let dir = TempDir::new().unwrap();
    write_square_png(&dir);
    vectrace(&dir)
        .args(["trace", "square.png", "-o", "square.svg", "--progress"])
        .assert()
        .success()
        .stderr(predicate::str::contains("100%"));
    let svg = std::fs::read_to_string(dir.path().join("square.svg")).unwrap();
    assert!(svg.contains(r#"viewBox="0 0 48 48""#));
    assert!(svg.trim_end().ends_with("</svg>"));
}

#[test]
fn test_trace_to_stdout_with_backend_override() {
    let dir = TempDir::new().unwrap();
    write_square_png(&dir);
    vectrace(&dir)
        .args(["trace", "square.png", "--backend", "superpixel"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("<?xml").and(predicate::str::contains("<path")));
}

#[test]
fn test_trace_rejects_bad_detail() {
    let dir = TempDir::new().unwrap();
    write_square_png(&dir);
    vectrace(&dir)
        .args(["trace", "square.png", "--detail", "3.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("detail"));
}

#[test]
fn test_trace_missing_input() {
    let dir = TempDir::new().unwrap();
    vectrace(&dir)
        .args(["trace", "nope.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to decode image"));
}
