use std::fs;
use std::process::Command;

use tempfile::TempDir;

fn render(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_layergl-render"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("run layergl-render")
}

#[test]
fn help_lists_the_tile_options() {
    let output = render(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--tile"));
    assert!(stdout.contains("--fixed-time"));
}

#[test]
fn missing_config_fails_before_touching_the_gpu() {
    let root = TempDir::new().unwrap();
    let config = root.path().join("absent.toml");
    let output = render(&[
        "--config",
        config.to_str().unwrap(),
        "--zoom",
        "1",
        "--tile",
        "0,0",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("loading layer config"), "{stderr}");
}

#[test]
fn invalid_config_reports_the_reason() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("layer.vert"), "void main() {}\n").unwrap();
    fs::write(root.path().join("layer.frag"), "void main() {}\n").unwrap();
    let config = root.path().join("layer.toml");
    fs::write(
        &config,
        "version = 2\nvertex_shader = \"layer.vert\"\nfragment_shader = \"layer.frag\"\n",
    )
    .unwrap();

    let output = render(&[
        "--config",
        config.to_str().unwrap(),
        "--zoom",
        "1",
        "--tile",
        "0,0",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("version"), "{stderr}");
}
