use chrono::Datelike;
use std::{env, process::Command};

fn git(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|hash| hash.trim().to_string())
        .unwrap_or_default()
}

fn main() {
    #[cfg(target_os = "windows")]
    compile_error!("This project is not supported on Windows.");

    /* version attributes */
    let date = chrono::Utc::now();
    let profile = env::var("PROFILE").unwrap_or_default();

    println!("cargo:rustc-env=TARGET={}", env::var("TARGET").unwrap_or_default());
    println!("cargo:rustc-env=GIT_HASH={}", git(&["rev-parse", "--short=10", "HEAD"]));
    println!("cargo:rustc-env=GIT_HASH_FULL={}", git(&["rev-parse", "HEAD"]));
    println!(
        "cargo:rustc-env=BUILD_DATE={}-{}-{}",
        date.year(),
        date.month(),
        date.day()
    );

    /* profile matching */
    match profile.as_str() {
        "debug" => println!("cargo:rustc-env=PROFILE=debug"),
        "release" => println!("cargo:rustc-env=PROFILE=release"),
        _ => println!("cargo:rustc-env=PROFILE=none"),
    }

    println!("cargo:rerun-if-changed=src/lib.rs");
}
