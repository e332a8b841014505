//! Embeds the commit and build date shown by `prism --version`.

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8(out.stdout).ok().map(|s| s.trim().to_string())
}

fn main() {
    let commit = git(&["rev-parse", "--short=8", "HEAD"]).unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=PRISM_GIT_HASH={}", commit);
    println!(
        "cargo:rustc-env=PRISM_BUILD_DATE={}",
        chrono::Utc::now().format("%Y-%m-%d")
    );
    println!("cargo:rerun-if-changed=../../.git/HEAD");
}
