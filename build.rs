//! Stamps the binary with its build time and git revision, shown by
//! `tayrona diagnostico`.

use std::process::Command;

fn stdout_of(program: &str, args: &[&str]) -> Option<String> {
    let out = Command::new(program).args(args).output().ok()?;
    let text = String::from_utf8(out.stdout).ok()?;
    let text = text.trim();
    (out.status.success() && !text.is_empty()).then(|| text.to_string())
}

fn main() {
    let built_at = stdout_of("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"]);
    let revision = stdout_of("git", &["rev-parse", "--short", "HEAD"]);
    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        built_at.as_deref().unwrap_or("unknown")
    );
    println!(
        "cargo:rustc-env=BUILD_GIT_SHA={}",
        revision.as_deref().unwrap_or("unknown")
    );
    println!("cargo:rerun-if-changed=.git/HEAD");
}
