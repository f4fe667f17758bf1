use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

/// Exports `CALLER_VERSION` from the nearest git tag.
fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let described = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|raw| raw.trim().trim_start_matches('v').to_string())
        .filter(|version| !version.is_empty());

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let version = match described {
        Some(v) if v.ends_with("-dirty") => format!("{}-{}", v, stamp),
        Some(v) => v,
        None => format!("0.0.0-unknown-{}", stamp),
    };
    println!("cargo:rustc-env=CALLER_VERSION={}", version);
}
