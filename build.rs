use std::{env, process::Command};

/// Коммит для строки запуска демо. `TOPICBUS_BUILD_COMMIT` задаёт его явно
/// (сборка из архива без `.git`).
fn commit() -> String {
    if let Ok(commit) = env::var("TOPICBUS_BUILD_COMMIT") {
        return commit;
    }
    git(&["rev-parse", "--short", "HEAD"]).map_or_else(
        || "unknown".to_string(),
        |hash| {
            let dirty = git(&["status", "--porcelain"]).is_some_and(|s| !s.is_empty());
            if dirty {
                format!("{hash}-dirty")
            } else {
                hash
            }
        },
    )
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-env-changed=TOPICBUS_BUILD_COMMIT");
    println!("cargo:rerun-if-changed=.git/HEAD");

    println!("cargo:rustc-env=GIT_COMMIT={}", commit());
    println!(
        "cargo:rustc-env=BUILD_TIME={}",
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );
}
