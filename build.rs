fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=secrets.local.rs");
    emit_local_secrets();
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}

/// Exports `pub const NAME: &str = "..."` lines from `secrets.local.rs` as
/// `LOCAL_NAME` compile-time env vars. The file is git-ignored.
fn emit_local_secrets() {
    let path = std::path::Path::new("secrets.local.rs");
    let Ok(src) = std::fs::read_to_string(path) else {
        return;
    };

    for name in [
        "WIFI_SSID",
        "WIFI_PASS",
        "MUNI_API_TOKEN",
        "SPOTIFY_CLIENT_ID",
        "SPOTIFY_CLIENT_SECRET",
        "SPOTIFY_REFRESH_TOKEN",
    ] {
        if let Some(v) = extract_rust_str_const(&src, name) {
            println!("cargo:rustc-env=LOCAL_{}={}", name, v);
        }
    }
}

fn extract_rust_str_const(src: &str, name: &str) -> Option<String> {
    for line in src.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("//") {
            continue;
        }
        let needle = format!("pub const {}:", name);
        if !trimmed.starts_with(&needle) {
            continue;
        }
        let start = trimmed.find('"')?;
        let end = trimmed[start + 1..].find('"')? + start + 1;
        return Some(trimmed[start + 1..end].to_string());
    }
    None
}
