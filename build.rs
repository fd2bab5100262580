use std::env;

fn main() {
    // Version string shown by --version and the startup banner
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "unknown".to_string());
    let version = match env::var("LCP_TOOLBOX_BUILD_TAG") {
        Ok(tag) if !tag.is_empty() => format!("{version}+{tag}"),
        _ => version,
    };
    println!("cargo:rustc-env=LCP_TOOLBOX_VERSION={version}");

    println!("cargo:rerun-if-env-changed=LCP_TOOLBOX_BUILD_TAG");
    println!("cargo:rerun-if-changed=Cargo.toml");
}
