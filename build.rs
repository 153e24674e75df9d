fn main() {
    // Enable pkg-config for cross-compilation (needed for pcsc-sys)
    // This allows pkg-config to work when cross-compiling to musl targets
    std::env::set_var("PKG_CONFIG_ALLOW_CROSS", "1");

    // Same lookup pcsc-sys links with; only the version is taken here.
    let pcsclite = pkg_config::Config::new()
        .cargo_metadata(false)
        .env_metadata(false)
        .probe("libpcsclite")
        .map(|lib| lib.version)
        .unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=SCARD_PCSCLITE_VERSION={pcsclite}");
    println!("cargo:rerun-if-env-changed=PKG_CONFIG_PATH");
    println!("cargo:rerun-if-changed=build.rs");

    if std::env::var_os("CARGO_FEATURE_NODE").is_some() {
        napi_build::setup();
    }
}
