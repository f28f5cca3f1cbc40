fn main() {
    napi_build::setup();

    if std::env::var_os("CARGO_FEATURE_NATIVE_PROVIDER").is_some() {
        println!("cargo:rerun-if-env-changed=CLOUDKIT_PROVIDER_LIB_DIR");
        if let Some(dir) = std::env::var_os("CLOUDKIT_PROVIDER_LIB_DIR") {
            println!("cargo:rustc-link-search=native={}", dir.to_string_lossy());
        }
        println!("cargo:rustc-link-lib=cloudkit_provider");
        if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
            println!("cargo:rustc-link-lib=framework=CloudKit");
            println!("cargo:rustc-link-lib=framework=Foundation");
        }
    }
}
