use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The CLI reports the engine version it was built against next to its own.
    let runtime_cargo = Path::new("arbor-runtime").join("Cargo.toml");
    println!("cargo::rerun-if-changed={}", runtime_cargo.display());

    let version = match std::fs::read_to_string(&runtime_cargo) {
        Ok(contents) => contents
            .parse::<toml_edit::DocumentMut>()?
            .get("package")
            .and_then(|p| p.get("version"))
            .and_then(|v| v.as_str())
            .ok_or("missing [package].version in arbor-runtime/Cargo.toml")?
            .to_owned(),
        // Installed from a registry: the workspace sibling is absent and both
        // packages are published with the same version.
        Err(_) => std::env::var("CARGO_PKG_VERSION")?,
    };

    println!("cargo::rustc-env=ARBOR_RUNTIME_VERSION={version}");
    Ok(())
}
