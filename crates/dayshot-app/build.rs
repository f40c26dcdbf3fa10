//! Exposes the workspace `VERSION` file as `DAYSHOT_VERSION`.

use std::fs;
use std::path::Path;

fn main() {
    let workspace_root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("dayshot-app lives two levels below the workspace root");
    let version_file = workspace_root.join("VERSION");
    println!("cargo:rerun-if-changed={}", version_file.display());

    let contents = fs::read_to_string(&version_file)
        .unwrap_or_else(|error| panic!("cannot read {}: {error}", version_file.display()));
    let version = contents.trim();
    if version.is_empty() {
        panic!("{} is empty", version_file.display());
    }

    println!("cargo:rustc-env=DAYSHOT_VERSION={version}");
}
