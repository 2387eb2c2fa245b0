use std::fs;

fn main() {
    let version_file = fs::read_to_string("VERSION")
        .expect("VERSION file not found - run: echo \"$CARGO_PKG_VERSION\" > VERSION");

    let version = version_file.trim();
    let cargo_version = env!("CARGO_PKG_VERSION");

    // The published crate version and the VERSION file must agree
    if version != cargo_version {
        panic!(
            "\n\n\
            regen-kit version mismatch\n\
            VERSION file: {}\n\
            Cargo.toml:   {}\n\n\
            Update VERSION to {} or bump the package version.\n\n",
            version, cargo_version, cargo_version
        );
    }

    println!("cargo:rerun-if-changed=VERSION");
}
