use std::env;
use std::fs;
use std::path::PathBuf;

/// Default configuration files shipped next to the binary.
const CONFIG_FILES: &[&str] = &["basalt.toml", "basalt.log.toml"];

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    // OUT_DIR is target/<profile>/build/<pkg>-<hash>/out; the binary lands in
    // target/<profile>.
    let target_dir = out_dir
        .ancestors()
        .nth(3)
        .expect("OUT_DIR is too shallow");

    for name in CONFIG_FILES {
        let source = manifest_dir.join("config").join(name);
        if let Err(err) = fs::copy(&source, target_dir.join(name)) {
            panic!("failed to copy {}: {}", source.display(), err);
        }
    }
}
