use std::env;
use std::fs;
use std::path::PathBuf;

// Every directory under src/markers/ is a marker module with a mod.rs.
fn main() {
    println!("cargo:rerun-if-changed=src/markers/");

    let markers_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap()).join("src/markers");
    let mut names: Vec<String> = fs::read_dir(&markers_dir)
        .expect("read src/markers/")
        .flatten()
        .filter(|entry| entry.path().join("mod.rs").is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();

    let mut modules = String::new();
    for name in &names {
        let path = markers_dir.join(name).join("mod.rs");
        modules.push_str(&format!("#[path = {path:?}]\npub mod {name};\n"));
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    fs::write(out_dir.join("marker_modules.rs"), modules).unwrap();
}
