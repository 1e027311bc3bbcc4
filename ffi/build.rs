use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=src/types.rs");

    let crate_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_default());
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").unwrap_or_default());

    let generated = cbindgen::Builder::new()
        .with_src(crate_dir.join("src/lib.rs"))
        .with_src(crate_dir.join("src/types.rs"))
        .with_language(cbindgen::Language::C)
        .with_include_guard("REQBATCH_H")
        .with_documentation(true)
        .generate();

    match generated {
        Ok(bindings) => {
            bindings.write_to_file(out_dir.join("reqbatch.h"));
        }
        Err(err) => println!("cargo:warning=could not generate reqbatch.h: {err}"),
    }
}
