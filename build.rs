// Build script for native-graph.
//
// When the `tensorflow` feature is enabled, this script emits linker
// directives for libtensorflow. Set TENSORFLOW_LIB_DIR to point at a
// directory containing the shared library if it is not on the default
// linker search path.

fn main() {
    #[cfg(feature = "tensorflow")]
    link_tensorflow();
}

#[cfg(feature = "tensorflow")]
fn link_tensorflow() {
    println!("cargo:rerun-if-env-changed=TENSORFLOW_LIB_DIR");

    if let Ok(dir) = std::env::var("TENSORFLOW_LIB_DIR") {
        let lib_dir = std::path::PathBuf::from(&dir);
        if !lib_dir.exists() {
            panic!("TENSORFLOW_LIB_DIR points at {dir}, which does not exist");
        }
        println!("cargo:rustc-link-search=native={}", lib_dir.display());

        // Also check lib64 (some distributions install there)
        let lib64_dir = lib_dir.join("lib64");
        if lib64_dir.exists() {
            println!("cargo:rustc-link-search=native={}", lib64_dir.display());
        }
    } else {
        eprintln!(
            "Warning: TENSORFLOW_LIB_DIR is not set. \
             Relying on the system linker path to find libtensorflow."
        );
    }

    println!("cargo:rustc-link-lib=dylib=tensorflow");
}
