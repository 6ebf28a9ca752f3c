// Build script for parallax-proto
// Handles protobuf code generation for the gateway service and bus payloads

fn main() {
    // Use vendored protoc binary
    std::env::set_var(
        "PROTOC",
        protoc_bin_vendored::protoc_bin_path().expect("vendored protoc binary"),
    );

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true) // Enable client generation for testing
        .compile_protos(&["../../proto/parallax.proto"], &["../../proto/"])
        .unwrap_or_else(|e| panic!("Failed to compile protos: {}", e));

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../proto/");
}
