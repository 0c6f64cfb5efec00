const PROTO: &str = "proto/dedupkit.proto";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={PROTO}");

    // Bindings are only needed by the gRPC transport; embedded builds skip protoc.
    if std::env::var_os("CARGO_FEATURE_TRANSPORT_GRPC").is_none() {
        return Ok(());
    }

    let protoc_path = protoc_bin_vendored::protoc_bin_path()
        .map_err(|e| format!("failed to locate vendored protoc: {e}"))?;
    std::env::set_var("PROTOC", protoc_path);

    if std::path::Path::new(PROTO).exists() {
        tonic_build::configure()
            .build_server(true)
            .build_client(true)
            .compile_protos(&[PROTO], &["proto/"])?;
    }
    Ok(())
}
