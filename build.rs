fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto");
    // Parse the protos with protox (pure Rust) so no system `protoc` is required.
    let fds = protox::compile(["proto/ingest.proto"], ["proto/"])?;
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_fds(fds)?;
    Ok(())
}
