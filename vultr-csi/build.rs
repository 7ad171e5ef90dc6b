fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Compile CSI proto (server for the plugin, client for end-to-end tests)
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["../proto/csi.proto"], &["../proto"])?;

    Ok(())
}
