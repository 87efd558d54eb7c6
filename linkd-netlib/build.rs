fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var(
        "PROTOC",
        protoc_bin_vendored::protoc_bin_path().expect("failed to locate vendored protoc"),
    );

    tonic_build::configure().compile_protos(
        &[
            "../proto/gnmi.proto",
            "../proto/p4runtime.proto",
            "../proto/stratum.proto",
        ],
        &["../proto"],
    )?;

    Ok(())
}
