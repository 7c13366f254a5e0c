fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/hangar/agent/v1/agent.proto",
                "proto/hangar/agent/v1/console.proto",
                "proto/hangar/agent/v1/instance.proto",
            ],
            &["proto"],
        )?;

    println!("cargo:rerun-if-changed=proto");

    Ok(())
}
