use std::io::Result;

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=proto/");

    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());
    }

    prost_build::compile_protos(
        &["proto/storage.proto", "proto/gossip.proto"],
        &["proto/"],
    )?;

    Ok(())
}
