//! Build Script for Currency Service
//!
//! Generates Rust protobuf stubs from the crate's proto definitions.
//!
//! # Panics Policy
//!
//! Build scripts use `.expect()` and panic on failure: there is no caller to
//! propagate errors to, and the panic message tells the developer what to fix.
#![allow(clippy::expect_used)]

use prost::Message;
use std::{env, path::PathBuf};

fn main() {
    // Rerun build script if it changes
    println!("cargo:rerun-if-changed=build.rs");

    // Emit cfg for coverage detection
    if env::var("CARGO_LLVM_COV").is_ok()
        || env::var("LLVM_PROFILE_FILE").is_ok()
        || env::var("RUSTFLAGS")
            .map(|f| f.contains("instrument-coverage"))
            .unwrap_or(false)
    {
        println!("cargo:rustc-cfg=coverage");
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let proto_root = manifest_dir.join("proto");
    let proto_files = ["currency/v1/currency.proto"];

    println!("cargo:rerun-if-changed={}", proto_root.display());
    for proto in &proto_files {
        println!("cargo:rerun-if-changed={}", proto_root.join(proto).display());
    }

    // Produce a file descriptor set in-process (no protoc or buf in PATH).
    let mut compiler = protox::Compiler::new([&proto_root]).expect("Failed to create proto compiler");
    compiler.include_imports(true);
    compiler
        .open_files(proto_files)
        .expect("Failed to compile currency.proto");
    let descriptor_bytes = compiler.encode_file_descriptor_set();

    let fds = prost_types::FileDescriptorSet::decode(&*descriptor_bytes)
        .expect("Failed to decode descriptor set");

    tonic_prost_build::configure()
        .build_client(true) // Enable client for integration tests
        .build_server(true)
        .compile_fds(fds)
        .expect("Failed to compile protobuf definitions");
}
