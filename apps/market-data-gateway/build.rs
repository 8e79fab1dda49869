//! Build Script for Market Data Gateway
//!
//! Generates Rust protobuf stubs for the upstream quote service.
//!
//! # Panics Policy
//!
//! Build scripts halt the build on missing prerequisites; there is no caller
//! to propagate errors to, so failures surface as descriptive panics.
#![allow(clippy::expect_used)]

use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../../packages/proto/quote/");

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let proto_root = manifest_dir.join("../../packages/proto");
    let proto_files = [proto_root.join("quote/v1/quote.proto")];

    for proto in &proto_files {
        println!("cargo:rerun-if-changed={}", proto.display());
    }

    // protox resolves the well-known types itself, so no protoc or buf in PATH.
    let fds = protox::compile(&proto_files, [&proto_root])
        .expect("Failed to parse quote service proto definitions");

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true) // Server stubs back the fake upstream in integration tests
        .compile_fds(fds)
        .expect("Failed to compile protobuf definitions");
}
