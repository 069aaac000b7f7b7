#![cfg(feature = "integration")]

//! End-to-end tests against real node and client binaries.
//!
//! Binaries are taken from the environment (`ZG_BINARY`, `ZGS`, `ZGS_KV`,
//! `ZGS_CLI`) or looked up on `PATH`; contract artifacts from
//! `ZG_CONTRACT_PATH`. Each test brings up its own network on its own port
//! range, so tests can run in parallel.
//!
//! ```text
//! cargo test -p zgs-testnet --features integration
//! ```

mod binaries;
mod helpers;
mod kv_tests;
mod storage_tests;
