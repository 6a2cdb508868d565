//! Workspace root package.
//!
//! Holds no code of its own; it exists so that development tooling such as the
//! git hooks installed by `cargo-husky` runs for the whole workspace. The
//! co-simulation crates live under `crates/`.

#![forbid(unsafe_code)]
