//! Benchmark support crate for sluice.
//!
//! The actual benchmarks live under `benches/`; this library exists so the
//! bench targets have a crate to attach to.
