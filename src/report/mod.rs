//! Report renderers for a finished run.
//!
//! - [`terminal`]: colored header, per-ecosystem summary table and the most
//!   common dependency sets; respects `--verbose` / `--quiet`.
//! - JSON output is the serialized [`crate::job::JobReport`], written by `main`.

pub mod terminal;
