//! Low-level file helpers shared by the pipeline phases.

pub mod compression;
pub mod glob;
