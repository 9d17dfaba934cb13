//! Output side: one gyp document per project.
pub mod gyp;
