//! Local filesystem access: tree walking and metadata.

pub mod metadata;
pub mod walker;
