//! Analysis orchestration and result records
//!
//! - Per-window pipeline and whole-analysis deadline
//! - Chunk consensus for long tracks
//! - Result types and stage timing

pub mod chunks;
pub mod metadata;
pub mod pipeline;
pub mod result;
