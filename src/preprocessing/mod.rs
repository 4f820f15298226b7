//! Audio preprocessing modules
//!
//! This module contains utilities for preparing audio for analysis:
//! - Integer-factor decimation to the analysis rate
//! - Lead-in trimming and frame-level silence measures

pub mod resample;
pub mod silence;
