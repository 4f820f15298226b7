//! Audio I/O types
//!
//! Decoding happens outside the crate; analysis starts from an [`audio_buffer::AudioBuffer`].

pub mod audio_buffer;
