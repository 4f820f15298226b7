//! Beat tracking modules
//!
//! Place beats on the onset envelope at a target tempo with the Ellis
//! dynamic-programming tracker. Beats feed the beat-tracking tempo estimate, the beat
//! consistency term of the tempo confidence and the danceability descriptor. Their accents
//! give the time signature.

pub mod dynamic_programming;
pub mod time_signature;
