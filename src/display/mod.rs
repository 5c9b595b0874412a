//! Display-side playback logic: the still-frame slideshow fallback and the
//! sequencer state machine that drives on-screen advancement.

pub mod frames;
pub mod sequencer;
