//! Playback sequencing for one display.
//!
//! A display plays the resolved playlist's items in position order and never
//! stalls: end-of-item and playback-error signals both advance to the next
//! item, a single-item playlist loops in place, and items that cannot
//! resolve any playable source are skipped without being rendered.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::display::frames::FrameRotation;

/// One entry of a resolved playlist, with everything a display needs to
/// either stream it or fall back to its still frames.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlayableItem {
    pub video_id: String,
    pub title: String,
    pub position: i32,
    pub vimeo_id: Option<String>,
    pub vimeo_hash: Option<String>,
    pub frames: Vec<String>,
    pub duration_seconds: Option<i32>,
}

impl PlayableItem {
    /// Streamable beats frame fallback; an item with neither is unplayable
    /// and gets skipped by the sequencer.
    fn startable(&self) -> bool {
        self.vimeo_id.is_some() || !self.frames.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Playing { index: usize },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackSignal {
    /// The current item finished normally.
    Ended,
    /// The current item failed to play. Sequencing treats this exactly like
    /// a normal end: advance, never retry in place.
    Error,
    /// The display is navigating away.
    Stop,
}

/// What the display should put on screen next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Directive {
    #[serde(rename_all = "camelCase")]
    Play {
        index: usize,
        video_id: String,
        vimeo_id: String,
        vimeo_hash: Option<String>,
        /// True when a single-item playlist replays the same item instead
        /// of taking the cross-item advance transition.
        looped: bool,
    },
    #[serde(rename_all = "camelCase")]
    Rotate {
        index: usize,
        video_id: String,
        frames: Vec<String>,
        looped: bool,
    },
    /// Nothing is startable: show the branded placeholder, not an error.
    Placeholder,
    Stop,
}

#[derive(Debug, Clone)]
pub struct PlaybackSequencer {
    items: Vec<PlayableItem>,
    state: SequencerState,
}

impl PlaybackSequencer {
    pub fn new(items: Vec<PlayableItem>) -> Self {
        Self {
            items,
            state: SequencerState::Idle,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Begins playback at the first startable item.
    pub fn start(&mut self) -> Directive {
        self.scan_from(0, false)
    }

    /// Applies one signal and returns the next directive. Every state has an
    /// outgoing transition, so playback can only halt on an explicit stop.
    pub fn signal(&mut self, signal: PlaybackSignal) -> Directive {
        match signal {
            PlaybackSignal::Stop => {
                self.state = SequencerState::Stopped;
                Directive::Stop
            }
            PlaybackSignal::Ended | PlaybackSignal::Error => match self.state {
                SequencerState::Playing { index } => self.advance_from(index),
                SequencerState::Idle => self.start(),
                SequencerState::Stopped => Directive::Stop,
            },
        }
    }

    fn advance_from(&mut self, index: usize) -> Directive {
        if self.items.len() <= 1 {
            // A lone item loops in place rather than re-triggering the
            // advance transition over and over.
            debug!("Single-item playlist, looping item {}", index);
            return self.directive_for(index, true);
        }
        let next = (index + 1) % self.items.len();
        self.scan_from(next, false)
    }

    /// Finds the first startable item at or after `from` (wrapping), visiting
    /// each index at most once. Unplayable items are skipped synchronously,
    /// never rendered.
    fn scan_from(&mut self, from: usize, looped: bool) -> Directive {
        let n = self.items.len();
        for offset in 0..n {
            let index = (from + offset) % n;
            if self.items[index].startable() {
                if offset > 0 {
                    debug!("Skipped {} unplayable item(s) before index {}", offset, index);
                }
                self.state = SequencerState::Playing { index };
                return self.directive_for(index, looped);
            }
        }
        info!("No startable item in playlist, showing placeholder");
        self.state = SequencerState::Idle;
        Directive::Placeholder
    }

    fn directive_for(&self, index: usize, looped: bool) -> Directive {
        let item = &self.items[index];
        match &item.vimeo_id {
            Some(vimeo_id) => Directive::Play {
                index,
                video_id: item.video_id.clone(),
                vimeo_id: vimeo_id.clone(),
                vimeo_hash: item.vimeo_hash.clone(),
                looped,
            },
            None => Directive::Rotate {
                index,
                video_id: item.video_id.clone(),
                frames: item.frames.clone(),
                looped,
            },
        }
    }
}

/// Event stream a display renders from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    Directive(Directive),
    /// Next still frame while the current directive is a rotation.
    Frame(String),
}

/// Cooperative per-display loop.
///
/// Suspension points are the signal channel and the rotation tick; there is
/// no blocking I/O in here. The loop exits as soon as a stop signal arrives
/// or either channel closes, dropping its interval with it, so a torn-down
/// display can never receive a delayed advance.
pub async fn run_display_loop(
    mut sequencer: PlaybackSequencer,
    mut signals: mpsc::Receiver<PlaybackSignal>,
    events: mpsc::Sender<DisplayEvent>,
    rotation_interval: Duration,
) {
    let mut directive = sequencer.start();
    let mut rotation = rotation_for(&directive);

    if events
        .send(DisplayEvent::Directive(directive.clone()))
        .await
        .is_err()
    {
        return;
    }

    let mut ticker = tokio::time::interval(rotation_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick of a fresh interval completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            maybe_signal = signals.recv() => {
                let Some(signal) = maybe_signal else {
                    debug!("Signal channel closed, ending display loop");
                    break;
                };
                directive = sequencer.signal(signal);
                rotation = match (rotation.take(), &directive) {
                    // Rotation to rotation swaps the frames in place; a
                    // same-length swap keeps the cadence position.
                    (Some(mut current), Directive::Rotate { frames, .. }) => {
                        current.replace(frames.clone());
                        Some(current)
                    }
                    _ => rotation_for(&directive),
                };
                ticker.reset();
                let stopping = matches!(directive, Directive::Stop);
                if events
                    .send(DisplayEvent::Directive(directive.clone()))
                    .await
                    .is_err()
                {
                    break;
                }
                if stopping {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Some(rotation) = rotation.as_mut() {
                    if let Some(frame) = rotation.advance() {
                        let frame = frame.to_string();
                        if events.send(DisplayEvent::Frame(frame)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn rotation_for(directive: &Directive) -> Option<FrameRotation> {
    match directive {
        Directive::Rotate { frames, .. } => Some(FrameRotation::new(frames.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_item(video_id: &str) -> PlayableItem {
        PlayableItem {
            video_id: video_id.to_string(),
            title: video_id.to_string(),
            position: 0,
            vimeo_id: Some(format!("{}-vimeo", video_id)),
            vimeo_hash: None,
            frames: vec![],
            duration_seconds: Some(30),
        }
    }

    fn frames_item(video_id: &str, frames: &[&str]) -> PlayableItem {
        PlayableItem {
            video_id: video_id.to_string(),
            title: video_id.to_string(),
            position: 0,
            vimeo_id: None,
            vimeo_hash: None,
            frames: frames.iter().map(|f| f.to_string()).collect(),
            duration_seconds: None,
        }
    }

    fn unplayable_item(video_id: &str) -> PlayableItem {
        PlayableItem {
            video_id: video_id.to_string(),
            title: video_id.to_string(),
            position: 0,
            vimeo_id: None,
            vimeo_hash: None,
            frames: vec![],
            duration_seconds: None,
        }
    }

    fn played_index(directive: &Directive) -> Option<usize> {
        match directive {
            Directive::Play { index, .. } | Directive::Rotate { index, .. } => Some(*index),
            _ => None,
        }
    }

    #[test]
    fn starts_at_first_item() {
        let mut seq =
            PlaybackSequencer::new(vec![stream_item("a"), stream_item("b"), stream_item("c")]);
        let directive = seq.start();
        assert_eq!(played_index(&directive), Some(0));
        assert_eq!(seq.state(), SequencerState::Playing { index: 0 });
    }

    #[test]
    fn error_advances_like_end_of_item() {
        let mut seq =
            PlaybackSequencer::new(vec![stream_item("a"), stream_item("b"), stream_item("c")]);
        seq.start();
        seq.signal(PlaybackSignal::Ended);
        // Item b breaks; no retry, straight to c.
        let directive = seq.signal(PlaybackSignal::Error);
        assert_eq!(played_index(&directive), Some(2));
    }

    #[test]
    fn advance_wraps_modulo_length() {
        let mut seq =
            PlaybackSequencer::new(vec![stream_item("a"), stream_item("b"), stream_item("c")]);
        seq.start();
        seq.signal(PlaybackSignal::Ended);
        seq.signal(PlaybackSignal::Ended);
        let directive = seq.signal(PlaybackSignal::Ended);
        assert_eq!(played_index(&directive), Some(0));
    }

    #[test]
    fn single_item_loops_in_place() {
        let mut seq = PlaybackSequencer::new(vec![stream_item("only")]);
        seq.start();
        let directive = seq.signal(PlaybackSignal::Ended);
        match directive {
            Directive::Play { index, looped, .. } => {
                assert_eq!(index, 0);
                assert!(looped);
            }
            other => panic!("expected looped play, got {:?}", other),
        }
        assert_eq!(seq.state(), SequencerState::Playing { index: 0 });
    }

    #[test]
    fn single_item_loops_on_error_too() {
        let mut seq = PlaybackSequencer::new(vec![stream_item("only")]);
        seq.start();
        let directive = seq.signal(PlaybackSignal::Error);
        assert!(matches!(directive, Directive::Play { looped: true, .. }));
    }

    #[test]
    fn unplayable_items_are_skipped_synchronously() {
        let mut seq = PlaybackSequencer::new(vec![
            stream_item("a"),
            unplayable_item("broken"),
            stream_item("c"),
        ]);
        seq.start();
        let directive = seq.signal(PlaybackSignal::Ended);
        assert_eq!(played_index(&directive), Some(2));
    }

    #[test]
    fn item_without_stream_source_falls_back_to_rotation() {
        let mut seq = PlaybackSequencer::new(vec![frames_item("slides", &["f1", "f2"])]);
        let directive = seq.start();
        match directive {
            Directive::Rotate { frames, .. } => assert_eq!(frames, vec!["f1", "f2"]),
            other => panic!("expected rotate, got {:?}", other),
        }
    }

    #[test]
    fn all_unplayable_yields_placeholder() {
        let mut seq =
            PlaybackSequencer::new(vec![unplayable_item("x"), unplayable_item("y")]);
        assert_eq!(seq.start(), Directive::Placeholder);
        assert_eq!(seq.state(), SequencerState::Idle);
        // Signalling out of idle re-scans instead of stalling.
        assert_eq!(seq.signal(PlaybackSignal::Ended), Directive::Placeholder);
    }

    #[test]
    fn empty_playlist_shows_placeholder() {
        let mut seq = PlaybackSequencer::new(vec![]);
        assert_eq!(seq.start(), Directive::Placeholder);
        assert_eq!(seq.signal(PlaybackSignal::Ended), Directive::Placeholder);
    }

    #[test]
    fn stop_is_terminal() {
        let mut seq = PlaybackSequencer::new(vec![stream_item("a"), stream_item("b")]);
        seq.start();
        assert_eq!(seq.signal(PlaybackSignal::Stop), Directive::Stop);
        assert_eq!(seq.state(), SequencerState::Stopped);
        assert_eq!(seq.signal(PlaybackSignal::Ended), Directive::Stop);
    }

    #[tokio::test]
    async fn display_loop_advances_on_signals_and_exits_on_stop() {
        let (signal_tx, signal_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let seq = PlaybackSequencer::new(vec![stream_item("a"), stream_item("b")]);

        let handle = tokio::spawn(run_display_loop(
            seq,
            signal_rx,
            event_tx,
            Duration::from_secs(60),
        ));

        let first = event_rx.recv().await.unwrap();
        assert!(matches!(
            first,
            DisplayEvent::Directive(Directive::Play { index: 0, .. })
        ));

        signal_tx.send(PlaybackSignal::Error).await.unwrap();
        let second = event_rx.recv().await.unwrap();
        assert!(matches!(
            second,
            DisplayEvent::Directive(Directive::Play { index: 1, .. })
        ));

        signal_tx.send(PlaybackSignal::Stop).await.unwrap();
        let last = event_rx.recv().await.unwrap();
        assert_eq!(last, DisplayEvent::Directive(Directive::Stop));

        handle.await.unwrap();
        // Loop has exited: no further events can arrive.
        assert!(event_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn display_loop_rotates_frames_on_ticks() {
        let (_signal_tx, signal_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let seq = PlaybackSequencer::new(vec![frames_item("slides", &["f1", "f2", "f3"])]);
        let interval = Duration::from_secs(5);

        tokio::spawn(run_display_loop(seq, signal_rx, event_tx, interval));

        let first = event_rx.recv().await.unwrap();
        assert!(matches!(
            first,
            DisplayEvent::Directive(Directive::Rotate { .. })
        ));

        tokio::time::advance(interval).await;
        assert_eq!(event_rx.recv().await.unwrap(), DisplayEvent::Frame("f2".into()));
        tokio::time::advance(interval).await;
        assert_eq!(event_rx.recv().await.unwrap(), DisplayEvent::Frame("f3".into()));
        tokio::time::advance(interval).await;
        assert_eq!(event_rx.recv().await.unwrap(), DisplayEvent::Frame("f1".into()));
    }

    #[tokio::test]
    async fn display_loop_ends_when_signal_sender_is_dropped() {
        let (signal_tx, signal_rx) = mpsc::channel::<PlaybackSignal>(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let seq = PlaybackSequencer::new(vec![stream_item("a")]);

        let handle = tokio::spawn(run_display_loop(
            seq,
            signal_rx,
            event_tx,
            Duration::from_secs(60),
        ));

        let _ = event_rx.recv().await.unwrap();
        drop(signal_tx);
        handle.await.unwrap();
        assert!(event_rx.recv().await.is_none());
    }
}
