use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long each still frame stays on screen before the rotation advances.
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(5);

/// The visual assets one video contributes to a slideshow.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct FrameSource {
    pub frames_urls: Vec<String>,
    pub thumbnail_url: Option<String>,
}

/// Flattens a collection of videos into one ordered frame rotation.
///
/// Per video, in input order: all pre-extracted frames if any exist,
/// otherwise the single thumbnail, otherwise nothing. A video with no
/// visual asset contributes nothing and is not an error.
pub fn build_frame_sequence(sources: &[FrameSource]) -> Vec<String> {
    let mut sequence = Vec::new();
    for source in sources {
        if !source.frames_urls.is_empty() {
            sequence.extend(source.frames_urls.iter().cloned());
        } else if let Some(thumbnail) = &source.thumbnail_url {
            sequence.push(thumbnail.clone());
        }
    }
    sequence
}

/// Cyclic cursor over a frame sequence.
///
/// Index arithmetic is always modulo the current length, and swapping in a
/// sequence of a different length resets the cursor to 0 so the index can
/// never point past the end after a data refresh.
#[derive(Debug, Clone)]
pub struct FrameRotation {
    frames: Vec<String>,
    index: usize,
}

impl FrameRotation {
    pub fn new(frames: Vec<String>) -> Self {
        Self { frames, index: 0 }
    }

    /// The frame currently on screen, or None when the sequence is empty
    /// (the display renders its branded placeholder instead).
    pub fn current(&self) -> Option<&str> {
        self.frames.get(self.index).map(String::as_str)
    }

    /// Advances one frame and returns the new current frame.
    pub fn advance(&mut self) -> Option<&str> {
        if self.frames.is_empty() {
            return None;
        }
        self.index = (self.index + 1) % self.frames.len();
        self.current()
    }

    /// Swaps in freshly fetched frames. A length change resets the cursor.
    pub fn replace(&mut self, frames: Vec<String>) {
        if frames.len() != self.frames.len() {
            self.index = 0;
        }
        self.frames = frames;
        if self.index >= self.frames.len() {
            self.index = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(frames: &[&str], thumbnail: Option<&str>) -> FrameSource {
        FrameSource {
            frames_urls: frames.iter().map(|s| s.to_string()).collect(),
            thumbnail_url: thumbnail.map(|s| s.to_string()),
        }
    }

    #[test]
    fn frames_then_thumbnail_then_nothing() {
        let sources = vec![
            source(&["a", "b"], None),
            source(&[], Some("c")),
            source(&[], None),
        ];
        assert_eq!(build_frame_sequence(&sources), vec!["a", "b", "c"]);
    }

    #[test]
    fn frames_take_precedence_over_thumbnail() {
        let sources = vec![source(&["f1", "f2"], Some("thumb"))];
        assert_eq!(build_frame_sequence(&sources), vec!["f1", "f2"]);
    }

    #[test]
    fn empty_input_builds_empty_sequence() {
        assert!(build_frame_sequence(&[]).is_empty());
    }

    #[test]
    fn rotation_wraps_around() {
        let mut rotation = FrameRotation::new(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(rotation.current(), Some("a"));
        assert_eq!(rotation.advance(), Some("b"));
        assert_eq!(rotation.advance(), Some("c"));
        assert_eq!(rotation.advance(), Some("a"));
    }

    #[test]
    fn rotation_over_empty_sequence_yields_nothing() {
        let mut rotation = FrameRotation::new(vec![]);
        assert_eq!(rotation.current(), None);
        assert_eq!(rotation.advance(), None);
    }

    #[test]
    fn replace_with_different_length_resets_index() {
        let mut rotation = FrameRotation::new(vec!["a".into(), "b".into(), "c".into()]);
        rotation.advance();
        rotation.advance();
        assert_eq!(rotation.current(), Some("c"));

        rotation.replace(vec!["x".into(), "y".into()]);
        assert_eq!(rotation.current(), Some("x"));
    }

    #[test]
    fn replace_with_same_length_keeps_index() {
        let mut rotation = FrameRotation::new(vec!["a".into(), "b".into()]);
        rotation.advance();
        rotation.replace(vec!["x".into(), "y".into()]);
        assert_eq!(rotation.current(), Some("y"));
    }

    #[test]
    fn replace_shrinking_to_empty_is_safe() {
        let mut rotation = FrameRotation::new(vec!["a".into(), "b".into()]);
        rotation.advance();
        rotation.replace(vec![]);
        assert_eq!(rotation.current(), None);
        assert_eq!(rotation.advance(), None);
    }
}
