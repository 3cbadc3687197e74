use std::sync::Arc;

use crate::Representation;

/// Media type of an Adaptation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Video,
    Text,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Text => "text",
        }
    }
}

/// The manifest-level facts the streaming logic reads.
#[derive(Clone, Debug)]
pub struct Manifest {
    /// `true` for live/dynamic content whose end keeps moving.
    pub is_dynamic: bool,
}

/// A time-delimited chapter of the content.
#[derive(Clone, Debug)]
pub struct Period {
    pub id: String,
    /// Start position in seconds on the playback timeline.
    pub start: f64,
}

/// A set of interchangeable [`Representation`]s for one media type.
#[derive(Clone, Debug)]
pub struct Adaptation {
    pub media_type: MediaType,
    pub representations: Vec<Arc<Representation>>,
}

impl Adaptation {
    pub fn new(media_type: MediaType, representations: Vec<Arc<Representation>>) -> Self {
        Self {
            media_type,
            representations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_labels() {
        assert_eq!(MediaType::Audio.as_str(), "audio");
        assert_eq!(MediaType::Video.as_str(), "video");
        assert_eq!(MediaType::Text.as_str(), "text");
    }
}
