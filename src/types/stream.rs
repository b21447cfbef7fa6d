use std::fmt::Display;

use serde::Deserialize;

use super::{Bitrate, Resolution};

/// The role a stream plays in a video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Video,
    /// Audio and video already muxed together by the source
    Progressive,
}

/// The user-facing stream type, deciding which variant lists are needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StreamType {
    /// A single stream with both audio and video
    #[default]
    Progressive,
    /// Separate video and audio streams, merged after download
    Adaptive,
    /// Only the audio stream
    AudioOnly,
}

/// What a fetcher needs to retrieve a stream, opaque to the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchHandle {
    pub source_url: String,
    pub format_id: String,
}

/// One selectable variant of a video's audio or video track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub kind: StreamKind,
    /// Container tag, also used as the file extension (e.g. "mp4", "m4a")
    pub container: String,
    pub codec: String,
    pub resolution: Option<Resolution>,
    pub bitrate: Option<Bitrate>,
    /// Size in bytes, when the source announces it
    pub size: Option<u64>,
    pub handle: FetchHandle,
}

impl StreamDescriptor {
    /// Human readable quality label: the resolution for video kinds, the bitrate for audio
    pub fn quality_label(&self) -> String {
        match (self.kind, self.resolution, self.bitrate) {
            (StreamKind::Audio, _, Some(bitrate)) => bitrate.to_string(),
            (_, Some(resolution), _) => resolution.to_string(),
            (_, None, Some(bitrate)) => bitrate.to_string(),
            _ => "unknown".to_owned(),
        }
    }
}

impl Display for StreamDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} ({})",
            self.quality_label(),
            self.container,
            self.codec
        )?;
        if let Some(size) = self.size {
            write!(f, " {:.1} MiB", size as f64 / (1024.0 * 1024.0))?;
        }
        Ok(())
    }
}

/// What a resolver produces for one reference
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    pub title: String,
    pub streams: Vec<StreamDescriptor>,
}
