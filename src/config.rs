use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use miette::{Context, IntoDiagnostic, Result};
use serde::Deserialize;

use crate::{
    job::VariantFilter,
    types::{Extension, StreamType},
};

/// Prefix of the environment variables overriding the settings
pub const ENV_PREFIX: &str = "VIDQ";

/// User preferences, read once and handed to the queue.
/// Workers only ever see a copy of it.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Where outputs and intermediates are written
    pub save_dir: PathBuf,
    /// Stream type given to newly loaded jobs
    pub stream_type: StreamType,
    /// Keep only video streams in this container. Empty keeps all
    pub video_container: String,
    /// Keep only audio streams in this container. Empty keeps all
    pub audio_container: String,
    /// Convert audio-only downloads to this format
    pub convert_audio: Option<Extension>,
    pub ytdl_program: Option<String>,
    pub ffmpeg_program: Option<String>,
    pub ffprobe_program: Option<String>,
}

impl Settings {
    /// Read the settings from the defaults, then the file if it exists,
    /// then the `VIDQ_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::from_str(DEFAULTS, FileFormat::Toml));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        builder
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()
            .into_diagnostic()
            .wrap_err("Could not read the settings")?
            .try_deserialize()
            .into_diagnostic()
            .wrap_err("Invalid settings")
    }

    pub fn variant_filter(&self) -> VariantFilter {
        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_lowercase());
        VariantFilter {
            video_container: non_empty(&self.video_container),
            audio_container: non_empty(&self.audio_container),
        }
    }
}

const DEFAULTS: &str = r#"
save_dir = "."
stream_type = "progressive"
video_container = "mp4"
audio_container = "m4a"
"#;

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_apply_without_file() {
        let settings = Settings::load(Some(Path::new("/nonexistent/vidq.toml"))).unwrap();
        assert_eq!(settings.save_dir, PathBuf::from("."));
        assert_eq!(settings.stream_type, StreamType::Progressive);
        assert_eq!(settings.convert_audio, None);
        assert_eq!(
            settings.variant_filter(),
            VariantFilter {
                video_container: Some("mp4".to_owned()),
                audio_container: Some("m4a".to_owned()),
            }
        );
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "save_dir = \"/tmp/videos\"\n\
             stream_type = \"audio-only\"\n\
             convert_audio = \"mp3\"\n\
             video_container = \"\""
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.save_dir, PathBuf::from("/tmp/videos"));
        assert_eq!(settings.stream_type, StreamType::AudioOnly);
        assert_eq!(settings.convert_audio, Some(Extension::Mp3));
        assert_eq!(settings.variant_filter().video_container, None);
    }
}
