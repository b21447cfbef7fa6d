use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

use vidq::{
    config::Settings,
    types::{Extension, StreamType},
};

macro_rules! arg_env {
    ($v:literal) => {
        concat!("VIDQ_", $v)
    };
}

/// Download queue for web videos.
/// Resolve the quality variants of each video, fetch the chosen streams,
/// and merge or convert them with ffmpeg.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Args {
    /// The URLs of the videos to download
    #[arg(required = true, env = arg_env!("URLS"), value_delimiter = ' ')]
    pub urls: Vec<String>,

    /// The path to the output directory. Overrides the settings file
    #[arg(long, env = arg_env!("OUT"))]
    pub out: Option<PathBuf>,

    /// The path to the settings file. Missing files are ignored
    #[arg(long, default_value = "vidq.toml", env = arg_env!("CONFIG"))]
    pub config: PathBuf,

    /// Download a single muxed stream, separate streams to merge, or only the audio
    #[arg(long = "type", value_enum, env = arg_env!("TYPE"))]
    pub stream_type: Option<StreamType>,

    /// Index of the video variant to download, 0 being the best quality
    #[arg(long, default_value_t = 0, env = arg_env!("VIDEO"))]
    pub video: usize,

    /// Index of the audio variant to download, 0 being the best quality
    #[arg(long, default_value_t = 0, env = arg_env!("AUDIO"))]
    pub audio: usize,

    /// The output file name, without extension. Only used with a single URL
    #[arg(long)]
    pub name: Option<String>,

    /// Convert audio-only downloads to this format
    #[arg(long, value_enum, env = arg_env!("CONVERT_AUDIO"))]
    pub convert_audio: Option<Extension>,

    /// The maximum level of the logs to print
    #[arg(long, default_value_t = Level::INFO, env = arg_env!("LOG_LEVEL"))]
    pub log_level: Level,
}

impl Args {
    /// Apply the options given on the command line over the settings
    pub fn override_settings(&self, settings: &mut Settings) {
        if let Some(out) = &self.out {
            settings.save_dir = out.clone();
        }
        if let Some(stream_type) = self.stream_type {
            settings.stream_type = stream_type;
        }
        if self.convert_audio.is_some() {
            settings.convert_audio = self.convert_audio;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_overrides_settings() {
        let args = Args::try_parse_from([
            "vidq",
            "--out",
            "/tmp/out",
            "--type",
            "audio-only",
            "--convert-audio",
            "mp3",
            "https://example.com/A",
        ])
        .unwrap();

        let mut settings = Settings::load(None).unwrap();
        args.override_settings(&mut settings);
        assert_eq!(settings.save_dir, PathBuf::from("/tmp/out"));
        assert_eq!(settings.stream_type, StreamType::AudioOnly);
        assert_eq!(settings.convert_audio, Some(Extension::Mp3));
        assert_eq!(args.log_level, Level::INFO);
    }

    #[test]
    fn absent_options_keep_settings() {
        let args = Args::try_parse_from(["vidq", "a", "b"]).unwrap();
        assert_eq!(args.urls, ["a", "b"]);

        let mut settings = Settings::load(None).unwrap();
        let before = (settings.save_dir.clone(), settings.stream_type);
        args.override_settings(&mut settings);
        assert_eq!((settings.save_dir, settings.stream_type), before);
    }
}
