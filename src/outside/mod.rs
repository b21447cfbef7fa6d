mod command;
mod ffmpeg;
mod scanner;
mod ytdl;

pub use ffmpeg::{Ffmpeg, Transcoder};
pub use ytdl::{MetadataResolver, StreamFetcher, Ytdl};
