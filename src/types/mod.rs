mod bitrate;
mod extension;
mod resolution;
mod stream;

pub use bitrate::Bitrate;
pub use extension::Extension;
pub use resolution::Resolution;
pub use stream::{FetchHandle, StreamDescriptor, StreamKind, StreamType, VideoMetadata};
