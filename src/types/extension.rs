use std::fmt::Display;

use clap::ValueEnum;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    Mp4,
    M4a,
    Webm,
    Mkv,
    Mp3,
    Ogg,
    Opus,
}

impl Extension {
    /// Return the extension without the leading dot.
    /// e.g. "ext"
    pub fn with_no_dot(self) -> &'static str {
        match self {
            Extension::Mp4 => "mp4",
            Extension::M4a => "m4a",
            Extension::Webm => "webm",
            Extension::Mkv => "mkv",
            Extension::Mp3 => "mp3",
            Extension::Ogg => "ogg",
            Extension::Opus => "opus",
        }
    }
}

impl Display for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.with_no_dot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_names_match_file_extensions() {
        for ext in Extension::value_variants() {
            let name = ext.to_possible_value().unwrap();
            assert_eq!(name.get_name(), ext.with_no_dot());
            assert_eq!(Extension::from_str(&ext.to_string(), false), Ok(*ext));
        }
        assert!(Extension::from_str("flv", true).is_err());
    }
}
