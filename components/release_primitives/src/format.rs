// components/release_primitives/src/format.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Audio formats offered on a download page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioFormat {
    Flac,
    Mp3V0,
    Mp3_320,
    Aac,
    Ogg,
    Alac,
    Wav,
    Aiff,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown audio format '{0}', expected one of FLAC, V0MP3, 320MP3, AAC, Ogg, ALAC, WAV, AIFF")]
pub struct UnknownFormat(pub String);

impl AudioFormat {
    pub const ALL: [AudioFormat; 8] = [
        AudioFormat::Flac,
        AudioFormat::Mp3V0,
        AudioFormat::Mp3_320,
        AudioFormat::Aac,
        AudioFormat::Ogg,
        AudioFormat::Alac,
        AudioFormat::Wav,
        AudioFormat::Aiff,
    ];

    /// Name users type on the command line
    pub fn name(&self) -> &'static str {
        match self {
            AudioFormat::Flac => "FLAC",
            AudioFormat::Mp3V0 => "V0MP3",
            AudioFormat::Mp3_320 => "320MP3",
            AudioFormat::Aac => "AAC",
            AudioFormat::Ogg => "Ogg",
            AudioFormat::Alac => "ALAC",
            AudioFormat::Wav => "WAV",
            AudioFormat::Aiff => "AIFF",
        }
    }

    /// Key of the signed-URL map on a download page
    pub fn platform_key(&self) -> &'static str {
        match self {
            AudioFormat::Flac => "flac",
            AudioFormat::Mp3V0 => "mp3-v0",
            AudioFormat::Mp3_320 => "mp3-320",
            AudioFormat::Aac => "aac-hi",
            AudioFormat::Ogg => "vorbis",
            AudioFormat::Alac => "alac",
            AudioFormat::Wav => "wav",
            AudioFormat::Aiff => "aiff-lossless",
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::Flac
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AudioFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        AudioFormat::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("FLAC", AudioFormat::Flac, "flac")]
    #[case("V0MP3", AudioFormat::Mp3V0, "mp3-v0")]
    #[case("320MP3", AudioFormat::Mp3_320, "mp3-320")]
    #[case("AAC", AudioFormat::Aac, "aac-hi")]
    #[case("ogg", AudioFormat::Ogg, "vorbis")]
    #[case("ALAC", AudioFormat::Alac, "alac")]
    #[case("wav", AudioFormat::Wav, "wav")]
    #[case("AIFF", AudioFormat::Aiff, "aiff-lossless")]
    fn names_map_to_platform_keys(
        #[case] name: &str,
        #[case] format: AudioFormat,
        #[case] key: &str,
    ) {
        let parsed: AudioFormat = name.parse().unwrap();
        assert_eq!(parsed, format);
        assert_eq!(parsed.platform_key(), key);
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(
            "OPUS".parse::<AudioFormat>(),
            Err(UnknownFormat("OPUS".to_string()))
        );
    }

    #[test]
    fn flac_is_the_default() {
        assert_eq!(AudioFormat::default(), AudioFormat::Flac);
    }
}
