//! Structured transcode profile records.
//!
//! A [`Profile`] is a fixed, versioned parameter set. The command builder in
//! `tc-av` turns one into encoder arguments for whatever platform was
//! detected; nothing here knows about flags of a particular encoder.

use serde::{Deserialize, Serialize};

/// Whether a profile produces a video or a single still frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Video,
    Still,
}

/// Target video codec family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
}

/// Output frame size; the source is scaled down to fit and letterboxed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// How the encoder's bitrate is governed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RateControl {
    /// Constant quality with an optional VBV ceiling.
    Quality {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maxrate_kbps: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bufsize_kbps: Option<u32>,
    },
    /// Target bitrate. Hardware encoders express it as quality capped at the
    /// bitrate with a double-size buffer; software encoders as `-b:v`.
    Bitrate { kbps: u32 },
}

impl Default for RateControl {
    fn default() -> Self {
        RateControl::Quality {
            maxrate_kbps: None,
            bufsize_kbps: None,
        }
    }
}

/// Audio handling for a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AudioPolicy {
    /// Strip audio entirely.
    Drop,
    /// Re-encode audio.
    Encode {
        codec: String,
        bitrate_kbps: u32,
        sample_rate: u32,
        channels: u32,
        /// `loudnorm` filter options, e.g. `I=-17:TP=-1:LRA=11`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loudnorm: Option<String>,
    },
}

impl AudioPolicy {
    /// 128k stereo MP3 at 44.1 kHz, optionally loudness-normalised.
    pub fn mp3_stereo(loudnorm: Option<&str>) -> Self {
        AudioPolicy::Encode {
            codec: "libmp3lame".into(),
            bitrate_kbps: 128,
            sample_rate: 44100,
            channels: 2,
            loudnorm: loudnorm.map(String::from),
        }
    }
}

fn default_version() -> u32 {
    1
}

fn default_preset() -> String {
    "fast".into()
}

fn default_codec() -> VideoCodec {
    VideoCodec::H265
}

fn default_audio() -> AudioPolicy {
    AudioPolicy::Drop
}

/// A named, versioned set of encode parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub description: String,
    pub kind: ProfileKind,
    /// Output file extension without the dot.
    pub extension: String,
    #[serde(default = "default_codec")]
    pub codec: VideoCodec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Resolution>,
    /// Quality target on the CRF scale (lower is better). For stills this
    /// is the JPEG `-q:v` value.
    pub quality: u32,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default)]
    pub rate_control: RateControl,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gop: Option<u32>,
    #[serde(default = "default_audio")]
    pub audio: AudioPolicy,
    /// Move the MP4 index to the front of the file.
    #[serde(default)]
    pub faststart: bool,
    /// Seek position for stills (`HH:MM:SS`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seek: Option<String>,
}

impl Profile {
    pub fn is_still(&self) -> bool {
        self.kind == ProfileKind::Still
    }
}
