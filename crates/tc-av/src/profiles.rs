//! Named transcode profiles.

use std::collections::BTreeMap;

use tc_core::{AudioPolicy, Error, Profile, ProfileKind, RateControl, Resolution, Result, VideoCodec};

/// Loudness target for the high-definition low-bitrate profile.
const LOUDNORM_BROADCAST: &str = "I=-17:TP=-1:LRA=11";
/// Louder target for in-store displays.
const LOUDNORM_DISPLAY: &str = "I=-10";

/// Profile name to parameter record.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Profile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileRegistry {
    /// The shipped profiles.
    pub fn builtin() -> Self {
        let profiles = builtin_profiles()
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        Self { profiles }
    }

    /// Built-ins plus `extra`; an entry with a built-in's name replaces it.
    pub fn with_overrides(extra: &[Profile]) -> Self {
        let mut registry = Self::builtin();
        for profile in extra {
            if registry
                .profiles
                .insert(profile.name.clone(), profile.clone())
                .is_some()
            {
                tracing::info!(profile = %profile.name, version = profile.version, "Overriding built-in profile");
            }
        }
        registry
    }

    pub fn get(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| Error::Validation(format!("unknown transcode type: {name}")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }
}

fn video(name: &str, description: &str, quality: u32) -> Profile {
    Profile {
        name: name.into(),
        version: 1,
        description: description.into(),
        kind: ProfileKind::Video,
        extension: "mp4".into(),
        codec: VideoCodec::H265,
        scale: None,
        quality,
        preset: "fast".into(),
        rate_control: RateControl::default(),
        frame_rate: None,
        gop: None,
        audio: AudioPolicy::Drop,
        faststart: true,
        seek: None,
    }
}

fn capped(maxrate_kbps: u32, bufsize_kbps: u32) -> RateControl {
    RateControl::Quality {
        maxrate_kbps: Some(maxrate_kbps),
        bufsize_kbps: Some(bufsize_kbps),
    }
}

fn builtin_profiles() -> Vec<Profile> {
    vec![
        Profile {
            scale: Some(Resolution { width: 848, height: 480 }),
            rate_control: capped(800, 1600),
            audio: AudioPolicy::mp3_stereo(None),
            ..video("mp4_standard", "480p H.265 with MP3 audio", 23)
        },
        Profile {
            scale: Some(Resolution { width: 640, height: 360 }),
            rate_control: capped(400, 800),
            audio: AudioPolicy::mp3_stereo(None),
            ..video("mp4_smooth", "360p H.265 for slow connections", 25)
        },
        Profile {
            rate_control: capped(6000, 12000),
            frame_rate: Some(25),
            gop: Some(250),
            audio: AudioPolicy::mp3_stereo(Some(LOUDNORM_BROADCAST)),
            ..video("hdlbr_h265", "Source-resolution H.265, loudness normalised", 20)
        },
        Profile {
            frame_rate: Some(25),
            gop: Some(250),
            audio: AudioPolicy::mp3_stereo(Some(LOUDNORM_DISPLAY)),
            ..video("lcd_h265", "H.265 for LCD displays, loud audio", 22)
        },
        Profile {
            rate_control: RateControl::Bitrate { kbps: 2867 },
            frame_rate: Some(25),
            gop: Some(250),
            ..video("h265_mute", "Silent H.265 at a fixed bitrate", 23)
        },
        Profile {
            frame_rate: Some(25),
            gop: Some(250),
            ..video("custom_mute_preview", "Silent H.265 preview", 23)
        },
        Profile {
            name: "thumbnail".into(),
            version: 1,
            description: "720p JPEG still at 4 seconds".into(),
            kind: ProfileKind::Still,
            extension: "jpg".into(),
            codec: VideoCodec::H265,
            scale: Some(Resolution { width: 1280, height: 720 }),
            quality: 2,
            preset: "fast".into(),
            rate_control: RateControl::default(),
            frame_rate: None,
            gop: None,
            audio: AudioPolicy::Drop,
            faststart: false,
            seek: Some("00:00:04".into()),
        },
    ]
}
