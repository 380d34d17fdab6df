//! Generic encoder command builder.
//!
//! Turns a [`Profile`] plus the capability snapshot for one attempt into an
//! ffmpeg argument list. Platform-specific spelling (encoder names, quality
//! and preset flags, hwaccel) comes from [`Platform`].

use std::path::Path;

use tc_core::{AudioPolicy, Profile, RateControl, Resolution};

use crate::platform::{CapabilitySnapshot, Platform};

/// ffmpeg arguments (without the program) for one attempt.
pub fn build_args(
    profile: &Profile,
    snapshot: &CapabilitySnapshot,
    input: &Path,
    output: &Path,
) -> Vec<String> {
    let platform = snapshot.effective();
    let mut args = platform.hwaccel_args();
    args.push("-i".into());
    args.push(input.to_string_lossy().into_owned());

    if profile.is_still() {
        still_args(profile, &mut args);
    } else {
        video_args(profile, platform, &mut args);
    }

    args.push("-y".into());
    args.push(output.to_string_lossy().into_owned());
    args
}

/// ffmpeg arguments for a caller-supplied parameter list: hwaccel, input,
/// the parameters verbatim, output.
pub fn raw_args(
    params: &[String],
    snapshot: &CapabilitySnapshot,
    input: &Path,
    output: &Path,
) -> Vec<String> {
    let mut args = snapshot.effective().hwaccel_args();
    args.push("-i".into());
    args.push(input.to_string_lossy().into_owned());
    args.extend(params.iter().cloned());
    args.push("-y".into());
    args.push(output.to_string_lossy().into_owned());
    args
}

fn video_args(profile: &Profile, platform: Platform, args: &mut Vec<String>) {
    args.push("-c:v".into());
    args.push(platform.encoder(profile.codec).into());
    args.extend(platform.preset_args(&profile.preset));

    match &profile.rate_control {
        RateControl::Quality {
            maxrate_kbps,
            bufsize_kbps,
        } => {
            args.extend(platform.quality_args(profile.quality));
            if let Some(maxrate) = maxrate_kbps {
                args.push("-maxrate".into());
                args.push(format!("{maxrate}k"));
            }
            if let Some(bufsize) = bufsize_kbps {
                args.push("-bufsize".into());
                args.push(format!("{bufsize}k"));
            }
        }
        // Hardware encoders hold quality under a bitrate ceiling; software
        // encodes straight to the bitrate.
        RateControl::Bitrate { kbps } if platform.is_hardware() => {
            args.extend(platform.quality_args(profile.quality));
            args.extend([
                "-maxrate".into(),
                format!("{kbps}k"),
                "-bufsize".into(),
                format!("{}k", kbps * 2),
            ]);
        }
        RateControl::Bitrate { kbps } => {
            args.push("-b:v".into());
            args.push(format!("{kbps}k"));
        }
    }

    if let Some(rate) = profile.frame_rate {
        args.push("-r".into());
        args.push(rate.to_string());
    }
    if let Some(gop) = profile.gop {
        args.push("-g".into());
        args.push(gop.to_string());
    }
    if let Some(size) = profile.scale {
        args.push("-vf".into());
        args.push(scale_filter(size));
    }

    match &profile.audio {
        AudioPolicy::Drop => args.push("-an".into()),
        AudioPolicy::Encode {
            codec,
            bitrate_kbps,
            sample_rate,
            channels,
            loudnorm,
        } => {
            args.extend([
                "-c:a".into(),
                codec.clone(),
                "-b:a".into(),
                format!("{bitrate_kbps}k"),
                "-ar".into(),
                sample_rate.to_string(),
                "-ac".into(),
                channels.to_string(),
            ]);
            if let Some(opts) = loudnorm {
                args.push("-af".into());
                args.push(format!("loudnorm={opts}"));
            }
        }
    }

    if profile.faststart {
        args.push("-movflags".into());
        args.push("+faststart".into());
    }
    if profile.extension == "mp4" {
        args.push("-f".into());
        args.push("mp4".into());
    }
}

fn still_args(profile: &Profile, args: &mut Vec<String>) {
    if let Some(seek) = &profile.seek {
        args.push("-ss".into());
        args.push(seek.clone());
    }
    args.push("-vframes".into());
    args.push("1".into());
    if let Some(size) = profile.scale {
        args.push("-vf".into());
        args.push(scale_filter(size));
    }
    args.push("-q:v".into());
    args.push(profile.quality.to_string());
}

/// Fit inside `size` keeping aspect ratio, then letterbox with black.
fn scale_filter(size: Resolution) -> String {
    let Resolution { width, height } = size;
    format!(
        "scale={width}:{height}:force_original_aspect_ratio=decrease,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:black"
    )
}
