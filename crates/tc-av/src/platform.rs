//! Host platform detection and the shared hardware-usable flag.
//!
//! Detection runs once per process and produces an immutable
//! [`PlatformCapabilities`]. The only mutable part is [`HardwareState`]: a
//! generation-stamped flag that encoder runs read as a
//! [`CapabilitySnapshot`] at the start of each attempt and that exactly one
//! caller can flip to "software only" for a given generation.

use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tc_core::config::EncodingConfig;
use tc_core::VideoCodec;

use crate::tools::ToolRegistry;

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// The encoder path a host supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// NVIDIA GPU with NVENC on Linux.
    LinuxNvidia,
    /// VideoToolbox on macOS.
    AppleVideoToolbox,
    /// Software encoders only.
    Cpu,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::LinuxNvidia => "linux_nvidia",
            Platform::AppleVideoToolbox => "apple_videotoolbox",
            Platform::Cpu => "cpu",
        }
    }

    pub fn is_hardware(&self) -> bool {
        *self != Platform::Cpu
    }

    /// Name of the `-hwaccel` method, if any.
    pub fn accelerator(&self) -> Option<&'static str> {
        match self {
            Platform::LinuxNvidia => Some("cuda"),
            Platform::AppleVideoToolbox => Some("videotoolbox"),
            Platform::Cpu => None,
        }
    }

    /// Encoder name for `codec` on this platform.
    pub fn encoder(&self, codec: VideoCodec) -> &'static str {
        match (self, codec) {
            (Platform::LinuxNvidia, VideoCodec::H264) => "h264_nvenc",
            (Platform::LinuxNvidia, VideoCodec::H265) => "hevc_nvenc",
            (Platform::AppleVideoToolbox, VideoCodec::H264) => "h264_videotoolbox",
            (Platform::AppleVideoToolbox, VideoCodec::H265) => "hevc_videotoolbox",
            (Platform::Cpu, VideoCodec::H264) => "libx264",
            (Platform::Cpu, VideoCodec::H265) => "libx265",
        }
    }

    pub fn hwaccel_args(&self) -> Vec<String> {
        match self.accelerator() {
            Some(accel) => vec!["-hwaccel".into(), accel.into()],
            None => Vec::new(),
        }
    }

    /// Quality flags for a CRF-scale target `q`.
    ///
    /// VideoToolbox has an inverted 1-100 scale, so the CRF value is mapped
    /// onto it.
    pub fn quality_args(&self, q: u32) -> Vec<String> {
        match self {
            Platform::LinuxNvidia => vec!["-cq".into(), q.to_string()],
            Platform::AppleVideoToolbox => {
                let mapped = (100 - 3 * q as i64).clamp(1, 100);
                vec!["-q:v".into(), mapped.to_string()]
            }
            Platform::Cpu => vec!["-crf".into(), q.to_string()],
        }
    }

    /// Speed/quality preset flags.
    ///
    /// VideoToolbox has no presets; fast presets request realtime mode.
    pub fn preset_args(&self, preset: &str) -> Vec<String> {
        match self {
            Platform::AppleVideoToolbox => match preset {
                "fast" | "veryfast" | "ultrafast" => vec!["-realtime".into(), "1".into()],
                _ => Vec::new(),
            },
            _ => vec!["-preset".into(), preset.into()],
        }
    }

    /// Substrings of encoder output that blame the hardware path.
    pub fn failure_markers(&self) -> &'static [&'static str] {
        match self {
            Platform::LinuxNvidia => &["nvenc", "cuda"],
            Platform::AppleVideoToolbox => &["videotoolbox"],
            Platform::Cpu => &[],
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Hardware state
// ---------------------------------------------------------------------------

/// Generation-stamped "hardware usable" flag.
///
/// Packed into one atomic as `generation << 1 | usable` so a snapshot never
/// pairs a stale generation with a fresh flag.
#[derive(Debug)]
pub struct HardwareState {
    word: AtomicU64,
}

impl HardwareState {
    pub fn new(usable: bool) -> Self {
        Self {
            word: AtomicU64::new(usable as u64),
        }
    }

    /// Current `(generation, usable)`.
    pub fn load(&self) -> (u64, bool) {
        let word = self.word.load(Ordering::Acquire);
        (word >> 1, word & 1 == 1)
    }

    /// Mark hardware unusable if it is still usable at `generation`.
    ///
    /// Returns `true` for the single caller that performed the downgrade.
    pub fn downgrade(&self, generation: u64) -> bool {
        let expected = (generation << 1) | 1;
        let next = (generation + 1) << 1;
        self.word
            .compare_exchange(expected, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// What one encode attempt may assume about the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilitySnapshot {
    pub platform: Platform,
    /// Whether the hardware path is usable for this attempt.
    pub hardware: bool,
    pub generation: u64,
}

impl CapabilitySnapshot {
    /// Platform conventions to build this attempt's command with.
    pub fn effective(&self) -> Platform {
        if self.hardware {
            self.platform
        } else {
            Platform::Cpu
        }
    }

    /// Whether a failed run's output blames the hardware path.
    pub fn is_hardware_failure(&self, output: &str) -> bool {
        if !self.hardware {
            return false;
        }
        let lower = output.to_lowercase();
        self.platform
            .failure_markers()
            .iter()
            .any(|marker| lower.contains(marker))
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Detected host capabilities.
#[derive(Debug, Serialize)]
pub struct PlatformCapabilities {
    pub os: String,
    pub arch: String,
    pub platform: Platform,
    pub gpu_name: Option<String>,
    #[serde(skip)]
    hardware: HardwareState,
}

static SHARED: OnceLock<Arc<PlatformCapabilities>> = OnceLock::new();

impl PlatformCapabilities {
    /// Capabilities for a known platform, skipping detection.
    pub fn new(platform: Platform) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            platform,
            gpu_name: None,
            hardware: HardwareState::new(platform.is_hardware()),
        }
    }

    /// Probe the current host.
    pub fn detect(tools: &ToolRegistry, encoding: &EncodingConfig) -> Self {
        Self::detect_for_os(std::env::consts::OS, tools, encoding)
    }

    /// Detect once per process; later calls return the same instance.
    pub fn detect_shared(tools: &ToolRegistry, encoding: &EncodingConfig) -> Arc<Self> {
        SHARED
            .get_or_init(|| Arc::new(Self::detect(tools, encoding)))
            .clone()
    }

    pub(crate) fn detect_for_os(os: &str, tools: &ToolRegistry, encoding: &EncodingConfig) -> Self {
        let mut caps = Self::new(Platform::Cpu);
        caps.os = os.to_string();

        if !encoding.hardware_allowed() {
            tracing::info!("Hardware acceleration disabled by configuration");
            return caps;
        }

        let Some(ffmpeg) = tools.get("ffmpeg") else {
            tracing::warn!("ffmpeg not found; assuming software encoding");
            return caps;
        };

        let detected = match os {
            "linux" => {
                let gpu = tools.get("nvidia-smi").and_then(query_gpu_name);
                match gpu {
                    Some(name) if encoder_usable(ffmpeg, "hevc_nvenc", &["-hwaccel", "cuda"]) => {
                        caps.gpu_name = Some(name);
                        Platform::LinuxNvidia
                    }
                    Some(name) => {
                        tracing::warn!(gpu = %name, "GPU present but NVENC is not usable");
                        Platform::Cpu
                    }
                    None => Platform::Cpu,
                }
            }
            "macos" if encoder_usable(ffmpeg, "hevc_videotoolbox", &[]) => {
                Platform::AppleVideoToolbox
            }
            _ => Platform::Cpu,
        };

        caps.platform = detected;
        caps.hardware = HardwareState::new(detected.is_hardware());
        tracing::info!(
            os = %caps.os,
            arch = %caps.arch,
            platform = %caps.platform,
            gpu = caps.gpu_name.as_deref().unwrap_or("-"),
            "Platform detected"
        );
        caps
    }

    /// Read the hardware flag for one attempt.
    pub fn snapshot(&self) -> CapabilitySnapshot {
        let (generation, usable) = self.hardware.load();
        CapabilitySnapshot {
            platform: self.platform,
            hardware: usable && self.platform.is_hardware(),
            generation,
        }
    }

    /// Record that the hardware path failed during `snapshot`'s attempt.
    ///
    /// Returns `true` if this call flipped the flag; `false` if another
    /// worker already did.
    pub fn downgrade(&self, snapshot: &CapabilitySnapshot) -> bool {
        let flipped = self.hardware.downgrade(snapshot.generation);
        if flipped {
            tracing::warn!(platform = %self.platform, "Hardware encoder failed; switching to software encoding");
        }
        flipped
    }

    pub fn hardware_usable(&self) -> bool {
        self.snapshot().hardware
    }
}

fn query_gpu_name(nvidia_smi: &Path) -> Option<String> {
    let output = Command::new(nvidia_smi)
        .args(["--query-gpu=name,driver_version", "--format=csv,noheader"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()?
        .trim()
        .to_string();
    let name = line.split(',').next().unwrap_or_default().trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// `encoder` is listed by ffmpeg and a one-second synthetic encode succeeds.
fn encoder_usable(ffmpeg: &Path, encoder: &str, hwaccel: &[&str]) -> bool {
    let listed = Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .output()
        .map(|o| o.status.success() && String::from_utf8_lossy(&o.stdout).contains(encoder))
        .unwrap_or(false);
    if !listed {
        return false;
    }

    let ok = Command::new(ffmpeg)
        .args(["-hide_banner", "-loglevel", "error"])
        .args(hwaccel)
        .args(["-f", "lavfi", "-i", "testsrc=duration=1:size=320x240:rate=1"])
        .args(["-c:v", encoder, "-preset", "fast", "-f", "null", "-"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !ok {
        tracing::warn!(encoder, "Test encode failed");
    }
    ok
}
