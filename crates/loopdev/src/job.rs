//! Transfer job descriptors
//!
//! A job pairs one real device with one loopback endpoint and carries the audio
//! parameters the engine should use. The core never interprets the parameters;
//! they are passed through to the [`TransferEngine`](crate::TransferEngine).

use serde::{Deserialize, Serialize};

/// Default sample rate (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default channel count (stereo)
pub const DEFAULT_CHANNELS: u32 = 2;

/// Default requested latency in microseconds
pub const DEFAULT_LATENCY_US: u32 = 300_000;

/// Sample format requested from both endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 16-bit little endian
    #[default]
    S16Le,
    /// Signed 24-bit little endian in 32-bit containers
    S24Le,
    /// Signed 32-bit little endian
    S32Le,
    /// 32-bit float little endian
    F32Le,
}

/// How the engine keeps capture and playback clocks in step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncMode {
    /// No synchronization
    None,
    /// Add or drop samples
    Simple,
    /// Shift the capture pitch
    CaptureShift,
    /// Shift the playback pitch
    PlaybackShift,
    /// Resample
    Resample,
    /// Let the engine choose
    #[default]
    Auto,
}

/// Audio parameters handed opaquely to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobParams {
    pub format: SampleFormat,
    pub channels: u32,
    pub rate: u32,
    /// Buffer size in frames (0 = driver default)
    pub buffer_size: u32,
    /// Period size in frames (0 = driver default)
    pub period_size: u32,
    /// Requested end-to-end latency in microseconds
    pub latency_us: u32,
    /// Open the PCM endpoints in non-blocking mode
    pub nonblocking: bool,
    /// Allow the engine to resample when the device refuses `rate`
    pub resample: bool,
    pub sync: SyncMode,
}

impl Default for JobParams {
    fn default() -> Self {
        Self {
            format: SampleFormat::default(),
            channels: DEFAULT_CHANNELS,
            rate: DEFAULT_SAMPLE_RATE,
            buffer_size: 0,
            period_size: 0,
            latency_us: DEFAULT_LATENCY_US,
            nonblocking: false,
            resample: false,
            sync: SyncMode::default(),
        }
    }
}

/// A unit of transfer work: one real device bound to one loopback endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Real device name (e.g. "hw:2,0"), the playback side of the transfer
    pub real_device: String,
    /// Loopback capture endpoint feeding the real device (e.g. "hw:0,0,3")
    pub loopback_device: String,
    pub params: JobParams,
    /// Worker assignment key; jobs with equal keys share a worker
    pub group_key: i32,
}

impl JobDescriptor {
    /// Bind `real_device` to `loopback_device` with the given parameters
    pub fn new(
        real_device: impl Into<String>,
        loopback_device: impl Into<String>,
        params: JobParams,
    ) -> Self {
        Self {
            real_device: real_device.into(),
            loopback_device: loopback_device.into(),
            params,
            group_key: 0,
        }
    }

    /// Assign the job to a worker group key
    pub fn with_group_key(mut self, key: i32) -> Self {
        self.group_key = key;
        self
    }

    /// Short label for logs and thread names
    pub fn label(&self) -> String {
        format!("{} -> {}", self.loopback_device, self.real_device)
    }
}
