//! Media metadata via FFprobe.

use std::process::Stdio;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::process::Command;
use tracing::info;

use arkhe_models::{JobId, WorkOutcome};

use super::Operation;

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
}

/// Probes `media_url` and reports format, video and audio details.
#[derive(Debug, Clone)]
pub struct MediaMetadata {
    program: String,
}

impl Default for MediaMetadata {
    fn default() -> Self {
        Self::with_program("ffprobe")
    }
}

impl MediaMetadata {
    /// Use a specific ffprobe executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn probe(&self, media_url: &str) -> anyhow::Result<FfprobeOutput> {
        let program = which::which(&self.program)
            .map_err(|_| anyhow!("{} not found in PATH", self.program))?;

        let output = Command::new(program)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(media_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("failed to run ffprobe")?;

        if !output.status.success() {
            return Err(anyhow!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        serde_json::from_slice(&output.stdout).context("unreadable ffprobe output")
    }
}

#[async_trait]
impl Operation for MediaMetadata {
    fn endpoint(&self) -> &'static str {
        "/v1/media/metadata"
    }

    async fn run(&self, job_id: JobId, payload: Value) -> anyhow::Result<WorkOutcome> {
        let Some(media_url) = payload
            .get("media_url")
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
        else {
            return Ok(WorkOutcome::failure("media_url is required", 400));
        };

        info!(job_id = %job_id, media_url, "Extracting media metadata");
        let probe = self.probe(media_url).await?;
        Ok(WorkOutcome::success(summarize(&probe)))
    }
}

/// Flatten ffprobe output into the metadata response.
fn summarize(probe: &FfprobeOutput) -> Value {
    let mut out = Map::new();

    let size = probe.format.size.as_deref().and_then(|s| s.parse::<u64>().ok());
    if let Some(size) = size {
        out.insert("filesize".into(), json!(size));
        out.insert("filesize_mb".into(), json!(round2(size as f64 / (1024.0 * 1024.0))));
    }

    let duration = probe.format.duration.as_deref().and_then(|d| d.parse::<f64>().ok());
    if let Some(duration) = duration {
        out.insert("duration".into(), json!(round2(duration)));
        out.insert("duration_formatted".into(), json!(format_duration(duration)));
    }

    if let Some(format) = &probe.format.format_name {
        out.insert("format".into(), json!(format));
    }
    if let Some(bitrate) = probe.format.bit_rate.as_deref().and_then(|b| b.parse::<u64>().ok()) {
        out.insert("overall_bitrate".into(), json!(bitrate));
    }

    let video = probe.streams.iter().find(|s| s.codec_type == "video");
    out.insert("has_video".into(), json!(video.is_some()));
    if let Some(video) = video {
        out.insert("video_codec".into(), json!(video.codec_name));
        if let (Some(w), Some(h)) = (video.width, video.height) {
            out.insert("width".into(), json!(w));
            out.insert("height".into(), json!(h));
            out.insert("resolution".into(), json!(format!("{}x{}", w, h)));
        }
        let fps = video
            .avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate));
        if let Some(fps) = fps {
            out.insert("fps".into(), json!(round2(fps)));
        }
    }

    let audio = probe.streams.iter().find(|s| s.codec_type == "audio");
    out.insert("has_audio".into(), json!(audio.is_some()));
    if let Some(audio) = audio {
        out.insert("audio_codec".into(), json!(audio.codec_name));
        if let Some(channels) = audio.channels {
            out.insert("audio_channels".into(), json!(channels));
        }
        if let Some(rate) = audio.sample_rate.as_deref().and_then(|r| r.parse::<u32>().ok()) {
            out.insert("audio_sample_rate".into(), json!(rate));
        }
    }

    Value::Object(out)
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        return (den > 0.0).then(|| num / den);
    }
    s.parse().ok()
}

/// `HH:MM:SS.ss`
fn format_duration(secs: f64) -> String {
    let centis = (secs * 100.0).round() as u64;
    let (hours, rem) = (centis / 360_000, centis % 360_000);
    let (minutes, rem) = (rem / 6_000, rem % 6_000);
    format!("{:02}:{:02}:{:02}.{:02}", hours, minutes, rem / 100, rem % 100)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
