//! Audio assembly through external `ffmpeg` / `ffprobe` processes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("nothing to assemble")]
    NoInputs,
    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },
    #[error("could not read duration: {0}")]
    Probe(String),
}

#[async_trait]
pub trait AudioAssembler: Send + Sync {
    /// Join `files` in order with `silence_ms` of silence between them into `output`.
    async fn concatenate(
        &self,
        files: &[PathBuf],
        silence_ms: u64,
        output: &Path,
    ) -> Result<(), AssemblyError>;

    /// Human-readable duration, `M:SS` or `H:MM:SS`.
    async fn probe_duration(&self, file: &Path) -> Result<String, AssemblyError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssemblerConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: String,
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    #[serde(default = "default_bitrate")]
    pub bitrate: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_ffprobe() -> String {
    "ffprobe".to_string()
}
fn default_silence_ms() -> u64 {
    300
}
fn default_bitrate() -> String {
    "192k".to_string()
}
fn default_timeout_secs() -> u64 {
    600
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            silence_ms: default_silence_ms(),
            bitrate: default_bitrate(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

pub struct FfmpegAssembler {
    config: AssemblerConfig,
}

impl FfmpegAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// Run a program to completion, killing it on timeout or when the future is dropped.
    async fn run(&self, program: &str, args: &[String]) -> Result<Vec<u8>, AssemblyError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let seconds = self.config.timeout_secs;
        let output = tokio::time::timeout(Duration::from_secs(seconds), child)
            .await
            .map_err(|_| AssemblyError::Timeout {
                program: program.to_string(),
                seconds,
            })?
            .map_err(|e| AssemblyError::Spawn {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AssemblyError::Failed {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: tail(&stderr, 800),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl AudioAssembler for FfmpegAssembler {
    async fn concatenate(
        &self,
        files: &[PathBuf],
        silence_ms: u64,
        output: &Path,
    ) -> Result<(), AssemblyError> {
        if files.is_empty() {
            return Err(AssemblyError::NoInputs);
        }

        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
        for file in files {
            args.push("-i".into());
            args.push(file.display().to_string());
        }
        args.push("-filter_complex".into());
        args.push(concat_filter(files.len(), silence_ms));
        args.extend(
            [
                "-map",
                "[out]",
                "-c:a",
                "libmp3lame",
                "-b:a",
                self.config.bitrate.as_str(),
                "-f",
                "mp3",
                "-y",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(output.display().to_string());

        tracing::debug!(inputs = files.len(), output = %output.display(), "running ffmpeg concat");
        self.run(&self.config.ffmpeg_path, &args).await?;
        Ok(())
    }

    async fn probe_duration(&self, file: &Path) -> Result<String, AssemblyError> {
        let args: Vec<String> = [
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain(std::iter::once(file.display().to_string()))
        .collect();

        let stdout = self.run(&self.config.ffprobe_path, &args).await?;
        let raw = String::from_utf8_lossy(&stdout);
        let seconds: f64 = raw
            .trim()
            .parse()
            .map_err(|_| AssemblyError::Probe(format!("unexpected ffprobe output '{}'", raw.trim())))?;
        Ok(format_duration(seconds))
    }
}

/// Normalise every input to one format, pad all but the last with silence, then concat.
pub fn concat_filter(inputs: usize, silence_ms: u64) -> String {
    let pad = silence_ms as f64 / 1000.0;
    let mut graph = String::new();
    for i in 0..inputs {
        graph.push_str(&format!(
            "[{i}:a]aresample=44100,aformat=sample_fmts=s16:channel_layouts=stereo"
        ));
        if silence_ms > 0 && i + 1 < inputs {
            graph.push_str(&format!(",apad=pad_dur={pad:.3}"));
        }
        graph.push_str(&format!("[a{i}];"));
    }
    for i in 0..inputs {
        graph.push_str(&format!("[a{i}]"));
    }
    graph.push_str(&format!("concat=n={inputs}:v=0:a=1[out]"));
    graph
}

pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.trim().to_string();
    }
    text.chars().skip(count - max_chars).collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(59.6), "1:00");
        assert_eq!(format_duration(754.2), "12:34");
        assert_eq!(format_duration(3725.0), "1:02:05");
        assert_eq!(format_duration(f64::NAN), "0:00");
    }

    #[test]
    fn filter_pads_all_but_last() {
        let graph = concat_filter(3, 250);
        assert_eq!(graph.matches("apad=pad_dur=0.250").count(), 2);
        assert!(graph.ends_with("[a0][a1][a2]concat=n=3:v=0:a=1[out]"));
    }

    #[test]
    fn filter_without_silence() {
        let graph = concat_filter(2, 0);
        assert!(!graph.contains("apad"));
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let assembler = FfmpegAssembler::new(AssemblerConfig::default());
        let err = assembler
            .concatenate(&[], 0, Path::new("/tmp/never.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::NoInputs));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let assembler = FfmpegAssembler::new(AssemblerConfig {
            ffprobe_path: "/nonexistent/ffprobe-for-tests".into(),
            ..AssemblerConfig::default()
        });
        let err = assembler
            .probe_duration(Path::new("/tmp/x.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Spawn { .. }));
    }
}
