use std::path::{Path, PathBuf};
use std::process::Stdio;

use cornerstone_domain::DomainResult;
use cornerstone_domain::error::DomainError;
use cornerstone_domain::ports::BoxFuture;
use cornerstone_domain::ports::models::{MediaToolkit, Transcriber};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::AppConfig;

const FULL_CLIP_LIMIT_SECS: f64 = 30.0;
const SAMPLE_SECS: f64 = 10.0;
const STDERR_TAIL: usize = 400;

#[derive(Debug, Clone)]
pub struct BinaryPaths {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub whisper: String,
    pub whisper_model: String,
    pub opencc: String,
    pub work_dir: PathBuf,
}

impl BinaryPaths {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            whisper: config.whisper_path.clone(),
            whisper_model: config.whisper_model_path.clone(),
            opencc: config.opencc_path.clone(),
            work_dir: PathBuf::from(&config.work_dir),
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(index, _)| index)
        .unwrap_or(0);
    text[start..].to_string()
}

/// Runs `program` to completion and returns its stdout. The child is killed
/// if this future is dropped.
async fn run_capture(program: &str, args: &[String], stdin: Option<&[u8]>) -> DomainResult<Vec<u8>> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = command
        .spawn()
        .map_err(|err| DomainError::Unavailable(format!("failed to start {program}: {err}")))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input)
            .await
            .map_err(|err| DomainError::Upstream(format!("{program} stdin: {err}")))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|err| DomainError::Upstream(format!("{program} failed: {err}")))?;
    if !output.status.success() {
        return Err(DomainError::Upstream(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr_tail(&output.stderr)
        )));
    }
    Ok(output.stdout)
}

struct ScratchDir(PathBuf);

impl ScratchDir {
    async fn create(root: &Path, prefix: &str) -> DomainResult<Self> {
        let path = root.join(format!("{prefix}-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|err| DomainError::Unavailable(format!("work dir: {err}")))?;
        Ok(Self(path))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn probe_args(url: &str) -> Vec<String> {
    [
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
        url,
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

fn parse_duration(stdout: &[u8]) -> DomainResult<f64> {
    let text = String::from_utf8_lossy(stdout);
    let duration = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
        .ok_or_else(|| DomainError::Validation(format!("unreadable duration: {}", text.trim())))?;
    Ok(duration)
}

fn frame_args(url: &str, duration: f64, count: u32, width: u32, pattern: &Path) -> Vec<String> {
    let count = count.max(1);
    let rate = if duration > 0.0 {
        format!("{count}/{duration:.3}")
    } else {
        "1".to_string()
    };
    vec![
        "-v".into(),
        "error".into(),
        "-y".into(),
        "-i".into(),
        url.into(),
        "-vf".into(),
        format!("fps={rate},scale={width}:-2"),
        "-frames:v".into(),
        count.to_string(),
        "-q:v".into(),
        "3".into(),
        pattern.to_string_lossy().into_owned(),
    ]
}

fn audio_args(url: &str, segment: Option<Segment>, output: &str) -> Vec<String> {
    let mut args: Vec<String> = vec!["-v".into(), "error".into(), "-y".into()];
    if let Some(segment) = segment {
        args.extend(["-ss".into(), format!("{:.3}", segment.start)]);
    }
    args.extend(["-i".into(), url.into()]);
    if let Some(length) = segment.and_then(|segment| segment.length) {
        args.extend(["-t".into(), format!("{length:.3}")]);
    }
    args.extend(
        [
            "-vn",
            "-ac",
            "1",
            "-ar",
            "16000",
            "-acodec",
            "pcm_s16le",
            "-f",
            "wav",
            output,
        ]
        .iter()
        .map(|arg| arg.to_string()),
    );
    args
}

/// probe and transcode through the ffmpeg binaries.
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    paths: BinaryPaths,
}

impl FfmpegToolkit {
    pub fn new(paths: BinaryPaths) -> Self {
        Self { paths }
    }
}

impl MediaToolkit for FfmpegToolkit {
    fn probe_duration(&self, url: &str) -> BoxFuture<'_, DomainResult<f64>> {
        let args = probe_args(url);
        Box::pin(async move {
            let stdout = run_capture(&self.paths.ffprobe, &args, None).await?;
            parse_duration(&stdout)
        })
    }

    fn extract_frames(
        &self,
        url: &str,
        duration: f64,
        count: u32,
        width: u32,
    ) -> BoxFuture<'_, DomainResult<Vec<Vec<u8>>>> {
        let url = url.to_string();
        Box::pin(async move {
            let scratch = ScratchDir::create(&self.paths.work_dir, "frames").await?;
            let pattern = scratch.0.join("%03d.jpg");
            let args = frame_args(&url, duration, count, width, &pattern);
            run_capture(&self.paths.ffmpeg, &args, None).await?;

            let mut names = Vec::new();
            let mut entries = tokio::fs::read_dir(&scratch.0)
                .await
                .map_err(|err| DomainError::Upstream(format!("frame dir: {err}")))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| DomainError::Upstream(format!("frame dir: {err}")))?
            {
                names.push(entry.path());
            }
            names.sort();

            let mut frames = Vec::with_capacity(names.len());
            for path in names {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|err| DomainError::Upstream(format!("frame read: {err}")))?;
                frames.push(bytes);
            }
            tracing::debug!(frames = frames.len(), duration, "frames extracted");
            Ok(frames)
        })
    }

    fn extract_audio(&self, url: &str) -> BoxFuture<'_, DomainResult<Vec<u8>>> {
        let args = audio_args(url, None, "-");
        Box::pin(async move { run_capture(&self.paths.ffmpeg, &args, None).await })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: f64,
    /// `None` reads to the end of the clip.
    pub length: Option<f64>,
}

/// Short clips are transcribed whole; longer ones are sampled at the head,
/// middle and tail.
pub fn plan_segments(duration: f64) -> Vec<Segment> {
    if !duration.is_finite() || duration <= FULL_CLIP_LIMIT_SECS {
        return vec![Segment {
            start: 0.0,
            length: None,
        }];
    }
    let middle = (duration - SAMPLE_SECS) / 2.0;
    let tail = duration - SAMPLE_SECS;
    [0.0, middle, tail]
        .into_iter()
        .map(|start| Segment {
            start,
            length: Some(SAMPLE_SECS),
        })
        .collect()
}

fn whisper_args(model: &str, wav: &Path) -> Vec<String> {
    vec![
        "-m".into(),
        model.into(),
        "-f".into(),
        wav.to_string_lossy().into_owned(),
        "-l".into(),
        "auto".into(),
        "-nt".into(),
    ]
}

fn clean_transcript(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whisper speech recognition followed by traditional to simplified
/// conversion.
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    toolkit: FfmpegToolkit,
}

impl WhisperTranscriber {
    pub fn new(paths: BinaryPaths) -> Self {
        Self {
            toolkit: FfmpegToolkit::new(paths),
        }
    }

    fn paths(&self) -> &BinaryPaths {
        &self.toolkit.paths
    }

    async fn transcribe_segment(
        &self,
        url: &str,
        segment: Segment,
        scratch: &Path,
        index: usize,
    ) -> DomainResult<String> {
        let wav = scratch.join(format!("segment-{index}.wav"));
        let args = audio_args(url, Some(segment), &wav.to_string_lossy());
        run_capture(&self.paths().ffmpeg, &args, None).await?;
        let stdout = run_capture(
            &self.paths().whisper,
            &whisper_args(&self.paths().whisper_model, &wav),
            None,
        )
        .await?;
        Ok(clean_transcript(&stdout))
    }

    async fn simplify(&self, text: &str) -> DomainResult<String> {
        if text.is_empty() {
            return Ok(String::new());
        }
        let args = vec!["-c".to_string(), "t2s.json".to_string()];
        let stdout = run_capture(&self.paths().opencc, &args, Some(text.as_bytes())).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, url: &str) -> BoxFuture<'_, DomainResult<String>> {
        let url = url.to_string();
        Box::pin(async move {
            let duration = self.toolkit.probe_duration(&url).await?;
            let scratch = ScratchDir::create(&self.paths().work_dir, "asr").await?;
            let mut parts = Vec::new();
            for (index, segment) in plan_segments(duration).into_iter().enumerate() {
                let text = self
                    .transcribe_segment(&url, segment, &scratch.0, index)
                    .await?;
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            let transcript = self.simplify(&parts.join("\n")).await?;
            tracing::debug!(duration, chars = transcript.chars().count(), "transcribed");
            Ok(transcript)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_clips_are_transcribed_whole() {
        assert_eq!(
            plan_segments(30.0),
            vec![Segment {
                start: 0.0,
                length: None
            }]
        );
    }

    #[test]
    fn long_clips_sample_head_middle_and_tail() {
        let segments = plan_segments(100.0);
        let starts: Vec<f64> = segments.iter().map(|segment| segment.start).collect();
        assert_eq!(starts, vec![0.0, 45.0, 90.0]);
        assert!(segments.iter().all(|segment| segment.length == Some(10.0)));
    }

    #[test]
    fn frames_are_spread_over_the_clip() {
        let args = frame_args("http://cdn/v.mp4", 20.0, 5, 768, Path::new("/tmp/x/%03d.jpg"));
        assert!(args.contains(&"fps=5/20.000,scale=768:-2".to_string()));
        let quality = args.iter().position(|arg| arg == "-q:v").unwrap();
        assert_eq!(args[quality + 1], "3");
    }

    #[test]
    fn audio_is_mono_sixteen_khz() {
        let args = audio_args(
            "http://cdn/a.mp3",
            Some(Segment {
                start: 45.0,
                length: Some(10.0),
            }),
            "out.wav",
        );
        let joined = args.join(" ");
        assert!(joined.contains("-ss 45.000 -i http://cdn/a.mp3 -t 10.000"));
        assert!(joined.contains("-ac 1 -ar 16000"));
        assert!(joined.ends_with("-f wav out.wav"));
    }

    #[test]
    fn probe_output_parses_to_seconds() {
        assert_eq!(parse_duration(b"12.480000\n").unwrap(), 12.48);
        assert!(parse_duration(b"N/A\n").is_err());
    }

    #[test]
    fn transcript_lines_are_joined() {
        assert_eq!(clean_transcript(b"  hello \n\n world\n"), "hello world");
    }
}
