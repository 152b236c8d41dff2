//! Animated GIF previews cut from downloaded videos with ffmpeg.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_PREVIEW_SECONDS: u32 = 3;
pub const DEFAULT_PREVIEW_FPS: u32 = 10;
pub const DEFAULT_PREVIEW_WIDTH: u32 = 320;

/// Clip length, frame rate and width of the preview, plus the ffmpeg executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSettings {
    pub program: PathBuf,
    pub seconds: u32,
    pub fps: u32,
    pub width: u32,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_FFMPEG),
            seconds: DEFAULT_PREVIEW_SECONDS,
            fps: DEFAULT_PREVIEW_FPS,
            width: DEFAULT_PREVIEW_WIDTH,
        }
    }
}

#[derive(Debug, Error)]
enum PreviewError {
    #[error("could not run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{program} reported success but wrote no file at {path}")]
    NoOutput { program: String, path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct PreviewGenerator {
    settings: PreviewSettings,
}

impl PreviewGenerator {
    pub fn new(settings: PreviewSettings) -> Self {
        Self { settings }
    }

    /// ffmpeg arguments: trim to the first N seconds, drop to a constant frame
    /// rate, scale to the target width with Lanczos keeping the aspect ratio.
    pub fn args(&self, source: &Path, target: &Path) -> Vec<String> {
        let filter = format!(
            "fps={},scale={}:-1:flags=lanczos",
            self.settings.fps, self.settings.width
        );
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-t".to_string(),
            self.settings.seconds.to_string(),
            "-i".to_string(),
            source.to_string_lossy().to_string(),
            "-vf".to_string(),
            filter,
            "-loop".to_string(),
            "0".to_string(),
            target.to_string_lossy().to_string(),
        ]
    }

    /// Produce the preview at `target`. Returns None when ffmpeg is missing, fails,
    /// or writes nothing; the caller then uses the still thumbnail. An existing
    /// `target` is reused without running ffmpeg.
    pub async fn generate(&self, source: &Path, target: &Path) -> Option<PathBuf> {
        if target.is_file() {
            tracing::debug!(target = %target.display(), "preview cached");
            return Some(target.to_path_buf());
        }
        match self.run(source, target).await {
            Ok(()) => {
                tracing::info!(target = %target.display(), "preview generated");
                Some(target.to_path_buf())
            }
            Err(e) => {
                tracing::warn!(source = %source.display(), error = %e, "no preview; falling back to thumbnail");
                // ffmpeg may leave a truncated file behind on failure.
                let _ = std::fs::remove_file(target);
                None
            }
        }
    }

    async fn run(&self, source: &Path, target: &Path) -> Result<(), PreviewError> {
        let program = self.settings.program.display().to_string();
        let output = Command::new(&self.settings.program)
            .args(self.args(source, target))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PreviewError::Spawn {
                program: program.clone(),
                source: e,
            })?;
        if !output.status.success() {
            return Err(PreviewError::Failed {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if !target.is_file() {
            return Err(PreviewError::NoOutput {
                program,
                path: target.to_path_buf(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator_with(program: &str) -> PreviewGenerator {
        PreviewGenerator::new(PreviewSettings {
            program: PathBuf::from(program),
            ..PreviewSettings::default()
        })
    }

    #[test]
    fn args_follow_fixed_filter_chain() {
        let generator = PreviewGenerator::new(PreviewSettings::default());
        let args = generator.args(Path::new("/v/1.mp4"), Path::new("/g/1.gif"));
        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-t") + 1], "3");
        assert_eq!(args[pos("-i") + 1], "/v/1.mp4");
        assert_eq!(args[pos("-vf") + 1], "fps=10,scale=320:-1:flags=lanczos");
        assert!(pos("-t") < pos("-i"), "trim applies to the input");
        assert_eq!(args.last().map(String::as_str), Some("/g/1.gif"));
    }

    #[test]
    fn args_use_configured_values() {
        let generator = PreviewGenerator::new(PreviewSettings {
            program: PathBuf::from("ffmpeg"),
            seconds: 5,
            fps: 12,
            width: 480,
        });
        let args = generator.args(Path::new("in.mp4"), Path::new("out.gif"));
        assert!(args.contains(&"5".to_string()));
        assert!(args.contains(&"fps=12,scale=480:-1:flags=lanczos".to_string()));
    }

    #[tokio::test]
    async fn missing_tool_yields_no_preview() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("1.mp4");
        std::fs::write(&video, b"not really a video").unwrap();
        let target = tmp.path().join("1.gif");
        let generator = generator_with("reelbook-no-such-transcoder");
        assert!(generator.generate(&video, &target).await.is_none());
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_tool_yields_no_preview() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("1.mp4");
        std::fs::write(&video, b"x").unwrap();
        let target = tmp.path().join("1.gif");
        let generator = generator_with("false");
        assert!(generator.generate(&video, &target).await.is_none());
    }

    #[tokio::test]
    async fn existing_preview_skips_tool() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("1.gif");
        std::fs::write(&target, b"GIF89a").unwrap();
        // Program does not exist; success proves it was never invoked.
        let generator = generator_with("reelbook-no-such-transcoder");
        let result = generator.generate(Path::new("/missing.mp4"), &target).await;
        assert_eq!(result.as_deref(), Some(target.as_path()));
    }
}
