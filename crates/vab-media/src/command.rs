//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Builder for FFmpeg invocations.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input (file path or URL)
    input: String,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl Into<String>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.into(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add an input argument (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add an output argument (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set overwrite behavior.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Build the argument list.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-loglevel".to_string());
        args.push(self.log_level.clone());
        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.clone());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }

    /// Run the command to completion.
    pub async fn run(&self) -> MediaResult<()> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let args = self.build_args();
        debug!("ffmpeg {}", args.join(" "));

        let output = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(MediaError::ffmpeg_failed(
                format!("ffmpeg failed for {}", self.output.display()),
                Some(stderr),
                output.status.code(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_args_shape() {
        let cmd = FfmpegCommand::new("in.mp4", "out.wav")
            .input_arg("-ss")
            .input_arg("1.5")
            .output_args(["-vn", "-acodec", "pcm_s16le"]);

        let args = cmd.build_args();
        assert_eq!(args[0], "-y");
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i - 2], "-ss");
        assert_eq!(args[i - 1], "1.5");
        assert_eq!(args[i + 1], "in.mp4");
        assert_eq!(args.last().unwrap(), "out.wav");
        assert!(args.contains(&"-vn".to_string()));
    }

    #[test]
    fn no_overwrite_drops_y_flag() {
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4").overwrite(false);
        assert!(!cmd.build_args().contains(&"-y".to_string()));
    }
}
