use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConversionError;
use crate::job::ConversionFlags;

/// Output formats the encoder can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Mp4,
    Webm,
    Mkv,
    Mov,
    Avi,
    Gif,
    Mp3,
    Wav,
    Ogg,
    Flac,
    M4a,
}

impl TargetFormat {
    pub const ALL: [TargetFormat; 11] = [
        TargetFormat::Mp4,
        TargetFormat::Webm,
        TargetFormat::Mkv,
        TargetFormat::Mov,
        TargetFormat::Avi,
        TargetFormat::Gif,
        TargetFormat::Mp3,
        TargetFormat::Wav,
        TargetFormat::Ogg,
        TargetFormat::Flac,
        TargetFormat::M4a,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Mp4 => "mp4",
            TargetFormat::Webm => "webm",
            TargetFormat::Mkv => "mkv",
            TargetFormat::Mov => "mov",
            TargetFormat::Avi => "avi",
            TargetFormat::Gif => "gif",
            TargetFormat::Mp3 => "mp3",
            TargetFormat::Wav => "wav",
            TargetFormat::Ogg => "ogg",
            TargetFormat::Flac => "flac",
            TargetFormat::M4a => "m4a",
        }
    }

    pub fn is_audio_only(&self) -> bool {
        matches!(
            self,
            TargetFormat::Mp3 | TargetFormat::Wav | TargetFormat::Ogg | TargetFormat::Flac | TargetFormat::M4a
        )
    }

    /// Whether the container can carry an audio track at all
    fn carries_audio(&self) -> bool {
        !matches!(self, TargetFormat::Gif)
    }

    fn video_codec_args(&self) -> &'static [&'static str] {
        match self {
            TargetFormat::Mp4 | TargetFormat::Mov => {
                &["-c:v", "libx264", "-preset", "medium", "-crf", "23", "-pix_fmt", "yuv420p"]
            }
            TargetFormat::Mkv => &["-c:v", "libx264", "-preset", "medium", "-crf", "23"],
            TargetFormat::Webm => &["-c:v", "libvpx-vp9", "-crf", "32", "-b:v", "0"],
            TargetFormat::Avi => &["-c:v", "mpeg4", "-q:v", "5"],
            TargetFormat::Gif => &["-loop", "0"],
            _ => &[],
        }
    }

    fn audio_codec_args(&self) -> &'static [&'static str] {
        match self {
            TargetFormat::Mp4 | TargetFormat::Mov | TargetFormat::Mkv | TargetFormat::M4a => {
                &["-c:a", "aac", "-b:a", "192k"]
            }
            TargetFormat::Webm => &["-c:a", "libopus", "-b:a", "128k"],
            TargetFormat::Avi | TargetFormat::Mp3 => &["-c:a", "libmp3lame", "-q:a", "2"],
            TargetFormat::Ogg => &["-c:a", "libvorbis", "-q:a", "5"],
            TargetFormat::Wav => &["-c:a", "pcm_s16le"],
            TargetFormat::Flac => &["-c:a", "flac"],
            TargetFormat::Gif => &[],
        }
    }

    /// Filters the format itself requires, applied after user transformations
    fn video_filters(&self) -> &'static [&'static str] {
        match self {
            TargetFormat::Gif => &["fps=12", "scale=480:-1:flags=lanczos"],
            _ => &[],
        }
    }

    fn muxer_args(&self) -> &'static [&'static str] {
        match self {
            TargetFormat::Mp4 | TargetFormat::Mov | TargetFormat::M4a => &["-movflags", "+faststart"],
            _ => &[],
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TargetFormat {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_start_matches('.').to_ascii_lowercase();
        TargetFormat::ALL
            .iter()
            .copied()
            .find(|f| f.extension() == wanted)
            .ok_or_else(|| ConversionError::UnsupportedFormat(s.to_string()))
    }
}

/// Command builder for generating encoder command lines
pub struct CommandBuilder;

impl CommandBuilder {
    /// Create a new command builder
    pub fn new() -> Self {
        CommandBuilder
    }

    /// Build the full encode argument list.
    ///
    /// The encoder writes `key=value` progress lines to stdout (`-progress pipe:1`)
    /// and its log to stderr. The output path is always the last argument.
    pub fn build_encode_command(
        &self,
        input: &Path,
        output: &Path,
        format: TargetFormat,
        flags: ConversionFlags,
    ) -> Result<Vec<String>, ConversionError> {
        if format.is_audio_only() && flags.mute {
            return Err(ConversionError::InvalidFlags(format!(
                "cannot strip audio from audio-only format {}",
                format
            )));
        }

        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y", "-i"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(input.to_string_lossy().to_string());

        if format.is_audio_only() {
            args.push("-vn".to_string());
        } else {
            // Reverse must run before the format's own resampling filters
            let mut filters: Vec<&str> = Vec::new();
            if flags.reverse {
                filters.push("reverse");
            }
            filters.extend_from_slice(format.video_filters());
            if !filters.is_empty() {
                args.push("-vf".to_string());
                args.push(filters.join(","));
            }
            args.extend(format.video_codec_args().iter().map(|s| s.to_string()));
        }

        let keep_audio = format.carries_audio() && !flags.mute;
        if keep_audio {
            if flags.reverse {
                args.push("-af".to_string());
                args.push("areverse".to_string());
            }
            args.extend(format.audio_codec_args().iter().map(|s| s.to_string()));
        } else {
            args.push("-an".to_string());
        }

        args.extend(format.muxer_args().iter().map(|s| s.to_string()));

        args.push("-progress".to_string());
        args.push("pipe:1".to_string());
        args.push("-nostats".to_string());

        args.push(output.to_string_lossy().to_string());

        Ok(args)
    }
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}
