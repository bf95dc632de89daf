//! Audio preparation for an export.
//!
//! Each clip's audio is extracted to a fixed-format intermediate
//! ([`AudioSource`]), the intermediates are joined with overlaps matching the
//! video transitions ([`AudioCrossfader`]), and background music can then be
//! layered on top ([`AudioMixer`]). All intermediates are stereo FLAC at a
//! common sample rate so the filter graphs never resample mid-chain.

use std::path::{Path, PathBuf};

use highlighter_common::error::{HighlighterError, HighlighterResult};

use crate::transcoder::Transcoder;

/// Sample rate of every intermediate file.
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;
/// Channel count of every intermediate file.
pub const AUDIO_CHANNELS: u32 = 2;

fn format_args() -> Vec<String> {
    vec![
        "-ar".to_string(),
        AUDIO_SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        AUDIO_CHANNELS.to_string(),
        "-c:a".to_string(),
        "flac".to_string(),
    ]
}

/// One clip's audio, extracted or synthesized to exactly the clip length.
#[derive(Debug, Clone)]
pub struct AudioSource {
    source_path: PathBuf,
    output_path: PathBuf,
    start_trim: f64,
    duration_secs: f64,
    has_audio: bool,
}

impl AudioSource {
    pub fn new(
        source_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        start_trim: f64,
        duration_secs: f64,
        has_audio: bool,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            output_path: output_path.into(),
            start_trim: start_trim.max(0.0),
            duration_secs: duration_secs.max(0.0),
            has_audio,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    fn extract_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-v".to_string(), "error".to_string()];
        if self.has_audio {
            args.extend([
                "-ss".to_string(),
                format!("{:.6}", self.start_trim),
                "-i".to_string(),
                self.source_path.to_string_lossy().into_owned(),
                "-vn".to_string(),
                "-af".to_string(),
                "apad".to_string(),
            ]);
        } else {
            args.extend([
                "-f".to_string(),
                "lavfi".to_string(),
                "-i".to_string(),
                format!(
                    "anullsrc=channel_layout=stereo:sample_rate={AUDIO_SAMPLE_RATE}"
                ),
            ]);
        }
        args.extend(["-t".to_string(), format!("{:.6}", self.duration_secs)]);
        args.extend(format_args());
        args.push(self.output_path.to_string_lossy().into_owned());
        args
    }

    /// Write the intermediate. Short or silent sources are padded with
    /// silence so the result always spans the full clip.
    pub async fn extract(&self, transcoder: &Transcoder) -> HighlighterResult<()> {
        transcoder
            .run_ffmpeg(&self.extract_args())
            .await
            .map_err(|stderr| {
                tracing::error!(
                    path = %self.source_path.display(),
                    error = %stderr,
                    "Audio extraction failed"
                );
                HighlighterError::audio_read(&self.source_path)
            })?;
        tracing::debug!(
            path = %self.source_path.display(),
            output = %self.output_path.display(),
            has_audio = self.has_audio,
            "Extracted clip audio"
        );
        Ok(())
    }
}

/// Joins per-clip intermediates into one track.
#[derive(Debug, Clone)]
pub struct AudioCrossfader {
    inputs: Vec<PathBuf>,
    overlaps_secs: Vec<f64>,
    output_path: PathBuf,
}

impl AudioCrossfader {
    /// `overlaps_secs[i]` is the overlap between `inputs[i]` and
    /// `inputs[i + 1]`; a zero overlap concatenates.
    pub fn new(
        inputs: Vec<PathBuf>,
        overlaps_secs: Vec<f64>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inputs,
            overlaps_secs,
            output_path: output_path.into(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn filter_graph(&self) -> String {
        if self.inputs.len() < 2 {
            return "[0:a]anull[aout]".to_string();
        }

        let mut steps = Vec::with_capacity(self.inputs.len() - 1);
        let mut previous = "[0:a]".to_string();
        for index in 1..self.inputs.len() {
            let label = if index == self.inputs.len() - 1 {
                "[aout]".to_string()
            } else {
                format!("[x{index}]")
            };
            let overlap = self
                .overlaps_secs
                .get(index - 1)
                .copied()
                .unwrap_or(0.0);
            let step = if overlap > 0.0 {
                format!("{previous}[{index}:a]acrossfade=d={overlap:.6}:c1=tri:c2=tri{label}")
            } else {
                format!("{previous}[{index}:a]concat=n=2:v=0:a=1{label}")
            };
            steps.push(step);
            previous = label;
        }
        steps.join(";")
    }

    fn crossfade_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-v".to_string(), "error".to_string()];
        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().into_owned());
        }
        args.extend([
            "-filter_complex".to_string(),
            self.filter_graph(),
            "-map".to_string(),
            "[aout]".to_string(),
        ]);
        args.extend(format_args());
        args.push(self.output_path.to_string_lossy().into_owned());
        args
    }

    pub async fn crossfade(&self, transcoder: &Transcoder) -> HighlighterResult<()> {
        if self.inputs.is_empty() {
            return Err(HighlighterError::audio_mix("No audio inputs to join"));
        }
        transcoder
            .run_ffmpeg(&self.crossfade_args())
            .await
            .map_err(HighlighterError::audio_mix)?;
        tracing::debug!(
            inputs = self.inputs.len(),
            output = %self.output_path.display(),
            "Joined clip audio"
        );
        Ok(())
    }
}

/// One layer of an [`AudioMixer`].
#[derive(Debug, Clone)]
pub struct MixInput {
    pub path: PathBuf,
    /// Linear gain.
    pub volume: f64,
    /// Repeat the input for as long as the first layer lasts.
    pub looped: bool,
}

impl MixInput {
    pub fn new(path: impl Into<PathBuf>, volume: f64) -> Self {
        Self {
            path: path.into(),
            volume,
            looped: false,
        }
    }

    pub fn looped(mut self) -> Self {
        self.looped = true;
        self
    }
}

/// Layers inputs at fixed volumes. The first input sets the output length.
#[derive(Debug, Clone)]
pub struct AudioMixer {
    inputs: Vec<MixInput>,
    output_path: PathBuf,
}

impl AudioMixer {
    pub fn new(inputs: Vec<MixInput>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            inputs,
            output_path: output_path.into(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn filter_graph(&self) -> String {
        let mut graph: Vec<String> = self
            .inputs
            .iter()
            .enumerate()
            .map(|(index, input)| format!("[{index}:a]volume={:.3}[m{index}]", input.volume))
            .collect();
        let labels: String = (0..self.inputs.len()).map(|i| format!("[m{i}]")).collect();
        graph.push(format!(
            "{labels}amix=inputs={}:duration=first:dropout_transition=0:normalize=0[aout]",
            self.inputs.len()
        ));
        graph.join(";")
    }

    fn mix_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-v".to_string(), "error".to_string()];
        for input in &self.inputs {
            if input.looped {
                args.extend(["-stream_loop".to_string(), "-1".to_string()]);
            }
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().into_owned());
        }
        args.extend([
            "-filter_complex".to_string(),
            self.filter_graph(),
            "-map".to_string(),
            "[aout]".to_string(),
        ]);
        args.extend(format_args());
        args.push(self.output_path.to_string_lossy().into_owned());
        args
    }

    pub async fn mix(&self, transcoder: &Transcoder) -> HighlighterResult<()> {
        if self.inputs.is_empty() {
            return Err(HighlighterError::audio_mix("No audio inputs to mix"));
        }
        transcoder
            .run_ffmpeg(&self.mix_args())
            .await
            .map_err(HighlighterError::audio_mix)?;
        tracing::debug!(
            layers = self.inputs.len(),
            output = %self.output_path.display(),
            "Mixed audio layers"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_pads_real_audio() {
        let source = AudioSource::new("clip.mp4", "a0.flac", 2.0, 5.0, true);
        let joined = source.extract_args().join(" ");
        assert!(joined.contains("-ss 2.000000 -i clip.mp4 -vn -af apad -t 5.000000"));
        assert!(joined.contains("-ar 48000 -ac 2 -c:a flac a0.flac"));
    }

    #[test]
    fn test_extract_synthesizes_silence() {
        let source = AudioSource::new("clip.mp4", "a0.flac", 2.0, 5.0, false);
        let args = source.extract_args();
        assert!(!args.iter().any(|a| a == "clip.mp4"));
        assert!(args.join(" ").contains("-f lavfi -i anullsrc"));
    }

    #[test]
    fn test_crossfade_graph_mixes_fades_and_cuts() {
        let fader = AudioCrossfader::new(
            vec!["a.flac".into(), "b.flac".into(), "c.flac".into()],
            vec![1.0, 0.0],
            "out.flac",
        );
        assert_eq!(
            fader.filter_graph(),
            "[0:a][1:a]acrossfade=d=1.000000:c1=tri:c2=tri[x1];[x1][2:a]concat=n=2:v=0:a=1[aout]"
        );
    }

    #[test]
    fn test_single_input_passes_through() {
        let fader = AudioCrossfader::new(vec!["a.flac".into()], vec![], "out.flac");
        assert_eq!(fader.filter_graph(), "[0:a]anull[aout]");
    }

    #[test]
    fn test_mix_loops_music_and_sets_volumes() {
        let mixer = AudioMixer::new(
            vec![
                MixInput::new("voice.flac", 1.0),
                MixInput::new("music.mp3", 0.25).looped(),
            ],
            "mixed.flac",
        );
        let args = mixer.mix_args();
        let joined = args.join(" ");
        assert!(joined.contains("-i voice.flac -stream_loop -1 -i music.mp3"));
        assert!(mixer.filter_graph().contains("[1:a]volume=0.250[m1]"));
        assert!(mixer
            .filter_graph()
            .ends_with("[m0][m1]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[aout]"));
    }
}
