//! Container decode using Symphonia.
//!
//! Supports WAV, MP3, OGG (Vorbis, Opus), WEBM/Matroska (Vorbis, Opus) and
//! FLAC. Only the first channel of the default track is kept.

use std::io::Cursor;
use std::path::Path;
use std::sync::OnceLock;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecRegistry, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use super::AudioSignal;
use crate::error::{ChirpError, Result};

/// Symphonia's built-in codecs plus libopus for Opus tracks, which browsers
/// emit for WEBM recordings.
fn codec_registry() -> &'static CodecRegistry {
    static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        symphonia::default::register_enabled_codecs(&mut registry);
        #[cfg(feature = "opus")]
        registry.register_all::<symphonia_adapter_libopus::OpusDecoder>();
        registry
    })
}

/// Decode an in-memory audio container.
///
/// `extension_hint` (e.g. `"wav"`, `"webm"`) speeds up probing but is not
/// required; the container is sniffed from its header either way.
///
/// # Errors
/// `ChirpError::Decode` when the container cannot be probed, has no audio
/// track, hits a fatal packet error, or yields no samples.
pub fn decode_bytes(bytes: Vec<u8>, extension_hint: Option<&str>) -> Result<AudioSignal> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| ChirpError::Decode(format!("failed to probe container: {e}")))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| ChirpError::Decode("no audio track found".into()))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .filter(|&sr| sr > 0)
        .ok_or_else(|| ChirpError::Decode("unknown sample rate".into()))?;

    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1)
        .max(1);

    let track_id = track.id;

    let mut decoder = codec_registry()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| ChirpError::Decode(format!("failed to create decoder: {e}")))?;

    let mut first_channel: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(ChirpError::Decode(format!("packet read error: {e}")));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("decode error (skipping packet): {e}");
                continue;
            }
            Err(e) => {
                return Err(ChirpError::Decode(format!("fatal decode error: {e}")));
            }
        };

        let needs_alloc = sample_buf
            .as_ref()
            .map_or(true, |buf| buf.capacity() < decoded.capacity());
        if needs_alloc {
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, *decoded.spec()));
        }

        if let Some(ref mut buf) = sample_buf {
            buf.copy_interleaved_ref(decoded);
            first_channel.extend(buf.samples().iter().step_by(channels).copied());
        }
    }

    if first_channel.is_empty() {
        return Err(ChirpError::Decode("container holds no audio samples".into()));
    }

    debug!(
        sample_rate,
        channels,
        samples = first_channel.len(),
        "decoded audio container"
    );

    Ok(AudioSignal::new(first_channel, sample_rate, channels as u16))
}

/// Read and decode an audio file, using its extension as a probe hint.
pub fn decode_file(path: &Path) -> Result<AudioSignal> {
    let bytes = std::fs::read(path)
        .map_err(|e| ChirpError::Decode(format!("failed to open {}: {e}", path.display())))?;
    let ext = path.extension().and_then(|e| e.to_str());
    decode_bytes(bytes, ext)
}

/// Encode mono samples as a 16-bit PCM WAV container in memory.
///
/// Used to route microphone captures through the same decode path as files.
pub(crate) fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| ChirpError::AudioStream(format!("wav encode: {e}")))?;
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32 + 0.5).floor() as i16;
            writer
                .write_sample(v)
                .map_err(|e| ChirpError::AudioStream(format!("wav encode: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| ChirpError::AudioStream(format!("wav encode: {e}")))?;
    }
    Ok(cursor.into_inner())
}
