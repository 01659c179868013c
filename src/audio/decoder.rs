// Audio decoder using Symphonia
// Decodes a handle's source to interleaved f32 PCM

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{Result, SoundError};

pub struct AudioDecoder {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
    sample_buf: Option<SampleBuffer<f32>>,
}

impl AudioDecoder {
    /// Open an audio file and prepare for decoding.
    ///
    /// Every failure here is a `Load` error: the file exists (the resolver
    /// checked) but can't be parsed into a playable track.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| SoundError::Load(format!("Failed to open {:?}: {}", path, e)))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| SoundError::Load(format!("Failed to probe {:?}: {}", path, e)))?;

        let format = probed.format;

        // First decodable audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| SoundError::Load(format!("No audio track in {:?}", path)))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);

        let duration_ms = track
            .codec_params
            .n_frames
            .map(|frames| frames * 1000 / sample_rate.max(1) as u64)
            .unwrap_or(0);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| SoundError::Load(format!("Unsupported codec in {:?}: {}", path, e)))?;

        tracing::debug!(
            "Opened {:?}: {} Hz, {} ch, {} ms",
            path,
            sample_rate,
            channels,
            duration_ms
        );

        Ok(Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            duration_ms,
            sample_buf: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Duration in milliseconds, 0 when the container doesn't say
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Decode the next packet of our track to interleaved f32 samples.
    /// Returns `None` at end of stream.
    pub fn decode_next(&mut self) -> std::result::Result<Option<Vec<f32>>, String> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(format!("Failed to read packet: {}", e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = SignalSpec::new(decoded.spec().rate, decoded.spec().channels);
                    let capacity = decoded.capacity();
                    let needs_realloc = self
                        .sample_buf
                        .as_ref()
                        .map(|buf| buf.capacity() < capacity)
                        .unwrap_or(true);
                    if needs_realloc {
                        self.sample_buf = Some(SampleBuffer::<f32>::new(capacity as u64, spec));
                    }
                    if let Some(buf) = self.sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        return Ok(Some(buf.samples().to_vec()));
                    }
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt packet, skip it
                    tracing::debug!("Decode error in {:?} (skipping): {}", self.path, e);
                    continue;
                }
                Err(e) => return Err(format!("Decode failed: {}", e)),
            }
        }
    }

    /// Seek to a position in milliseconds
    pub fn seek(&mut self, position_ms: u64) -> std::result::Result<(), String> {
        let time = Time::new(position_ms / 1000, (position_ms % 1000) as f64 / 1000.0);

        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| format!("Seek failed: {}", e))?;

        self.decoder.reset();
        Ok(())
    }

    /// Go back to the start, reopening the file if the format can't seek.
    pub fn rewind(&mut self) -> std::result::Result<(), String> {
        if self.seek(0).is_ok() {
            return Ok(());
        }
        tracing::debug!("Seek to start failed for {:?}, reopening", self.path);
        let reopened = Self::open(&self.path).map_err(|e| e.to_string())?;
        *self = reopened;
        Ok(())
    }
}
