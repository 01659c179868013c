// Sample rate conversion using rubato
// Streams decoder output (file rate) into device-rate chunks

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Input frames handed to rubato per call
pub const DEFAULT_CHUNK_FRAMES: usize = 1024;

pub struct StreamResampler {
    // None when file and device rates already match
    inner: Option<FastFixedIn<f32>>,
    channels: usize,
    pending: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub fn new(
        input_rate: u32,
        output_rate: u32,
        channels: u16,
        chunk_frames: usize,
    ) -> Result<Self, String> {
        let channels = channels.max(1) as usize;

        let inner = if input_rate == output_rate {
            None
        } else {
            tracing::debug!("Resampling {} Hz -> {} Hz ({} ch)", input_rate, output_rate, channels);
            let resampler = FastFixedIn::<f32>::new(
                output_rate as f64 / input_rate as f64,
                1.0,
                PolynomialDegree::Septic,
                chunk_frames,
                channels,
            )
            .map_err(|e| format!("Failed to create resampler: {}", e))?;
            Some(resampler)
        };

        Ok(Self {
            inner,
            channels,
            pending: vec![Vec::new(); channels],
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feed interleaved input; returns whatever full chunks produced.
    pub fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>, String> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(interleaved.to_vec());
        };

        for (ch, plane) in deinterleave(interleaved, self.channels).into_iter().enumerate() {
            self.pending[ch].extend(plane);
        }

        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|plane| plane.drain(..needed).collect())
                .collect();
            let planar = resampler
                .process(&chunk, None)
                .map_err(|e| format!("Resampling failed: {}", e))?;
            out.extend(interleave(&planar));
        }

        Ok(out)
    }

    /// Push out the partial chunk left at end of stream
    pub fn flush(&mut self) -> Result<Vec<f32>, String> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };
        if self.pending[0].is_empty() {
            return Ok(Vec::new());
        }

        let planar = resampler
            .process_partial(Some(self.pending.as_slice()), None)
            .map_err(|e| format!("Resampling failed: {}", e))?;
        self.pending.iter_mut().for_each(Vec::clear);
        Ok(interleave(&planar))
    }

    /// Forget buffered input and filter state (after a seek)
    pub fn reset(&mut self) {
        if let Some(resampler) = self.inner.as_mut() {
            resampler.reset();
        }
        self.pending.iter_mut().for_each(Vec::clear);
    }
}

/// [L, R, L, R, ...] -> [[L, L, ...], [R, R, ...]]
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = planar.first() else {
        return Vec::new();
    };
    let frames = first.len();
    let mut out = Vec::with_capacity(frames * planar.len());
    for frame in 0..frames {
        for plane in planar {
            out.push(plane[frame]);
        }
    }
    out
}
