// Default native player: Symphonia decoding, cpal output
//
// Each player owns one worker thread. The worker holds the decoder and,
// once playback first starts, the output sink (cpal streams can't leave
// the thread that built them). The control side only touches `Shared`.
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::decoder::AudioDecoder;
use super::output::{CpalOutput, OpenOutput, OutputSink};
use super::player::{NativePlayer, PlayerEvent, PlayerFactory, PlayerListener};
use super::resampler::{StreamResampler, DEFAULT_CHUNK_FRAMES};
use crate::config::SoundConfig;
use crate::error::{Result, SoundError};
use crate::resolver::ResolvedSource;
use crate::route::StreamRoute;

const IDLE_WAIT: Duration = Duration::from_millis(20);
const BUFFER_FULL_WAIT: Duration = Duration::from_millis(5);

struct Control {
    playing: bool,
    looping: bool,
    shutdown: bool,
    /// Reached end of media; the next start rewinds
    finished: bool,
    seek: Option<u64>,
    left: f32,
    right: f32,
    position_ms: u64,
    /// The output died; the worker drops it and reopens on the next start
    output_lost: bool,
    /// Output failure seen while paused, reported by the next start
    deferred_error: Option<String>,
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
    /// Set while paused; the device callback plays silence and keeps the queue
    hold: Arc<AtomicBool>,
}

impl Shared {
    fn update(&self, f: impl FnOnce(&mut Control)) {
        let mut ctl = self.control.lock();
        f(&mut ctl);
        drop(ctl);
        self.wake.notify_all();
    }

    /// Record the worker's position estimate unless a seek is about to replace it
    fn publish_position(&self, position_ms: u64) {
        let mut ctl = self.control.lock();
        if ctl.seek.is_none() {
            ctl.position_ms = position_ms;
        }
    }

    /// Stop and report a playback failure once
    fn fail(&self, listener: &PlayerListener, message: String) {
        let was_playing = {
            let mut ctl = self.control.lock();
            let was_playing = ctl.playing && !ctl.shutdown;
            ctl.playing = false;
            was_playing
        };
        if was_playing {
            tracing::warn!("Playback failed: {}", message);
            listener(PlayerEvent::Error(message));
        }
    }

    /// Device stream error, from the output's thread.
    ///
    /// Playback resumes from the last heard position once the output is
    /// reopened. A failure while paused is held for the next start.
    fn output_failed(&self, listener: &PlayerListener, message: String) {
        let playing = {
            let mut ctl = self.control.lock();
            if ctl.shutdown {
                return;
            }
            ctl.output_lost = true;
            if ctl.seek.is_none() {
                ctl.seek = Some(ctl.position_ms);
            }
            ctl.playing
        };
        self.wake.notify_all();

        if playing {
            self.fail(listener, message);
        } else {
            tracing::warn!("Output failed while paused: {}", message);
            self.control.lock().deferred_error = Some(message);
        }
    }
}

pub struct CpalPlayerFactory {
    config: SoundConfig,
}

impl CpalPlayerFactory {
    pub fn new(config: &SoundConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl PlayerFactory for CpalPlayerFactory {
    type Player = CpalPlayer;

    fn open(
        &self,
        source: &ResolvedSource,
        route: StreamRoute,
        listener: PlayerListener,
    ) -> Result<CpalPlayer> {
        let decoder = AudioDecoder::open(source.path())?;
        let output = CpalOutput {
            device: self.config.device_for(route).map(str::to_string),
            buffer_ms: self.config.ring_buffer_ms,
        };
        CpalPlayer::spawn(decoder, output, listener)
    }
}

pub struct CpalPlayer {
    shared: Arc<Shared>,
    duration_ms: u64,
    channels: u16,
    worker: Option<JoinHandle<()>>,
}

impl CpalPlayer {
    fn spawn<O: OpenOutput>(decoder: AudioDecoder, output: O, listener: PlayerListener) -> Result<Self> {
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                playing: false,
                looping: false,
                shutdown: false,
                finished: false,
                seek: None,
                left: 1.0,
                right: 1.0,
                position_ms: 0,
                output_lost: false,
                deferred_error: None,
            }),
            wake: Condvar::new(),
            hold: Arc::new(AtomicBool::new(false)),
        });

        let duration_ms = decoder.duration_ms();
        let channels = decoder.channels();

        let worker = Worker {
            shared: shared.clone(),
            decoder,
            output,
            listener,
        };
        let handle = std::thread::Builder::new()
            .name("soundbridge-player".to_string())
            .spawn(move || worker.run())
            .map_err(|e| SoundError::Load(format!("Failed to spawn player thread: {}", e)))?;

        Ok(Self {
            shared,
            duration_ms,
            channels,
            worker: Some(handle),
        })
    }
}

impl NativePlayer for CpalPlayer {
    fn start(&mut self) {
        self.shared.update(|ctl| {
            if ctl.finished {
                ctl.finished = false;
                if ctl.seek.is_none() {
                    ctl.seek = Some(0);
                    ctl.position_ms = 0;
                }
            }
            ctl.playing = true;
        });
        self.shared.hold.store(false, Ordering::SeqCst);
    }

    fn pause(&mut self) {
        // Hold first so nothing more is heard past the reported position
        self.shared.hold.store(true, Ordering::SeqCst);
        self.shared.update(|ctl| ctl.playing = false);
    }

    fn seek_to(&mut self, position_ms: u64) {
        let target = if self.duration_ms > 0 {
            position_ms.min(self.duration_ms)
        } else {
            position_ms
        };
        self.shared.update(|ctl| {
            ctl.seek = Some(target);
            ctl.position_ms = target;
            ctl.finished = false;
        });
    }

    fn set_volume(&mut self, left: f32, right: f32) {
        self.shared.update(|ctl| {
            ctl.left = left;
            ctl.right = right;
        });
    }

    fn set_looping(&mut self, looping: bool) {
        self.shared.update(|ctl| ctl.looping = looping);
    }

    fn is_looping(&self) -> bool {
        self.shared.control.lock().looping
    }

    fn is_playing(&self) -> bool {
        self.shared.control.lock().playing
    }

    fn position_ms(&self) -> u64 {
        self.shared.control.lock().position_ms
    }

    fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn release(&mut self) {
        self.shared.update(|ctl| {
            ctl.shutdown = true;
            ctl.playing = false;
        });
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("Player thread panicked");
            }
        }
    }
}

impl Drop for CpalPlayer {
    fn drop(&mut self) {
        self.release();
    }
}

struct Worker<O: OpenOutput> {
    shared: Arc<Shared>,
    decoder: AudioDecoder,
    output: O,
    listener: PlayerListener,
}

/// Playback-thread state that only the worker touches
struct ActiveOutput<S> {
    sink: S,
    resampler: StreamResampler,
}

struct Tick {
    seek: Option<u64>,
    playing: bool,
    looping: bool,
    left: f32,
    right: f32,
    output_lost: bool,
    deferred_error: Option<String>,
}

impl<O: OpenOutput> Worker<O> {
    fn run(mut self) {
        let src_rate = self.decoder.sample_rate().max(1) as u64;
        let src_channels = self.decoder.channels().max(1) as usize;

        let mut stream: Option<ActiveOutput<O::Sink>> = None;
        // Output samples decoded but not yet accepted by the sink
        let mut pending: Vec<f32> = Vec::new();
        // Position = anchor + decoded frames - what's still queued
        let mut anchor_ms: u64 = 0;
        let mut decoded_frames: u64 = 0;
        let mut draining = false;
        let mut paused = false;

        loop {
            let tick = {
                let mut ctl = self.shared.control.lock();
                if ctl.shutdown {
                    break;
                }
                if !ctl.playing && ctl.seek.is_none() && !ctl.output_lost {
                    self.shared.wake.wait_for(&mut ctl, IDLE_WAIT);
                }
                if ctl.shutdown {
                    break;
                }
                let seek = ctl.seek.take();
                // Reported once any pending seek has been applied
                let deferred_error = if ctl.playing && seek.is_none() {
                    ctl.deferred_error.take()
                } else {
                    None
                };
                Tick {
                    seek,
                    playing: ctl.playing,
                    looping: ctl.looping,
                    left: ctl.left,
                    right: ctl.right,
                    output_lost: std::mem::take(&mut ctl.output_lost),
                    deferred_error,
                }
            };

            if tick.output_lost && stream.take().is_some() {
                tracing::debug!("Dropped failed output");
                pending.clear();
                paused = false;
            }

            if let Some(target) = tick.seek {
                let moved = if target == 0 {
                    match self.decoder.rewind() {
                        Ok(()) => true,
                        Err(e) => {
                            self.shared.fail(&self.listener, e);
                            false
                        }
                    }
                } else {
                    match self.decoder.seek(target) {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::warn!("{}", e);
                            false
                        }
                    }
                };

                if moved {
                    if let Some(active) = stream.as_mut() {
                        active.resampler.reset();
                        active.sink.clear();
                    }
                    pending.clear();
                    anchor_ms = target;
                    decoded_frames = 0;
                    draining = false;
                } else {
                    // Still where we were
                    let position = estimate_position(anchor_ms, decoded_frames, src_rate, stream.as_ref(), pending.len());
                    self.shared.publish_position(position);
                }
                continue;
            }

            if let Some(message) = tick.deferred_error {
                self.shared.fail(&self.listener, message);
                continue;
            }

            if !tick.playing {
                if !paused {
                    paused = true;
                    if let Some(active) = stream.as_mut() {
                        active.sink.pause();
                    }
                    let position = estimate_position(anchor_ms, decoded_frames, src_rate, stream.as_ref(), pending.len());
                    self.shared.publish_position(position);
                }
                continue;
            }

            if stream.is_none() {
                match self.open_stream(src_channels as u16) {
                    Ok(opened) => stream = Some(opened),
                    Err(e) => {
                        self.shared.fail(&self.listener, e.to_string());
                        continue;
                    }
                }
            }
            let Some(active) = stream.as_mut() else {
                continue;
            };

            if paused {
                paused = false;
                active.sink.resume();
            }

            if active.sink.clear_pending() {
                std::thread::sleep(Duration::from_millis(2));
                continue;
            }

            let out_channels = active.sink.channels() as usize;
            if !pending.is_empty() {
                let written = active.sink.write(&pending);
                pending.drain(..written);
                if written == 0 {
                    std::thread::sleep(BUFFER_FULL_WAIT);
                }
            } else if draining {
                if active.sink.buffered_frames() == 0 {
                    draining = false;
                    let completed = {
                        let mut ctl = self.shared.control.lock();
                        let completed = ctl.playing && ctl.seek.is_none();
                        if completed {
                            ctl.playing = false;
                            ctl.finished = true;
                        }
                        completed
                    };
                    if completed {
                        tracing::debug!("Playback reached end of media");
                        (self.listener)(PlayerEvent::Completed);
                    }
                } else {
                    std::thread::sleep(BUFFER_FULL_WAIT);
                }
            } else {
                match self.decoder.decode_next() {
                    Ok(Some(samples)) => {
                        decoded_frames += (samples.len() / src_channels) as u64;
                        match active.resampler.process(&samples) {
                            Ok(resampled) => {
                                pending = remix(&resampled, src_channels, out_channels, tick.left, tick.right);
                            }
                            Err(e) => self.shared.fail(&self.listener, e),
                        }
                    }
                    Ok(None) => {
                        if let Ok(tail) = active.resampler.flush() {
                            pending = remix(&tail, src_channels, out_channels, tick.left, tick.right);
                        }
                        if tick.looping {
                            match self.decoder.rewind() {
                                Ok(()) => {
                                    active.resampler.reset();
                                    anchor_ms = 0;
                                    decoded_frames = 0;
                                }
                                Err(e) => self.shared.fail(&self.listener, e),
                            }
                        } else {
                            draining = true;
                        }
                    }
                    Err(e) => self.shared.fail(&self.listener, e),
                }
            }

            let position = estimate_position(anchor_ms, decoded_frames, src_rate, stream.as_ref(), pending.len());
            self.shared.publish_position(position);
        }

        tracing::debug!("Player thread exiting");
    }

    fn open_stream(&self, src_channels: u16) -> Result<ActiveOutput<O::Sink>> {
        let shared = self.shared.clone();
        let listener = self.listener.clone();
        let on_error = Arc::new(move |message: String| shared.output_failed(&listener, message));

        let sink = self.output.open(self.shared.hold.clone(), on_error)?;
        let resampler = StreamResampler::new(
            self.decoder.sample_rate(),
            sink.sample_rate(),
            src_channels,
            DEFAULT_CHUNK_FRAMES,
        )
        .map_err(SoundError::Device)?;

        Ok(ActiveOutput { sink, resampler })
    }
}

fn estimate_position<S: OutputSink>(
    anchor_ms: u64,
    decoded_frames: u64,
    src_rate: u64,
    stream: Option<&ActiveOutput<S>>,
    pending_samples: usize,
) -> u64 {
    let Some(active) = stream else {
        return position_ms(anchor_ms, decoded_frames, src_rate, 0, 1);
    };
    let out_channels = active.sink.channels().max(1) as u64;
    let queued_frames = active.sink.buffered_frames() as u64 + pending_samples as u64 / out_channels;
    position_ms(
        anchor_ms,
        decoded_frames,
        src_rate,
        queued_frames,
        active.sink.sample_rate().max(1) as u64,
    )
}

/// Milliseconds actually heard: decoded so far minus what's still queued
fn position_ms(anchor_ms: u64, decoded_frames: u64, src_rate: u64, queued_frames: u64, out_rate: u64) -> u64 {
    let decoded_ms = decoded_frames * 1000 / src_rate;
    let queued_ms = queued_frames * 1000 / out_rate;
    (anchor_ms + decoded_ms).saturating_sub(queued_ms)
}

/// Map `in_channels` frames onto the device layout, applying left/right gain.
///
/// Mono is duplicated to both sides; sources with more than two channels
/// contribute their first pair. Output channels past the first two carry
/// the mean of left and right.
pub fn remix(input: &[f32], in_channels: usize, out_channels: usize, left: f32, right: f32) -> Vec<f32> {
    let in_channels = in_channels.max(1);
    let out_channels = out_channels.max(1);
    let mut out = Vec::with_capacity(input.len() / in_channels * out_channels);

    for frame in input.chunks_exact(in_channels) {
        let (l, r) = if in_channels == 1 {
            (frame[0] * left, frame[0] * right)
        } else {
            (frame[0] * left, frame[1] * right)
        };

        if out_channels == 1 {
            out.push((l + r) * 0.5);
            continue;
        }
        out.push(l);
        out.push(r);
        for _ in 2..out_channels {
            out.push((l + r) * 0.5);
        }
    }

    out
}
