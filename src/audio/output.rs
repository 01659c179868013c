// Audio output using cpal
// One output stream per playing handle, fed through a ring buffer

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use ringbuf::{HeapRb, traits::{Consumer, Observer, Producer, Split}};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, SoundError};

type RingProducer = ringbuf::HeapProd<f32>;
type RingConsumer = ringbuf::HeapCons<f32>;

/// Called from the cpal thread when the stream fails
pub type OutputErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Where a player's worker pushes device-ready samples.
///
/// Lives on the worker thread only, so implementations need not be `Send`.
pub trait OutputSink {
    /// Queue samples, returning how many were accepted
    fn write(&mut self, samples: &[f32]) -> usize;
    /// Output frames queued but not yet handed to the device
    fn buffered_frames(&self) -> usize;
    /// Drop everything queued (seek, stop)
    fn clear(&self);
    /// True while a `clear` has not yet reached the device
    fn clear_pending(&self) -> bool;
    fn pause(&mut self);
    fn resume(&mut self);
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
}

/// Opens sinks for a player. Moved onto the worker thread.
pub trait OpenOutput: Send + 'static {
    type Sink: OutputSink;

    /// `hold` is shared with the control side: while set the device plays
    /// silence and leaves the queue untouched. `on_error` fires if the
    /// device stream dies.
    fn open(&self, hold: Arc<AtomicBool>, on_error: OutputErrorCallback) -> Result<Self::Sink>;
}

/// Opens cpal outputs on a named device, or the default one
pub struct CpalOutput {
    pub device: Option<String>,
    pub buffer_ms: u32,
}

impl OpenOutput for CpalOutput {
    type Sink = AudioOutput;

    fn open(&self, hold: Arc<AtomicBool>, on_error: OutputErrorCallback) -> Result<AudioOutput> {
        AudioOutput::open(self.device.as_deref(), self.buffer_ms, hold, on_error)
    }
}

// Not `Send`: cpal streams stay on the thread that built them
pub struct AudioOutput {
    stream: Stream,
    producer: RingProducer,
    sample_rate: u32,
    channels: u16,
    clear_flag: Arc<AtomicBool>,
}

impl AudioOutput {
    /// Open an output on the named device, or the default one.
    ///
    /// `buffer_ms` sizes the ring buffer between the decode worker and the
    /// device callback.
    pub fn open(
        device_name: Option<&str>,
        buffer_ms: u32,
        hold: Arc<AtomicBool>,
        on_error: OutputErrorCallback,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = Self::pick_device(&host, device_name)?;

        let config = device
            .default_output_config()
            .map_err(|e| SoundError::Device(format!("Failed to get default output config: {}", e)))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels();

        let capacity = (sample_rate as usize * channels as usize * buffer_ms as usize / 1000).max(1024);
        let rb = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = rb.split();

        let clear_flag = Arc::new(AtomicBool::new(false));
        let stream_config: StreamConfig = config.clone().into();

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &stream_config, consumer, clear_flag.clone(), hold, on_error)?,
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &stream_config, consumer, clear_flag.clone(), hold, on_error)?,
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &stream_config, consumer, clear_flag.clone(), hold, on_error)?,
            format => {
                return Err(SoundError::Device(format!("Unsupported sample format: {:?}", format)))
            }
        };

        stream
            .play()
            .map_err(|e| SoundError::Device(format!("Failed to start stream: {}", e)))?;

        tracing::debug!(
            "Opened output {:?}: {} Hz, {} ch, {} sample buffer",
            device.name().unwrap_or_default(),
            sample_rate,
            channels,
            capacity
        );

        Ok(Self {
            stream,
            producer,
            sample_rate,
            channels,
            clear_flag,
        })
    }

    fn pick_device(host: &cpal::Host, device_name: Option<&str>) -> Result<cpal::Device> {
        if let Some(wanted) = device_name {
            let found = host
                .output_devices()
                .map_err(|e| SoundError::Device(format!("Failed to list output devices: {}", e)))?
                .find(|device| device.name().map(|name| name == wanted).unwrap_or(false));
            match found {
                Some(device) => return Ok(device),
                None => tracing::warn!("Output device {:?} not found, using default", wanted),
            }
        }

        host.default_output_device()
            .ok_or_else(|| SoundError::Device("No output device available".to_string()))
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut consumer: RingConsumer,
        clear_flag: Arc<AtomicBool>,
        hold: Arc<AtomicBool>,
        on_error: OutputErrorCallback,
    ) -> Result<Stream> {
        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    // Seek or stop: drop whatever is queued
                    if clear_flag.swap(false, Ordering::SeqCst) {
                        while consumer.try_pop().is_some() {}
                    }

                    // Paused: keep the queue for resume
                    if hold.load(Ordering::SeqCst) {
                        data.fill(T::EQUILIBRIUM);
                        return;
                    }

                    for sample in data.iter_mut() {
                        let value = consumer.try_pop().unwrap_or(0.0);
                        *sample = T::from_sample(value);
                    }
                },
                move |err| {
                    tracing::error!("Audio output error: {}", err);
                    on_error(err.to_string());
                },
                None,
            )
            .map_err(|e| SoundError::Device(format!("Failed to build output stream: {}", e)))?;

        Ok(stream)
    }

}

impl OutputSink for AudioOutput {
    fn write(&mut self, samples: &[f32]) -> usize {
        self.producer.push_slice(samples)
    }

    fn buffered_frames(&self) -> usize {
        if self.clear_flag.load(Ordering::SeqCst) {
            return 0;
        }
        self.producer.occupied_len() / self.channels.max(1) as usize
    }

    fn clear(&self) {
        self.clear_flag.store(true, Ordering::SeqCst);
    }

    // Samples written before the callback drains would be dropped with the old ones
    fn clear_pending(&self) -> bool {
        self.clear_flag.load(Ordering::SeqCst)
    }

    fn pause(&mut self) {
        if let Err(e) = self.stream.pause() {
            tracing::debug!("Output stream can't pause, holding instead: {}", e);
        }
    }

    fn resume(&mut self) {
        if let Err(e) = self.stream.play() {
            tracing::warn!("Failed to resume output stream: {}", e);
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}
