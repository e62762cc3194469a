//! Sound playback synchronised with the exposure.
//!
//! Clips are mono 16-bit PCM. Decoded samples live behind an `Arc`, so
//! the copies of a [`SoundAction`] made when a shot is submitted all
//! share one sample buffer.

use super::Device;
use crate::clock::{Clock, Timestamp};
use crate::event::{EventKind, EventSink};
use crate::frame::Frame;
use crate::history::TimestampedRingBuffer;
use crate::shot::Action;
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const HISTORY_LEN: usize = 128;

/// Errors from loading or playing a clip.
#[derive(Debug, Error)]
pub enum SoundError {
    /// The clip file could not be read.
    #[error("reading clip: {0}")]
    Io(#[from] std::io::Error),

    /// The data is not a well-formed WAV image.
    #[error("invalid WAV data: {0}")]
    InvalidWav(&'static str),

    /// A WAV encoding other than mono 16-bit PCM.
    #[error("unsupported WAV encoding (format {format}, {channels} channels, {bits} bits)")]
    Unsupported {
        /// Format tag; only 1 (integer PCM) is accepted.
        format: u16,
        /// Channel count; only mono is accepted.
        channels: u16,
        /// Bits per sample; only 16 is accepted.
        bits: u16,
    },

    /// The sink refused the samples.
    #[error("audio output: {0}")]
    Output(String),
}

/// Destination for decoded samples, such as an audio server connection.
pub trait AudioSink: Send + Sync {
    /// Queues `samples` for playback at `sample_rate` Hz.
    fn write(&self, samples: &[i16], sample_rate: u32) -> Result<(), SoundError>;

    /// Time from a write until the first sample is audible, µs.
    fn latency(&self) -> i64 {
        0
    }
}

/// A decoded mono clip.
#[derive(Debug, Clone)]
pub struct SoundClip {
    sample_rate: u32,
    samples: Arc<[i16]>,
}

impl SoundClip {
    /// Wraps already decoded samples.
    pub fn new(sample_rate: u32, samples: impl Into<Arc<[i16]>>) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            samples: samples.into(),
        }
    }

    /// Reads a PCM WAV file from disk.
    pub fn from_wav_file(path: impl AsRef<Path>) -> Result<Self, SoundError> {
        let data = std::fs::read(path)?;
        Self::from_wav(Bytes::from(data))
    }

    /// Decodes an in-memory RIFF/WAVE image holding mono 16-bit PCM.
    pub fn from_wav(mut data: Bytes) -> Result<Self, SoundError> {
        if data.len() < 12 || &data[..4] != b"RIFF" || &data[8..12] != b"WAVE" {
            return Err(SoundError::InvalidWav("missing RIFF/WAVE header"));
        }
        data.advance(12);

        let mut sample_rate = None;
        while data.remaining() >= 8 {
            let id = data.split_to(4);
            let len = data.get_u32_le() as usize;
            if data.remaining() < len {
                return Err(SoundError::InvalidWav("truncated chunk"));
            }
            let mut body = data.split_to(len);
            // Chunks are padded to even length.
            if len % 2 == 1 && data.has_remaining() {
                data.advance(1);
            }

            match &id[..] {
                b"fmt " => {
                    if body.remaining() < 16 {
                        return Err(SoundError::InvalidWav("short fmt chunk"));
                    }
                    let format = body.get_u16_le();
                    let channels = body.get_u16_le();
                    let rate = body.get_u32_le();
                    body.advance(6);
                    let bits = body.get_u16_le();
                    if format != 1 || channels != 1 || bits != 16 {
                        return Err(SoundError::Unsupported {
                            format,
                            channels,
                            bits,
                        });
                    }
                    if rate == 0 {
                        return Err(SoundError::InvalidWav("zero sample rate"));
                    }
                    sample_rate = Some(rate);
                }
                b"data" => {
                    let rate =
                        sample_rate.ok_or(SoundError::InvalidWav("data chunk before fmt chunk"))?;
                    let samples: Arc<[i16]> = body
                        .chunks_exact(2)
                        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                        .collect();
                    return Ok(Self::new(rate, samples));
                }
                _ => {}
            }
        }
        Err(SoundError::InvalidWav("no data chunk"))
    }

    /// Samples per second.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decoded samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Playback length in µs.
    pub fn duration(&self) -> i64 {
        self.samples.len() as i64 * 1_000_000 / self.sample_rate as i64
    }
}

/// Plays clips and remembers when they were audible.
pub struct SoundPlayer {
    sink: Arc<dyn AudioSink>,
    clock: Arc<dyn Clock>,
    events: EventSink,
    history: Mutex<TimestampedRingBuffer<f32>>,
}

impl SoundPlayer {
    /// Creates a player writing to `sink`; `clock` must be the sensor's.
    pub fn new(sink: Arc<dyn AudioSink>, clock: Arc<dyn Clock>, events: EventSink) -> Self {
        Self {
            sink,
            clock,
            events,
            history: Mutex::new(TimestampedRingBuffer::new(HISTORY_LEN)),
        }
    }

    /// Output latency reported by the sink, µs.
    pub fn latency(&self) -> i64 {
        self.sink.latency()
    }

    /// Starts playing `clip` now; sound begins after the sink latency.
    pub fn play(&self, clip: &SoundClip) -> Result<(), SoundError> {
        let start = self.clock.now() + self.sink.latency();
        self.sink.write(clip.samples(), clip.sample_rate())?;
        self.record_step(start, 1.0);
        self.record_step(start + clip.duration(), 0.0);
        tracing::debug!(%start, samples = clip.samples().len(), "Sound playing");
        Ok(())
    }

    fn record_step(&self, at: Timestamp, level: f32) {
        let mut history = self.history.lock();
        let previous = history.newest().map_or(0.0, |(_, l)| *l);
        history.push(at, previous);
        history.push(at, level);
    }
}

impl Device for SoundPlayer {
    fn name(&self) -> &str {
        "sound"
    }

    /// Tags the part of the exposure during which a clip was audible.
    fn tag_frame(&self, frame: &mut Frame) {
        let t1 = frame.exposure_start();
        let t2 = frame.exposure_end();
        let history = self.history.lock();

        let playing_at_start = history.value_at(t1).is_some_and(|l| l > 0.0);
        let on = if playing_at_start {
            Some(t1)
        } else {
            history
                .samples_between(t1, t2)
                .find(|(_, l)| *l > 0.0)
                .map(|(t, _)| *t)
        };
        let Some(on) = on else {
            return;
        };
        let off = history
            .samples_between(on, t2)
            .find(|(t, l)| *t > on && *l == 0.0)
            .map_or(t2, |(t, _)| *t);

        frame.set_tag("sound.start", on - t1);
        frame.set_tag("sound.duration", off - on);
    }
}

/// Plays a clip at `time` µs into the exposure.
#[derive(Clone)]
pub struct SoundAction {
    player: Arc<SoundPlayer>,
    time: i64,
    clip: SoundClip,
}

impl SoundAction {
    /// Plays `clip` through `player` at `time` µs into the exposure.
    pub fn new(player: &Arc<SoundPlayer>, time: i64, clip: SoundClip) -> Self {
        Self {
            player: Arc::clone(player),
            time,
            clip,
        }
    }

    /// The clip this action plays.
    pub fn clip(&self) -> &SoundClip {
        &self.clip
    }
}

impl std::fmt::Debug for SoundAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundAction")
            .field("time", &self.time)
            .field("samples", &self.clip.samples().len())
            .finish()
    }
}

impl Action for SoundAction {
    fn time(&self) -> i64 {
        self.time
    }

    fn latency(&self) -> i64 {
        self.player.latency()
    }

    fn execute(&self) {
        if let Err(e) = self.player.play(&self.clip) {
            self.player
                .events
                .error(EventKind::PlaybackFailed, format!("Sound playback failed: {e}"));
        }
    }

    fn box_clone(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}
