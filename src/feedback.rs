//! Audible feedback: one distinguishable tone pattern per outcome category.

use log::{debug, warn};
use rodio::source::{SineWave, Source};
use rodio::{OutputStream, Sink};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    /// Two ascending tones
    Success,
    /// One low tone
    Error,
    /// Two descending tones
    Cancel,
    /// One long low tone
    Emergency,
}

/// A single tone of a feedback pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: f32,
    pub duration: Duration,
}

const fn tone(frequency_hz: f32, millis: u64) -> Tone {
    Tone {
        frequency_hz,
        duration: Duration::from_millis(millis),
    }
}

const TONE_GAP: Duration = Duration::from_millis(50);

impl FeedbackKind {
    pub fn pattern(self) -> &'static [Tone] {
        static SUCCESS: [Tone; 2] = [tone(1000.0, 150), tone(1200.0, 150)];
        static ERROR: [Tone; 1] = [tone(600.0, 300)];
        static CANCEL: [Tone; 2] = [tone(800.0, 100), tone(600.0, 100)];
        static EMERGENCY: [Tone; 1] = [tone(400.0, 500)];

        match self {
            FeedbackKind::Success => &SUCCESS,
            FeedbackKind::Error => &ERROR,
            FeedbackKind::Cancel => &CANCEL,
            FeedbackKind::Emergency => &EMERGENCY,
        }
    }
}

/// Receives outcome signals. The pipeline emits exactly one per outcome.
pub trait FeedbackSink: Send + Sync {
    fn signal(&self, kind: FeedbackKind);
}

/// Plays tone patterns on the default output device.
///
/// Playback happens on a short-lived thread so the caller never waits for the
/// sound; a missing audio device degrades to a debug log line.
pub struct TonePlayer {
    enabled: bool,
    volume: f32,
}

impl TonePlayer {
    pub fn new(enabled: bool, volume: f32) -> Self {
        Self {
            enabled,
            volume: volume.clamp(0.0, 1.0),
        }
    }

    fn play_blocking(pattern: &[Tone], volume: f32) -> Result<(), String> {
        let (_stream, handle) =
            OutputStream::try_default().map_err(|e| format!("No audio output: {}", e))?;
        let sink = Sink::try_new(&handle).map_err(|e| format!("Failed to open sink: {}", e))?;

        for (i, t) in pattern.iter().enumerate() {
            if i > 0 {
                sink.append(SineWave::new(0.0).take_duration(TONE_GAP).amplify(0.0));
            }
            sink.append(
                SineWave::new(t.frequency_hz)
                    .take_duration(t.duration)
                    .amplify(volume * 0.25),
            );
        }

        sink.sleep_until_end();
        Ok(())
    }
}

impl FeedbackSink for TonePlayer {
    fn signal(&self, kind: FeedbackKind) {
        if !self.enabled {
            debug!("Audio feedback disabled, skipping {:?} tone", kind);
            return;
        }

        let volume = self.volume;
        let spawned = std::thread::Builder::new()
            .name("synte-tone".into())
            .spawn(move || {
                if let Err(e) = Self::play_blocking(kind.pattern(), volume) {
                    // Silent fallback, the status line is still logged
                    debug!("Could not play {:?} tone: {}", kind, e);
                }
            });

        if let Err(e) = spawned {
            warn!("Failed to spawn tone thread: {}", e);
        }
    }
}
