//! Microphone capture.
//!
//! # Lifecycle
//!
//! ```text
//! Microphone::new(backend)
//!     └─► request_permission()   → probes the device, false on any failure
//!         └─► start_recording()  → capture thread opens the stream
//!             └─► stop_recording().await → WAV-encode → decode_bytes → AudioSignal
//! dispose() / Drop               → stream released on the capture thread
//! ```
//!
//! # Threading
//!
//! `cpal::Stream` is `!Send` on most platforms. The stream is therefore
//! opened, held and dropped on one dedicated capture thread. The audio
//! callback only pushes into the lock-free ring; the capture thread drains
//! it into the recording buffer.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use super::decode::{decode_bytes, encode_wav};
use super::AudioSignal;
use crate::{
    buffering::{create_capture_ring, CaptureConsumer, CaptureProducer, Consumer},
    error::{ChirpError, Result},
};

/// Samples drained from the ring per iteration.
const DRAIN_CHUNK: usize = 4_096;

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const DRAIN_IDLE_MS: u64 = 5;

/// An open input stream. Dropping it releases the device.
pub trait CaptureStream {
    /// Rate the device actually delivers samples at (Hz).
    fn sample_rate(&self) -> u32;
}

/// Source of microphone audio.
///
/// `open` is always called on the capture thread, and the returned stream
/// is dropped on that same thread.
pub trait CaptureBackend: Send + Sync + 'static {
    /// Check that an input device is available and may be opened.
    fn probe(&self) -> Result<()>;

    /// Open the device and start pushing channel-0 f32 samples into
    /// `producer` while `running` is set.
    fn open(
        &self,
        producer: CaptureProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Box<dyn CaptureStream>>;
}

struct Captured {
    samples: Vec<f32>,
    sample_rate: u32,
}

struct CaptureSession {
    running: Arc<AtomicBool>,
    worker: JoinHandle<Captured>,
    sample_rate: u32,
}

/// Scoped microphone handle. At most one capture is active per handle.
pub struct Microphone {
    backend: Arc<dyn CaptureBackend>,
    permission: bool,
    session: Option<CaptureSession>,
}

impl Microphone {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            permission: false,
            session: None,
        }
    }

    /// Microphone on the system default input device.
    #[cfg(feature = "audio-cpal")]
    pub fn default_device() -> Self {
        Self::new(Arc::new(CpalBackend::default()))
    }

    /// Probe the input device. Never errors: any failure is logged and
    /// reported as `false`.
    pub fn request_permission(&mut self) -> bool {
        self.permission = match self.backend.probe() {
            Ok(()) => true,
            Err(e) => {
                warn!("microphone permission probe failed: {e}");
                false
            }
        };
        self.permission
    }

    pub fn has_permission(&self) -> bool {
        self.permission
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Start capturing.
    ///
    /// Blocks until the capture thread confirms the device is open.
    ///
    /// # Errors
    /// - `ChirpError::Permission` if `request_permission` has not succeeded.
    /// - `ChirpError::AlreadyRecording` if a capture is active.
    /// - Device errors from the backend.
    pub fn start_recording(&mut self) -> Result<()> {
        if !self.permission {
            return Err(ChirpError::Permission(
                "microphone access has not been granted".into(),
            ));
        }
        if self.session.is_some() {
            return Err(ChirpError::AlreadyRecording);
        }

        let (producer, consumer) = create_capture_ring();
        let running = Arc::new(AtomicBool::new(true));
        let backend = Arc::clone(&self.backend);
        let thread_running = Arc::clone(&running);

        let (open_tx, open_rx) = mpsc::channel::<Result<u32>>();

        let worker = thread::Builder::new()
            .name("chirp-capture".into())
            .spawn(move || capture_loop(backend, producer, consumer, thread_running, open_tx))?;

        match open_rx.recv() {
            Ok(Ok(sample_rate)) => {
                info!(sample_rate, "microphone recording started");
                self.session = Some(CaptureSession {
                    running,
                    worker,
                    sample_rate,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(ChirpError::AudioStream(
                    "capture thread exited before opening the device".into(),
                ))
            }
        }
    }

    /// Stop capturing and decode the recording.
    ///
    /// The captured samples are wrapped in a WAV container and decoded
    /// through [`decode_bytes`], the same path used for files.
    ///
    /// # Errors
    /// - `ChirpError::NotRecording` if no capture is active.
    /// - `ChirpError::Decode` if nothing was captured.
    pub async fn stop_recording(&mut self) -> Result<AudioSignal> {
        let CaptureSession {
            running,
            worker,
            sample_rate,
        } = self.session.take().ok_or(ChirpError::NotRecording)?;

        running.store(false, Ordering::Release);

        let captured = tokio::task::spawn_blocking(move || worker.join())
            .await
            .map_err(|e| ChirpError::AudioStream(format!("capture join failed: {e}")))?
            .map_err(|_| ChirpError::AudioStream("capture thread panicked".into()))?;

        info!(
            sample_rate,
            samples = captured.samples.len(),
            "microphone recording stopped"
        );

        tokio::task::spawn_blocking(move || {
            let bytes = encode_wav(&captured.samples, captured.sample_rate)?;
            decode_bytes(bytes, Some("wav"))
        })
        .await
        .map_err(|e| ChirpError::Decode(format!("decode task failed: {e}")))?
    }

    /// Release the input stream and revoke the granted permission.
    ///
    /// Safe to call repeatedly; also runs on drop.
    pub fn dispose(&mut self) {
        if let Some(session) = self.session.take() {
            session.running.store(false, Ordering::Release);
            if session.worker.join().is_err() {
                warn!("capture thread panicked during dispose");
            }
            info!("microphone stream released");
        }
        self.permission = false;
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Microphone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Microphone")
            .field("permission", &self.permission)
            .field("recording", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

fn capture_loop(
    backend: Arc<dyn CaptureBackend>,
    producer: CaptureProducer,
    mut consumer: CaptureConsumer,
    running: Arc<AtomicBool>,
    open_tx: mpsc::Sender<Result<u32>>,
) -> Captured {
    let stream = match backend.open(producer, Arc::clone(&running)) {
        Ok(stream) => stream,
        Err(e) => {
            running.store(false, Ordering::Release);
            let _ = open_tx.send(Err(e));
            return Captured {
                samples: Vec::new(),
                sample_rate: 0,
            };
        }
    };
    let sample_rate = stream.sample_rate();
    let _ = open_tx.send(Ok(sample_rate));

    let mut samples = Vec::new();
    let mut scratch = vec![0f32; DRAIN_CHUNK];

    while running.load(Ordering::Acquire) {
        let n = consumer.pop_slice(&mut scratch);
        if n == 0 {
            thread::sleep(Duration::from_millis(DRAIN_IDLE_MS));
        } else {
            samples.extend_from_slice(&scratch[..n]);
        }
    }

    // Stream drops here, releasing the device on this thread.
    drop(stream);

    loop {
        let n = consumer.pop_slice(&mut scratch);
        if n == 0 {
            break;
        }
        samples.extend_from_slice(&scratch[..n]);
    }

    Captured {
        samples,
        sample_rate,
    }
}

// ---------------------------------------------------------------------------
// cpal backend
// ---------------------------------------------------------------------------

#[cfg(feature = "audio-cpal")]
pub use cpal_backend::CpalBackend;

#[cfg(feature = "audio-cpal")]
mod cpal_backend {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use cpal::{
        traits::{DeviceTrait, StreamTrait},
        SampleFormat, SizedSample, StreamConfig,
    };
    use tracing::{error, info, warn};

    use super::{CaptureBackend, CaptureStream};
    use crate::{
        audio::device::select_input_device,
        buffering::{CaptureProducer, Producer},
        error::{ChirpError, Result},
    };

    /// Captures from a cpal input device.
    #[derive(Debug, Clone, Default)]
    pub struct CpalBackend {
        /// Device name to prefer over the system default.
        pub preferred_device: Option<String>,
    }

    impl CpalBackend {
        pub fn with_device(name: impl Into<String>) -> Self {
            Self {
                preferred_device: Some(name.into()),
            }
        }
    }

    struct CpalStream {
        _stream: cpal::Stream,
        sample_rate: u32,
    }

    impl CaptureStream for CpalStream {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
    }

    impl CaptureBackend for CpalBackend {
        fn probe(&self) -> Result<()> {
            let host = cpal::default_host();
            let device = select_input_device(&host, self.preferred_device.as_deref())?;
            device
                .default_input_config()
                .map_err(|e| ChirpError::Permission(e.to_string()))?;
            Ok(())
        }

        fn open(
            &self,
            producer: CaptureProducer,
            running: Arc<AtomicBool>,
        ) -> Result<Box<dyn CaptureStream>> {
            let host = cpal::default_host();
            let device = select_input_device(&host, self.preferred_device.as_deref())?;

            info!(
                device = device.name().unwrap_or_default().as_str(),
                "opening input device"
            );

            let supported = device
                .default_input_config()
                .map_err(|e| ChirpError::AudioDevice(e.to_string()))?;
            let sample_rate = supported.sample_rate().0;
            let channels = supported.channels();

            info!(sample_rate, channels, "audio config selected");

            let config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let stream = match supported.sample_format() {
                SampleFormat::F32 => {
                    build_stream::<f32>(&device, &config, producer, running, |s| s)
                }
                SampleFormat::I16 => build_stream::<i16>(&device, &config, producer, running, |s| {
                    s as f32 / 32768.0
                }),
                SampleFormat::U8 => build_stream::<u8>(&device, &config, producer, running, |s| {
                    (s as f32 - 128.0) / 128.0
                }),
                fmt => {
                    return Err(ChirpError::AudioStream(format!(
                        "unsupported sample format: {fmt:?}"
                    )))
                }
            }?;

            stream
                .play()
                .map_err(|e| ChirpError::AudioStream(e.to_string()))?;

            Ok(Box::new(CpalStream {
                _stream: stream,
                sample_rate,
            }))
        }
    }

    /// Build an input stream that keeps channel 0 of each interleaved frame.
    ///
    /// The callback reuses one scratch buffer and never blocks.
    fn build_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut producer: CaptureProducer,
        running: Arc<AtomicBool>,
        convert: fn(T) -> f32,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample,
    {
        let channels = config.channels.max(1) as usize;
        let mut scratch: Vec<f32> = Vec::new();

        device
            .build_input_stream(
                config,
                move |data: &[T], _info| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    scratch.clear();
                    scratch.extend(data.iter().step_by(channels).map(|&s| convert(s)));
                    let written = producer.push_slice(&scratch);
                    if written < scratch.len() {
                        warn!("capture ring full: dropped {} frames", scratch.len() - written);
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
            .map_err(|e| ChirpError::AudioStream(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::Producer;

    /// Backend that delivers a fixed buffer as soon as it is opened.
    struct ScriptedBackend {
        samples: Vec<f32>,
        sample_rate: u32,
        available: bool,
        fail_open: bool,
    }

    impl ScriptedBackend {
        fn with_samples(samples: Vec<f32>, sample_rate: u32) -> Arc<Self> {
            Arc::new(Self {
                samples,
                sample_rate,
                available: true,
                fail_open: false,
            })
        }
    }

    struct ScriptedStream(u32);

    impl CaptureStream for ScriptedStream {
        fn sample_rate(&self) -> u32 {
            self.0
        }
    }

    impl CaptureBackend for ScriptedBackend {
        fn probe(&self) -> Result<()> {
            if self.available {
                Ok(())
            } else {
                Err(ChirpError::Permission("denied by test".into()))
            }
        }

        fn open(
            &self,
            mut producer: CaptureProducer,
            _running: Arc<AtomicBool>,
        ) -> Result<Box<dyn CaptureStream>> {
            if self.fail_open {
                return Err(ChirpError::AudioDevice("device busy".into()));
            }
            producer.push_slice(&self.samples);
            Ok(Box::new(ScriptedStream(self.sample_rate)))
        }
    }

    #[test]
    fn denied_probe_fails_closed() {
        let backend = Arc::new(ScriptedBackend {
            samples: Vec::new(),
            sample_rate: 16_000,
            available: false,
            fail_open: false,
        });
        let mut mic = Microphone::new(backend);
        assert!(!mic.request_permission());
        let err = mic.start_recording().unwrap_err();
        assert!(matches!(err, ChirpError::Permission(_)), "got {err:?}");
        assert!(!mic.is_recording());
    }

    #[test]
    fn start_without_permission_is_rejected() {
        let mut mic = Microphone::new(ScriptedBackend::with_samples(vec![0.1; 10], 16_000));
        let err = mic.start_recording().unwrap_err();
        assert!(matches!(err, ChirpError::Permission(_)), "got {err:?}");
    }

    #[test]
    fn second_start_is_rejected_while_recording() {
        let mut mic = Microphone::new(ScriptedBackend::with_samples(vec![0.1; 10], 16_000));
        assert!(mic.request_permission());
        mic.start_recording().expect("first start");
        let err = mic.start_recording().unwrap_err();
        assert!(matches!(err, ChirpError::AlreadyRecording), "got {err:?}");
        mic.dispose();
        assert!(!mic.is_recording());
    }

    #[test]
    fn open_failure_surfaces_and_leaves_mic_idle() {
        let backend = Arc::new(ScriptedBackend {
            samples: Vec::new(),
            sample_rate: 16_000,
            available: true,
            fail_open: true,
        });
        let mut mic = Microphone::new(backend);
        assert!(mic.request_permission());
        let err = mic.start_recording().unwrap_err();
        assert!(matches!(err, ChirpError::AudioDevice(_)), "got {err:?}");
        assert!(!mic.is_recording());
    }

    #[tokio::test]
    async fn stop_decodes_captured_samples() {
        let samples: Vec<f32> = (0..4_800).map(|i| ((i % 96) as f32 / 96.0) - 0.5).collect();
        let mut mic = Microphone::new(ScriptedBackend::with_samples(samples.clone(), 48_000));
        assert!(mic.request_permission());
        mic.start_recording().expect("start");

        let signal = mic.stop_recording().await.expect("stop");
        assert_eq!(signal.sample_rate(), 48_000);
        assert_eq!(signal.len(), samples.len());
        assert!((signal.duration() - 0.1).abs() < 1e-9);
        for (a, b) in signal.data().iter().zip(&samples) {
            assert!((a - b).abs() < 1e-3);
        }
        assert!(!mic.is_recording());
    }

    #[tokio::test]
    async fn stop_without_start_is_rejected() {
        let mut mic = Microphone::new(ScriptedBackend::with_samples(vec![0.1; 10], 16_000));
        let err = mic.stop_recording().await.unwrap_err();
        assert!(matches!(err, ChirpError::NotRecording), "got {err:?}");
    }

    #[tokio::test]
    async fn empty_capture_is_a_decode_error() {
        let mut mic = Microphone::new(ScriptedBackend::with_samples(Vec::new(), 16_000));
        assert!(mic.request_permission());
        mic.start_recording().expect("start");
        let err = mic.stop_recording().await.unwrap_err();
        assert!(matches!(err, ChirpError::Decode(_)), "got {err:?}");
    }

    #[test]
    fn dispose_revokes_permission() {
        let mut mic = Microphone::new(ScriptedBackend::with_samples(vec![0.1; 10], 16_000));
        assert!(mic.request_permission());
        mic.start_recording().expect("start");
        mic.dispose();
        assert!(!mic.has_permission());
        let err = mic.start_recording().unwrap_err();
        assert!(matches!(err, ChirpError::Permission(_)), "got {err:?}");
    }
}
