//! Shared doubles for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use capture_daemon::capture::{CaptureSettings, PreEnqueueTransform};
use capture_daemon::data::Sample;
use capture_daemon::error::{CaptureError, CaptureResult};
use capture_daemon::hardware::{DeviceLifecycle, FrameSource, LifecycleState, PowerState, ReadOutcome};
use capture_daemon::storage::ArtifactWriter;
use image::{DynamicImage, GrayImage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

/// What a scripted source does after its frames are used up.
#[derive(Debug, Clone, Copy)]
pub enum AfterFrames {
    /// Report end of stream.
    EndOfStream,
    /// Report missed reads forever.
    Silence,
}

/// Frame source that yields a fixed number of small frames.
pub struct ScriptedSource {
    frames: u64,
    produced: u64,
    interval: Duration,
    after: AfterFrames,
    fail_open: bool,
    pub closed: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(frames: u64, interval: Duration, after: AfterFrames) -> Self {
        Self {
            frames,
            produced: 0,
            interval,
            after,
            fail_open: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::new(0, Duration::from_millis(1), AfterFrames::EndOfStream)
        }
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn open(&mut self) -> CaptureResult<()> {
        if self.fail_open {
            return Err(CaptureError::SourceOpen {
                source_name: self.describe(),
                reason: "no such stream".into(),
            });
        }
        Ok(())
    }

    async fn read_frame(&mut self) -> CaptureResult<ReadOutcome> {
        tokio::time::sleep(self.interval).await;
        if self.produced < self.frames {
            self.produced += 1;
            let value = (self.produced % 256) as u8;
            return Ok(ReadOutcome::Frame(DynamicImage::ImageLuma8(GrayImage::from_pixel(
                8,
                8,
                image::Luma([value]),
            ))));
        }
        match self.after {
            AfterFrames::EndOfStream => Ok(ReadOutcome::EndOfStream),
            AfterFrames::Silence => Ok(ReadOutcome::Missed),
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Artifact writer that records `(seq, timestamp_ms)` pairs.
#[derive(Clone, Default)]
pub struct RecordingArtifacts {
    pub writes: Arc<Mutex<Vec<(u64, i64)>>>,
    pub prepared: Arc<AtomicBool>,
    pub delay: Duration,
}

impl ArtifactWriter for RecordingArtifacts {
    fn prepare(&mut self) -> CaptureResult<()> {
        self.prepared.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, seq: u64, sample: &Sample) -> CaptureResult<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.writes.lock().push((seq, sample.timestamp_ms));
        Ok(())
    }

    fn finish(&mut self) -> CaptureResult<()> {
        Ok(())
    }
}

/// Device that counts power requests.
#[derive(Default)]
pub struct CountingDevice {
    pub power_on: Mutex<Vec<f64>>,
    pub off_calls: AtomicU32,
    pub fail_off: bool,
}

#[async_trait]
impl DeviceLifecycle for CountingDevice {
    fn name(&self) -> &str {
        "counting"
    }

    async fn configure(&self, _stream_mode: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_power(&self, state: PowerState) -> anyhow::Result<()> {
        match state {
            PowerState::On { range_m } => self.power_on.lock().push(range_m),
            PowerState::Off => {
                self.off_calls.fetch_add(1, Ordering::SeqCst);
                if self.fail_off {
                    anyhow::bail!("transceiver unreachable");
                }
            }
        }
        Ok(())
    }

    fn state(&self) -> LifecycleState {
        LifecycleState::default()
    }
}

/// Capture settings recording every frame, with no preview.
pub fn settings(freeze_threshold: Duration) -> CaptureSettings {
    CaptureSettings {
        preview_every: 2,
        record_every: 1,
        freeze_threshold,
        transform: PreEnqueueTransform::None,
    }
}

/// One HTTP request seen by [`FakeControlApi`].
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Minimal HTTP/1.1 endpoint answering every request with a fixed status.
pub struct FakeControlApi {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<SeenRequest>>>,
}

impl FakeControlApi {
    pub async fn start(status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let seen = seen.clone();
                tokio::spawn(async move {
                    if let Some(request) = read_request(&mut stream).await {
                        seen.lock().push(request);
                    }
                    let reason = if status < 300 { "OK" } else { "Internal Server Error" };
                    let response = format!(
                        "HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    );
                    let _ = tokio::io::AsyncWriteExt::write_all(&mut stream, response.as_bytes()).await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}/api/v2"),
            requests,
        }
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Option<SeenRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while buffer.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    let mut request_line = head.lines().next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let body_end = (header_end + content_length).min(buffer.len());
    let body = String::from_utf8_lossy(&buffer[header_end..body_end]).to_string();
    Some(SeenRequest { method, path, body })
}
