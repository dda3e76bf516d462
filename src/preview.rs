//! Live preview publisher
//!
//! Every previewed frame becomes one self-contained JPEG datagram sent to the
//! console on loopback. The channel is best-effort and latest-wins: nothing is
//! queued, retried, sequenced or acknowledged, and a receiver must accept that
//! datagrams can be lost, duplicated or reordered.
//!
//! Steps per frame: downscale to the preview size, map >8-bit intensity through
//! min/max normalization and a JET false-colour palette, encode at a low JPEG
//! quality, and drop the result if it would not fit in one datagram.

use crate::config::PreviewConfig;
use crate::error::CaptureResult;
use crate::imaging;
use image::DynamicImage;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

/// Encoded previews of this size or larger are never sent.
pub const MAX_DATAGRAM_BYTES: usize = 60_000;

/// Unreliable datagram transport.
///
/// Implementations must not block: a send that cannot complete immediately is an
/// error, and the caller drops the preview.
pub trait DatagramTransport: Send + Sync {
    /// Send `payload` as a single datagram.
    fn send(&self, payload: &[u8]) -> io::Result<usize>;
}

/// Non-blocking UDP socket bound to an ephemeral local port.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpTransport {
    /// Bind a socket for sending to `host:port`.
    pub fn connect(host: &str, port: u16) -> CaptureResult<Self> {
        let destination = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, format!("cannot resolve {host}"))
        })?;
        let bind_addr: SocketAddr = if destination.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            destination,
        })
    }

    /// Destination address.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

impl DatagramTransport for UdpTransport {
    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, self.destination)
    }
}

/// What happened to one preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewOutcome {
    /// Sent as one datagram of this many bytes.
    Sent(usize),
    /// Encoded payload was at or above the size cap.
    TooLarge(usize),
    /// Encoding or sending failed.
    Failed,
}

/// Downscales, encodes and publishes preview frames.
pub struct PreviewPublisher {
    transport: Box<dyn DatagramTransport>,
    width: u32,
    height: u32,
    quality: u8,
    max_bytes: usize,
}

impl std::fmt::Debug for PreviewPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewPublisher")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("quality", &self.quality)
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

impl PreviewPublisher {
    /// Publish through `transport` using the sizes and quality in `config`.
    ///
    /// The size cap is never raised above [`MAX_DATAGRAM_BYTES`].
    pub fn new(transport: Box<dyn DatagramTransport>, config: &PreviewConfig) -> Self {
        Self {
            transport,
            width: config.size.width,
            height: config.size.height,
            quality: config.quality,
            max_bytes: config.max_bytes.min(MAX_DATAGRAM_BYTES),
        }
    }

    /// Open a UDP publisher for `config.host:config.port`.
    pub fn udp(config: &PreviewConfig) -> CaptureResult<Self> {
        let transport = UdpTransport::connect(&config.host, config.port)?;
        tracing::info!(destination = %transport.destination(), "Preview publisher ready");
        Ok(Self::new(Box::new(transport), config))
    }

    /// Render `frame` into a preview payload.
    pub fn render(&self, frame: &DynamicImage) -> CaptureResult<Vec<u8>> {
        let small = imaging::resize(frame, self.width, self.height);
        let display = imaging::to_displayable(small);
        imaging::encode_jpeg(&display, self.quality)
    }

    /// Render and send `frame`. Never blocks and never propagates an error.
    pub fn publish(&self, frame: &DynamicImage) -> PreviewOutcome {
        match self.render(frame) {
            Ok(payload) => self.publish_payload(&payload),
            Err(e) => {
                tracing::trace!(error = %e, "Preview encode failed");
                PreviewOutcome::Failed
            }
        }
    }

    /// Send an already encoded payload, enforcing the size cap.
    pub fn publish_payload(&self, payload: &[u8]) -> PreviewOutcome {
        if payload.len() >= self.max_bytes {
            tracing::trace!(bytes = payload.len(), cap = self.max_bytes, "Preview too large; dropped");
            return PreviewOutcome::TooLarge(payload.len());
        }
        match self.transport.send(payload) {
            Ok(sent) => PreviewOutcome::Sent(sent),
            Err(e) => {
                tracing::trace!(error = %e, "Preview send failed");
                PreviewOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameSize;
    use image::{ImageBuffer, Luma, RgbImage};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct Recorder(Arc<Mutex<Vec<Vec<u8>>>>);

    impl DatagramTransport for Recorder {
        fn send(&self, payload: &[u8]) -> io::Result<usize> {
            self.0.lock().push(payload.to_vec());
            Ok(payload.len())
        }
    }

    fn config() -> PreviewConfig {
        PreviewConfig {
            host: "127.0.0.1".into(),
            port: 5001,
            size: FrameSize::new(400, 225),
            quality: 50,
            max_bytes: MAX_DATAGRAM_BYTES,
        }
    }

    #[test]
    fn test_preview_is_jpeg_at_preview_size() {
        let recorder = Recorder::default();
        let publisher = PreviewPublisher::new(Box::new(recorder.clone()), &config());
        let frame = DynamicImage::ImageRgb8(RgbImage::from_pixel(1280, 720, image::Rgb([20, 90, 200])));

        assert!(matches!(publisher.publish(&frame), PreviewOutcome::Sent(_)));
        let sent = recorder.0.lock();
        let decoded = image::load_from_memory(&sent[0]).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (400, 225));
    }

    #[test]
    fn test_sixteen_bit_frames_are_false_coloured() {
        let publisher = PreviewPublisher::new(Box::new(Recorder::default()), &config());
        let frame = DynamicImage::ImageLuma16(ImageBuffer::<Luma<u16>, _>::from_fn(64, 64, |x, _| {
            Luma([(x * 1000) as u16])
        }));
        let payload = publisher.render(&frame).unwrap();
        let decoded = image::load_from_memory(&payload).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn test_size_cap_is_exclusive() {
        let recorder = Recorder::default();
        let publisher = PreviewPublisher::new(Box::new(recorder.clone()), &config());

        assert_eq!(
            publisher.publish_payload(&vec![0u8; MAX_DATAGRAM_BYTES]),
            PreviewOutcome::TooLarge(MAX_DATAGRAM_BYTES)
        );
        assert_eq!(
            publisher.publish_payload(&vec![0u8; MAX_DATAGRAM_BYTES - 1]),
            PreviewOutcome::Sent(MAX_DATAGRAM_BYTES - 1)
        );
        assert_eq!(recorder.0.lock().len(), 1);
    }

    #[test]
    fn test_configured_cap_cannot_exceed_datagram_limit() {
        let mut cfg = config();
        cfg.max_bytes = 1_000_000;
        let publisher = PreviewPublisher::new(Box::new(Recorder::default()), &cfg);
        assert!(matches!(
            publisher.publish_payload(&vec![0u8; MAX_DATAGRAM_BYTES]),
            PreviewOutcome::TooLarge(_)
        ));
    }
}
