//! H.264 encoding of decoded frames for the WebRTC video track

use bytes::Bytes;
use openh264::encoder::{Encoder, EncoderConfig};
use openh264::formats::YUVBuffer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{Result, StreamError};
use crate::frame::VideoFrame;

/// Encodes raw frames into an elementary stream
///
/// Encoders live on the thread of the [`EncoderWorker`] that created them and
/// need not be `Send`.
pub trait VideoEncoder {
    /// Encode one frame into Annex-B NAL units
    fn encode(&mut self, frame: &VideoFrame) -> Result<Bytes>;
}

/// Builds the encoder for a new session
pub type EncoderFactory = Arc<dyn Fn(KeyframeRequest) -> Box<dyn VideoEncoder> + Send + Sync>;

/// Default factory producing [`H264Encoder`]s
#[must_use]
pub fn h264_factory(keyframe_interval: u32) -> EncoderFactory {
    Arc::new(move |keyframe_request| {
        Box::new(H264Encoder::new(keyframe_interval, keyframe_request)) as Box<dyn VideoEncoder>
    })
}

/// Shared flag the RTCP reader uses to ask for a keyframe
#[derive(Debug, Clone, Default)]
pub struct KeyframeRequest(Arc<AtomicBool>);

impl KeyframeRequest {
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Return whether a keyframe was requested, clearing the request.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// `openh264` backed encoder
///
/// A fresh encoder instance always starts with an IDR frame, so forcing a
/// keyframe is done by rebuilding it.
pub struct H264Encoder {
    encoder: Option<Encoder>,
    dimensions: (u32, u32),
    keyframe_interval: u32,
    frames_since_keyframe: u32,
    keyframe_request: KeyframeRequest,
}

impl H264Encoder {
    /// `keyframe_interval` of 0 disables periodic keyframes
    #[must_use]
    pub fn new(keyframe_interval: u32, keyframe_request: KeyframeRequest) -> Self {
        Self {
            encoder: None,
            dimensions: (0, 0),
            keyframe_interval,
            frames_since_keyframe: 0,
            keyframe_request,
        }
    }

    fn needs_rebuild(&mut self, dimensions: (u32, u32)) -> bool {
        let requested = self.keyframe_request.take();
        let periodic =
            self.keyframe_interval > 0 && self.frames_since_keyframe >= self.keyframe_interval;
        self.encoder.is_none() || self.dimensions != dimensions || requested || periodic
    }

    fn encoder_for(&mut self, width: u32, height: u32) -> Result<&mut Encoder> {
        if self.needs_rebuild((width, height)) {
            debug!(
                width,
                height,
                previous_width = self.dimensions.0,
                previous_height = self.dimensions.1,
                "Building H.264 encoder"
            );
            let encoder = Encoder::with_config(EncoderConfig::new(width, height))
                .map_err(|e| StreamError::Encode(e.to_string()))?;
            self.encoder = Some(encoder);
            self.dimensions = (width, height);
            self.frames_since_keyframe = 0;
        }
        self.encoder
            .as_mut()
            .ok_or_else(|| StreamError::Encode("encoder unavailable".to_string()))
    }
}

impl VideoEncoder for H264Encoder {
    fn encode(&mut self, frame: &VideoFrame) -> Result<Bytes> {
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.data.len() != expected {
            return Err(StreamError::Encode(format!(
                "raster is {} bytes, expected {expected} for {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }

        let yuv = YUVBuffer::with_rgb(frame.width as usize, frame.height as usize, &frame.data);
        let encoder = self.encoder_for(frame.width, frame.height)?;
        let bitstream = encoder
            .encode(&yuv)
            .map_err(|e| StreamError::Encode(e.to_string()))?;
        let data = Bytes::from(bitstream.to_vec());

        self.frames_since_keyframe += 1;
        Ok(data)
    }
}

type EncodeJob = (VideoFrame, oneshot::Sender<Result<Bytes>>);

/// Runs one encoder on a dedicated OS thread
///
/// Encoding is CPU bound and must not stall the async runtime. The thread exits
/// once the worker is dropped.
pub struct EncoderWorker {
    jobs: mpsc::Sender<EncodeJob>,
}

impl EncoderWorker {
    pub fn spawn<F>(name: String, make_encoder: F) -> Result<Self>
    where
        F: FnOnce() -> Box<dyn VideoEncoder> + Send + 'static,
    {
        let (jobs, mut rx) = mpsc::channel::<EncodeJob>(1);

        std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let mut encoder = make_encoder();
                while let Some((frame, reply)) = rx.blocking_recv() {
                    let _ = reply.send(encoder.encode(&frame));
                }
            })
            .map_err(|e| StreamError::Encode(format!("failed to start encoder thread: {e}")))?;

        Ok(Self { jobs })
    }

    pub async fn encode(&self, frame: VideoFrame) -> Result<Bytes> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send((frame, reply))
            .await
            .map_err(|_| StreamError::Encode("encoder thread stopped".to_string()))?;
        response
            .await
            .map_err(|_| StreamError::Encode("encoder thread stopped".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PresentationClock;
    use std::time::Duration;

    fn frame(width: u32, height: u32) -> VideoFrame {
        let clock = PresentationClock::default();
        VideoFrame {
            width,
            height,
            data: Bytes::from(vec![128u8; (width * height * 3) as usize]),
            pts: 0,
            time_base: clock.time_base(),
            duration: Duration::from_millis(33),
        }
    }

    #[test]
    fn test_keyframe_request_is_consumed_once() {
        let request = KeyframeRequest::default();
        assert!(!request.take());
        request.request();
        assert!(request.take());
        assert!(!request.take());
    }

    #[test]
    fn test_encode_produces_annex_b() {
        let mut encoder = H264Encoder::new(0, KeyframeRequest::default());
        let data = encoder.encode(&frame(64, 64)).unwrap();

        assert!(!data.is_empty());
        assert!(data.starts_with(&[0, 0, 0, 1]) || data.starts_with(&[0, 0, 1]));
    }

    #[test]
    fn test_rebuild_on_resize_and_interval() {
        let mut encoder = H264Encoder::new(2, KeyframeRequest::default());

        encoder.encode(&frame(32, 32)).unwrap();
        assert_eq!(encoder.dimensions, (32, 32));
        encoder.encode(&frame(64, 32)).unwrap();
        assert_eq!(encoder.dimensions, (64, 32));
        assert_eq!(encoder.frames_since_keyframe, 1);

        encoder.encode(&frame(64, 32)).unwrap();
        encoder.encode(&frame(64, 32)).unwrap();
        // Third frame at this size hit the interval and restarted the count
        assert_eq!(encoder.frames_since_keyframe, 1);
    }

    struct LengthEncoder;

    impl VideoEncoder for LengthEncoder {
        fn encode(&mut self, frame: &VideoFrame) -> Result<Bytes> {
            Ok(Bytes::from(frame.data.len().to_string()))
        }
    }

    #[tokio::test]
    async fn test_worker_round_trip() {
        let worker =
            EncoderWorker::spawn("test-encoder".to_string(), || Box::new(LengthEncoder)).unwrap();

        assert_eq!(worker.encode(frame(2, 2)).await.unwrap().as_ref(), b"12");
        assert_eq!(worker.encode(frame(4, 2)).await.unwrap().as_ref(), b"24");
    }

    #[test]
    fn test_rejects_short_raster() {
        let mut encoder = H264Encoder::new(0, KeyframeRequest::default());
        let mut bad = frame(16, 16);
        bad.data = Bytes::from_static(&[0; 10]);
        assert!(matches!(encoder.encode(&bad), Err(StreamError::Encode(_))));
    }
}
