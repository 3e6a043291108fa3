//! Audio output
//!
//! `AudioSink` is the boundary to whatever actually makes sound. Sinks must
//! return promptly once their cancellation token fires.

use crate::cache::CachedBlob;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::Cursor;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    /// Play `clip` to completion or until `cancel` fires
    async fn play(&self, clip: CachedBlob, cancel: CancellationToken) -> Result<()>;
}

/// Decoded clip: interleaved f32 samples
#[derive(Debug, Clone)]
pub struct DecodedClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedClip {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Decode an in-memory clip with symphonia
pub fn decode_clip(data: &[u8], content_type: Option<&str>) -> Result<DecodedClip> {
    let cursor = Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    match content_type {
        Some(ct) if ct.contains("wav") => {
            hint.with_extension("wav");
        }
        _ => {
            hint.with_extension("mp3");
        }
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::PlaybackFailure(format!("Unrecognized clip format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::PlaybackFailure("No audio track in clip".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::PlaybackFailure(format!("Failed to create decoder: {}", e)))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => {
                debug!("Stopping decode at packet error: {}", e);
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("Skipping undecodable packet: {}", e);
            }
            Err(e) => {
                return Err(Error::PlaybackFailure(format!("Decode failed: {}", e)));
            }
        }
    }

    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        return Err(Error::PlaybackFailure("Clip decoded to no audio".to_string()));
    }

    Ok(DecodedClip {
        samples,
        sample_rate,
        channels,
    })
}

/// Sink for hosts without a sound device
///
/// Decodes the clip (so undecodable clips fail like they would on a device)
/// and holds the playback slot for the clip's duration.
#[derive(Debug, Default, Clone)]
pub struct HeadlessSink;

#[async_trait]
impl AudioSink for HeadlessSink {
    async fn play(&self, clip: CachedBlob, cancel: CancellationToken) -> Result<()> {
        let decoded = tokio::task::spawn_blocking(move || {
            decode_clip(&clip.data, clip.content_type.as_deref())
        })
        .await
        .map_err(|e| Error::Internal(format!("Decode task failed: {}", e)))??;

        let duration = decoded.duration();
        debug!(?duration, frames = decoded.frames(), "Headless playback");

        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = cancel.cancelled() => Ok(()),
        }
    }
}

#[cfg(feature = "device-output")]
pub use device::DeviceSink;

#[cfg(feature = "device-output")]
mod device {
    //! cpal output on the default device

    use super::{decode_clip, AudioSink, DecodedClip};
    use crate::cache::CachedBlob;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::SampleFormat;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tracing::{info, warn};

    #[derive(Debug, Default, Clone)]
    pub struct DeviceSink {
        device_name: Option<String>,
    }

    impl DeviceSink {
        /// Output on the named device, or the host default when `None`
        pub fn new(device_name: Option<String>) -> Self {
            Self { device_name }
        }
    }

    #[async_trait]
    impl AudioSink for DeviceSink {
        async fn play(&self, clip: CachedBlob, cancel: CancellationToken) -> Result<()> {
            let device_name = self.device_name.clone();
            // cpal streams are !Send; the whole playback lives on one blocking thread
            tokio::task::spawn_blocking(move || {
                let decoded = decode_clip(&clip.data, clip.content_type.as_deref())?;
                play_blocking(device_name.as_deref(), decoded, cancel)
            })
            .await
            .map_err(|e| Error::Internal(format!("Output task failed: {}", e)))?
        }
    }

    fn play_blocking(
        device_name: Option<&str>,
        clip: DecodedClip,
        cancel: CancellationToken,
    ) -> Result<()> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| Error::PlaybackFailure(format!("Cannot list devices: {}", e)))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| Error::PlaybackFailure(format!("Device not found: {}", name)))?,
            None => host
                .default_output_device()
                .ok_or_else(|| Error::PlaybackFailure("No output device".to_string()))?,
        };

        let supported = device
            .default_output_config()
            .map_err(|e| Error::PlaybackFailure(format!("No output config: {}", e)))?;
        if supported.sample_format() != SampleFormat::F32 {
            warn!("Device prefers {:?}; requesting f32", supported.sample_format());
        }
        let config: cpal::StreamConfig = supported.into();
        let out_channels = config.channels as usize;
        let out_rate = config.sample_rate.0;

        // Nearest-frame rate conversion; clips are short speech
        let step = clip.sample_rate as f64 / out_rate as f64;
        let in_channels = clip.channels as usize;
        let total_frames = clip.frames();
        let samples = Arc::new(clip.samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = samples.clone();
            let position = position.clone();
            let finished = finished.clone();
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _| {
                        let mut out_frame = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(out_channels) {
                            let src = (out_frame as f64 * step) as usize;
                            if src >= total_frames {
                                frame.iter_mut().for_each(|s| *s = 0.0);
                                finished.store(true, Ordering::Relaxed);
                                continue;
                            }
                            for (ch, sample) in frame.iter_mut().enumerate() {
                                let src_ch = ch.min(in_channels - 1);
                                *sample = samples[src * in_channels + src_ch];
                            }
                            out_frame += 1;
                        }
                        position.store(out_frame, Ordering::Relaxed);
                    },
                    |err| warn!("Output stream error: {}", err),
                    None,
                )
                .map_err(|e| Error::PlaybackFailure(format!("Cannot open stream: {}", e)))?
        };

        stream
            .play()
            .map_err(|e| Error::PlaybackFailure(format!("Cannot start stream: {}", e)))?;
        info!(rate = out_rate, channels = out_channels, "Device playback started");

        while !finished.load(Ordering::Relaxed) && !cancel.is_cancelled() {
            std::thread::sleep(Duration::from_millis(20));
        }
        drop(stream);
        Ok(())
    }
}
