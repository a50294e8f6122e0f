//! Live H.264 streaming engine.
//!
//! An RTSP/1.0 control plane ([`protocol`], [`session`]) hands out
//! per-viewer UDP transports; encoded access units pushed into the
//! [`Server`] are packetized and fanned out to every PLAYING viewer
//! ([`fanout`]). [`quality`] adapts per-viewer encode parameters and
//! [`pool`] recycles raw frame buffers on the capture path.

pub mod config;
pub mod error;
pub mod fanout;
pub mod media;
pub mod pool;
pub mod protocol;
pub mod quality;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{Config, PoolConfig, QualityConfig, ServerConfig};
pub use error::{ConfigError, PoolError, Result, RtspError};
pub use fanout::{FanoutReport, RtpFanout};
pub use media::Packetizer;
pub use pool::{FrameBuffer, FrameBufferPool, PixelFormat, PoolStats};
pub use quality::{ClientQualityProfile, PressureLevel, QualityController, QualitySignals};
pub use server::{Server, StreamContext, Viewer};
