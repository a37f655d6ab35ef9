// 播放器核心模块

pub mod demuxer_source; // 解封装/解码库的抽象接口
pub mod manager;
pub mod queue;
pub mod session;
pub mod watchdog;

#[cfg(feature = "ffmpeg")]
pub mod decoder;
#[cfg(feature = "ffmpeg")]
pub mod demuxer;

#[cfg(test)]
pub(crate) mod test_support;

pub use demuxer_source::{
    DecodeStatus, DemuxInput, DisplayBuffer, MediaBackend, MediaPacket, PictureInfo, VideoDecoder,
};
pub use manager::Player;
pub use queue::PacketQueue;
pub use session::StreamSession;
pub use watchdog::{AbortReason, InterruptHandle, Watchdog};

#[cfg(feature = "ffmpeg")]
pub use decoder::FfmpegVideoDecoder;
#[cfg(feature = "ffmpeg")]
pub use demuxer::{FfmpegBackend, FfmpegInput, FfmpegPacket};
