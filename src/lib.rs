//! 网络视频流播放核心
//!
//! 读包线程把视频包放进有界阻塞队列，播放线程拉包解码、按音视频时钟节拍
//! 发布当前帧，并通过事件通道通知宿主。解封装/解码库经由
//! [`player::MediaBackend`] 接入；启用 `ffmpeg` feature 后提供
//! [`player::FfmpegBackend`]。

pub mod core;
pub mod player;

pub use crate::core::{
    Frame, InputOptions, PlayerError, PlayerEvent, PlayerOptions, Result, RtspFlags, RtspTransport,
    SessionState, StreamProtocol, StreamSource,
};
pub use crate::player::{MediaBackend, Player, StreamSession};

#[cfg(feature = "ffmpeg")]
pub use crate::player::FfmpegBackend;

/// 初始化 FFmpeg（注册格式、设备与网络模块）
///
/// 由宿主在创建播放器前调用一次；重复调用直接返回第一次的结果。
#[cfg(feature = "ffmpeg")]
pub fn init() -> Result<()> {
    use std::sync::OnceLock;

    static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

    INIT.get_or_init(|| {
        ffmpeg_next::init().map_err(|e| e.to_string())?;
        ffmpeg_next::format::network::init();
        log::info!("✅ FFmpeg 初始化成功");
        Ok(())
    })
    .clone()
    .map_err(|e| PlayerError::OpenError(format!("FFmpeg 初始化失败: {}", e)))
}
