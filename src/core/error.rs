use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("图像编码错误: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("无法打开流: {0}")]
    OpenError(String),

    #[error("无法找到视频流")]
    NoVideoStream,

    #[error("找不到匹配的解码器")]
    DecoderNotFound,

    #[error("连接超时（{}ms）", .0.as_millis())]
    ConnectionTimeout(Duration),

    #[error("读取超时（{}ms）", .0.as_millis())]
    ReadTimeout(Duration),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("操作被中断")]
    Interrupted,

    #[error("当前没有可用帧")]
    NoFrame,

    #[error("无效参数: {0}")]
    InvalidOption(String),

    #[error("其他错误: {0}")]
    Other(String),
}

impl PlayerError {
    /// 是否为看门狗判定的超时
    pub fn is_timeout(&self) -> bool {
        matches!(self, PlayerError::ConnectionTimeout(_) | PlayerError::ReadTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
