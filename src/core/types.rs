use crate::core::error::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 采集设备使用的 FFmpeg 输入格式（伪 URL 的 scheme）
const CAPTURE_FORMATS: &[&str] = &["dshow", "v4l2", "avfoundation", "gdigrab", "x11grab"];

/// 媒体源类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    /// 本地文件路径
    LocalFile(PathBuf),

    /// 网络流 URL
    NetworkStream {
        url: String,
        protocol: StreamProtocol,
    },

    /// 本地采集设备，例如 `v4l2:///dev/video0`、`dshow://video=USB Camera`
    Device {
        format: String,
        device: String,
    },
}

impl StreamSource {
    /// 从 URL 字符串解析媒体源
    pub fn parse(url: &str) -> Self {
        if let Some((scheme, rest)) = url.split_once("://") {
            let scheme = scheme.to_ascii_lowercase();
            if CAPTURE_FORMATS.contains(&scheme.as_str()) {
                return StreamSource::Device {
                    format: scheme,
                    device: rest.to_string(),
                };
            }
        }

        let protocol = if url.starts_with("rtsp://") {
            Some(StreamProtocol::RTSP)
        } else if url.starts_with("rtmp://") {
            Some(StreamProtocol::RTMP)
        } else if url.ends_with(".m3u8") || url.contains("/hls/") {
            Some(StreamProtocol::HLS)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Some(StreamProtocol::HTTP)
        } else if url.starts_with("udp://") {
            Some(StreamProtocol::UDP)
        } else {
            None
        };

        match protocol {
            Some(protocol) => StreamSource::NetworkStream {
                url: url.to_string(),
                protocol,
            },
            // 默认当作本地文件
            None => StreamSource::LocalFile(PathBuf::from(url)),
        }
    }

    /// 传给解封装器的地址
    pub fn locator(&self) -> String {
        match self {
            StreamSource::LocalFile(path) => path.to_string_lossy().into_owned(),
            StreamSource::NetworkStream { url, .. } => url.clone(),
            StreamSource::Device { device, .. } => device.clone(),
        }
    }

    /// 需要强制指定的输入格式（仅采集设备）
    pub fn input_format(&self) -> Option<&str> {
        match self {
            StreamSource::Device { format, .. } => Some(format.as_str()),
            _ => None,
        }
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        matches!(self, StreamSource::NetworkStream { .. })
    }

    /// RTSP 选项只对 RTSP 源有意义
    pub fn is_rtsp(&self) -> bool {
        matches!(
            self,
            StreamSource::NetworkStream {
                protocol: StreamProtocol::RTSP,
                ..
            }
        )
    }
}

impl std::fmt::Display for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamSource::LocalFile(path) => write!(f, "{}", path.display()),
            StreamSource::NetworkStream { url, protocol } => {
                write!(f, "{} ({})", url, protocol.as_str())
            }
            StreamSource::Device { format, device } => write!(f, "{}://{}", format, device),
        }
    }
}

/// 流媒体协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    /// RTSP - 实时流协议（监控摄像头）
    RTSP,
    /// RTMP - 实时消息协议（直播流）
    RTMP,
    /// HLS - HTTP Live Streaming
    HLS,
    /// HTTP - 普通 HTTP 流
    HTTP,
    /// UDP - 裸 UDP/MPEG-TS 组播
    UDP,
}

impl StreamProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::RTSP => "RTSP",
            StreamProtocol::RTMP => "RTMP",
            StreamProtocol::HLS => "HLS",
            StreamProtocol::HTTP => "HTTP",
            StreamProtocol::UDP => "UDP",
        }
    }
}

/// RTSP 传输协议，数值与宿主约定一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum RtspTransport {
    #[default]
    Undefined = 0,
    Udp = 1,
    Tcp = 2,
    UdpMulticast = 3,
    Http = 4,
}

impl RtspTransport {
    /// FFmpeg `rtsp_transport` 选项值
    pub fn option_value(&self) -> Option<&'static str> {
        match self {
            RtspTransport::Undefined => None,
            RtspTransport::Udp => Some("udp"),
            RtspTransport::Tcp => Some("tcp"),
            RtspTransport::UdpMulticast => Some("udp_multicast"),
            RtspTransport::Http => Some("http"),
        }
    }
}

impl TryFrom<i32> for RtspTransport {
    type Error = PlayerError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(RtspTransport::Undefined),
            1 => Ok(RtspTransport::Udp),
            2 => Ok(RtspTransport::Tcp),
            3 => Ok(RtspTransport::UdpMulticast),
            4 => Ok(RtspTransport::Http),
            other => Err(PlayerError::InvalidOption(format!("未知的 RTSP 传输协议: {}", other))),
        }
    }
}

/// RTSP 标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum RtspFlags {
    #[default]
    None = 0,
    FilterSrc = 1,
    Listen = 2,
    PreferTcp = 3,
}

impl RtspFlags {
    /// FFmpeg `rtsp_flags` 选项值
    pub fn option_value(&self) -> Option<&'static str> {
        match self {
            RtspFlags::None => None,
            RtspFlags::FilterSrc => Some("filter_src"),
            RtspFlags::Listen => Some("listen"),
            RtspFlags::PreferTcp => Some("prefer_tcp"),
        }
    }
}

impl TryFrom<i32> for RtspFlags {
    type Error = PlayerError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(RtspFlags::None),
            1 => Ok(RtspFlags::FilterSrc),
            2 => Ok(RtspFlags::Listen),
            3 => Ok(RtspFlags::PreferTcp),
            other => Err(PlayerError::InvalidOption(format!("未知的 RTSP 标志: {}", other))),
        }
    }
}

/// 视频流的时间信息（秒）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamTiming {
    /// 每个时间戳刻度对应的秒数
    pub time_base: f64,
    /// 名义帧间隔
    pub frame_interval: f64,
}

impl StreamTiming {
    /// 由时间基和平均帧率构造；帧率无效时退回时间基
    pub fn new(time_base: f64, frame_rate: Option<f64>) -> Self {
        let frame_interval = match frame_rate {
            Some(fps) if fps.is_finite() && fps > 0.0 => 1.0 / fps,
            _ => time_base,
        };
        Self {
            time_base,
            frame_interval,
        }
    }
}

/// 解码出的一帧画面（紧凑排列的 RGB24）
#[derive(Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    timestamp: f64, // 显示时间戳（秒）
    data: Vec<u8>,
}

impl Frame {
    pub const BYTES_PER_PIXEL: usize = 3;

    /// `data` 必须恰好是 `width * height * 3` 字节
    pub fn new(width: u32, height: u32, timestamp: f64, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * Self::BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(PlayerError::InvalidOption(format!(
                "帧数据长度 {} 与 {}x{} RGB24 不符（应为 {}）",
                data.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            timestamp,
            data,
        })
    }

    /// 从带行填充的缓冲区拷贝出紧凑帧
    pub fn from_padded(
        width: u32,
        height: u32,
        timestamp: f64,
        stride: usize,
        src: &[u8],
    ) -> Result<Self> {
        let row_size = width as usize * Self::BYTES_PER_PIXEL;
        if stride < row_size || src.len() < stride * height.saturating_sub(1) as usize + row_size {
            return Err(PlayerError::InvalidOption(format!(
                "行跨度 {} / 缓冲区 {} 字节不足以容纳 {}x{} 帧",
                stride,
                src.len(),
                width,
                height
            )));
        }

        let mut data = vec![0u8; row_size * height as usize];
        for y in 0..height as usize {
            let src_offset = y * stride;
            let dst_offset = y * row_size;
            data[dst_offset..dst_offset + row_size]
                .copy_from_slice(&src[src_offset..src_offset + row_size]);
        }

        Ok(Self {
            width,
            height,
            timestamp,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn stride(&self) -> usize {
        self.width as usize * Self::BYTES_PER_PIXEL
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// 编码为 BMP 文件字节
    pub fn to_bmp(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.data.len() + 64);
        image::codecs::bmp::BmpEncoder::new(&mut out).encode(
            &self.data,
            self.width,
            self.height,
            image::ColorType::Rgb8,
        )?;
        Ok(out)
    }

    /// 按扩展名选择格式保存
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        image::save_buffer(path, &self.data, self.width, self.height, image::ColorType::Rgb8)?;
        Ok(())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp", &self.timestamp)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Opening = 1,
    Open = 2,
    Reading = 3,
    Stopped = 4,
    Failed = 5,
}

impl SessionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Opening,
            2 => SessionState::Open,
            3 => SessionState::Reading,
            4 => SessionState::Stopped,
            _ => SessionState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }
}

/// 播放器事件，按产生顺序投递给宿主
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// 首帧已就绪
    StreamStarted,
    /// 新的一帧成为当前帧
    FrameReceived(Arc<Frame>),
    /// 打开或解码失败
    StreamFailed(String),
    /// 流结束或被停止
    StreamStopped,
}
