use crate::core::error::{PlayerError, Result};
use crate::core::types::{RtspFlags, RtspTransport, StreamSource};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 默认连接 / 读帧超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// 读包线程的队列软上限（包）
pub const DEFAULT_PACKET_QUEUE_CAPACITY: usize = 200;

/// 队列满时两次检查之间的休眠
pub const DEFAULT_BACKPRESSURE_POLL: Duration = Duration::from_millis(10);

/// 一次播放的参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerOptions {
    /// 打开流的最长等待时间
    #[serde(rename = "connection_timeout_ms", with = "duration_ms")]
    pub connection_timeout: Duration,
    /// 两次成功读包之间的最长等待时间
    #[serde(rename = "read_timeout_ms", with = "duration_ms")]
    pub read_timeout: Duration,
    pub transport: RtspTransport,
    pub flags: RtspFlags,
    pub packet_queue_capacity: usize,
    #[serde(rename = "backpressure_poll_ms", with = "duration_ms")]
    pub backpressure_poll: Duration,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            transport: RtspTransport::Undefined,
            flags: RtspFlags::None,
            packet_queue_capacity: DEFAULT_PACKET_QUEUE_CAPACITY,
            backpressure_poll: DEFAULT_BACKPRESSURE_POLL,
        }
    }
}

impl PlayerOptions {
    /// 从 JSON 文件加载，缺省字段取默认值
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(text)
            .map_err(|e| PlayerError::InvalidOption(format!("配置解析失败: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection_timeout.is_zero() {
            return Err(PlayerError::InvalidOption("连接超时必须大于 0".into()));
        }
        if self.read_timeout.is_zero() {
            return Err(PlayerError::InvalidOption("读帧超时必须大于 0".into()));
        }
        if self.packet_queue_capacity == 0 {
            return Err(PlayerError::InvalidOption("包队列容量必须大于 0".into()));
        }
        Ok(())
    }

    /// 交给解封装器的输入选项
    pub fn input_options(&self, source: &StreamSource) -> InputOptions {
        InputOptions {
            transport: self.transport,
            flags: self.flags,
            format: source.input_format().map(str::to_string),
            rtsp: source.is_rtsp(),
        }
    }
}

/// 打开输入时传给后端的选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputOptions {
    pub transport: RtspTransport,
    pub flags: RtspFlags,
    /// 强制使用的输入格式（采集设备）
    pub format: Option<String>,
    /// 源是否为 RTSP
    pub rtsp: bool,
}

impl InputOptions {
    /// 按顺序给出的 FFmpeg 选项键值对
    pub fn dictionary_entries(&self) -> Vec<(&'static str, &'static str)> {
        let mut entries = Vec::new();
        if !self.rtsp {
            return entries;
        }
        if let Some(value) = self.transport.option_value() {
            entries.push(("rtsp_transport", value));
        }
        if let Some(value) = self.flags.option_value() {
            entries.push(("rtsp_flags", value));
        }
        entries
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
