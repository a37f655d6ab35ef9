use crate::core::{InputOptions, Result, StreamSource, StreamTiming};
use crate::player::watchdog::InterruptHandle;

/// 解码器一次取帧的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// 得到一帧画面，像素留在解码器内，由 `convert_picture` 取出
    Picture(PictureInfo),
    /// 需要继续送包
    NeedMoreInput,
    /// 解码器已清空
    EndOfStream,
}

/// 解码出的画面的时间信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PictureInfo {
    /// 以流时间基计的最佳时间戳
    pub best_effort_timestamp: Option<i64>,
    /// 额外重复的半帧数
    pub repeat_pict: i32,
}

/// 转换成显示格式（RGB24）后的像素
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayBuffer {
    pub width: u32,
    pub height: u32,
    /// 每行字节数，可能大于 `width * 3`
    pub stride: usize,
    pub data: Vec<u8>,
}

/// 压缩数据包（所有权从读包线程经队列转移给解码端）
pub trait MediaPacket: Send + 'static {
    /// 所属的流索引
    fn stream_index(&self) -> usize;
}

/// 视频解码器
pub trait VideoDecoder: Send + 'static {
    type Packet: MediaPacket;

    /// 送入一个数据包
    fn submit_packet(&mut self, packet: &Self::Packet) -> Result<()>;

    /// 通知输入结束，之后 `receive_picture` 依次吐出缓存的帧直到 `EndOfStream`
    fn submit_eof(&mut self) -> Result<()>;

    /// 取出下一帧
    fn receive_picture(&mut self) -> Result<DecodeStatus>;

    /// 把最近一次取出的画面转换为 RGB24
    fn convert_picture(&mut self) -> Result<DisplayBuffer>;
}

/// 已打开的输入（解封装端）
///
/// 不同的媒体源（本地文件、网络流、采集设备、测试桩）实现这个接口。
/// 实现必须在阻塞期间轮询打开时拿到的 `InterruptHandle`。
pub trait DemuxInput: Send + 'static {
    type Packet: MediaPacket;
    type Decoder: VideoDecoder<Packet = Self::Packet>;

    /// 探测流信息
    fn find_stream_info(&mut self) -> Result<()>;

    /// 第一个视频流的索引
    fn find_video_track(&self) -> Option<usize>;

    /// 视频流的时间基与名义帧间隔
    fn stream_timing(&self, track: usize) -> StreamTiming;

    /// 为视频流打开解码器
    fn open_decoder(&mut self, track: usize) -> Result<Self::Decoder>;

    /// 读取下一个数据包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达流末尾
    /// - Err(e): 读取错误（包括被看门狗中断）
    fn read_packet(&mut self) -> Result<Option<Self::Packet>>;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 解封装/解码库入口
pub trait MediaBackend: Send + Sync + 'static {
    type Input: DemuxInput;

    /// 打开输入，阻塞期间轮询 `interrupt`
    fn open_input(&self, source: &StreamSource, options: &InputOptions, interrupt: InterruptHandle)
        -> Result<Self::Input>;
}

/// 后端对应的数据包类型
pub type BackendPacket<B> = <<B as MediaBackend>::Input as DemuxInput>::Packet;

/// 后端对应的解码器类型
pub type BackendDecoder<B> = <<B as MediaBackend>::Input as DemuxInput>::Decoder;
