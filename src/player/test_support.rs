//! 测试用的脚本化后端：按配置产生数据包和画面，不依赖 FFmpeg。

use crate::core::{InputOptions, PlayerError, Result, StreamSource, StreamTiming};
use crate::player::demuxer_source::{
    DecodeStatus, DemuxInput, DisplayBuffer, MediaBackend, MediaPacket, PictureInfo, VideoDecoder,
};
use crate::player::watchdog::InterruptHandle;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const VIDEO_TRACK: usize = 0;
const AUDIO_TRACK: usize = 1;
const POLL: Duration = Duration::from_millis(5);

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 2;

/// 后端行为脚本
#[derive(Debug, Clone)]
pub struct Script {
    /// 可解出的画面数
    pub frames: usize,
    /// 每个包读取前的延迟
    pub packet_delay: Duration,
    /// 凑成一帧画面需要的包数
    pub packets_per_picture: usize,
    /// 画面是否带时间戳（1ms 时间基，25fps）
    pub timestamps: bool,
    /// 每 N 个包插入一个音频包
    pub audio_every: Option<usize>,
    /// 解码器缓存的画面数，冲刷时吐出
    pub decoder_delay: usize,
    /// 打开时一直阻塞，直到看门狗中断
    pub hang_on_open: bool,
    /// 只有这个源打开时阻塞
    pub hang_on: Option<String>,
    /// 读到第 N 个视频包后阻塞，直到看门狗中断
    pub hang_after: Option<usize>,
    /// 送入第 N 帧画面的包时解码失败
    pub fail_decode_at: Option<usize>,
    pub no_video: bool,
    pub no_decoder: bool,
}

impl Script {
    pub fn frames(frames: usize) -> Self {
        Self {
            frames,
            packet_delay: Duration::from_millis(1),
            packets_per_picture: 1,
            timestamps: true,
            audio_every: None,
            decoder_delay: 0,
            hang_on_open: false,
            hang_on: None,
            hang_after: None,
            fail_decode_at: None,
            no_video: false,
            no_decoder: false,
        }
    }
}

#[derive(Default)]
struct Counters {
    live_packets: AtomicUsize,
    live_inputs: AtomicUsize,
    foreign_submitted: AtomicUsize,
}

pub struct ScriptedBackend {
    script: Script,
    counters: Arc<Counters>,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            counters: Arc::new(Counters::default()),
        }
    }

    /// 尚未释放的数据包
    pub fn live_packets(&self) -> usize {
        self.counters.live_packets.load(Ordering::SeqCst)
    }

    /// 尚未释放的输入
    pub fn live_inputs(&self) -> usize {
        self.counters.live_inputs.load(Ordering::SeqCst)
    }

    /// 解码器收到的非视频包
    pub fn submitted_foreign_packets(&self) -> usize {
        self.counters.foreign_submitted.load(Ordering::SeqCst)
    }
}

fn wait_for_abort(interrupt: &InterruptHandle) -> PlayerError {
    while !interrupt.should_abort() {
        thread::sleep(POLL);
    }
    PlayerError::Other("blocking call aborted".into())
}

impl MediaBackend for ScriptedBackend {
    type Input = ScriptedInput;

    fn open_input(
        &self,
        source: &StreamSource,
        _options: &InputOptions,
        interrupt: InterruptHandle,
    ) -> Result<ScriptedInput> {
        let hangs_here = self.script.hang_on.as_deref() == Some(source.locator().as_str());
        if self.script.hang_on_open || hangs_here {
            return Err(wait_for_abort(&interrupt));
        }

        self.counters.live_inputs.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedInput {
            script: self.script.clone(),
            counters: self.counters.clone(),
            interrupt,
            video_sent: 0,
            steps: 0,
        })
    }
}

pub struct ScriptedPacket {
    stream_index: usize,
    seq: usize,
    counters: Arc<Counters>,
}

impl ScriptedPacket {
    fn new(stream_index: usize, seq: usize, counters: &Arc<Counters>) -> Self {
        counters.live_packets.fetch_add(1, Ordering::SeqCst);
        Self {
            stream_index,
            seq,
            counters: counters.clone(),
        }
    }
}

impl Drop for ScriptedPacket {
    fn drop(&mut self) {
        self.counters.live_packets.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MediaPacket for ScriptedPacket {
    fn stream_index(&self) -> usize {
        self.stream_index
    }
}

pub struct ScriptedInput {
    script: Script,
    counters: Arc<Counters>,
    interrupt: InterruptHandle,
    video_sent: usize,
    steps: usize,
}

impl Drop for ScriptedInput {
    fn drop(&mut self) {
        self.counters.live_inputs.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DemuxInput for ScriptedInput {
    type Packet = ScriptedPacket;
    type Decoder = ScriptedDecoder;

    fn find_stream_info(&mut self) -> Result<()> {
        Ok(())
    }

    fn find_video_track(&self) -> Option<usize> {
        (!self.script.no_video).then_some(VIDEO_TRACK)
    }

    fn stream_timing(&self, _track: usize) -> StreamTiming {
        StreamTiming::new(0.001, Some(25.0))
    }

    fn open_decoder(&mut self, _track: usize) -> Result<ScriptedDecoder> {
        if self.script.no_decoder {
            return Err(PlayerError::DecoderNotFound);
        }
        Ok(ScriptedDecoder {
            script: self.script.clone(),
            counters: self.counters.clone(),
            held: VecDeque::new(),
            ready: VecDeque::new(),
            last: None,
            eof: false,
        })
    }

    fn read_packet(&mut self) -> Result<Option<ScriptedPacket>> {
        if self.script.hang_after.is_some_and(|n| self.video_sent >= n) {
            return Err(wait_for_abort(&self.interrupt));
        }
        if self.video_sent >= self.script.frames * self.script.packets_per_picture {
            return Ok(None);
        }

        if !self.script.packet_delay.is_zero() {
            thread::sleep(self.script.packet_delay);
        }

        self.steps += 1;
        if self.script.audio_every.is_some_and(|n| self.steps % n == 0) {
            return Ok(Some(ScriptedPacket::new(AUDIO_TRACK, 0, &self.counters)));
        }

        let packet = ScriptedPacket::new(VIDEO_TRACK, self.video_sent, &self.counters);
        self.video_sent += 1;
        Ok(Some(packet))
    }

    fn description(&self) -> String {
        format!("Scripted: {} frames", self.script.frames)
    }
}

pub struct ScriptedDecoder {
    script: Script,
    counters: Arc<Counters>,
    held: VecDeque<usize>,
    ready: VecDeque<usize>,
    last: Option<usize>,
    eof: bool,
}

impl VideoDecoder for ScriptedDecoder {
    type Packet = ScriptedPacket;

    fn submit_packet(&mut self, packet: &ScriptedPacket) -> Result<()> {
        if packet.stream_index != VIDEO_TRACK {
            self.counters.foreign_submitted.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let picture = packet.seq / self.script.packets_per_picture;
        if self.script.fail_decode_at == Some(picture) {
            return Err(PlayerError::DecodeError(format!("corrupt picture {}", picture)));
        }

        if (packet.seq + 1) % self.script.packets_per_picture == 0 {
            self.held.push_back(picture);
            while self.held.len() > self.script.decoder_delay {
                if let Some(p) = self.held.pop_front() {
                    self.ready.push_back(p);
                }
            }
        }
        Ok(())
    }

    fn submit_eof(&mut self) -> Result<()> {
        self.eof = true;
        self.ready.extend(self.held.drain(..));
        Ok(())
    }

    fn receive_picture(&mut self) -> Result<DecodeStatus> {
        if let Some(picture) = self.ready.pop_front() {
            self.last = Some(picture);
            let best_effort_timestamp = self.script.timestamps.then_some(picture as i64 * 40);
            return Ok(DecodeStatus::Picture(PictureInfo {
                best_effort_timestamp,
                repeat_pict: 0,
            }));
        }

        if self.eof {
            Ok(DecodeStatus::EndOfStream)
        } else {
            Ok(DecodeStatus::NeedMoreInput)
        }
    }

    fn convert_picture(&mut self) -> Result<DisplayBuffer> {
        let picture = self
            .last
            .ok_or_else(|| PlayerError::DecodeError("no picture".into()))?;

        // 每行 12 字节像素 + 4 字节填充
        let stride = WIDTH as usize * 3 + 4;
        Ok(DisplayBuffer {
            width: WIDTH,
            height: HEIGHT,
            stride,
            data: vec![picture as u8; stride * HEIGHT as usize],
        })
    }
}
