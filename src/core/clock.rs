use crate::core::types::StreamTiming;
use std::time::Instant;

/// 首个真实时间戳出现之前使用的帧间隔（秒）
pub const DEFAULT_FRAME_DELAY: f64 = 0.040;

/// 单帧等待时间下限（秒）
pub const MIN_FRAME_DELAY: f64 = 0.010;

/// 相邻时间戳差值达到该值即视为跳变（秒）
pub const MAX_FRAME_DELTA: f64 = 1.0;

/// 视频时钟 - 由解码出的 PTS 推算“当前流时间”
#[derive(Debug, Clone)]
pub struct VideoClock {
    timing: StreamTiming,
    clock: f64, // 上一帧 PTS / 预测的下一帧 PTS（秒）
}

impl VideoClock {
    pub fn new(timing: StreamTiming) -> Self {
        Self { timing, clock: 0.0 }
    }

    /// 计算一帧的显示时间戳，并把时钟推进一个名义帧间隔
    ///
    /// 有效时间戳会重置时钟；没有时间戳时沿用当前时钟值。
    /// `repeat_pict` 表示解码器要求额外重复的半帧数。
    pub fn timestamp(&mut self, best_effort_timestamp: Option<i64>, repeat_pict: i32) -> f64 {
        let timestamp = match best_effort_timestamp {
            Some(ts) => {
                let pts = ts as f64 * self.timing.time_base;
                self.clock = pts;
                pts
            }
            None => self.clock,
        };

        let mut frame_delay = self.timing.frame_interval;
        if repeat_pict > 0 {
            frame_delay += repeat_pict as f64 * (frame_delay * 0.5);
        }
        self.clock += frame_delay;

        timestamp
    }

    /// 当前时钟值（秒）
    pub fn now(&self) -> f64 {
        self.clock
    }
}

/// 帧节拍器 - 把帧时间戳换算成现实时间的等待间隔
///
/// 内部维护一个视频计时器，每帧推进“本帧应持续的时长”，
/// 与墙上时钟比较后得到实际等待时间。落后时等待会被压到下限，
/// 从而逐步追上而不是积压。
#[derive(Debug, Clone)]
pub struct FramePacer {
    origin: Instant,
    video_timer: f64,
    last_frame_timestamp: f64,
    last_frame_delay: f64,
}

impl FramePacer {
    /// 以“现在”为基准创建
    pub fn new() -> Self {
        let origin = Instant::now();
        Self {
            origin,
            video_timer: 0.0,
            last_frame_timestamp: 0.0,
            last_frame_delay: DEFAULT_FRAME_DELAY,
        }
    }

    /// 重新以“现在”为基准
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// 距创建时刻的墙上时间（秒）
    pub fn wall_clock(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    /// 帧间等待时间（毫秒）
    pub fn interframe_delay_ms(&mut self, frame_timestamp: f64) -> u64 {
        let now = self.wall_clock();
        self.interframe_delay_at(frame_timestamp, now)
    }

    /// 以给定墙上时间 `now`（秒，相对创建时刻）计算等待时间
    pub fn interframe_delay_at(&mut self, frame_timestamp: f64, now: f64) -> u64 {
        let mut delay = frame_timestamp - self.last_frame_timestamp;
        if delay <= 0.0 || delay >= MAX_FRAME_DELTA || !delay.is_finite() {
            // 时间戳倒退或跳变，沿用上一帧的间隔
            delay = self.last_frame_delay;
        }

        self.last_frame_delay = delay;
        self.last_frame_timestamp = frame_timestamp;

        self.video_timer += delay;

        let actual_delay = (self.video_timer - now).max(MIN_FRAME_DELAY);
        (actual_delay * 1000.0).round() as u64
    }

    /// 上一次采用的帧间隔（秒）
    pub fn last_frame_delay(&self) -> f64 {
        self.last_frame_delay
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new()
    }
}
