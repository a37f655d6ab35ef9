use crate::core::{
    log_ctx, Frame, FramePacer, PlayerError, PlayerOptions, Result, SessionState, StreamSource,
    StreamTiming, VideoClock,
};
use crate::player::demuxer_source::{
    BackendDecoder, BackendPacket, DecodeStatus, DemuxInput, MediaBackend, MediaPacket,
    VideoDecoder,
};
use crate::player::queue::PacketQueue;
use crate::player::watchdog::{AbortReason, InterruptHandle, Watchdog};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 队列里的元素：`None` 是“没有更多数据”的哨兵
type QueueItem<B> = Option<BackendPacket<B>>;

/// 读包线程打开成功后交给拉帧端的东西
struct OpenedStream<D> {
    decoder: D,
    timing: StreamTiming,
    pacer: FramePacer,
}

/// 拉帧端独占的解码状态
struct DecodeState<D> {
    decoder: D,
    clock: VideoClock,
    pacer: FramePacer,
    flushing: bool,
}

/// 读包线程需要的上下文
struct ReaderContext<B: MediaBackend> {
    backend: Arc<B>,
    source: StreamSource,
    options: PlayerOptions,
    watchdog: Arc<Watchdog>,
    queue: Arc<PacketQueue<QueueItem<B>>>,
    read_error: Arc<Mutex<Option<String>>>,
}

/// 一次针对某个源的播放尝试
///
/// 创建时即启动后台线程：先打开输入和解码器（结果通过一次性通道通知
/// `wait_for_open`），然后循环读包放进队列。拉帧端调用 `next_frame`
/// 解出画面并计算时间戳，`interframe_delay_ms` 给出节拍。
pub struct StreamSession<B: MediaBackend> {
    source: StreamSource,
    watchdog: Arc<Watchdog>,
    queue: Arc<PacketQueue<QueueItem<B>>>,
    open_rx: Receiver<Result<OpenedStream<BackendDecoder<B>>>>,
    decode: Mutex<Option<DecodeState<BackendDecoder<B>>>>,
    open_error: Mutex<Option<String>>,
    read_error: Arc<Mutex<Option<String>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl<B: MediaBackend> StreamSession<B> {
    /// 启动读包线程并开始打开
    pub fn start(backend: Arc<B>, source: StreamSource, options: PlayerOptions) -> Result<Self> {
        options.validate()?;

        let watchdog = Arc::new(Watchdog::new(options.connection_timeout, options.read_timeout));
        let queue = Arc::new(PacketQueue::with_capacity(options.packet_queue_capacity));
        let read_error = Arc::new(Mutex::new(None));
        let (open_tx, open_rx) = bounded(1);

        watchdog.start_connection();
        watchdog.set_state(SessionState::Opening);

        let ctx = ReaderContext {
            backend,
            source: source.clone(),
            options,
            watchdog: watchdog.clone(),
            queue: queue.clone(),
            read_error: read_error.clone(),
        };

        let handle = thread::Builder::new()
            .name("stream-reader".into())
            .spawn(move || Self::open_and_read(ctx, open_tx))?;

        Ok(Self {
            source,
            watchdog,
            queue,
            open_rx,
            decode: Mutex::new(None),
            open_error: Mutex::new(None),
            read_error,
            reader: Mutex::new(Some(handle)),
        })
    }

    /// 阻塞直到打开成功或失败
    pub fn wait_for_open(&self) -> Result<()> {
        if self.decode.lock().is_some() {
            return Ok(());
        }

        match self.open_rx.recv() {
            Ok(Ok(opened)) => {
                *self.decode.lock() = Some(DecodeState {
                    decoder: opened.decoder,
                    clock: VideoClock::new(opened.timing),
                    pacer: opened.pacer,
                    flushing: false,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                *self.open_error.lock() = Some(e.to_string());
                Err(e)
            }
            // 结果已被取走（或线程异常退出）
            Err(_) => {
                if self.decode.lock().is_some() {
                    Ok(())
                } else {
                    let message = self
                        .open_error
                        .lock()
                        .clone()
                        .unwrap_or_else(|| "读包线程未返回打开结果".to_string());
                    Err(PlayerError::OpenError(message))
                }
            }
        }
    }

    /// 读包线程主体
    fn open_and_read(
        ctx: ReaderContext<B>,
        open_tx: Sender<Result<OpenedStream<BackendDecoder<B>>>>,
    ) {
        info!("{} 🎬 读包线程启动: {}", log_ctx(), ctx.source);

        let (input, track) = match Self::open(&ctx) {
            Ok((input, track, opened)) => {
                ctx.watchdog.set_state(SessionState::Open);
                info!("{} ✅ 流已打开: {}（视频流 #{}）", log_ctx(), input.description(), track);
                // 接收端随会话存活，发送不会失败
                let _ = open_tx.send(Ok(opened));
                drop(open_tx);
                (input, track)
            }
            Err(e) => {
                let state = if matches!(e, PlayerError::Interrupted) {
                    SessionState::Stopped
                } else {
                    SessionState::Failed
                };
                ctx.watchdog.set_state(state);
                error!("{} ❌ 打开失败: {}", log_ctx(), e);
                let _ = open_tx.send(Err(e));
                return;
            }
        };

        Self::read_loop(&ctx, input, track);
    }

    /// 打开输入、选择视频流、打开解码器；任何一步失败都会释放已获得的资源
    fn open(ctx: &ReaderContext<B>) -> Result<(B::Input, usize, OpenedStream<BackendDecoder<B>>)> {
        let attempt = || -> Result<_> {
            let input_options = ctx.options.input_options(&ctx.source);
            let interrupt = InterruptHandle::new(ctx.watchdog.clone());

            let mut input = ctx.backend.open_input(&ctx.source, &input_options, interrupt)?;
            input.find_stream_info()?;

            let track = input.find_video_track().ok_or(PlayerError::NoVideoStream)?;
            let decoder = input.open_decoder(track)?;
            let timing = input.stream_timing(track);
            debug!("视频流时间基: {:.6}s, 名义帧间隔: {:.4}s", timing.time_base, timing.frame_interval);

            Ok((
                input,
                track,
                OpenedStream {
                    decoder,
                    timing,
                    pacer: FramePacer::new(),
                },
            ))
        };

        attempt().map_err(|e| match ctx.watchdog.abort_reason() {
            Some(AbortReason::StopRequested) => PlayerError::Interrupted,
            Some(AbortReason::ConnectionTimeout) => {
                PlayerError::ConnectionTimeout(ctx.watchdog.connection_timeout())
            }
            _ => e,
        })
    }

    /// 读包循环：只保留视频流的包；出错或结束时放入哨兵
    fn read_loop(ctx: &ReaderContext<B>, mut input: B::Input, track: usize) {
        const LOG_FIRST_N: usize = 5;

        let capacity = ctx.options.packet_queue_capacity;
        let mut packet_count: usize = 0;
        let mut skipped_count: usize = 0;

        ctx.watchdog.set_state(SessionState::Reading);

        'read: while !ctx.watchdog.is_stop_requested() {
            // 背压：队列满时短睡眠，避免忙等
            while ctx.queue.len() >= capacity {
                if ctx.watchdog.is_stop_requested() {
                    break 'read;
                }
                thread::sleep(ctx.options.backpressure_poll);
            }

            ctx.watchdog.mark_read_start();
            match input.read_packet() {
                Ok(Some(packet)) => {
                    if packet.stream_index() != track {
                        skipped_count += 1;
                        continue;
                    }

                    packet_count += 1;
                    if packet_count <= LOG_FIRST_N || packet_count % 100 == 0 {
                        debug!("{} 📦 读取视频包 #{}（队列 {}）", log_ctx(), packet_count, ctx.queue.len());
                    }
                    ctx.queue.push(Some(packet));
                }
                Ok(None) => {
                    info!("{} 📄 到达流末尾", log_ctx());
                    ctx.watchdog.set_state(SessionState::Stopped);
                    ctx.queue.push(None);
                    break;
                }
                Err(e) => {
                    let e = match ctx.watchdog.abort_reason() {
                        Some(AbortReason::StopRequested) => PlayerError::Interrupted,
                        Some(AbortReason::ReadTimeout) => {
                            PlayerError::ReadTimeout(ctx.watchdog.read_timeout())
                        }
                        _ => e,
                    };

                    if matches!(e, PlayerError::Interrupted) {
                        ctx.watchdog.set_state(SessionState::Stopped);
                    } else {
                        warn!("{} ⚠ 读取包失败: {}", log_ctx(), e);
                        *ctx.read_error.lock() = Some(e.to_string());
                        ctx.watchdog.set_state(SessionState::Failed);
                    }
                    // 错误与结束走同一个哨兵，拉帧端只看到“没有更多数据”
                    ctx.queue.push(None);
                    break;
                }
            }
        }

        if !ctx.watchdog.state().is_terminal() {
            ctx.watchdog.set_state(SessionState::Stopped);
        }

        info!(
            "{} 🛑 读包线程退出（视频包 {} 个，丢弃其他流 {} 个）",
            log_ctx(),
            packet_count,
            skipped_count
        );
        // input 在此处释放：读包已经结束
    }

    /// 解出下一帧；`Ok(None)` 表示流结束（或已停止）
    pub fn next_frame(&self) -> Result<Option<Frame>> {
        let mut guard = self.decode.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| PlayerError::Other("会话尚未打开".to_string()))?;

        loop {
            if self.watchdog.is_stop_requested() {
                return Ok(None);
            }

            match state.decoder.receive_picture().map_err(into_decode_error)? {
                DecodeStatus::Picture(info) => {
                    let timestamp = state
                        .clock
                        .timestamp(info.best_effort_timestamp, info.repeat_pict);
                    let buffer = state.decoder.convert_picture().map_err(into_decode_error)?;
                    let frame = Frame::from_padded(
                        buffer.width,
                        buffer.height,
                        timestamp,
                        buffer.stride,
                        &buffer.data,
                    )?;
                    return Ok(Some(frame));
                }
                DecodeStatus::EndOfStream => return Ok(None),
                DecodeStatus::NeedMoreInput if state.flushing => return Ok(None),
                DecodeStatus::NeedMoreInput => {}
            }

            match self.queue.wait_and_pop() {
                Some(Some(packet)) => {
                    state.decoder.submit_packet(&packet).map_err(into_decode_error)?;
                }
                Some(None) => {
                    if self.read_error.lock().is_some() {
                        return Ok(None);
                    }
                    // 正常结束：冲刷解码器里缓存的帧
                    state.decoder.submit_eof().map_err(into_decode_error)?;
                    state.flushing = true;
                }
                None => return Ok(None),
            }
        }
    }

    /// 根据帧时间戳计算本帧显示后应等待的毫秒数
    pub fn interframe_delay_ms(&self, frame_timestamp: f64) -> u64 {
        match self.decode.lock().as_mut() {
            Some(state) => state.pacer.interframe_delay_ms(frame_timestamp),
            None => (crate::core::DEFAULT_FRAME_DELAY * 1000.0).round() as u64,
        }
    }

    /// 停止：中断等待、排空队列、等待读包线程结束；可重复调用
    pub fn stop(&self) {
        self.watchdog.request_stop();
        self.queue.stop_wait();

        let mut dropped = self.queue.drain().len();

        if let Some(handle) = self.reader.lock().take() {
            if handle.join().is_err() {
                error!("{} ❌ 读包线程异常退出", log_ctx());
            }
            // 线程结束前可能又放进了包
            dropped += self.queue.drain().len();
            info!("{} ⏹️  会话已停止: {}（丢弃 {} 个排队包）", log_ctx(), self.source, dropped);
        }

        if !self.watchdog.state().is_terminal() {
            self.watchdog.set_state(SessionState::Stopped);
        }
    }

    pub fn state(&self) -> SessionState {
        self.watchdog.state()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.watchdog.is_stop_requested()
    }

    /// 读包线程记录的错误（正常结束时为 `None`）
    pub fn read_error(&self) -> Option<String> {
        self.read_error.lock().clone()
    }

    pub fn source(&self) -> &StreamSource {
        &self.source
    }

    /// 当前排队的包数
    pub fn queued_packets(&self) -> usize {
        self.queue.len()
    }
}

impl<B: MediaBackend> Drop for StreamSession<B> {
    fn drop(&mut self) {
        if self.reader.lock().is_some() {
            warn!("{} ⚠ StreamSession 被 drop，但未调用 stop()，正在停止", log_ctx());
            self.stop();
        }
    }
}

fn into_decode_error(e: PlayerError) -> PlayerError {
    match e {
        PlayerError::DecodeError(_) => e,
        other => PlayerError::DecodeError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::test_support::{Script, ScriptedBackend};
    use std::time::{Duration, Instant};

    fn options() -> PlayerOptions {
        PlayerOptions {
            connection_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    fn start(script: Script) -> (Arc<ScriptedBackend>, StreamSession<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::new(script));
        let session =
            StreamSession::start(backend.clone(), StreamSource::parse("test://clip"), options())
                .unwrap();
        (backend, session)
    }

    #[test]
    fn test_decodes_all_frames_in_order() {
        let (_, session) = start(Script::frames(10));
        session.wait_for_open().unwrap();

        let mut timestamps = Vec::new();
        while let Some(frame) = session.next_frame().unwrap() {
            assert_eq!((frame.width(), frame.height()), (4, 2));
            timestamps.push(frame.timestamp());
        }

        assert_eq!(timestamps.len(), 10);
        for (i, ts) in timestamps.iter().enumerate() {
            assert!((ts - i as f64 * 0.04).abs() < 1e-9);
        }
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.read_error().is_none());
    }

    #[test]
    fn test_non_video_packets_are_dropped_at_source() {
        let script = Script {
            audio_every: Some(2),
            ..Script::frames(6)
        };
        let (backend, session) = start(script);
        session.wait_for_open().unwrap();

        let mut count = 0;
        while session.next_frame().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 6);
        // 解码器从未收到音频包
        assert_eq!(backend.submitted_foreign_packets(), 0);
    }

    #[test]
    fn test_two_packets_per_picture_and_missing_timestamps() {
        let script = Script {
            packets_per_picture: 2,
            timestamps: false,
            ..Script::frames(4)
        };
        let (_, session) = start(script);
        session.wait_for_open().unwrap();

        let mut timestamps = Vec::new();
        while let Some(frame) = session.next_frame().unwrap() {
            timestamps.push(frame.timestamp());
        }
        // 无时间戳时由视频时钟按名义帧间隔推算
        assert_eq!(timestamps.len(), 4);
        assert!((timestamps[3] - 0.12).abs() < 1e-9);
    }

    #[test]
    fn test_decoder_holds_back_frames_until_flushed() {
        let script = Script {
            decoder_delay: 2,
            ..Script::frames(5)
        };
        let (_, session) = start(script);
        session.wait_for_open().unwrap();

        let mut count = 0;
        while session.next_frame().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 5);
    }

    #[test]
    fn test_connection_timeout() {
        let script = Script {
            hang_on_open: true,
            ..Script::frames(1)
        };
        let started = Instant::now();
        let (_, session) = start(script);
        let err = session.wait_for_open().unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.is_timeout(), "unexpected error: {}", err);
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(900), "took {:?}", elapsed);
        assert_eq!(session.state(), SessionState::Failed);
        session.stop();
    }

    #[test]
    fn test_open_errors() {
        let (_, session) = start(Script {
            no_video: true,
            ..Script::frames(1)
        });
        assert!(matches!(session.wait_for_open(), Err(PlayerError::NoVideoStream)));
        // 再次等待返回同样的失败
        assert!(session.wait_for_open().is_err());

        let (backend, session) = start(Script {
            no_decoder: true,
            ..Script::frames(1)
        });
        assert!(matches!(session.wait_for_open(), Err(PlayerError::DecoderNotFound)));
        session.stop();
        assert_eq!(backend.live_inputs(), 0);
    }

    #[test]
    fn test_read_timeout_ends_stream_with_error() {
        let script = Script {
            hang_after: Some(3),
            ..Script::frames(10)
        };
        let (_, session) = start(script);
        session.wait_for_open().unwrap();

        let mut count = 0;
        while session.next_frame().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert!(session.read_error().unwrap_or_default().contains("500ms"));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_decode_error_is_propagated() {
        let script = Script {
            fail_decode_at: Some(2),
            ..Script::frames(5)
        };
        let (_, session) = start(script);
        session.wait_for_open().unwrap();

        assert!(session.next_frame().unwrap().is_some());
        assert!(session.next_frame().unwrap().is_some());
        assert!(matches!(session.next_frame(), Err(PlayerError::DecodeError(_))));
        session.stop();
    }

    #[test]
    fn test_stop_is_idempotent_and_frees_queued_packets() {
        let script = Script {
            packet_delay: Duration::ZERO,
            ..Script::frames(50)
        };
        let (backend, session) = start(script);
        session.wait_for_open().unwrap();
        thread::sleep(Duration::from_millis(50));

        session.stop();
        session.stop();
        assert_eq!(session.queued_packets(), 0);
        // 所有读出的包都已释放，没有重复释放
        assert_eq!(backend.live_packets(), 0);
        assert_eq!(session.next_frame().unwrap(), None);
    }

    #[test]
    fn test_stop_during_open() {
        let script = Script {
            hang_on_open: true,
            ..Script::frames(1)
        };
        let backend = Arc::new(ScriptedBackend::new(script));
        let mut opts = options();
        opts.connection_timeout = Duration::from_secs(30);
        let session =
            StreamSession::start(backend, StreamSource::parse("test://clip"), opts).unwrap();

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        session.stop();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(matches!(session.wait_for_open(), Err(PlayerError::Interrupted)));
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn test_reader_respects_queue_capacity() {
        let script = Script {
            packet_delay: Duration::ZERO,
            ..Script::frames(100)
        };
        let backend = Arc::new(ScriptedBackend::new(script));
        let mut opts = options();
        opts.packet_queue_capacity = 8;
        opts.backpressure_poll = Duration::from_millis(1);
        let session =
            StreamSession::start(backend, StreamSource::parse("test://clip"), opts).unwrap();
        session.wait_for_open().unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(session.queued_packets() <= 8);

        let mut count = 0;
        while session.next_frame().unwrap().is_some() {
            count += 1;
            assert!(session.queued_packets() <= 9);
        }
        assert_eq!(count, 100);
    }
}
