use crate::core::{log_ctx, Frame, PlayerError, PlayerEvent, PlayerOptions, Result, StreamSource};
use crate::player::demuxer_source::MediaBackend;
use crate::player::session::StreamSession;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 节拍睡眠的切片，保证停止请求能及时生效
const PACING_SLICE: Duration = Duration::from_millis(10);

/// 播放循环与宿主共享的状态
struct Shared<B: MediaBackend> {
    /// 当前会话（至多一个）
    session: Mutex<Option<Arc<StreamSession<B>>>>,
    /// 最近发布的一帧；与队列的锁分开
    frame: Mutex<Option<Arc<Frame>>>,
    /// 播放循环是否在运行（启动互斥）
    playing: AtomicBool,
    /// 宿主请求了停止
    stop_requested: AtomicBool,
    events: Sender<PlayerEvent>,
}

impl<B: MediaBackend> Shared<B> {
    fn emit(&self, event: PlayerEvent) {
        // 宿主丢掉接收端后事件无人关心
        if self.events.send(event).is_err() {
            debug!("{} 事件接收端已关闭", log_ctx());
        }
    }
}

/// 播放循环退出时释放启动互斥
struct PlayGuard<'a>(&'a AtomicBool);

impl Drop for PlayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 播放控制器
///
/// 同一时刻最多持有一个 `StreamSession`，在后台线程拉帧、按节拍发布当前帧，
/// 并把会话的生命周期以 `PlayerEvent` 投递给宿主。
pub struct Player<B: MediaBackend> {
    backend: Arc<B>,
    shared: Arc<Shared<B>>,
    events: Receiver<PlayerEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<B: MediaBackend> Player<B> {
    pub fn new(backend: B) -> Self {
        Self::with_backend(Arc::new(backend))
    }

    /// 创建播放器并取得事件接收端
    pub fn with_events(backend: B) -> (Self, Receiver<PlayerEvent>) {
        let player = Self::new(backend);
        let events = player.events();
        (player, events)
    }

    /// 与其他持有者共享同一个后端
    pub fn with_backend(backend: Arc<B>) -> Self {
        info!("{} 🎮 创建播放器", log_ctx());
        let (tx, rx) = unbounded();
        Self {
            backend,
            shared: Arc::new(Shared {
                session: Mutex::new(None),
                frame: Mutex::new(None),
                playing: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                events: tx,
            }),
            events: rx,
            worker: Mutex::new(None),
        }
    }

    /// 事件接收端（多个克隆之间分摊事件）
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events.clone()
    }

    /// 开始播放
    ///
    /// 已有播放循环在运行时直接返回 `false`，不排队、不阻塞。
    pub fn start_play(&self, url: &str, options: PlayerOptions) -> bool {
        if self
            .shared
            .playing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("{} 播放已在进行，忽略 start_play({})", log_ctx(), url);
            return false;
        }

        let mut worker = self.worker.lock();
        // 上一个播放循环已经放开互斥，等它把终止事件发完
        if let Some(previous) = worker.take() {
            if previous.join().is_err() {
                error!("{} ❌ 上一个播放线程异常退出", log_ctx());
            }
        }

        self.shared.stop_requested.store(false, Ordering::Release);

        let source = StreamSource::parse(url);
        info!("{} ▶️  开始播放: {}", log_ctx(), source);

        let shared = self.shared.clone();
        let backend = self.backend.clone();
        let spawned = thread::Builder::new()
            .name("play-loop".into())
            .spawn(move || Self::play_loop(shared, backend, source, options));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                true
            }
            Err(e) => {
                self.shared.playing.store(false, Ordering::Release);
                error!("{} ❌ 无法创建播放线程: {}", log_ctx(), e);
                self.shared.emit(PlayerEvent::StreamFailed(PlayerError::from(e).to_string()));
                false
            }
        }
    }

    /// 播放线程主体：打开会话、拉帧、发布、节拍睡眠
    fn play_loop(
        shared: Arc<Shared<B>>,
        backend: Arc<B>,
        source: StreamSource,
        options: PlayerOptions,
    ) {
        let guard = PlayGuard(&shared.playing);

        let outcome = Self::run_session(&shared, backend, source, options);

        // 先放开互斥，宿主收到终止事件后可以立即重新开始
        drop(guard);

        match outcome {
            Ok(()) => {
                info!("{} ⏹️  流已停止", log_ctx());
                shared.emit(PlayerEvent::StreamStopped);
            }
            Err(PlayerError::Interrupted) => {
                info!("{} ⏹️  打开被停止请求中断", log_ctx());
                shared.emit(PlayerEvent::StreamStopped);
            }
            Err(e) if shared.stop_requested.load(Ordering::Acquire) => {
                debug!("{} 停止过程中的错误: {}", log_ctx(), e);
                shared.emit(PlayerEvent::StreamStopped);
            }
            Err(e) => {
                error!("{} ❌ 播放失败: {}", log_ctx(), e);
                shared.emit(PlayerEvent::StreamFailed(e.to_string()));
            }
        }
    }

    fn run_session(
        shared: &Shared<B>,
        backend: Arc<B>,
        source: StreamSource,
        options: PlayerOptions,
    ) -> Result<()> {
        // 当前帧只属于一个会话
        shared.frame.lock().take();

        let session = Arc::new(StreamSession::start(backend, source, options)?);

        {
            let mut slot = shared.session.lock();
            // 在会话登记之前到达的停止请求
            if shared.stop_requested.load(Ordering::Acquire) {
                drop(slot);
                session.stop();
                return Err(PlayerError::Interrupted);
            }
            *slot = Some(session.clone());
        }

        let result = Self::pull_frames(shared, &session);

        session.stop();
        if let Some(message) = session.read_error() {
            warn!("{} ⚠ 读包线程因错误结束: {}", log_ctx(), message);
        }
        shared.session.lock().take();
        result
    }

    fn pull_frames(shared: &Shared<B>, session: &StreamSession<B>) -> Result<()> {
        session.wait_for_open()?;

        let mut frame_count: u64 = 0;
        while let Some(frame) = session.next_frame()? {
            let timestamp = frame.timestamp();
            let frame = Arc::new(frame);
            *shared.frame.lock() = Some(frame.clone());

            if frame_count == 0 {
                info!("{} 🎞️  首帧就绪: {}x{}", log_ctx(), frame.width(), frame.height());
                shared.emit(PlayerEvent::StreamStarted);
            }
            frame_count += 1;
            shared.emit(PlayerEvent::FrameReceived(frame));

            let delay = session.interframe_delay_ms(timestamp);
            Self::sleep_unless_stopped(session, Duration::from_millis(delay));
        }

        debug!("{} 共发布 {} 帧", log_ctx(), frame_count);
        Ok(())
    }

    fn sleep_unless_stopped(session: &StreamSession<B>, delay: Duration) {
        let mut remaining = delay;
        while !remaining.is_zero() && !session.is_stop_requested() {
            let slice = remaining.min(PACING_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }

    /// 停止播放；可重复调用，也可在从未开始时调用
    pub fn stop(&self) {
        // 持有 worker 锁，与 start_play 串行
        let mut worker = self.worker.lock();
        self.shared.stop_requested.store(true, Ordering::Release);

        let session = self.shared.session.lock().clone();
        if let Some(session) = session {
            info!("{} ⏹️  停止会话: {}", log_ctx(), session.source());
            session.stop();
        }

        if let Some(handle) = worker.take() {
            if handle.thread().id() == thread::current().id() {
                // 在播放线程里调用：无法等待自己
                return;
            }
            if handle.join().is_err() {
                error!("{} ❌ 播放线程异常退出", log_ctx());
            }
        }
    }

    /// 播放循环是否在运行
    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    /// 最近发布的一帧
    pub fn current_frame(&self) -> Result<Arc<Frame>> {
        self.shared.frame.lock().clone().ok_or(PlayerError::NoFrame)
    }
}

impl<B: MediaBackend> Drop for Player<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
