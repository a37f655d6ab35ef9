use crate::core::SessionState;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 看门狗要求中止阻塞调用的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// 外部请求停止
    StopRequested,
    /// 未能在连接超时内打开
    ConnectionTimeout,
    /// 读包停滞超过读帧超时
    ReadTimeout,
}

/// 会话看门狗
///
/// 被解封装/解码库在阻塞 I/O 期间高频轮询，只读原子变量，无副作用。
#[derive(Debug)]
pub struct Watchdog {
    origin: Instant,
    connection_timeout: Duration,
    read_timeout: Duration,
    connection_start_ms: AtomicU64,
    read_start_ms: AtomicU64,
    state: AtomicU8,
    stop_requested: AtomicBool,
}

impl Watchdog {
    pub fn new(connection_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            origin: Instant::now(),
            connection_timeout,
            read_timeout,
            connection_start_ms: AtomicU64::new(0),
            read_start_ms: AtomicU64::new(0),
            state: AtomicU8::new(SessionState::Created as u8),
            stop_requested: AtomicBool::new(false),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// 记录连接开始时刻
    pub fn start_connection(&self) {
        self.connection_start_ms.store(self.elapsed_ms(), Ordering::Release);
    }

    /// 记录一次读包开始的时刻
    pub fn mark_read_start(&self) {
        self.read_start_ms.store(self.elapsed_ms(), Ordering::Release);
    }

    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// 当前是否应中止，以及原因
    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason_at(self.elapsed_ms())
    }

    fn abort_reason_at(&self, now_ms: u64) -> Option<AbortReason> {
        if self.is_stop_requested() {
            return Some(AbortReason::StopRequested);
        }

        match self.state() {
            SessionState::Created | SessionState::Opening => {
                let start = self.connection_start_ms.load(Ordering::Acquire);
                if now_ms.saturating_sub(start) > self.connection_timeout.as_millis() as u64 {
                    return Some(AbortReason::ConnectionTimeout);
                }
            }
            SessionState::Reading => {
                let start = self.read_start_ms.load(Ordering::Acquire);
                if now_ms.saturating_sub(start) > self.read_timeout.as_millis() as u64 {
                    return Some(AbortReason::ReadTimeout);
                }
            }
            _ => {}
        }

        None
    }

    pub fn should_abort(&self) -> bool {
        self.abort_reason().is_some()
    }
}

/// 交给解封装库的中断句柄
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    watchdog: Arc<Watchdog>,
}

impl InterruptHandle {
    pub fn new(watchdog: Arc<Watchdog>) -> Self {
        Self { watchdog }
    }

    /// 阻塞调用应当尽快返回
    pub fn should_abort(&self) -> bool {
        self.watchdog.should_abort()
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.watchdog.abort_reason()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watchdog() -> Watchdog {
        Watchdog::new(Duration::from_millis(500), Duration::from_millis(200))
    }

    #[test]
    fn test_connection_deadline_only_before_open() {
        let wd = watchdog();
        wd.set_state(SessionState::Opening);
        assert_eq!(wd.abort_reason_at(400), None);
        assert_eq!(wd.abort_reason_at(501), Some(AbortReason::ConnectionTimeout));

        wd.set_state(SessionState::Open);
        assert_eq!(wd.abort_reason_at(10_000), None);
    }

    #[test]
    fn test_read_deadline_while_reading() {
        let wd = watchdog();
        wd.set_state(SessionState::Reading);
        // read_start = 0
        assert_eq!(wd.abort_reason_at(150), None);
        assert_eq!(wd.abort_reason_at(250), Some(AbortReason::ReadTimeout));
    }

    #[test]
    fn test_stop_takes_priority() {
        let wd = watchdog();
        wd.set_state(SessionState::Open);
        assert!(!wd.should_abort());
        wd.request_stop();
        assert_eq!(wd.abort_reason(), Some(AbortReason::StopRequested));
        assert!(InterruptHandle::new(Arc::new(wd)).should_abort());
    }

    #[test]
    fn test_mark_read_start_resets_deadline() {
        let wd = watchdog();
        wd.set_state(SessionState::Reading);
        std::thread::sleep(Duration::from_millis(30));
        wd.mark_read_start();
        let start = wd.read_start_ms.load(Ordering::Acquire);
        assert!(start >= 30);
        assert_eq!(wd.abort_reason_at(start + 199), None);
    }
}
