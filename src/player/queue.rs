use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// 线程安全的 FIFO 队列，带协作式停止信号
///
/// - `push` 从不阻塞，容量由生产者自己通过 `len()` 控制；
/// - `wait_and_pop` 阻塞到有数据或 `stop_wait` 被调用；
/// - 停止之后仍接受 `push`，但任何等待都立即返回 `None`；
/// - 队列本身不丢弃数据，停止后的排空由调用方负责。
pub struct PacketQueue<T> {
    inner: Mutex<QueueInner<T>>,
    not_empty: Condvar,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    stopped: bool,
}

impl<T> PacketQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// 预分配 `capacity` 个元素的空间
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                stopped: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// 追加到队尾并唤醒一个等待者
    pub fn push(&self, item: T) {
        {
            let mut inner = self.inner.lock();
            inner.items.push_back(item);
        }
        self.not_empty.notify_one();
    }

    /// 非阻塞地取出队头
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// 阻塞直到取到队头，停止后返回 `None`
    pub fn wait_and_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        while inner.items.is_empty() && !inner.stopped {
            self.not_empty.wait(&mut inner);
        }

        if inner.stopped {
            return None;
        }

        inner.items.pop_front()
    }

    /// 中断所有等待，可重复调用
    pub fn stop_wait(&self) {
        {
            let mut inner = self.inner.lock();
            inner.stopped = true;
        }
        self.not_empty.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    /// 当前排队数量（仅作快照）
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取出全部剩余元素
    pub fn drain(&self) -> Vec<T> {
        self.inner.lock().items.drain(..).collect()
    }
}

impl<T> Default for PacketQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
