//! 控制循环历史记录环形缓冲区
//!
//! 单写者（实时线程）多读者。每个槽位一个序号锁（seqlock）：写者先把槽位戳记为奇数，
//! 写入记录后再发布为偶数，整个过程不等待任何读者；读者复制槽位后重新检查戳记，
//! 不一致就丢弃这份复制。所以读者看到的记录要么按写入顺序出现，要么不出现，
//! 而且读者永远不会阻塞写者。

use motor_protocol::{Command, Status};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering, fence};
use std::time::Instant;

/// 单条记录最多容纳的设备数
pub const MAX_MOTORS: usize = 16;

/// 默认容量
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

// latest 在最新槽位被覆盖时的重试次数
const LATEST_RETRIES: usize = 8;

/// 一个控制周期的快照
#[derive(Debug, Clone, Copy)]
pub struct HistoryRecord {
    /// 本周期下发的命令计数
    pub sequence: u32,
    /// 设备确认的命令计数（多设备取最滞后者）
    pub count_received: u32,
    /// `sequence - count_received`
    pub delay: i64,
    pub motor_count: usize,
    pub statuses: [Status; MAX_MOTORS],
    pub commands: [Command; MAX_MOTORS],
    pub time_start: Instant,
    pub last_time_start: Instant,
    pub last_time_end: Instant,
    pub aread_time: Instant,
    pub read_time: Instant,
    pub write_time: Instant,
}

impl HistoryRecord {
    /// 所有时间戳都设为 `now` 的空记录
    pub fn new(now: Instant) -> Self {
        Self {
            sequence: 0,
            count_received: 0,
            delay: 0,
            motor_count: 0,
            statuses: [Status::default(); MAX_MOTORS],
            commands: [Command::default(); MAX_MOTORS],
            time_start: now,
            last_time_start: now,
            last_time_end: now,
            aread_time: now,
            read_time: now,
            write_time: now,
        }
    }

    pub fn statuses(&self) -> &[Status] {
        &self.statuses[..self.motor_count]
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands[..self.motor_count]
    }

    /// 复制状态和命令（超出 [`MAX_MOTORS`] 的部分被截断）
    pub fn fill(&mut self, statuses: &[Status], commands: &[Command]) {
        let n = statuses.len().min(commands.len()).min(MAX_MOTORS);
        self.statuses[..n].copy_from_slice(&statuses[..n]);
        self.commands[..n].copy_from_slice(&commands[..n]);
        self.motor_count = n;
    }
}

/// 第 `seq` 条记录写入完成后槽位的戳记（0 表示空槽位，奇数表示写入中）
fn stable_stamp(seq: u64) -> u64 {
    2 * seq + 2
}

struct Slot {
    stamp: AtomicU64,
    record: UnsafeCell<MaybeUninit<HistoryRecord>>,
}

// SAFETY: record 只有唯一写者会写；读者只在戳记前后一致时才使用复制出的值
unsafe impl Sync for Slot {}

/// 固定容量环形缓冲区
pub struct HistoryBuffer {
    slots: Box<[Slot]>,
    /// 已发布的记录总数
    published: AtomicU64,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryBuffer {
    /// 创建缓冲区（容量至少为 1）
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1))
            .map(|_| Slot {
                stamp: AtomicU64::new(0),
                record: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            slots,
            published: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 当前保留的记录数
    pub fn len(&self) -> usize {
        (self.published.load(Ordering::Acquire) as usize).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.published.load(Ordering::Acquire) == 0
    }

    /// 累计写入的记录数
    pub fn total_pushed(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    fn slot(&self, seq: u64) -> &Slot {
        &self.slots[(seq % self.slots.len() as u64) as usize]
    }

    /// 写入一条记录（满时覆盖最旧的），不会等待读者
    ///
    /// 只允许一个写者。
    pub fn push(&self, record: HistoryRecord) {
        let seq = self.published.load(Ordering::Relaxed);
        let slot = self.slot(seq);
        let stamp = stable_stamp(seq);

        slot.stamp.store(stamp - 1, Ordering::Relaxed);
        fence(Ordering::Release);
        // SAFETY: 只有一个写者；并发读者的复制会因戳记变化而被丢弃
        unsafe { ptr::write_volatile(slot.record.get(), MaybeUninit::new(record)) };
        slot.stamp.store(stamp, Ordering::Release);

        self.published.store(seq + 1, Ordering::Release);
    }

    /// 复制第 `seq` 条记录；槽位为空、正在写入或已被覆盖时返回 `None`
    fn read(&self, seq: u64) -> Option<HistoryRecord> {
        let slot = self.slot(seq);
        let stamp = stable_stamp(seq);
        if slot.stamp.load(Ordering::Acquire) != stamp {
            return None;
        }
        // SAFETY: 复制出的值在戳记复核通过之前不会被当作 HistoryRecord 使用
        let copy = unsafe { ptr::read_volatile(slot.record.get()) };
        fence(Ordering::Acquire);
        if slot.stamp.load(Ordering::Relaxed) != stamp {
            return None;
        }
        // SAFETY: 复制前后戳记都是第 seq 条记录的完成戳记，复制期间没有写入
        Some(unsafe { copy.assume_init() })
    }

    /// 最近一条记录
    ///
    /// 写者连续覆盖最新槽位时可能在重试后返回 `None`，只能作为参考值。
    pub fn latest(&self) -> Option<HistoryRecord> {
        for _ in 0..LATEST_RETRIES {
            let end = self.published.load(Ordering::Acquire);
            if end == 0 {
                return None;
            }
            if let Some(record) = self.read(end - 1) {
                return Some(record);
            }
            std::hint::spin_loop();
        }
        None
    }

    /// 所有保留的记录，最旧的在前
    pub fn snapshot(&self) -> Vec<HistoryRecord> {
        self.since(0).0
    }

    /// 序号大于等于 `from` 的记录（用于增量消费），返回记录和下一个起始序号
    pub fn since(&self, from: u64) -> (Vec<HistoryRecord>, u64) {
        let end = self.published.load(Ordering::Acquire);
        let start = from.max(end.saturating_sub(self.slots.len() as u64));
        let records = (start..end).filter_map(|seq| self.read(seq)).collect();
        (records, end)
    }
}
