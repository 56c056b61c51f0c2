// aggregator.rs
// 进度聚合器：每个周期非阻塞地清空进度通道，累加计数，并用存活计时器推断作业结束。
use crate::channel::ProgressSource;
use crate::error::Result;
use crate::types::{ProgressCounters, ProgressMessage, DEFAULT_LIVENESS_THRESHOLD};
use tracing::{debug, warn};

/// 一次 drain 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// 累计计数快照
    pub counters: ProgressCounters,
    /// 本次取到的消息条数
    pub received: usize,
    /// 存活计时器已超时，判定作业结束
    pub finished: bool,
}

/// 进度聚合器，独占进度计数和存活计时器
pub struct ProgressAggregator {
    source: Box<dyn ProgressSource>,
    counters: ProgressCounters,
    /// 0 表示尚未开始；收到消息时置 1，之后每个空周期加 1
    liveness: u32,
    threshold: u32,
    received_any: bool,
}

impl ProgressAggregator {
    pub fn new(source: Box<dyn ProgressSource>) -> Self {
        Self::with_threshold(source, DEFAULT_LIVENESS_THRESHOLD)
    }

    pub fn with_threshold(source: Box<dyn ProgressSource>, threshold: u32) -> Self {
        Self {
            source,
            counters: ProgressCounters::default(),
            liveness: 0,
            threshold,
            received_any: false,
        }
    }

    /// 计数清零，计时器回到“尚未开始”
    pub fn reset(&mut self) {
        self.counters = ProgressCounters::default();
        self.liveness = 0;
        self.received_any = false;
    }

    /// 作业启动后调用，使从未发出消息的作业也会在同样的窗口后超时
    pub fn arm(&mut self) {
        if self.liveness == 0 {
            self.liveness = 1;
        }
    }

    /// 丢弃通道中残留的全部消息，不影响计数
    pub fn discard_pending(&mut self) -> Result<usize> {
        let stale = self.source.drain()?.len();
        if stale > 0 {
            debug!(stale, "丢弃上一次运行残留的进度消息");
        }
        Ok(stale)
    }

    /// 取出当前全部消息并累加，返回计数快照和是否已超时
    ///
    /// 加法满足交换律和结合律，消息到达的顺序和分组不影响最终结果。
    /// 格式错误的记录会被丢弃，但仍视为工作进程存活的信号。
    pub fn drain(&mut self) -> Result<DrainReport> {
        let records = self.source.drain()?;
        for record in &records {
            match record.parse::<ProgressMessage>() {
                Ok(msg) => self.counters += msg,
                Err(e) => warn!(record = %record, error = %e, "丢弃无法解析的进度消息"),
            }
        }

        if !records.is_empty() {
            self.liveness = 1;
            self.received_any = true;
        } else {
            self.advance_silence();
        }

        Ok(DrainReport {
            counters: self.counters,
            received: records.len(),
            finished: self.is_finished(),
        })
    }

    /// 通道读取失败时按空周期计，持续失败的通道也会让计时器超时
    pub fn record_failed_drain(&mut self) -> DrainReport {
        self.advance_silence();
        DrainReport {
            counters: self.counters,
            received: 0,
            finished: self.is_finished(),
        }
    }

    fn advance_silence(&mut self) {
        if self.liveness > 0 {
            self.liveness = self.liveness.saturating_add(1);
        }
    }

    /// 自最后一次收到消息后的连续空周期数超过阈值即判定结束
    pub fn is_finished(&self) -> bool {
        self.liveness.saturating_sub(1) > self.threshold
    }

    pub fn counters(&self) -> ProgressCounters {
        self.counters
    }

    pub fn liveness(&self) -> u32 {
        self.liveness
    }

    /// 本次运行是否收到过任何消息
    pub fn received_any(&self) -> bool {
        self.received_any
    }

    /// 展示用的进度百分比，`total_input_lines` 由准备阶段保证不小于 1
    pub fn percent(&self, total_input_lines: u64) -> u64 {
        let percent =
            u128::from(self.counters.partitions_processed) * 100 / u128::from(total_input_lines.max(1));
        u64::try_from(percent).unwrap_or(u64::MAX)
    }

    /// 释放底层通道
    pub fn close(&mut self) -> Result<()> {
        self.source.close()
    }
}
