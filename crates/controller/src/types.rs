// types.rs
// 定义通用类型，如分区范围、进度计数、进度消息、搜索条件及常量等辅助类型。
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::path::PathBuf;
use std::str::FromStr;

// 常量定义，避免硬编码
/// 控制循环周期（毫秒）
pub const DEFAULT_TICK_MS: u64 = 40;
/// 每隔多少个周期刷新一次展示数据（约400毫秒）
pub const DEFAULT_REFRESH_EVERY: u32 = 10;
/// 连续多少个空周期后判定作业结束（约4秒）
pub const DEFAULT_LIVENESS_THRESHOLD: u32 = 100;

/// 分区范围，两端均为 `年*12 + 月`，闭区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRange {
    pub file_id_min: i64,
    pub file_id_max: i64,
}

/// 进度计数，在一次作业运行内单调不减
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounters {
    /// 已处理的分区数
    pub partitions_processed: u64,
    /// 已扫描的对局数
    pub games_scanned: u64,
    /// 匹配到模式的数量
    pub matches_found: u64,
}

/// 饱和累加，队列中的异常大值不会溢出
impl AddAssign<ProgressMessage> for ProgressCounters {
    fn add_assign(&mut self, msg: ProgressMessage) {
        self.partitions_processed = self.partitions_processed.saturating_add(msg.partitions_delta);
        self.games_scanned = self.games_scanned.saturating_add(msg.games_delta);
        self.matches_found = self.matches_found.saturating_add(msg.matches_delta);
    }
}

/// 工作进程发来的进度增量，线格式为 `"<分区>,<对局>,<匹配>"`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressMessage {
    pub partitions_delta: u64,
    pub games_delta: u64,
    pub matches_delta: u64,
}

impl ProgressMessage {
    pub fn new(partitions_delta: u64, games_delta: u64, matches_delta: u64) -> Self {
        Self {
            partitions_delta,
            games_delta,
            matches_delta,
        }
    }

    /// 编码为线格式，不带结尾分隔符
    pub fn encode(&self) -> String {
        format!(
            "{},{},{}",
            self.partitions_delta, self.games_delta, self.matches_delta
        )
    }
}

impl FromStr for ProgressMessage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // 工作进程发送时会附带换行
        let fields: Vec<&str> = s.trim_end_matches(['\n', '\r', '\0']).split(',').collect();
        if fields.len() != 3 {
            return Err(Error::Channel(format!("进度消息字段数应为3: {:?}", s)));
        }
        let mut values = [0u64; 3];
        for (slot, field) in values.iter_mut().zip(&fields) {
            *slot = field
                .trim()
                .parse()
                .map_err(|e| Error::Channel(format!("进度消息字段 {:?} 无法解析: {}", field, e)))?;
        }
        Ok(Self::new(values[0], values[1], values[2]))
    }
}

/// 胜方过滤条件，数值即写入 job.conf 的 GANADOR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WinnerFilter {
    Any,
    White,
    Black,
    Both,
}

impl WinnerFilter {
    pub fn from_flags(white: bool, black: bool) -> Self {
        match (white, black) {
            (false, false) => WinnerFilter::Any,
            (true, false) => WinnerFilter::White,
            (false, true) => WinnerFilter::Black,
            (true, true) => WinnerFilter::Both,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            WinnerFilter::Any => 0,
            WinnerFilter::White => 1,
            WinnerFilter::Black => 2,
            WinnerFilter::Both => 3,
        }
    }
}

/// 输出格式，数值即写入 job.conf 的 FORMASAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Image,
    Fen,
}

impl OutputFormat {
    pub fn code(&self) -> u8 {
        match self {
            OutputFormat::Image => 0,
            OutputFormat::Fen => 1,
        }
    }
}

/// 年月，用于日期范围的两端
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

/// 校验通过后的搜索条件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub start: YearMonth,
    pub end: YearMonth,
    pub elo_min: u32,
    pub elo_max: u32,
    pub winner: WinnerFilter,
    pub pattern_path: PathBuf,
    pub output_path: PathBuf,
    pub output_format: OutputFormat,
}
