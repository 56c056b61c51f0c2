// planner.rs
// 分区规划器，把用户给定的起止年月换算成分区查询使用的 fileid 范围。
use crate::types::{PartitionRange, YearMonth};

/// 计算单个年月对应的 fileid
pub fn file_id(year: i32, month: u32) -> i64 {
    i64::from(year) * 12 + i64::from(month)
}

/// 由起止年月得到分区范围，调用方负责保证结束不早于开始
pub fn plan(year_start: i32, month_start: u32, year_end: i32, month_end: u32) -> PartitionRange {
    PartitionRange {
        file_id_min: file_id(year_start, month_start),
        file_id_max: file_id(year_end, month_end),
    }
}

/// 以 [`YearMonth`] 为参数的便捷形式
pub fn plan_range(start: YearMonth, end: YearMonth) -> PartitionRange {
    plan(start.year, start.month, end.year, end.month)
}
