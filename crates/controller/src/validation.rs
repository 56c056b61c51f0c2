// validation.rs
// 输入校验：检查表单字段，校验通过时返回规范化的搜索条件，否则返回可直接展示给用户的原因。
use crate::types::{OutputFormat, SearchCriteria, WinnerFilter, YearMonth};
use chrono::{Datelike, NaiveDate};
use std::path::PathBuf;
use thiserror::Error;

/// 校验失败的原因，Display 文本原样展示给用户
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("必须指定起始日期（格式 YYYY/MM）")]
    StartDate,
    #[error("必须指定结束日期（格式 YYYY/MM）")]
    EndDate,
    #[error("结束日期必须晚于或等于起始日期")]
    EndBeforeStart,
    #[error("最低等级分必须是非负整数")]
    EloMinNotInteger,
    #[error("最高等级分必须是非负整数")]
    EloMaxNotInteger,
    #[error("最高等级分必须大于或等于最低等级分")]
    EloMaxBelowMin,
    #[error("必须指定模式文件")]
    PatternMissing,
    #[error("找不到模式文件: {0}")]
    PatternNotFound(PathBuf),
    #[error("必须指定输出文件路径")]
    OutputMissing,
}

/// 表单原始字段
#[derive(Debug, Clone)]
pub struct FormInput {
    pub date_start: String,
    pub date_end: String,
    pub elo_min: String,
    pub elo_max: String,
    pub white_wins: bool,
    pub black_wins: bool,
    pub pattern: String,
    pub output: String,
    pub output_format: OutputFormat,
}

/// 校验表单，按字段顺序报告第一个错误
pub fn validate(form: &FormInput) -> Result<SearchCriteria, ValidationError> {
    let start = parse_year_month(&form.date_start).ok_or(ValidationError::StartDate)?;
    let end = parse_year_month(&form.date_end).ok_or(ValidationError::EndDate)?;
    if end < start {
        return Err(ValidationError::EndBeforeStart);
    }

    let elo_min = parse_rating(&form.elo_min).ok_or(ValidationError::EloMinNotInteger)?;
    let elo_max = parse_rating(&form.elo_max).ok_or(ValidationError::EloMaxNotInteger)?;
    if elo_max < elo_min {
        return Err(ValidationError::EloMaxBelowMin);
    }

    let pattern = form.pattern.trim();
    if pattern.is_empty() {
        return Err(ValidationError::PatternMissing);
    }
    let pattern_path = PathBuf::from(pattern);
    if !pattern_path.exists() {
        return Err(ValidationError::PatternNotFound(pattern_path));
    }

    let output = form.output.trim();
    if output.is_empty() {
        return Err(ValidationError::OutputMissing);
    }

    Ok(SearchCriteria {
        start,
        end,
        elo_min,
        elo_max,
        winner: WinnerFilter::from_flags(form.white_wins, form.black_wins),
        pattern_path,
        output_path: PathBuf::from(output),
        output_format: form.output_format,
    })
}

/// 解析 `YYYY/MM`
fn parse_year_month(text: &str) -> Option<YearMonth> {
    let date = NaiveDate::parse_from_str(&format!("{}/01", text.trim()), "%Y/%m/%d").ok()?;
    Some(YearMonth {
        year: date.year(),
        month: date.month(),
    })
}

/// 只接受十进制数字
fn parse_rating(text: &str) -> Option<u32> {
    let text = text.trim();
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
