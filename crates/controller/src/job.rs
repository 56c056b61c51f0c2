// job.rs
// 作业运行的状态机状态和一次运行的身份信息。
use crate::types::PartitionRange;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

/// 控制器状态，描述一次作业运行的生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// 空闲，可以接受新的启动请求
    Idle,
    /// 正在校验搜索条件
    Validating,
    /// 正在确定分区、上传输入、清理旧痕迹
    Preparing,
    /// 作业已提交，等待运行时确认
    Launched,
    /// 作业运行中，每个周期汇总进度
    Running,
    /// 存活计时器超时，正在合并结果
    Finalizing,
    /// 正在终止作业
    Aborting,
}

impl JobState {
    /// 展示给用户的阶段说明
    pub fn phase(&self) -> &'static str {
        match self {
            JobState::Idle => "",
            JobState::Validating => "正在校验字段..",
            JobState::Preparing => "正在确定分区..",
            JobState::Launched => "正在启动作业..",
            JobState::Running => "运行中..",
            JobState::Finalizing => "正在生成输出..",
            JobState::Aborting => "正在终止..",
        }
    }

    /// 除空闲外的状态都算作有活动的运行
    pub fn is_active(&self) -> bool {
        !matches!(self, JobState::Idle)
    }
}

/// 上一次运行的结局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunResult {
    /// 正常结束，结果已合并
    Completed,
    /// 结束但合并失败
    MergeFailed,
    /// 从未收到进度消息，视为启动失败，没有合并
    NoProgress,
    /// 被用户终止或被新的启动请求取代
    Aborted,
    /// 准备阶段失败，没有启动作业
    PreparationFailed,
}

impl RunResult {
    pub fn phase(&self) -> &'static str {
        match self {
            RunResult::Completed => "已完成..",
            RunResult::MergeFailed => "生成输出失败..",
            RunResult::NoProgress => "作业没有上报任何进度..",
            RunResult::Aborted => "",
            RunResult::PreparationFailed => "准备失败..",
        }
    }
}

/// 一次作业运行
#[derive(Debug, Clone)]
pub struct JobRun {
    /// 运行唯一ID
    pub run_id: Uuid,
    /// 本次运行的分区范围
    pub range: PartitionRange,
    /// 输入分区总数，启动时计算一次，不小于 1
    pub total_input_lines: u64,
    /// 运行时确认的作业标识，未确认时为 None
    pub runtime_job_id: Option<String>,
    /// 提交前运行列表中已有的作业，查询失败时为 None
    pub preexisting_jobs: Option<Vec<String>>,
    /// 最终结果文件
    pub output_path: PathBuf,
    /// 启动时刻
    pub started_at: Instant,
}

impl JobRun {
    pub fn new(range: PartitionRange, total_input_lines: u64, output_path: PathBuf) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            range,
            total_input_lines,
            runtime_job_id: None,
            preexisting_jobs: None,
            output_path,
            started_at: Instant::now(),
        }
    }
}
