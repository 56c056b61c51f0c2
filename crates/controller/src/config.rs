// config.rs
// 控制器全局配置结构体及其默认实现，包含搜索树路径、Hadoop 路径、进度队列名以及各个计时常量。
use crate::error::{Error, Result};
use crate::types::{DEFAULT_LIVENESS_THRESHOLD, DEFAULT_REFRESH_EVERY, DEFAULT_TICK_MS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 控制器全局配置，可从 JSON 文件加载，缺省字段取默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// 搜索树根目录（$PATHAJEDREZ）
    pub home: PathBuf,
    /// Hadoop 安装目录（$HADOOP_HOME）
    pub hadoop_home: PathBuf,
    /// 数据库名
    pub base_name: String,
    /// 数据库实例数
    pub base_num: u32,
    /// 进度消息队列名，以 `/` 开头
    pub queue_name: String,
    /// 控制循环周期（毫秒）
    pub tick_ms: u64,
    /// 展示数据刷新间隔（周期数）
    pub refresh_every: u32,
    /// 判定作业结束前允许的连续空周期数
    pub liveness_threshold: u32,
    /// 等待作业出现在运行列表中的最长时间（毫秒）
    pub launch_ack_timeout_ms: u64,
    /// 查询运行列表的间隔（毫秒）
    pub launch_ack_poll_ms: u64,
    /// 分布式存储上的输入文件名
    pub remote_input: String,
    /// 分布式存储上的结果目录
    pub remote_output: String,
    /// streaming jar，相对于 hadoop_home
    pub streaming_jar: PathBuf,
    /// mapper 可执行文件，相对于 home
    pub mapper: PathBuf,
    /// 分区查询工具
    pub partition_query: String,
    /// 默认日志级别，RUST_LOG 优先
    pub log_level: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from("."),
            hadoop_home: PathBuf::from("/opt/hadoop"),
            base_name: "ajedrez.db".to_string(),
            base_num: 1,
            queue_name: "/ajedrez".to_string(),
            tick_ms: DEFAULT_TICK_MS,
            refresh_every: DEFAULT_REFRESH_EVERY,
            liveness_threshold: DEFAULT_LIVENESS_THRESHOLD,
            launch_ack_timeout_ms: 15_000,
            launch_ack_poll_ms: 500,
            remote_input: "entrada.txt".to_string(),
            remote_output: "resajedrez".to_string(),
            streaming_jar: PathBuf::from("share/hadoop/tools/lib/hadoop-streaming-3.3.4.jar"),
            mapper: PathBuf::from("bin/mapbpatronsql"),
            partition_query: "sellistapart".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ControllerConfig {
    /// 读取 JSON 配置文件
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("读取 {} 失败: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("解析 {} 失败: {}", path.display(), e)))?;
        Ok(config)
    }

    /// 用环境变量 PATHAJEDREZ、HADOOP_HOME 覆盖对应字段
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(home) = std::env::var_os("PATHAJEDREZ") {
            self.home = PathBuf::from(home);
        }
        if let Some(hadoop_home) = std::env::var_os("HADOOP_HOME") {
            self.hadoop_home = PathBuf::from(hadoop_home);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            return Err(Error::Config("tick_ms 必须大于 0".to_string()));
        }
        if self.refresh_every == 0 {
            return Err(Error::Config("refresh_every 必须大于 0".to_string()));
        }
        if self.liveness_threshold == 0 {
            return Err(Error::Config("liveness_threshold 必须大于 0".to_string()));
        }
        if !self.queue_name.starts_with('/') || self.queue_name.len() < 2 {
            return Err(Error::Config(format!(
                "队列名 {:?} 必须以 / 开头且不能为空",
                self.queue_name
            )));
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn launch_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_ack_timeout_ms)
    }

    pub fn launch_ack_poll(&self) -> Duration {
        Duration::from_millis(self.launch_ack_poll_ms)
    }

    /// 主数据库路径
    pub fn master_database(&self) -> PathBuf {
        self.home.join("base").join("base_0").join(&self.base_name)
    }

    /// 分区查询结果在本地的位置
    pub fn local_input(&self) -> PathBuf {
        self.home.join("data").join("entrada.txt")
    }

    /// 各分区输出文件所在的本地目录
    pub fn local_output_dir(&self) -> PathBuf {
        self.home.join("data").join("salida")
    }

    /// mapper 读取的搜索参数文件
    pub fn job_conf_path(&self) -> PathBuf {
        self.home.join("conf").join("job.conf")
    }

    pub fn mapper_path(&self) -> PathBuf {
        self.home.join(&self.mapper)
    }

    pub fn streaming_jar_path(&self) -> PathBuf {
        self.hadoop_home.join(&self.streaming_jar)
    }
}
