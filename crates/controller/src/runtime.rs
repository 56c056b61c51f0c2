// runtime.rs
// 作业运行时：负责在外部计算框架上启动、列出和终止作业，默认实现基于 Hadoop streaming。
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// 启动一次作业所需的引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// 分布式存储上的输入
    pub input: String,
    /// mapper 可执行文件
    pub mapper: PathBuf,
    /// 分布式存储上的输出目录
    pub output: String,
}

/// 外部作业运行时
pub trait JobRuntime: Send {
    /// 确认计算集群已启动，否则尝试启动它
    fn ensure_started(&mut self) -> Result<()> {
        Ok(())
    }

    /// 异步启动作业，不等待其结束
    fn launch(&mut self, spec: &LaunchSpec) -> Result<()>;

    /// 当前正在运行的作业标识
    fn list_running(&mut self) -> Result<Vec<String>>;

    /// 终止指定作业
    fn kill(&mut self, job_id: &str) -> Result<()>;
}

/// 基于 `hadoop` 命令行的运行时
pub struct HadoopRuntime {
    hadoop_home: PathBuf,
    streaming_jar: PathBuf,
    child: Option<Child>,
}

impl HadoopRuntime {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            hadoop_home: config.hadoop_home.clone(),
            streaming_jar: config.streaming_jar_path(),
            child: None,
        }
    }

    fn hadoop(&self) -> Command {
        hadoop_command(&self.hadoop_home)
    }

    /// 回收已经退出的上一个启动进程
    fn reap(&mut self) {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(%status, "hadoop jar 进程已退出");
                    self.child = None;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "无法查询 hadoop jar 进程状态"),
            }
        }
    }

    fn namenode_running() -> bool {
        match Command::new("jps").output() {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).contains("NameNode")
            }
            _ => false,
        }
    }
}

impl JobRuntime for HadoopRuntime {
    fn ensure_started(&mut self) -> Result<()> {
        if Self::namenode_running() {
            info!("Hadoop 已在运行");
            return Ok(());
        }
        info!("等待 Hadoop 启动...");
        let status = Command::new("start-all.sh")
            .stdout(Stdio::null())
            .status()
            .map_err(|e| Error::RuntimeLookup(format!("执行 start-all.sh 失败: {}", e)))?;
        if !status.success() {
            return Err(Error::RuntimeLookup(format!("start-all.sh 退出状态 {}", status)));
        }
        info!("Hadoop 启动成功");
        Ok(())
    }

    fn launch(&mut self, spec: &LaunchSpec) -> Result<()> {
        self.reap();
        let child = self
            .hadoop()
            .arg("jar")
            .arg(&self.streaming_jar)
            .arg("-files")
            .arg(&spec.mapper)
            .arg("-mapper")
            .arg(&spec.mapper)
            .arg("-input")
            .arg(&spec.input)
            .arg("-output")
            .arg(&spec.output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Preparation(format!("启动 hadoop jar 失败: {}", e)))?;
        info!(pid = child.id(), input = %spec.input, output = %spec.output, "作业已提交");
        self.child = Some(child);
        Ok(())
    }

    fn list_running(&mut self) -> Result<Vec<String>> {
        self.reap();
        let output = self
            .hadoop()
            .args(["job", "-list"])
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::RuntimeLookup(format!("执行 hadoop job -list 失败: {}", e)))?;
        if !output.status.success() {
            return Err(Error::RuntimeLookup(format!(
                "hadoop job -list 失败: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_job_list(&String::from_utf8_lossy(&output.stdout)))
    }

    fn kill(&mut self, job_id: &str) -> Result<()> {
        let output = self
            .hadoop()
            .args(["job", "-kill", job_id])
            .output()
            .map_err(|e| Error::RuntimeLookup(format!("执行 hadoop job -kill 失败: {}", e)))?;
        if !output.status.success() {
            return Err(Error::RuntimeLookup(format!(
                "终止作业 {} 失败: {}",
                job_id,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        info!(job_id, "作业已终止");
        Ok(())
    }
}

/// 优先使用 $HADOOP_HOME/bin/hadoop，否则从 PATH 中查找
pub(crate) fn hadoop_command(hadoop_home: &Path) -> Command {
    let bundled = hadoop_home.join("bin").join("hadoop");
    if bundled.exists() {
        Command::new(bundled)
    } else {
        Command::new("hadoop")
    }
}

/// 从 `hadoop job -list` 的输出中取出以 `job_` 开头的作业标识
pub fn parse_job_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|token| token.starts_with("job_"))
        .map(str::to_string)
        .collect()
}
