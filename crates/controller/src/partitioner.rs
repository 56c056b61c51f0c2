// partitioner.rs
// 数据集分区器：按 fileid 范围查询分区表生成作业输入，统计行数，上传到分布式存储，并清理上一次运行的痕迹。
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::runtime::hadoop_command;
use crate::types::PartitionRange;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// 数据集分区器
pub trait DatasetPartitioner: Send {
    /// 查询分区表，把范围内的分区写到本地文件并返回其路径
    fn materialize_input(&mut self, database: &Path, range: PartitionRange) -> Result<PathBuf>;

    /// 统计文件行数，即本次作业的分区总数
    fn count_lines(&mut self, path: &Path) -> Result<u64>;

    /// 上传到分布式存储，覆盖同名文件
    fn upload(&mut self, local: &Path, remote: &str) -> Result<()>;

    /// 删除上一次运行的结果目录和本地分区输出，尽力而为
    fn remove_prior_artifacts(&mut self, remote_output: &str, local_output_dir: &Path);
}

/// 调用分区查询工具和 `hadoop fs` 的实现
pub struct ShellPartitioner {
    query_tool: String,
    local_input: PathBuf,
    hadoop_home: PathBuf,
}

impl ShellPartitioner {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            query_tool: config.partition_query.clone(),
            local_input: config.local_input(),
            hadoop_home: config.hadoop_home.clone(),
        }
    }

    fn hadoop_fs(&self, args: &[&str]) -> Command {
        let mut cmd = hadoop_command(&self.hadoop_home);
        cmd.arg("fs").args(args);
        cmd
    }
}

impl DatasetPartitioner for ShellPartitioner {
    fn materialize_input(&mut self, database: &Path, range: PartitionRange) -> Result<PathBuf> {
        if let Some(parent) = self.local_input.parent() {
            fs::create_dir_all(parent)?;
        }
        let target = File::create(&self.local_input).map_err(|e| {
            Error::Preparation(format!("无法创建 {}: {}", self.local_input.display(), e))
        })?;
        let output = Command::new(&self.query_tool)
            .arg(database)
            .arg(range.file_id_min.to_string())
            .arg(range.file_id_max.to_string())
            .stdout(target)
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::Preparation(format!("执行 {} 失败: {}", self.query_tool, e)))?;
        if !output.status.success() {
            return Err(Error::Preparation(format!(
                "分区表查询失败: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(self.local_input.clone())
    }

    fn count_lines(&mut self, path: &Path) -> Result<u64> {
        count_lines(path)
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        // 远端文件可能不存在
        let removed = self
            .hadoop_fs(&["-rm", remote])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        debug!(remote, ?removed, "删除远端旧输入");

        let local_arg = local.to_string_lossy();
        let output = self
            .hadoop_fs(&["-copyFromLocal", &*local_arg, remote])
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::Preparation(format!("执行 hadoop fs -copyFromLocal 失败: {}", e)))?;
        if !output.status.success() {
            return Err(Error::Preparation(format!(
                "复制 {} 到分布式存储失败: {}",
                local.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn remove_prior_artifacts(&mut self, remote_output: &str, local_output_dir: &Path) {
        let removed = self
            .hadoop_fs(&["-rm", "-r", remote_output])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        debug!(remote_output, ?removed, "删除远端结果目录");
        clear_dir(local_output_dir);
    }
}

/// 统计行数，最后一行没有换行也计入
pub fn count_lines(path: &Path) -> Result<u64> {
    let file = File::open(path)
        .map_err(|e| Error::Preparation(format!("无法打开 {}: {}", path.display(), e)))?;
    let mut lines = 0u64;
    for line in BufReader::new(file).split(b'\n') {
        line.map_err(|e| Error::Preparation(format!("读取 {} 失败: {}", path.display(), e)))?;
        lines += 1;
    }
    Ok(lines)
}

/// 删除目录下的全部内容，保留目录本身
pub fn clear_dir(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "本地输出目录不可读，跳过清理");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "无法删除上一次运行的输出");
        }
    }
}
