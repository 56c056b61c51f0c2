// result_merger.rs
// 结果合并器，负责把各分区的输出文件拼接成用户指定的最终结果文件。
use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 结果合并器
pub trait ResultMerger: Send {
    /// 把 `local_output_dir/*/*` 拼接到 `destination`，返回写入的字节数
    ///
    /// 同一组输入重复调用得到相同的文件。
    fn merge_all(&mut self, local_output_dir: &Path, destination: &Path) -> Result<u64>;
}

/// 按路径排序后直接拼接的合并器
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatMerger;

impl ConcatMerger {
    pub fn new() -> Self {
        Self
    }
}

impl ResultMerger for ConcatMerger {
    fn merge_all(&mut self, local_output_dir: &Path, destination: &Path) -> Result<u64> {
        let parts = partition_outputs(local_output_dir)?;
        debug!(parts = parts.len(), dir = %local_output_dir.display(), "找到分区输出文件");

        // 截断目标文件，重复调用不会叠加内容
        let file = File::create(destination).map_err(|e| {
            Error::Finalization(format!("无法创建 {}: {}", destination.display(), e))
        })?;
        let mut writer = BufWriter::new(file);
        let mut written = 0u64;
        for part in &parts {
            let mut reader = File::open(part)
                .map_err(|e| Error::Finalization(format!("无法打开 {}: {}", part.display(), e)))?;
            written += io::copy(&mut reader, &mut writer)
                .map_err(|e| Error::Finalization(format!("复制 {} 失败: {}", part.display(), e)))?;
        }
        writer
            .flush()
            .map_err(|e| Error::Finalization(format!("写入 {} 失败: {}", destination.display(), e)))?;

        info!(
            parts = parts.len(),
            bytes = written,
            destination = %destination.display(),
            "结果已合并"
        );
        Ok(written)
    }
}

/// 列出 `dir` 下每个子目录中的文件，按路径排序
fn partition_outputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let read = |path: &Path| {
        fs::read_dir(path)
            .map_err(|e| Error::Finalization(format!("无法读取 {}: {}", path.display(), e)))
    };
    let mut parts = Vec::new();
    for entry in read(dir)? {
        let sub = entry?.path();
        if !sub.is_dir() {
            continue;
        }
        for inner in read(&sub)? {
            let path = inner?.path();
            if path.is_file() {
                parts.push(path);
            }
        }
    }
    parts.sort();
    Ok(parts)
}
