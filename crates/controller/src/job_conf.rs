// job_conf.rs
// 搜索参数文件：把校验后的搜索条件写成 mapper 读取的 job.conf，每行一个 KEY=value。
use crate::error::{Error, Result};
use crate::types::SearchCriteria;
use std::fs;
use std::path::Path;

/// 生成 job.conf 的内容，键的顺序与 mapper 的解析器一致
pub fn render(criteria: &SearchCriteria, queue_name: &str) -> String {
    format!(
        "ELOMIN={}\nELOMAX={}\nGANADOR={}\nFORMASAL={}\nPATRON={}\nFIFO={}\n",
        criteria.elo_min,
        criteria.elo_max,
        criteria.winner.code(),
        criteria.output_format.code(),
        criteria.pattern_path.display(),
        queue_name,
    )
}

/// 覆盖写入 job.conf，必要时创建上级目录
pub fn write(path: &Path, criteria: &SearchCriteria, queue_name: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Preparation(format!("无法创建 {}: {}", parent.display(), e)))?;
    }
    fs::write(path, render(criteria, queue_name))
        .map_err(|e| Error::Preparation(format!("写入 {} 失败: {}", path.display(), e)))
}
