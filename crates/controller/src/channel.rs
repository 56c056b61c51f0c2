// channel.rs
// 进度通道：多生产者、单消费者、尽力而为的消息队列，工作进程通过它上报进度。
use crate::error::{Error, Result};
use crate::types::ProgressMessage;
use posixmq::PosixMq;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// 进度通道的消费端
pub trait ProgressSource: Send {
    /// 非阻塞地取出调用时刻队列中的全部原始消息
    fn drain(&mut self) -> Result<Vec<String>>;

    /// 释放通道资源，之后的 drain 返回空
    fn close(&mut self) -> Result<()>;
}

/// 进程内通道，克隆出的句柄共享同一个队列，供测试和模拟运行使用
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    queue: Arc<Mutex<VecDeque<String>>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以线格式投递一条消息
    pub fn send(&self, msg: ProgressMessage) {
        self.send_raw(msg.encode());
    }

    /// 投递一条原始记录（可以是格式错误的）
    pub fn send_raw(&self, record: impl Into<String>) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push_back(record.into());
    }

    /// 当前积压的消息数
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProgressSource for MemoryChannel {
    fn drain(&mut self) -> Result<Vec<String>> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        Ok(queue.drain(..).collect())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// POSIX 消息队列，名称以 `/` 开头，由配置给出
pub struct PosixQueue {
    name: String,
    mq: Option<PosixMq>,
    buf: Vec<u8>,
}

impl PosixQueue {
    /// 以只读、非阻塞方式打开（必要时创建）队列，并设为所有用户可读写
    pub fn open(name: &str) -> Result<Self> {
        let mq = posixmq::OpenOptions::readonly()
            .mode(0o666)
            .create()
            .nonblocking()
            .open(name)
            .map_err(|e| Error::Channel(format!("无法打开消息队列 {}: {}", name, e)))?;
        make_world_writable(name);
        let buf = vec![0; mq.attributes()?.max_msg_len];
        debug!(queue = name, max_msg_len = buf.len(), "进度队列已打开");
        Ok(Self {
            name: name.to_string(),
            mq: Some(mq),
            buf,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ProgressSource for PosixQueue {
    fn drain(&mut self) -> Result<Vec<String>> {
        let Some(mq) = self.mq.as_ref() else {
            return Ok(Vec::new());
        };
        let mut records = Vec::new();
        loop {
            match mq.recv(&mut self.buf) {
                Ok((_priority, len)) => {
                    records.push(String::from_utf8_lossy(&self.buf[..len]).into_owned());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(Error::Channel(format!(
                        "读取消息队列 {} 失败: {}",
                        self.name, e
                    )))
                }
            }
        }
        Ok(records)
    }

    fn close(&mut self) -> Result<()> {
        // 不删除队列，生产者可能比控制器活得更久
        if self.mq.take().is_some() {
            debug!(queue = %self.name, "进度队列已关闭");
        }
        Ok(())
    }
}

/// 生产端，工作进程（或手工测试）用它向队列上报进度
pub struct ProgressReporter {
    mq: PosixMq,
}

impl ProgressReporter {
    pub fn open(name: &str) -> Result<Self> {
        let mq = posixmq::OpenOptions::writeonly()
            .nonblocking()
            .open(name)
            .map_err(|e| Error::Channel(format!("无法打开消息队列 {}: {}", name, e)))?;
        Ok(Self { mq })
    }

    /// 发送一条进度增量，队列满时返回错误而不是阻塞
    pub fn report(&self, msg: ProgressMessage) -> Result<()> {
        self.mq
            .send(0, msg.encode().as_bytes())
            .map_err(|e| Error::Channel(format!("发送进度消息失败: {}", e)))
    }
}

/// 创建时的权限会被 umask 削减，这里再显式设置一次
#[cfg(target_os = "linux")]
fn make_world_writable(name: &str) {
    use std::os::unix::fs::PermissionsExt;

    let path = format!("/dev/mqueue{}", name);
    if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666)) {
        tracing::warn!(path = %path, error = %e, "无法修改消息队列权限");
    }
}

#[cfg(not(target_os = "linux"))]
fn make_world_writable(_name: &str) {}
