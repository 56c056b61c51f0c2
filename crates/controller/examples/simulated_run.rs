// simulated_run.rs
// 本地模拟一次完整的搜索：模拟的分区器、运行时和工作线程通过内存通道上报进度，真实的合并器拼接结果。
use controller::aggregator::ProgressAggregator;
use controller::channel::MemoryChannel;
use controller::config::ControllerConfig;
use controller::control_loop::{ControlLoop, Intent, IntentSource, ProgressView};
use controller::controller::{Collaborators, JobController, ProgressSnapshot};
use controller::error::Result;
use controller::partitioner::{self, DatasetPartitioner};
use controller::result_merger::ConcatMerger;
use controller::runtime::{JobRuntime, LaunchSpec};
use controller::types::{OutputFormat, PartitionRange, ProgressMessage};
use controller::validation::FormInput;
use prettytable::{cell, row, Table};
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 把范围内每个 fileid 写成一行
struct SimPartitioner {
    local_input: PathBuf,
}

impl DatasetPartitioner for SimPartitioner {
    fn materialize_input(&mut self, database: &Path, range: PartitionRange) -> Result<PathBuf> {
        let lines: String = (range.file_id_min..=range.file_id_max)
            .map(|id| format!("{},{}\n", id, database.display()))
            .collect();
        fs::write(&self.local_input, lines)?;
        Ok(self.local_input.clone())
    }

    fn count_lines(&mut self, path: &Path) -> Result<u64> {
        partitioner::count_lines(path)
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        println!("上传 {} -> {}", local.display(), remote);
        Ok(())
    }

    fn remove_prior_artifacts(&mut self, _remote_output: &str, local_output_dir: &Path) {
        partitioner::clear_dir(local_output_dir);
    }
}

/// 每个作业一个工作线程，逐个分区上报进度并写出结果
struct SimRuntime {
    channel: MemoryChannel,
    local_input: PathBuf,
    local_output_dir: PathBuf,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl JobRuntime for SimRuntime {
    fn launch(&mut self, _spec: &LaunchSpec) -> Result<()> {
        let partitions = partitioner::count_lines(&self.local_input)?;
        let channel = self.channel.clone();
        let output_dir = self.local_output_dir.clone();
        let running = self.running.clone();
        let stop = Arc::new(AtomicBool::new(false));
        self.stop = stop.clone();
        running.store(true, Ordering::SeqCst);

        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            for part in 0..partitions {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                thread::sleep(Duration::from_millis(rng.gen_range(20..60)));
                let games = rng.gen_range(100..500);
                let matches = rng.gen_range(0..4);
                let dir = output_dir.join(format!("part-{:03}", part));
                let hits: String = (0..matches)
                    .map(|m| format!("partida {}-{}\n", part, m))
                    .collect();
                if fs::create_dir_all(&dir)
                    .and_then(|_| fs::write(dir.join("part-00000"), hits))
                    .is_err()
                {
                    break;
                }
                channel.send(ProgressMessage::new(1, games, matches));
            }
            running.store(false, Ordering::SeqCst);
        });
        Ok(())
    }

    fn list_running(&mut self) -> Result<Vec<String>> {
        if self.running.load(Ordering::SeqCst) {
            Ok(vec!["job_sim_0001".to_string()])
        } else {
            Ok(Vec::new())
        }
    }

    fn kill(&mut self, job_id: &str) -> Result<()> {
        println!("终止 {}", job_id);
        self.stop.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct OneShot(Option<FormInput>);

impl IntentSource for OneShot {
    fn poll(&mut self) -> Option<Intent> {
        self.0.take().map(Intent::Start)
    }
}

struct PrintView;

impl ProgressView for PrintView {
    fn show_phase(&mut self, phase: &str) {
        println!("阶段: {}", phase);
    }

    fn show_progress(&mut self, snapshot: &ProgressSnapshot) {
        let mut table = Table::new();
        table.add_row(row!["已处理分区", "总分区", "对局", "匹配", "进度"]);
        table.add_row(row![
            snapshot.counters.partitions_processed,
            snapshot.total_input_lines,
            snapshot.counters.games_scanned,
            snapshot.counters.matches_found,
            format!("{}%", snapshot.percent)
        ]);
        table.printstd();
    }

    fn show_rejection(&mut self, reason: &str) {
        println!("校验失败: {}", reason);
    }

    fn show_error(&mut self, message: &str) {
        println!("错误: {}", message);
    }
}

fn main() -> Result<()> {
    let home = tempfile::tempdir()?;
    let config = ControllerConfig {
        home: home.path().to_path_buf(),
        tick_ms: 10,
        liveness_threshold: 30,
        launch_ack_timeout_ms: 200,
        launch_ack_poll_ms: 10,
        ..ControllerConfig::default()
    };
    config.validate()?;
    fs::create_dir_all(config.local_output_dir())?;

    let pattern = home.path().join("patron.txt");
    fs::write(&pattern, "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR\n")?;
    let output = home.path().join("resultado.txt");

    let channel = MemoryChannel::new();
    let collaborators = Collaborators {
        runtime: Box::new(SimRuntime {
            channel: channel.clone(),
            local_input: config.local_input(),
            local_output_dir: config.local_output_dir(),
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
        }),
        partitioner: Box::new(SimPartitioner {
            local_input: config.local_input(),
        }),
        merger: Box::new(ConcatMerger::new()),
    };
    let aggregator =
        ProgressAggregator::with_threshold(Box::new(channel), config.liveness_threshold);
    let tick = config.tick();
    let controller = JobController::new(config, aggregator, collaborators);

    let form = FormInput {
        date_start: "2021/01".to_string(),
        date_end: "2021/12".to_string(),
        elo_min: "1800".to_string(),
        elo_max: "2900".to_string(),
        white_wins: true,
        black_wins: true,
        pattern: pattern.display().to_string(),
        output: output.display().to_string(),
        output_format: OutputFormat::Fen,
    };

    let mut control = ControlLoop::new(controller, OneShot(Some(form)), PrintView)
        .with_timing(tick, 10)
        .exit_when_idle(true);
    control.run();

    let merged = fs::read_to_string(&output).unwrap_or_default();
    println!(
        "结局: {:?}，结果文件 {} 行",
        control.controller().last_result(),
        merged.lines().count()
    );
    Ok(())
}
