// main.rs
// 命令行入口：加载配置，装配 Hadoop 协作者和进度队列，运行控制循环。
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use controller::aggregator::ProgressAggregator;
use controller::channel::{PosixQueue, ProgressReporter};
use controller::config::ControllerConfig;
use controller::control_loop::{ControlLoop, Intent, IntentSource, ProgressView};
use controller::controller::{Collaborators, JobController, ProgressSnapshot};
use controller::job::RunResult;
use controller::logging::init_logging;
use controller::partitioner::ShellPartitioner;
use controller::result_merger::ConcatMerger;
use controller::runtime::HadoopRuntime;
use controller::types::{OutputFormat, ProgressMessage};
use controller::validation::FormInput;
use prettytable::{cell, row, Table};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "pattern-search", version, about = "在 Hadoop 上按局面模式搜索棋局")]
struct Cli {
    /// JSON 配置文件，缺省时使用内置默认值
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 覆盖配置中的日志级别（RUST_LOG 仍然优先）
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 提交一次搜索并监控进度；标准输入接受 start / abort / quit
    Run(RunArgs),
    /// 向进度队列发送一条增量，用于手工测试
    Report {
        partitions: u64,
        games: u64,
        matches: u64,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// 起始年月 YYYY/MM
    #[arg(long)]
    from: String,
    /// 结束年月 YYYY/MM
    #[arg(long)]
    to: String,
    #[arg(long, default_value = "0")]
    elo_min: String,
    #[arg(long, default_value = "3000")]
    elo_max: String,
    /// 只要白方胜的对局
    #[arg(long)]
    white: bool,
    /// 只要黑方胜的对局
    #[arg(long)]
    black: bool,
    /// 模式文件
    #[arg(long)]
    pattern: String,
    /// 结果文件
    #[arg(long)]
    output: String,
    #[arg(long, value_enum, default_value_t = FormatArg::Fen)]
    format: FormatArg,
    /// 第一次运行结束后退出
    #[arg(long)]
    once: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum FormatArg {
    Img,
    Fen,
}

impl RunArgs {
    fn form(&self) -> FormInput {
        FormInput {
            date_start: self.from.clone(),
            date_end: self.to.clone(),
            elo_min: self.elo_min.clone(),
            elo_max: self.elo_max.clone(),
            white_wins: self.white,
            black_wins: self.black,
            pattern: self.pattern.clone(),
            output: self.output.clone(),
            output_format: match self.format {
                FormatArg::Img => OutputFormat::Image,
                FormatArg::Fen => OutputFormat::Fen,
            },
        }
    }
}

/// 第一个周期提交命令行给出的表单，之后读取标准输入的命令
struct StdinIntents {
    pending: Option<Intent>,
    rx: Receiver<Intent>,
}

impl StdinIntents {
    fn spawn(form: FormInput) -> Self {
        let (tx, rx) = mpsc::channel();
        let resubmit = form.clone();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let intent = match line.trim() {
                    "start" => Intent::Start(resubmit.clone()),
                    "abort" => Intent::Abort,
                    "quit" | "exit" => Intent::Shutdown,
                    "" => continue,
                    other => {
                        eprintln!("未知命令: {}（可用: start, abort, quit）", other);
                        continue;
                    }
                };
                if tx.send(intent).is_err() {
                    break;
                }
            }
            debug!("标准输入已关闭");
        });
        Self {
            pending: Some(Intent::Start(form)),
            rx,
        }
    }
}

impl IntentSource for StdinIntents {
    fn poll(&mut self) -> Option<Intent> {
        self.pending.take().or_else(|| self.rx.try_recv().ok())
    }
}

/// 用表格打印进度，只在内容变化时输出
#[derive(Default)]
struct TableView {
    last: Option<ProgressSnapshot>,
}

impl ProgressView for TableView {
    fn show_phase(&mut self, phase: &str) {
        if !phase.is_empty() {
            println!("{}", phase);
        }
    }

    fn show_progress(&mut self, snapshot: &ProgressSnapshot) {
        if self.last.as_ref() == Some(snapshot) {
            return;
        }
        let mut table = Table::new();
        table.add_row(row!["阶段", "已处理分区", "总分区", "对局", "匹配", "进度"]);
        table.add_row(row![
            snapshot.phase(),
            snapshot.counters.partitions_processed,
            snapshot.total_input_lines,
            snapshot.counters.games_scanned,
            snapshot.counters.matches_found,
            format!("{}%", snapshot.percent)
        ]);
        table.printstd();
        self.last = Some(snapshot.clone());
    }

    fn show_rejection(&mut self, reason: &str) {
        eprintln!("搜索条件无效: {}", reason);
    }

    fn show_error(&mut self, message: &str) {
        eprintln!("错误: {}", message);
    }
}

fn run(config: ControllerConfig, args: RunArgs) -> Result<()> {
    let queue = PosixQueue::open(&config.queue_name)
        .with_context(|| format!("无法打开进度队列 {}", config.queue_name))?;
    let aggregator = ProgressAggregator::with_threshold(Box::new(queue), config.liveness_threshold);
    let collaborators = Collaborators {
        runtime: Box::new(HadoopRuntime::new(&config)),
        partitioner: Box::new(ShellPartitioner::new(&config)),
        merger: Box::new(ConcatMerger::new()),
    };
    let tick = config.tick();
    let refresh_every = config.refresh_every;

    let mut controller = JobController::new(config, aggregator, collaborators);
    controller.ensure_runtime_started();

    let intents = StdinIntents::spawn(args.form());
    let mut control = ControlLoop::new(controller, intents, TableView::default())
        .with_timing(tick, refresh_every)
        .exit_when_idle(args.once);
    control.run();

    if args.once {
        match control.controller().last_result() {
            Some(RunResult::Completed) => info!(output = %args.output, "结果已写入"),
            Some(result) => bail!("搜索没有成功完成: {}", result.phase()),
            None => bail!("搜索没有启动"),
        }
    }
    Ok(())
}

fn report(config: &ControllerConfig, msg: ProgressMessage) -> Result<()> {
    let reporter = ProgressReporter::open(&config.queue_name)
        .with_context(|| format!("无法打开进度队列 {}", config.queue_name))?;
    reporter.report(msg)?;
    println!("已发送 {}", msg.encode());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("无法加载配置 {}", path.display()))?,
        None => ControllerConfig::default(),
    }
    .with_env_overrides();
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    init_logging(&config.log_level)?;
    config.validate()?;
    debug!(?config, "配置已加载");

    match cli.command {
        Command::Run(args) => run(config, args),
        Command::Report {
            partitions,
            games,
            matches,
        } => report(&config, ProgressMessage::new(partitions, games, matches)),
    }
}
