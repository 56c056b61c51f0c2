// controller.rs
// 作业控制器：持有作业身份，负责分区、启动、终止和结果合并，保证任意时刻最多只有一个活动的运行。
use crate::aggregator::{DrainReport, ProgressAggregator};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::job::{JobRun, JobState, RunResult};
use crate::job_conf;
use crate::partitioner::DatasetPartitioner;
use crate::planner;
use crate::result_merger::ResultMerger;
use crate::runtime::{JobRuntime, LaunchSpec};
use crate::types::{ProgressCounters, SearchCriteria};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 控制器调用的外部协作者
pub struct Collaborators {
    pub runtime: Box<dyn JobRuntime>,
    pub partitioner: Box<dyn DatasetPartitioner>,
    pub merger: Box<dyn ResultMerger>,
}

/// 启动请求的结果
#[derive(Debug)]
pub enum StartOutcome {
    /// 作业已启动
    Launched {
        run_id: Uuid,
        total_input_lines: u64,
        runtime_job_id: Option<String>,
    },
    /// 准备阶段失败，控制器保持空闲
    Failed(Error),
}

/// 一个周期的结果
#[derive(Debug)]
pub enum TickOutcome {
    /// 没有运行中的作业
    Idle,
    /// 作业仍在运行
    Running(DrainReport),
    /// 作业结束且结果已合并
    Finished { counters: ProgressCounters, bytes: u64 },
    /// 作业结束但合并失败
    MergeFailed { counters: ProgressCounters, error: Error },
    /// 作业从未上报进度，按启动失败处理
    NoProgress,
}

impl TickOutcome {
    /// 本周期是否结束了一次运行
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TickOutcome::Finished { .. } | TickOutcome::MergeFailed { .. } | TickOutcome::NoProgress
        )
    }
}

/// 展示用的进度快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub state: JobState,
    pub counters: ProgressCounters,
    pub total_input_lines: u64,
    pub percent: u64,
    pub last_result: Option<RunResult>,
}

impl ProgressSnapshot {
    /// 当前阶段说明，空闲时显示上一次运行的结局
    pub fn phase(&self) -> &'static str {
        match (self.state, self.last_result) {
            (JobState::Idle, Some(result)) => result.phase(),
            (state, _) => state.phase(),
        }
    }
}

/// 作业控制器
pub struct JobController {
    config: ControllerConfig,
    aggregator: ProgressAggregator,
    runtime: Box<dyn JobRuntime>,
    partitioner: Box<dyn DatasetPartitioner>,
    merger: Box<dyn ResultMerger>,
    state: JobState,
    run: Option<JobRun>,
    total_input_lines: u64,
    last_result: Option<RunResult>,
}

impl JobController {
    pub fn new(
        config: ControllerConfig,
        aggregator: ProgressAggregator,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            aggregator,
            runtime: collaborators.runtime,
            partitioner: collaborators.partitioner,
            merger: collaborators.merger,
            state: JobState::Idle,
            run: None,
            total_input_lines: 0,
            last_result: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn current_run(&self) -> Option<&JobRun> {
        self.run.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    pub fn counters(&self) -> ProgressCounters {
        self.aggregator.counters()
    }

    pub fn last_result(&self) -> Option<RunResult> {
        self.last_result
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let percent = if self.total_input_lines == 0 {
            0
        } else {
            self.aggregator.percent(self.total_input_lines)
        };
        ProgressSnapshot {
            state: self.state,
            counters: self.aggregator.counters(),
            total_input_lines: self.total_input_lines,
            percent,
            last_result: self.last_result,
        }
    }

    /// 确认外部计算集群可用，失败只记录日志
    pub fn ensure_runtime_started(&mut self) {
        if let Err(e) = self.runtime.ensure_started() {
            error!(error = %e, "无法启动作业运行时");
        }
    }

    fn transition(&mut self, next: JobState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "状态切换");
            self.state = next;
        }
    }

    /// 启动新的运行；已有运行时先终止它，新的启动总是优先
    pub fn request_start(&mut self, criteria: SearchCriteria) -> StartOutcome {
        if self.state.is_active() {
            info!("启动请求取代当前运行");
            self.request_abort();
        }

        self.transition(JobState::Validating);
        self.transition(JobState::Preparing);
        match self.prepare_and_launch(&criteria) {
            Ok(run) => {
                let outcome = StartOutcome::Launched {
                    run_id: run.run_id,
                    total_input_lines: run.total_input_lines,
                    runtime_job_id: run.runtime_job_id.clone(),
                };
                self.run = Some(run);
                self.last_result = None;
                self.transition(JobState::Running);
                outcome
            }
            Err(e) => {
                error!(error = %e, "准备阶段失败，作业未启动");
                self.run = None;
                self.last_result = Some(RunResult::PreparationFailed);
                self.transition(JobState::Idle);
                StartOutcome::Failed(e)
            }
        }
    }

    fn prepare_and_launch(&mut self, criteria: &SearchCriteria) -> Result<JobRun> {
        let range = planner::plan_range(criteria.start, criteria.end);
        info!(
            file_id_min = range.file_id_min,
            file_id_max = range.file_id_max,
            "确定分区范围"
        );

        job_conf::write(&self.config.job_conf_path(), criteria, &self.config.queue_name)?;

        let input = self
            .partitioner
            .materialize_input(&self.config.master_database(), range)?;
        let total_input_lines = self.partitioner.count_lines(&input)?;
        if total_input_lines == 0 {
            return Err(Error::Preparation(format!(
                "分区范围 {}..={} 内没有分区",
                range.file_id_min, range.file_id_max
            )));
        }

        self.partitioner.upload(&input, &self.config.remote_input)?;
        self.partitioner
            .remove_prior_artifacts(&self.config.remote_output, &self.config.local_output_dir());

        self.aggregator
            .discard_pending()
            .map_err(|e| Error::Preparation(format!("清空进度通道失败: {}", e)))?;
        self.aggregator.reset();

        let mut run = JobRun::new(range, total_input_lines, criteria.output_path.clone());
        let spec = LaunchSpec {
            input: self.config.remote_input.clone(),
            mapper: self.config.mapper_path(),
            output: self.config.remote_output.clone(),
        };
        run.preexisting_jobs = self.list_running_or_warn();
        debug!(preexisting = ?run.preexisting_jobs, "提交前的运行列表");
        self.runtime.launch(&spec)?;
        self.total_input_lines = total_input_lines;
        self.transition(JobState::Launched);
        self.aggregator.arm();

        run.runtime_job_id = self.await_launch_ack(run.preexisting_jobs.as_deref());
        info!(
            run_id = %run.run_id,
            total_input_lines,
            runtime_job_id = ?run.runtime_job_id,
            "作业已启动"
        );
        Ok(run)
    }

    fn list_running_or_warn(&mut self) -> Option<Vec<String>> {
        match self.runtime.list_running() {
            Ok(jobs) => Some(jobs),
            Err(e) => {
                warn!(error = %e, "查询运行中的作业失败");
                None
            }
        }
    }

    /// 轮询运行列表直到本次提交的作业出现或超时；超时只是启发式判断，不代表启动失败
    fn await_launch_ack(&mut self, preexisting: Option<&[String]>) -> Option<String> {
        let Some(preexisting) = preexisting else {
            warn!("提交前的运行列表未知，无法确认作业标识");
            return None;
        };
        let deadline = Instant::now() + self.config.launch_ack_timeout();
        loop {
            if let Some(jobs) = self.list_running_or_warn() {
                if let Some(job_id) = launched_job(preexisting, jobs) {
                    return Some(job_id);
                }
            }
            if Instant::now() >= deadline {
                warn!(
                    timeout_ms = self.config.launch_ack_timeout_ms,
                    "未确认作业已在运行，按已启动继续"
                );
                return None;
            }
            std::thread::sleep(self.config.launch_ack_poll());
        }
    }

    /// 终止当前运行并清零计数；空闲时只清零计数。返回是否终止了一个运行
    pub fn request_abort(&mut self) -> bool {
        let aborted = match self.run.take() {
            Some(run) => {
                self.transition(JobState::Aborting);
                self.kill_external(&run);
                self.last_result = Some(RunResult::Aborted);
                true
            }
            None => false,
        };
        self.aggregator.reset();
        self.total_input_lines = 0;
        self.transition(JobState::Idle);
        aborted
    }

    /// 尽力终止外部作业，失败只记录日志
    fn kill_external(&mut self, run: &JobRun) {
        let target = match (&run.runtime_job_id, &run.preexisting_jobs) {
            (Some(job_id), _) => Some(job_id.clone()),
            (None, Some(preexisting)) => self
                .list_running_or_warn()
                .and_then(|jobs| launched_job(preexisting, jobs)),
            (None, None) => None,
        };
        match target {
            Some(job_id) => {
                if let Err(e) = self.runtime.kill(&job_id) {
                    warn!(job_id = %job_id, error = %e, "终止作业失败");
                }
            }
            None => warn!(run_id = %run.run_id, "无法确定本次运行的作业，跳过终止"),
        }
    }

    /// 每个周期调用一次：汇总进度，存活计时器超时后合并结果并回到空闲
    pub fn tick(&mut self) -> TickOutcome {
        if self.state != JobState::Running {
            return TickOutcome::Idle;
        }
        let report = match self.aggregator.drain() {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "读取进度通道失败，按空周期计");
                self.aggregator.record_failed_drain()
            }
        };
        if !report.finished {
            return TickOutcome::Running(report);
        }
        self.finalize(report.counters)
    }

    fn finalize(&mut self, counters: ProgressCounters) -> TickOutcome {
        self.transition(JobState::Finalizing);
        let Some(run) = self.run.take() else {
            self.transition(JobState::Idle);
            return TickOutcome::Idle;
        };

        let outcome = if !self.aggregator.received_any() {
            warn!(run_id = %run.run_id, "作业没有上报任何进度，视为启动失败");
            self.last_result = Some(RunResult::NoProgress);
            TickOutcome::NoProgress
        } else {
            match self
                .merger
                .merge_all(&self.config.local_output_dir(), &run.output_path)
            {
                Ok(bytes) => {
                    info!(
                        run_id = %run.run_id,
                        partitions = counters.partitions_processed,
                        games = counters.games_scanned,
                        matches = counters.matches_found,
                        elapsed_ms = run.started_at.elapsed().as_millis() as u64,
                        "作业完成"
                    );
                    self.last_result = Some(RunResult::Completed);
                    TickOutcome::Finished { counters, bytes }
                }
                Err(e) => {
                    error!(run_id = %run.run_id, error = %e, "合并结果失败");
                    self.last_result = Some(RunResult::MergeFailed);
                    TickOutcome::MergeFailed { counters, error: e }
                }
            }
        };
        self.transition(JobState::Idle);
        outcome
    }

    /// 释放进度通道；外部作业不受影响
    pub fn shutdown(&mut self) {
        if self.state.is_active() {
            warn!(state = ?self.state, "退出时仍有运行中的作业，外部作业继续运行");
        }
        if let Err(e) = self.aggregator.close() {
            warn!(error = %e, "关闭进度通道失败");
        }
    }
}

/// 提交后新出现的作业；不是恰好一个时无法认定，返回 None
fn launched_job(preexisting: &[String], running: Vec<String>) -> Option<String> {
    let mut fresh = running.into_iter().filter(|id| !preexisting.contains(id));
    match (fresh.next(), fresh.next()) {
        (Some(job_id), None) => Some(job_id),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel::{MemoryChannel, ProgressSource};
    use crate::types::{OutputFormat, PartitionRange, ProgressMessage, WinnerFilter, YearMonth};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// 记录协作者调用的共享日志
    #[derive(Debug, Clone, Default)]
    pub(crate) struct CallLog(Arc<Mutex<Vec<String>>>);

    impl CallLog {
        fn push(&self, call: impl Into<String>) {
            self.0.lock().unwrap().push(call.into());
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }

        pub(crate) fn count(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    /// 内存通道外加可切换的读取故障，并记录 close 次数
    pub(crate) struct TestSource {
        inner: MemoryChannel,
        broken: Arc<AtomicBool>,
        closes: Arc<AtomicUsize>,
    }

    impl ProgressSource for TestSource {
        fn drain(&mut self) -> Result<Vec<String>> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(Error::Channel("queue unavailable".to_string()));
            }
            self.inner.drain()
        }

        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close()
        }
    }

    pub(crate) struct FakeRuntime {
        pub(crate) log: CallLog,
        pub(crate) running: Arc<Mutex<Vec<String>>>,
        pub(crate) next_id: u32,
        pub(crate) fail_list: bool,
        pub(crate) fail_launch: bool,
    }

    impl JobRuntime for FakeRuntime {
        fn launch(&mut self, spec: &LaunchSpec) -> Result<()> {
            if self.fail_launch {
                self.log.push("launch failed");
                return Err(Error::Preparation("hadoop jar missing".to_string()));
            }
            self.next_id += 1;
            let id = format!("job_{}", self.next_id);
            self.log.push(format!("launch {} {}", spec.input, id));
            self.running.lock().unwrap().push(id);
            Ok(())
        }

        fn list_running(&mut self) -> Result<Vec<String>> {
            self.log.push("list");
            if self.fail_list {
                return Err(Error::RuntimeLookup("list unavailable".to_string()));
            }
            Ok(self.running.lock().unwrap().clone())
        }

        fn kill(&mut self, job_id: &str) -> Result<()> {
            self.log.push(format!("kill {}", job_id));
            self.running.lock().unwrap().retain(|id| id != job_id);
            Ok(())
        }
    }

    pub(crate) struct FakePartitioner {
        pub(crate) log: CallLog,
        pub(crate) lines: u64,
        pub(crate) fail_query: bool,
    }

    impl DatasetPartitioner for FakePartitioner {
        fn materialize_input(&mut self, _database: &Path, range: PartitionRange) -> Result<PathBuf> {
            self.log
                .push(format!("materialize {} {}", range.file_id_min, range.file_id_max));
            if self.fail_query {
                return Err(Error::Preparation("query failed".to_string()));
            }
            Ok(PathBuf::from("entrada.txt"))
        }

        fn count_lines(&mut self, _path: &Path) -> Result<u64> {
            Ok(self.lines)
        }

        fn upload(&mut self, _local: &Path, remote: &str) -> Result<()> {
            self.log.push(format!("upload {}", remote));
            Ok(())
        }

        fn remove_prior_artifacts(&mut self, remote_output: &str, _local_output_dir: &Path) {
            self.log.push(format!("cleanup {}", remote_output));
        }
    }

    pub(crate) struct FakeMerger {
        pub(crate) log: CallLog,
        pub(crate) fail: bool,
    }

    impl ResultMerger for FakeMerger {
        fn merge_all(&mut self, _local_output_dir: &Path, destination: &Path) -> Result<u64> {
            self.log.push(format!("merge {}", destination.display()));
            if self.fail {
                return Err(Error::Finalization("disk full".to_string()));
            }
            Ok(42)
        }
    }

    pub(crate) struct Harness {
        pub(crate) controller: JobController,
        pub(crate) channel: MemoryChannel,
        pub(crate) log: CallLog,
        /// 运行时当前列出的作业
        pub(crate) running: Arc<Mutex<Vec<String>>>,
        /// 置为 true 后进度通道的每次读取都失败
        pub(crate) broken: Arc<AtomicBool>,
        pub(crate) closes: Arc<AtomicUsize>,
        pub(crate) home: TempDir,
    }

    pub(crate) struct HarnessOptions {
        pub(crate) lines: u64,
        pub(crate) fail_query: bool,
        pub(crate) fail_merge: bool,
        pub(crate) fail_list: bool,
        pub(crate) fail_launch: bool,
        /// 启动前集群上已在运行的其他作业
        pub(crate) running: Vec<String>,
    }

    impl Default for HarnessOptions {
        fn default() -> Self {
            Self {
                lines: 10,
                fail_query: false,
                fail_merge: false,
                fail_list: false,
                fail_launch: false,
                running: Vec::new(),
            }
        }
    }

    pub(crate) fn harness_with(options: HarnessOptions) -> Harness {
        let home = tempfile::tempdir().unwrap();
        let config = ControllerConfig {
            home: home.path().to_path_buf(),
            launch_ack_timeout_ms: 0,
            launch_ack_poll_ms: 0,
            ..ControllerConfig::default()
        };
        let channel = MemoryChannel::new();
        let log = CallLog::default();
        let running = Arc::new(Mutex::new(options.running));
        let broken = Arc::new(AtomicBool::new(false));
        let closes = Arc::new(AtomicUsize::new(0));
        let source = TestSource {
            inner: channel.clone(),
            broken: broken.clone(),
            closes: closes.clone(),
        };
        let aggregator = ProgressAggregator::with_threshold(Box::new(source), config.liveness_threshold);
        let collaborators = Collaborators {
            runtime: Box::new(FakeRuntime {
                log: log.clone(),
                running: running.clone(),
                next_id: 0,
                fail_list: options.fail_list,
                fail_launch: options.fail_launch,
            }),
            partitioner: Box::new(FakePartitioner {
                log: log.clone(),
                lines: options.lines,
                fail_query: options.fail_query,
            }),
            merger: Box::new(FakeMerger {
                log: log.clone(),
                fail: options.fail_merge,
            }),
        };
        Harness {
            controller: JobController::new(config, aggregator, collaborators),
            channel,
            log,
            running,
            broken,
            closes,
            home,
        }
    }

    pub(crate) fn harness() -> Harness {
        harness_with(HarnessOptions::default())
    }

    pub(crate) fn criteria() -> SearchCriteria {
        SearchCriteria {
            start: YearMonth { year: 2020, month: 1 },
            end: YearMonth { year: 2020, month: 3 },
            elo_min: 2000,
            elo_max: 2800,
            winner: WinnerFilter::White,
            pattern_path: PathBuf::from("patron.txt"),
            output_path: PathBuf::from("resultado.txt"),
            output_format: OutputFormat::Fen,
        }
    }

    fn run_until_terminal(h: &mut Harness) -> TickOutcome {
        for _ in 0..1000 {
            let outcome = h.controller.tick();
            if outcome.is_terminal() {
                return outcome;
            }
        }
        panic!("run never finished");
    }

    #[test]
    fn test_start_plans_and_launches() {
        let mut h = harness();
        let outcome = h.controller.request_start(criteria());
        match outcome {
            StartOutcome::Launched {
                total_input_lines,
                runtime_job_id,
                ..
            } => {
                assert_eq!(total_input_lines, 10);
                assert_eq!(runtime_job_id.as_deref(), Some("job_1"));
            }
            StartOutcome::Failed(e) => panic!("start failed: {}", e),
        }
        assert_eq!(h.controller.state(), JobState::Running);
        let calls = h.log.calls();
        assert_eq!(calls[0], "materialize 24241 24243");
        assert_eq!(calls[1], "upload entrada.txt");
        assert_eq!(calls[2], "cleanup resajedrez");
        assert_eq!(calls[3], "list");
        assert!(calls[4].starts_with("launch entrada.txt"));

        let job_conf = std::fs::read_to_string(h.controller.config.job_conf_path()).unwrap();
        assert!(job_conf.contains("GANADOR=1\n"));
        assert!(job_conf.contains("FIFO=/ajedrez\n"));
    }

    #[test]
    fn test_start_discards_stale_messages() {
        let mut h = harness();
        h.channel.send(ProgressMessage::new(99, 99, 99));
        h.controller.request_start(criteria());
        assert!(h.channel.is_empty());
        assert_eq!(h.controller.counters(), ProgressCounters::default());
        h.channel.send(ProgressMessage::new(1, 5, 0));
        h.controller.tick();
        assert_eq!(h.controller.counters().partitions_processed, 1);
    }

    #[test]
    fn test_preparation_failure_stays_idle() {
        let mut h = harness_with(HarnessOptions {
            fail_query: true,
            ..HarnessOptions::default()
        });
        let outcome = h.controller.request_start(criteria());
        assert!(matches!(outcome, StartOutcome::Failed(Error::Preparation(_))));
        assert_eq!(h.controller.state(), JobState::Idle);
        assert!(h.controller.current_run().is_none());
        assert_eq!(h.log.count("launch"), 0);
        assert_eq!(h.controller.last_result(), Some(RunResult::PreparationFailed));
    }

    #[test]
    fn test_empty_partition_range_fails_fast() {
        let mut h = harness_with(HarnessOptions {
            lines: 0,
            ..HarnessOptions::default()
        });
        let outcome = h.controller.request_start(criteria());
        assert!(matches!(outcome, StartOutcome::Failed(Error::Preparation(_))));
        assert_eq!(h.log.count("launch"), 0);
        assert_eq!(h.controller.snapshot().percent, 0);
    }

    #[test]
    fn test_abort_from_idle_only_resets() {
        let mut h = harness();
        h.channel.send(ProgressMessage::new(1, 1, 1));
        assert!(!h.controller.request_abort());
        assert_eq!(h.controller.state(), JobState::Idle);
        assert_eq!(h.controller.counters(), ProgressCounters::default());
        assert_eq!(h.log.count("kill"), 0);
    }

    #[test]
    fn test_abort_running_kills_job_and_resets() {
        let mut h = harness();
        h.controller.request_start(criteria());
        h.channel.send(ProgressMessage::new(3, 10, 0));
        h.controller.tick();
        assert!(h.controller.request_abort());
        assert_eq!(h.controller.state(), JobState::Idle);
        assert_eq!(h.controller.counters(), ProgressCounters::default());
        assert_eq!(h.log.count("kill job_1"), 1);
        assert_eq!(h.controller.last_result(), Some(RunResult::Aborted));
        assert!(matches!(h.controller.tick(), TickOutcome::Idle));
    }

    #[test]
    fn test_abort_survives_lookup_failure() {
        let mut h = harness_with(HarnessOptions {
            fail_list: true,
            ..HarnessOptions::default()
        });
        match h.controller.request_start(criteria()) {
            StartOutcome::Launched { runtime_job_id, .. } => assert!(runtime_job_id.is_none()),
            StartOutcome::Failed(e) => panic!("start failed: {}", e),
        }
        assert!(h.controller.request_abort());
        assert_eq!(h.controller.state(), JobState::Idle);
        assert_eq!(h.log.count("kill"), 0);
    }

    fn forget_ack(h: &mut Harness) {
        if let Some(run) = h.controller.run.as_mut() {
            run.runtime_job_id = None;
        }
    }

    fn with_foreign_job() -> Harness {
        harness_with(HarnessOptions {
            running: vec!["job_foreign".to_string()],
            ..HarnessOptions::default()
        })
    }

    #[test]
    fn test_abort_without_ack_kills_the_new_job() {
        let mut h = harness();
        h.controller.request_start(criteria());
        forget_ack(&mut h);
        assert!(h.controller.request_abort());
        assert_eq!(h.log.count("kill job_1"), 1);
    }

    #[test]
    fn test_ack_ignores_jobs_running_before_launch() {
        let mut h = with_foreign_job();
        match h.controller.request_start(criteria()) {
            StartOutcome::Launched { runtime_job_id, .. } => {
                assert_eq!(runtime_job_id.as_deref(), Some("job_1"))
            }
            StartOutcome::Failed(e) => panic!("start failed: {}", e),
        }
        assert!(h.controller.request_abort());
        assert_eq!(h.log.count("kill job_1"), 1);
        assert_eq!(h.log.count("kill job_foreign"), 0);
        assert_eq!(*h.running.lock().unwrap(), vec!["job_foreign".to_string()]);
    }

    #[test]
    fn test_kill_fallback_ignores_jobs_running_before_launch() {
        let mut h = with_foreign_job();
        h.controller.request_start(criteria());
        forget_ack(&mut h);
        assert!(h.controller.request_abort());
        assert_eq!(h.log.count("kill job_1"), 1);
        assert_eq!(h.log.count("kill job_foreign"), 0);
    }

    #[test]
    fn test_kill_fallback_skips_ambiguous_listing() {
        let mut h = with_foreign_job();
        h.controller.request_start(criteria());
        forget_ack(&mut h);
        h.running.lock().unwrap().push("job_other".to_string());
        assert!(h.controller.request_abort());
        assert_eq!(h.controller.state(), JobState::Idle);
        assert_eq!(h.log.count("kill"), 0);
    }

    #[test]
    fn test_launch_failure_leaves_no_denominator() {
        let mut h = harness_with(HarnessOptions {
            fail_launch: true,
            ..HarnessOptions::default()
        });
        let outcome = h.controller.request_start(criteria());
        assert!(matches!(outcome, StartOutcome::Failed(Error::Preparation(_))));
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.state, JobState::Idle);
        assert_eq!(snapshot.total_input_lines, 0);
        assert_eq!(snapshot.percent, 0);
    }

    #[test]
    fn test_failing_channel_does_not_trap_run() {
        let mut h = harness();
        h.controller.request_start(criteria());
        h.channel.send(ProgressMessage::new(4, 40, 1));
        h.controller.tick();
        h.broken.store(true, Ordering::SeqCst);

        let mut ticks = 0;
        let outcome = loop {
            ticks += 1;
            let outcome = h.controller.tick();
            if outcome.is_terminal() {
                break outcome;
            }
            assert!(ticks < 1000, "run stuck in {:?}", h.controller.state());
        };
        assert_eq!(ticks, 101);
        assert!(matches!(outcome, TickOutcome::Finished { .. }));
        assert_eq!(h.controller.state(), JobState::Idle);
        assert_eq!(h.log.count("merge"), 1);
    }

    #[test]
    fn test_shutdown_closes_channel_once() {
        let mut h = harness();
        h.controller.request_start(criteria());
        h.controller.shutdown();
        assert_eq!(h.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_start_supersedes_first() {
        let mut h = harness();
        h.controller.request_start(criteria());
        h.channel.send(ProgressMessage::new(2, 2, 2));
        h.controller.tick();
        let first = h.controller.current_run().unwrap().run_id;

        h.controller.request_start(criteria());
        let second = h.controller.current_run().unwrap();
        assert_ne!(second.run_id, first);
        assert_eq!(second.runtime_job_id.as_deref(), Some("job_2"));
        assert_eq!(h.log.count("kill job_1"), 1);
        assert_eq!(h.log.count("launch"), 2);
        assert_eq!(h.controller.state(), JobState::Running);
        assert_eq!(h.controller.counters(), ProgressCounters::default());
    }

    #[test]
    fn test_completion_merges_exactly_once() {
        let mut h = harness();
        h.controller.request_start(criteria());
        h.channel.send_raw("3,10,0");
        h.controller.tick();
        h.controller.tick();
        h.channel.send_raw("2,5,1");
        h.controller.tick();

        match run_until_terminal(&mut h) {
            TickOutcome::Finished { counters, bytes } => {
                assert_eq!(counters.partitions_processed, 5);
                assert_eq!(counters.games_scanned, 15);
                assert_eq!(counters.matches_found, 1);
                assert_eq!(bytes, 42);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.controller.state(), JobState::Idle);
        for _ in 0..200 {
            assert!(matches!(h.controller.tick(), TickOutcome::Idle));
        }
        assert_eq!(h.log.count("merge resultado.txt"), 1);

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.percent, 50);
        assert_eq!(snapshot.last_result, Some(RunResult::Completed));
    }

    #[test]
    fn test_merge_failure_returns_to_idle() {
        let mut h = harness_with(HarnessOptions {
            fail_merge: true,
            ..HarnessOptions::default()
        });
        h.controller.request_start(criteria());
        h.channel.send(ProgressMessage::new(10, 100, 3));
        assert!(matches!(
            run_until_terminal(&mut h),
            TickOutcome::MergeFailed { .. }
        ));
        assert_eq!(h.controller.state(), JobState::Idle);
        assert_eq!(h.controller.last_result(), Some(RunResult::MergeFailed));
    }

    #[test]
    fn test_silent_job_is_flagged_without_merge() {
        let mut h = harness();
        h.controller.request_start(criteria());
        let mut ticks = 0;
        loop {
            ticks += 1;
            if h.controller.tick().is_terminal() {
                break;
            }
        }
        assert_eq!(ticks, 101);
        assert_eq!(h.log.count("merge"), 0);
        assert_eq!(h.controller.last_result(), Some(RunResult::NoProgress));
    }
}
