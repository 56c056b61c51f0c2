// control_loop.rs
// 控制循环：固定周期的单线程协作式调度，读取用户意图，转交给作业控制器，并按抽样频率刷新展示。
use crate::controller::{JobController, ProgressSnapshot, StartOutcome, TickOutcome};
use crate::job::JobState;
use crate::types::{DEFAULT_REFRESH_EVERY, DEFAULT_TICK_MS};
use crate::validation::{self, FormInput};
use std::time::Duration;
use tracing::{info, warn};

/// 用户意图
#[derive(Debug, Clone)]
pub enum Intent {
    /// 以表单内容启动搜索
    Start(FormInput),
    /// 终止当前搜索
    Abort,
    /// 退出程序
    Shutdown,
}

/// 意图来源，每个周期最多取一个
pub trait IntentSource {
    fn poll(&mut self) -> Option<Intent>;
}

/// 展示层
pub trait ProgressView {
    /// 阶段说明变化时调用
    fn show_phase(&mut self, phase: &str);

    /// 刷新计数和进度
    fn show_progress(&mut self, snapshot: &ProgressSnapshot);

    /// 校验失败，原因原样展示
    fn show_rejection(&mut self, reason: &str);

    /// 控制器报告的失败（准备、合并等）
    fn show_error(&mut self, message: &str);
}

/// 单步执行后是否继续
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Continue,
    Exit,
}

/// 控制循环
pub struct ControlLoop<I, V> {
    controller: JobController,
    intents: I,
    view: V,
    tick: Duration,
    refresh_every: u32,
    ticks_since_refresh: u32,
    last_phase: &'static str,
    exit_when_idle: bool,
    start_requested: bool,
}

impl<I: IntentSource, V: ProgressView> ControlLoop<I, V> {
    pub fn new(controller: JobController, intents: I, view: V) -> Self {
        Self {
            controller,
            intents,
            view,
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            refresh_every: DEFAULT_REFRESH_EVERY,
            ticks_since_refresh: 0,
            last_phase: "",
            exit_when_idle: false,
            start_requested: false,
        }
    }

    /// 周期和刷新抽样因子，因子为 0 时按 1 处理
    pub fn with_timing(mut self, tick: Duration, refresh_every: u32) -> Self {
        self.tick = tick;
        self.refresh_every = refresh_every.max(1);
        self
    }

    /// 处理过启动请求且控制器回到空闲后自动退出
    pub fn exit_when_idle(mut self, exit: bool) -> Self {
        self.exit_when_idle = exit;
        self
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// 运行到收到退出意图为止
    pub fn run(&mut self) {
        info!(tick_ms = self.tick.as_millis() as u64, "控制循环开始");
        while self.step() == LoopStatus::Continue {
            std::thread::sleep(self.tick);
        }
        info!("控制循环结束");
    }

    /// 执行一个周期
    pub fn step(&mut self) -> LoopStatus {
        match self.intents.poll() {
            Some(Intent::Start(form)) => self.handle_start(&form),
            Some(Intent::Abort) => {
                if self.controller.request_abort() {
                    info!("用户终止了作业");
                }
                self.refresh();
            }
            Some(Intent::Shutdown) => {
                self.shutdown();
                return LoopStatus::Exit;
            }
            None => {}
        }

        if self.controller.is_running() {
            let outcome = self.controller.tick();
            self.report_outcome(&outcome);
            if outcome.is_terminal() {
                self.refresh();
            } else {
                self.ticks_since_refresh += 1;
                if self.ticks_since_refresh >= self.refresh_every {
                    self.refresh();
                }
            }
        }
        self.update_phase();

        if self.exit_when_idle && self.start_requested && !self.controller.state().is_active() {
            self.shutdown();
            return LoopStatus::Exit;
        }
        LoopStatus::Continue
    }

    fn handle_start(&mut self, form: &FormInput) {
        self.start_requested = true;
        self.view.show_phase(JobState::Validating.phase());
        let criteria = match validation::validate(form) {
            Ok(criteria) => criteria,
            Err(e) => {
                warn!(reason = %e, "校验失败");
                self.view.show_rejection(&e.to_string());
                self.last_phase = "";
                self.view.show_phase("");
                return;
            }
        };
        if let StartOutcome::Failed(e) = self.controller.request_start(criteria) {
            self.view.show_error(&e.to_string());
        }
        self.refresh();
    }

    fn report_outcome(&mut self, outcome: &TickOutcome) {
        match outcome {
            TickOutcome::MergeFailed { error, .. } => self.view.show_error(&error.to_string()),
            TickOutcome::NoProgress => self.view.show_error("作业没有上报任何进度，可能启动失败"),
            _ => {}
        }
    }

    fn refresh(&mut self) {
        self.ticks_since_refresh = 0;
        let snapshot = self.controller.snapshot();
        self.view.show_progress(&snapshot);
    }

    fn update_phase(&mut self) {
        let phase = self.controller.snapshot().phase();
        if phase != self.last_phase {
            self.last_phase = phase;
            self.view.show_phase(phase);
        }
    }

    fn shutdown(&mut self) {
        self.controller.shutdown();
    }
}
