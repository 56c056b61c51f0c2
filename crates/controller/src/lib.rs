// lib.rs
// 作业控制器模块入口，声明并导出各子模块。
pub mod aggregator;
pub mod channel;
pub mod config;
pub mod control_loop;
pub mod controller;
pub mod error;
pub mod job;
pub mod job_conf;
pub mod logging;
pub mod partitioner;
pub mod planner;
pub mod result_merger;
pub mod runtime;
pub mod types;
pub mod validation;
