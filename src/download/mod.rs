//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`    — 数据模型（PageOutcome / DownloadSession / 汇总计数）
//! - `resume`    — 断点续传判定
//! - `progress`  — 进度上报与 CLI 进度条
//! - `fetcher`   — 单页抓取与落盘
//! - `scheduler` — 会话编排（限速顺序 / 并发两种策略）

pub mod fetcher;
pub mod models;
pub mod progress;
pub mod resume;
pub mod scheduler;
