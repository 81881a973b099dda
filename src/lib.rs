//! 漫画书架下载器（Comic Shelf Downloader）。
//!
//! 从在线阅读站拉取整本分页漫画，重建页面图片并打包成可浏览的压缩档。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/HTTP 传输等基础设施
//! - `comic`：书籍模型、命名引擎、图片编解码与 CBZ 打包
//! - `download`：页面采集管线（续传、限速/并发调度、落盘）
//! - `sources`：站点解析器（编译期注册，按 URL 模式选择）

pub mod base_system;
pub mod comic;
pub mod download;
pub mod sources;
