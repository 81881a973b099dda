//! 书籍模型与成品处理模块入口。
//!
//! 子模块：
//! - `book_infos`  — 书籍元数据模型（BookInfos / ReadDirection）
//! - `naming`      — 命名引擎（模板渲染 / 清洗 / 页文件名）
//! - `image_codec` — 图片嗅探与转码
//! - `packaging`   — CBZ 打包

pub mod book_infos;
pub mod image_codec;
pub mod naming;
pub mod packaging;
