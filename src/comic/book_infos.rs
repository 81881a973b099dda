//! 一本书的元数据模型。
//!
//! 由 SourceResolver 在一次下载开始时解析一次，下载管线只读不改。

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadDirection {
    #[default]
    LeftToRight,
    RightToLeft,
}

#[derive(Debug, Clone, Default)]
pub struct BookInfos {
    pub title: String,
    pub subtitle: String,
    pub serie: String,
    pub volume: String,
    pub chapter: String,
    pub genre: String,
    pub authors: String,
    pub language: String,
    pub description: String,
    pub publisher: String,
    /// 源站报告的页数。仅用于进度显示与 shortfall 告警，从不作为硬停止条件。
    pub pages: usize,
    pub read_direction: ReadDirection,
    /// 每页一个不透明的抓取定位符（通常是页面 URL）。
    /// 非空时其长度就是实际的抓取次数上限，`pages` 只是参考值。
    pub page_locators: Vec<String>,
    /// 解析器私有的附加数据（逐页解密密钥、授权状态等）。
    pub custom_fields: HashMap<String, Value>,
}

impl fmt::Display for BookInfos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text_fields = [
            ("title", &self.title),
            ("subtitle", &self.subtitle),
            ("serie", &self.serie),
            ("volume", &self.volume),
            ("chapter", &self.chapter),
            ("genre", &self.genre),
            ("authors", &self.authors),
            ("language", &self.language),
            ("publisher", &self.publisher),
        ];
        for (name, value) in text_fields {
            if !value.is_empty() {
                writeln!(f, "{{{name}}}: {value}")?;
            }
        }
        if self.pages > 0 {
            writeln!(f, "{{pages}}: {}", self.pages)?;
        }
        let direction = match self.read_direction {
            ReadDirection::LeftToRight => "LeftToRight",
            ReadDirection::RightToLeft => "RightToLeft",
        };
        write!(f, "{{read_direction}}: {direction}")
    }
}

impl BookInfos {
    /// 计划抓取的页数：定位符列表非空时以它为准。
    pub fn planned_pages(&self, grab_margin: usize, hard_limit: usize) -> usize {
        if !self.page_locators.is_empty() {
            self.page_locators.len()
        } else {
            (self.pages + grab_margin).min(hard_limit)
        }
    }
}
