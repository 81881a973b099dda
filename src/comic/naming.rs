//! 命名引擎：模板渲染、文件系统清洗、默认标题与页文件名。
//!
//! 全部为纯函数，同一输入永远产出同一名字。

use super::book_infos::BookInfos;

/// 用书籍元数据渲染名字模板。
///
/// `{field}` 逐字段替换；未知 token 原样保留。`{volume:2}` `{volume:3}`
/// `{chapter:2}` `{chapter:3}` 在值为纯数字时左补零到指定宽度
/// （不会截短自然宽度），否则按原值替换。
pub fn render(pattern: &str, infos: &BookInfos) -> String {
    let mut name = pattern.to_string();
    let fields = [
        ("{title}", infos.title.as_str()),
        ("{subtitle}", infos.subtitle.as_str()),
        ("{serie}", infos.serie.as_str()),
        ("{volume}", infos.volume.as_str()),
        ("{chapter}", infos.chapter.as_str()),
        ("{genre}", infos.genre.as_str()),
        ("{authors}", infos.authors.as_str()),
        ("{language}", infos.language.as_str()),
        ("{description}", infos.description.as_str()),
        ("{publisher}", infos.publisher.as_str()),
    ];
    for (token, value) in fields {
        name = name.replace(token, value);
    }
    name = name.replace("{pages}", &infos.pages.to_string());

    for (token, value, width) in [
        ("{volume:2}", infos.volume.as_str(), 2),
        ("{volume:3}", infos.volume.as_str(), 3),
        ("{chapter:2}", infos.chapter.as_str(), 2),
        ("{chapter:3}", infos.chapter.as_str(), 3),
    ] {
        if name.contains(token) {
            name = name.replace(token, &zero_pad(value, width));
        }
    }
    name
}

/// 纯数字的值左补零到 `max(width, 自然宽度)`；其余原样返回。
fn zero_pad(value: &str, width: usize) -> String {
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        format!("{value:0>width$}", width = width.max(value.len()))
    } else {
        value.to_string()
    }
}

/// 去掉路径里非法的字符，压缩空白，去掉尾部的点。
///
/// `allow_path_separators` 用于目录模板渲染：保留 `\` 和 `/`。
pub fn sanitize(name: &str, allow_path_separators: bool) -> String {
    let mut forbidden: Vec<char> = vec![':', '*', '<', '>', '?', '"', '|'];
    if !allow_path_separators {
        forbidden.push('\\');
        forbidden.push('/');
    }

    let replaced: String = name
        .chars()
        .map(|c| if forbidden.contains(&c) { '_' } else { c })
        .collect();

    let mut collapsed = String::with_capacity(replaced.len());
    let mut in_space = false;
    for c in replaced.chars() {
        if c.is_whitespace() {
            if !in_space {
                collapsed.push(' ');
            }
            in_space = true;
        } else {
            collapsed.push(c);
            in_space = false;
        }
    }

    let mut cleaned = collapsed.trim().to_string();
    while cleaned.ends_with('.') {
        cleaned.pop();
    }
    cleaned.trim().to_string()
}

/// 模板渲染为空时的兜底标题。
pub fn default_title(infos: &BookInfos) -> String {
    let has_subtitle = !infos.subtitle.is_empty();
    let has_volume = !infos.volume.is_empty();
    match (has_subtitle, has_volume) {
        (true, true) => format!(
            "{} - {}. {}",
            infos.title,
            zero_pad(&infos.volume, 2),
            infos.subtitle
        ),
        (true, false) => format!("{} - {}", infos.title, infos.subtitle),
        (false, true) => format!("{} - {}", infos.title, zero_pad(&infos.volume, 2)),
        (false, false) => infos.title.clone(),
    }
}

/// 本次下载实际使用的标题：模板渲染、清洗，空了就退回默认标题。
pub fn compute_title(pattern: &str, infos: &BookInfos) -> String {
    let rendered = sanitize(&render(pattern, infos), false);
    if rendered.is_empty() {
        sanitize(&default_title(infos), false)
    } else {
        rendered
    }
}

/// 页序号的补零宽度：至少 3 位，页数更多时取其十进制位数。
pub fn page_digits(planned_total: usize) -> usize {
    planned_total.to_string().len().max(3)
}

/// 第 `index`（0 起）页的最终文件名。文件名里页号从 1 起。
pub fn page_file_name(title_used: &str, index: usize, planned_total: usize, ext: &str) -> String {
    let width = page_digits(planned_total);
    format!("{title_used} {:0width$}.{ext}", index + 1, width = width)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infos() -> BookInfos {
        BookInfos {
            title: "Title".into(),
            serie: "Serie".into(),
            volume: "7".into(),
            authors: "Author".into(),
            ..Default::default()
        }
    }

    #[test]
    fn render_replaces_known_tokens() {
        let infos = infos();
        assert_eq!(
            render("{title} - {serie} - {volume} - {authors}", &infos),
            "Title - Serie - 7 - Author"
        );
    }

    #[test]
    fn render_keeps_unknown_tokens() {
        assert_eq!(render("{title} {mystery}", &infos()), "Title {mystery}");
    }

    #[test]
    fn render_pads_numeric_volume() {
        let mut infos = infos();
        assert_eq!(render("{volume:2}", &infos), "07");
        assert_eq!(render("{volume:3}", &infos), "007");
        infos.volume = "abc".into();
        assert_eq!(render("{volume:2}", &infos), "abc");
        infos.volume = "1234".into();
        assert_eq!(render("{volume:2}", &infos), "1234");
        infos.chapter = "5".into();
        assert_eq!(render("{chapter:3}", &infos), "005");
    }

    #[test]
    fn sanitize_strips_forbidden_chars() {
        assert_eq!(sanitize("test_file.txt", false), "test_file.txt");
        assert_eq!(sanitize("test<file>.txt", false), "test_file_.txt");
        assert_eq!(sanitize("test/file.txt", false), "test_file.txt");
        assert_eq!(sanitize("test\\file.txt", false), "test_file.txt");
        assert_eq!(sanitize("test:*file.txt", false), "test__file.txt");
        assert_eq!(sanitize("test  file.txt", false), "test file.txt");
        assert_eq!(sanitize("test   file...", false), "test file");
        assert_eq!(sanitize("   test file...   ", false), "test file");
        assert_eq!(
            sanitize("test<serie>\\file.txt", true),
            "test_serie_\\file.txt"
        );
    }

    #[test]
    fn default_title_fallbacks() {
        let mut infos = BookInfos {
            title: "title".into(),
            ..Default::default()
        };
        assert_eq!(default_title(&infos), "title");
        infos.subtitle = "subtitle".into();
        assert_eq!(default_title(&infos), "title - subtitle");
        infos.volume = "1".into();
        assert_eq!(default_title(&infos), "title - 01. subtitle");
        infos.volume = "1234".into();
        assert_eq!(default_title(&infos), "title - 1234. subtitle");
        infos.subtitle = String::new();
        infos.volume = "1".into();
        assert_eq!(default_title(&infos), "title - 01");
    }

    #[test]
    fn compute_title_falls_back_when_pattern_renders_empty() {
        let infos = BookInfos {
            title: "title".into(),
            volume: "2".into(),
            ..Default::default()
        };
        // 模板只引用空字段时渲染结果为空
        assert_eq!(compute_title("{subtitle}", &infos), "title - 02");
        assert_eq!(compute_title("{title}", &infos), "title");
    }

    #[test]
    fn page_names_are_one_based_and_padded() {
        assert_eq!(page_file_name("Book", 0, 3, "jpeg"), "Book 001.jpeg");
        assert_eq!(page_file_name("Book", 2, 3, "webp"), "Book 003.webp");
        assert_eq!(page_file_name("Book", 41, 46, "png"), "Book 042.png");
        // 超过 999 页时宽度跟随总页数
        assert_eq!(page_file_name("Book", 0, 1200, "jpeg"), "Book 0001.jpeg");
    }

    #[test]
    fn render_is_deterministic() {
        let infos = infos();
        let a = render("{title} - {volume:2}", &infos);
        let b = render("{title} - {volume:2}", &infos);
        assert_eq!(a, b);
        assert_eq!(a, "Title - 07");
    }
}
