//! 文本与 Markdown 工具：最终答案修复、脚注渲染、分块
//!
//! 这些函数都是纯函数，失败时返回原文而不是报错。

use std::sync::OnceLock;

use regex::Regex;

use crate::memory::Reference;

/// 网页分块的最大字符数
pub const CHUNK_MAX_CHARS: usize = 500;

macro_rules! static_regex {
    ($name:ident, $re:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($re).expect("valid regex"))
        }
    };
}

static_regex!(extra_breaks_re, r"\n{3,}");
static_regex!(html_tag_re, r"<[^>]*>");
static_regex!(footnote_variant_re, r"\[\s*\^\s*(\d+)\s*\]|\[(\d+)\s*\^\]|\^\[(\d+)\]");
static_regex!(footnote_marker_re, r"\[\^(\d+)\]");
static_regex!(footnote_def_re, r"(?m)^\[\^\d+\]:.*$");
static_regex!(table_re, r"(?is)<table[^>]*>(.*?)</table>");
static_regex!(row_re, r"(?is)<tr[^>]*>(.*?)</tr>");
static_regex!(cell_re, r"(?is)<(th|td)[^>]*>(.*?)</(?:th|td)>");
static_regex!(outer_fence_re, r"(?s)^\s*```(?:markdown|md)?\s*\n(.*)\n```\s*$");

/// 把三个及以上的连续换行压成两个
pub fn remove_extra_line_breaks(text: &str) -> String {
    extra_breaks_re().replace_all(text, "\n\n").into_owned()
}

/// 去掉 HTML 标签
pub fn remove_html_tags(text: &str) -> String {
    html_tag_re().replace_all(text, "").into_owned()
}

/// 取前 k 个
pub fn choose_k<T: Clone>(items: &[T], k: usize) -> Vec<T> {
    items.iter().take(k).cloned().collect()
}

/// 代码块缩进修复：闭合围栏与开启围栏对齐，块内各行去掉开启围栏的公共缩进后重新缩进
pub fn fix_code_block_indentation(md: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut open_indent: Option<String> = None;
    for line in md.lines() {
        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];
        if trimmed.starts_with("```") {
            match open_indent.take() {
                None => {
                    open_indent = Some(indent.to_string());
                    out.push(line.to_string());
                }
                Some(open) => out.push(format!("{}{}", open, trimmed)),
            }
            continue;
        }
        match &open_indent {
            Some(open) if !open.is_empty() => {
                let body = line.strip_prefix(open.as_str()).unwrap_or(trimmed);
                out.push(format!("{}{}", open, body));
            }
            _ => out.push(line.to_string()),
        }
    }
    let mut joined = out.join("\n");
    if md.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

/// 脚注修复：去掉包裹全文的 ```markdown 围栏，并把 [ ^1 ]、[1^]、^[1] 等变体统一为 [^1]
pub fn repair_markdown_footnotes_outer(md: &str) -> String {
    let unwrapped = outer_fence_re()
        .captures(md)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| md.to_string());
    footnote_variant_re()
        .replace_all(&unwrapped, |caps: &regex::Captures| {
            let n = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or("");
            format!("[^{}]", n)
        })
        .into_owned()
}

fn html_table_to_md(inner: &str) -> Option<String> {
    let rows: Vec<Vec<String>> = row_re()
        .captures_iter(inner)
        .map(|row| {
            cell_re()
                .captures_iter(&row[1])
                .map(|c| {
                    remove_html_tags(&c[2])
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .replace('|', "\\|")
                })
                .collect::<Vec<_>>()
        })
        .filter(|r| !r.is_empty())
        .collect();
    let width = rows.iter().map(Vec::len).max()?;
    let mut lines = Vec::with_capacity(rows.len() + 1);
    for (i, row) in rows.iter().enumerate() {
        let mut cells = row.clone();
        cells.resize(width, String::new());
        lines.push(format!("| {} |", cells.join(" | ")));
        if i == 0 {
            lines.push(format!("|{}", " --- |".repeat(width)));
        }
    }
    Some(lines.join("\n"))
}

/// HTML 表格转 Markdown 表格；首行作为表头
pub fn convert_html_tables_to_md(md: &str) -> String {
    table_re()
        .replace_all(md, |caps: &regex::Captures| {
            html_table_to_md(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// 收尾修复：补齐未闭合的代码围栏，压缩空行
pub fn repair_markdown_final(md: &str) -> String {
    let mut text = md.trim().to_string();
    let fences = text.lines().filter(|l| l.trim_start().starts_with("```")).count();
    if fences % 2 == 1 {
        text.push_str("\n```");
    }
    remove_extra_line_breaks(&text)
}

/// 渲染带脚注的 Markdown：越界的脚注标记被移除，没有任何标记时在末尾补齐
pub fn build_md_from_answer(answer: &str, references: &[Reference]) -> String {
    let answer = repair_markdown_footnotes_outer(answer);
    if references.is_empty() {
        return footnote_marker_re().replace_all(&answer, "").into_owned();
    }

    let body = footnote_def_re().replace_all(&answer, "").into_owned();
    let max = references.len();
    let mut used = false;
    let mut body = footnote_marker_re()
        .replace_all(&body, |caps: &regex::Captures| {
            match caps[1].parse::<usize>() {
                Ok(n) if n >= 1 && n <= max => {
                    used = true;
                    caps[0].to_string()
                }
                _ => String::new(),
            }
        })
        .trim_end()
        .to_string();
    if !used {
        let markers: String = (1..=max).map(|n| format!("[^{}]", n)).collect();
        body = format!("{} {}", body, markers);
    }

    let footnotes: Vec<String> = references
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let quote = r
                .exact_quote
                .as_deref()
                .map(|q| q.split_whitespace().collect::<Vec<_>>().join(" "))
                .unwrap_or_default();
            let title = r
                .title
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .map(String::from)
                .or_else(|| crate::tools::url::hostname(&r.url))
                .unwrap_or_else(|| r.url.clone());
            format!("[^{}]: {} [{}]({})", i + 1, quote, title, r.url)
                .replace(":  [", ": [")
        })
        .collect();

    remove_extra_line_breaks(&format!("{}\n\n{}", body, footnotes.join("\n\n")))
}

/// 正文分块：按空行切段，超长段按字符硬切；返回 (块, 每块在原文中的字符区间)
pub fn chunk_text(text: &str, max_chars: usize) -> (Vec<String>, Vec<[usize; 2]>) {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut positions = Vec::new();

    let mut start = 0usize;
    let mut i = 0usize;
    let flush = |from: usize, to: usize, chunks: &mut Vec<String>, positions: &mut Vec<[usize; 2]>| {
        let mut s = from;
        while s < to {
            let e = (s + max_chars).min(to);
            let piece: String = chars[s..e].iter().collect();
            if !piece.trim().is_empty() {
                chunks.push(piece);
                positions.push([s, e]);
            }
            s = e;
        }
    };
    while i < chars.len() {
        if chars[i] == '\n' && i + 1 < chars.len() && chars[i + 1] == '\n' {
            flush(start, i, &mut chunks, &mut positions);
            while i < chars.len() && chars[i] == '\n' {
                i += 1;
            }
            start = i;
        } else {
            i += 1;
        }
    }
    flush(start, chars.len(), &mut chunks, &mut positions);
    (chunks, positions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_extra_line_breaks() {
        assert_eq!(remove_extra_line_breaks("a\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_footnote_variants() {
        let fixed = repair_markdown_footnotes_outer("A[ ^1 ] B[2^] C^[3]");
        assert_eq!(fixed, "A[^1] B[^2] C[^3]");
        let unwrapped = repair_markdown_footnotes_outer("```markdown\n# Title\nbody\n```");
        assert_eq!(unwrapped, "# Title\nbody");
    }

    #[test]
    fn test_code_block_indentation() {
        let md = "- item\n  ```rust\n  let x = 1;\n```\n";
        assert_eq!(
            fix_code_block_indentation(md),
            "- item\n  ```rust\n  let x = 1;\n  ```\n"
        );
    }

    #[test]
    fn test_html_table() {
        let html = "<table><tr><th>Name</th><th>Age</th></tr><tr><td>Ann</td><td>3</td></tr></table>";
        assert_eq!(
            convert_html_tables_to_md(html),
            "| Name | Age |\n| --- | --- |\n| Ann | 3 |"
        );
    }

    #[test]
    fn test_repair_final_closes_fence() {
        assert_eq!(repair_markdown_final("```\ncode"), "```\ncode\n```");
    }

    #[test]
    fn test_build_md_with_references() {
        let refs = vec![Reference {
            url: "https://a.com/x".into(),
            title: Some("A".into()),
            exact_quote: Some("quoted  text".into()),
            ..Default::default()
        }];
        let md = build_md_from_answer("Fact one[^1]. Fact two[^7].", &refs);
        assert!(md.starts_with("Fact one[^1]. Fact two."));
        assert!(md.ends_with("[^1]: quoted text [A](https://a.com/x)"));
    }

    #[test]
    fn test_build_md_appends_markers_when_unused() {
        let refs = vec![Reference::url("https://a.com/x")];
        let md = build_md_from_answer("Plain answer.", &refs);
        assert!(md.starts_with("Plain answer. [^1]"));
        assert!(md.contains("[^1]: [a.com](https://a.com/x)"));
    }

    #[test]
    fn test_chunk_text_positions() {
        let text = "first para\n\nsecond para that is long";
        let (chunks, pos) = chunk_text(text, 10);
        assert_eq!(chunks[0], "first para");
        assert_eq!(pos[0], [0, 10]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        let rebuilt: String = text.chars().skip(pos[1][0]).take(pos[1][1] - pos[1][0]).collect();
        assert_eq!(rebuilt, chunks[1]);
    }
}
