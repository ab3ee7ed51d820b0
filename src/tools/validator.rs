//! 答案校验：在最终回答落地前拦截明显无效的输出
//!
//! 只有 Error 级问题会导致拒绝；Warning 级（过短、缺少实质内容）只记录日志。

use std::sync::OnceLock;

use regex::Regex;

const INVALID_LITERALS: &[&str] = &[
    "undefined",
    "null",
    "n/a",
    "na",
    "none",
    "error",
    "[object object]",
    "nan",
];
const EMPTY_STRUCTURES: &[&str] = &["[]", "{}", "()", "<>", "\"\"", "''"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// 校验失败原因
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: String,
    pub severity: Severity,
}

impl Rejection {
    fn error(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            severity: Severity::Error,
        }
    }

    fn warning(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            severity: Severity::Warning,
        }
    }
}

fn index_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"['"]\d+['"]\s*:\s*['"][^'"]{1,3}['"]"#).expect("valid regex"))
}

fn error_patterns() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"(?i)error:",
            r"(?i)exception:",
            r"(?i)failed to",
            r"(?i)cannot find",
            r"(?i)unable to",
            r"抱歉.*无法",
            r"很遗憾.*失败",
            r"出错了",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn check_empty_or_invalid(trimmed: &str) -> Result<(), Rejection> {
    if trimmed.is_empty() {
        return Err(Rejection::error("answer is empty"));
    }
    if INVALID_LITERALS.contains(&trimmed.to_lowercase().as_str()) {
        return Err(Rejection::error(format!("answer is an invalid literal: {:?}", trimmed)));
    }
    if EMPTY_STRUCTURES.contains(&trimmed) {
        return Err(Rejection::error(format!("answer is an empty structure: {}", trimmed)));
    }
    Ok(())
}

fn check_length(trimmed: &str) -> Result<(), Rejection> {
    let len = trimmed.chars().count();
    if len < 10 {
        return Err(Rejection::warning(format!("answer is short ({} chars)", len)));
    }
    if len > 50_000 {
        return Err(Rejection::warning(format!("answer is very long ({} chars)", len)));
    }
    Ok(())
}

fn check_raw_structure(trimmed: &str) -> Result<(), Rejection> {
    let bracketed = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if bracketed {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if v.is_object() || v.is_array() {
                return Err(Rejection::error("answer is raw JSON, not natural language"));
            }
        }
    }
    if index_pattern().find_iter(trimmed).count() > 10 {
        return Err(Rejection::error(
            "answer looks like a character-indexed object split letter by letter",
        ));
    }
    Ok(())
}

fn check_error_patterns(trimmed: &str) -> Result<(), Rejection> {
    if trimmed.chars().count() < 100 && error_patterns().iter().any(|re| re.is_match(trimmed)) {
        return Err(Rejection::error("answer is mainly an error message"));
    }
    Ok(())
}

fn check_substance(trimmed: &str) -> Result<(), Rejection> {
    let content_len = trimmed.chars().filter(|c| !c.is_whitespace()).count();
    if content_len < 20 {
        return Err(Rejection::warning(format!(
            "answer lacks substance ({} non-space chars)",
            content_len
        )));
    }
    let alnum = trimmed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || ('\u{4e00}'..='\u{9fa5}').contains(c))
        .count();
    if alnum < 10 {
        return Err(Rejection::warning("answer is mostly punctuation"));
    }
    Ok(())
}

/// 全面校验；Warning 级问题不导致拒绝
pub fn validate_answer(answer: &str) -> Result<(), Rejection> {
    let trimmed = answer.trim();
    check_empty_or_invalid(trimmed)?;

    let soft = |r: Result<(), Rejection>| match r {
        Err(rej) if rej.severity == Severity::Warning => {
            tracing::debug!(reason = %rej.reason, "Answer validation warning");
            Ok(())
        }
        other => other,
    };

    soft(check_length(trimmed))?;
    check_raw_structure(trimmed)?;
    check_error_patterns(trimmed)?;
    soft(check_substance(trimmed))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_literals() {
        assert!(validate_answer("   ").is_err());
        assert!(validate_answer("undefined").is_err());
        assert!(validate_answer("N/A").is_err());
        assert!(validate_answer("{}").is_err());
    }

    #[test]
    fn test_rejects_raw_json() {
        let err = validate_answer(r#"{"answer": "Paris is the capital"}"#).unwrap_err();
        assert_eq!(err.severity, Severity::Error);
    }

    #[test]
    fn test_rejects_short_error_message() {
        assert!(validate_answer("Error: failed to fetch the data").is_err());
    }

    #[test]
    fn test_accepts_normal_and_short_answers() {
        assert!(validate_answer("Paris is the capital of France, located on the Seine.").is_ok());
        // 过短只是 Warning
        assert!(validate_answer("Paris").is_ok());
    }
}
