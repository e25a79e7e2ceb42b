//! 模型输出的宽松 JSON 解析：去掉 Markdown 代码块，截取第一个配对的
//! `{...}` / `[...]`，再尝试修复尾逗号。全部失败时返回 `None`。

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("valid fence regex"));

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid trailing comma regex"));

pub fn extract_json(text: &str) -> Option<Value> {
    let unfenced = match FENCE.captures(text) {
        Some(caps) => caps.get(1).map_or(text, |m| m.as_str()),
        None => text,
    };
    let candidate = unfenced.trim();

    if let Ok(value) = serde_json::from_str(candidate) {
        return Some(value);
    }

    let fragment = first_balanced(candidate)?;
    if let Ok(value) = serde_json::from_str(fragment) {
        return Some(value);
    }

    let repaired = TRAILING_COMMA.replace_all(fragment, "$1");
    serde_json::from_str(&repaired).ok()
}

pub fn extract_json_as<T: DeserializeOwned>(text: &str) -> Option<T> {
    extract_json(text).and_then(|value| serde_json::from_value(value).ok())
}

/// 找到第一个 `{` 或 `[` 开始的配对片段，跳过字符串内部的括号
fn first_balanced(text: &str) -> Option<&str> {
    let start = text.find(|c| c == '{' || c == '[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_json_parses() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let text = "Here you go:\n```json\n{\"specialty\": \"Oncology\"}\n```\nThanks";
        assert_eq!(extract_json(text), Some(json!({"specialty": "Oncology"})));
    }

    #[test]
    fn object_inside_prose_is_found() {
        let text = r#"Sure! The analysis is {"keywords": ["a}b", "c"], "focus": "x"} hope it helps"#;
        assert_eq!(
            extract_json(text),
            Some(json!({"keywords": ["a}b", "c"], "focus": "x"}))
        );
    }

    #[test]
    fn array_and_trailing_comma_are_handled() {
        let text = "Discoveries:\n[\"one\", \"two\",]\n";
        assert_eq!(extract_json(text), Some(json!(["one", "two"])));
    }

    #[test]
    fn garbage_returns_none() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("{\"unterminated\": "), None);
    }

    #[test]
    fn typed_extraction_rejects_wrong_shape() {
        let items: Option<Vec<String>> = extract_json_as(r#"["a", "b"]"#);
        assert_eq!(items, Some(vec!["a".to_string(), "b".to_string()]));
        let wrong: Option<Vec<String>> = extract_json_as(r#"{"a": 1}"#);
        assert!(wrong.is_none());
    }
}
