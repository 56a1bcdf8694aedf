//! 尽力而为的结构化解码
//!
//! 上游模型经常把 JSON 包在说明文字或代码栅栏里。这里从首个 `{` 扫描到与之
//! 配平的 `}`（忽略字符串字面量内部的花括号），解析失败再退回"首 `{` 到末
//! `}`"的粗切片。两条路都失败返回 None，由调用方落到兜底 Judgment。

/// 从原始输出中提取首个完整 JSON 对象
pub fn extract_json_object(raw: &str) -> Option<serde_json::Value> {
    let start = raw.find('{')?;

    if let Some(candidate) = matched_object_slice(&raw[start..]) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    // 粗切片兜底：首 { 到末 }
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    let value = serde_json::from_str::<serde_json::Value>(&raw[start..=end]).ok()?;
    value.is_object().then_some(value)
}

/// 返回以首字符 `{` 开头、到配平 `}` 为止的切片；字符串与转义内的括号不计
fn matched_object_slice(s: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    return None;
                }
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
