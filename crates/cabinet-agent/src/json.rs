//! JSON extraction from agent output.
//!
//! Agents are asked to return bare JSON but routinely wrap it in prose or
//! markdown fences. These helpers find the first balanced object/array and
//! parse it, ignoring everything around it. Brackets inside JSON strings are
//! handled by tracking string state.

use serde_json::Value;

/// Extract the first balanced JSON object from free text.
pub fn extract_json_object(text: &str) -> Option<Value> {
    extract_balanced(text, '{', '}')
}

/// Extract the first balanced JSON array from free text.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    match extract_balanced(text, '[', ']')? {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

fn extract_balanced(text: &str, open: char, close: char) -> Option<Value> {
    // Fast path: the whole trimmed text parses directly
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        match (open, &value) {
            ('{', Value::Object(_)) | ('[', Value::Array(_)) => return Some(value),
            _ => {}
        }
    }

    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
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
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + c.len_utf8()];
                    return serde_json::from_str(candidate).ok();
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

    #[test]
    fn test_extracts_bare_object() {
        let value = extract_json_object(r#"{"score": 7}"#).unwrap();
        assert_eq!(value["score"], 7);
    }

    #[test]
    fn test_extracts_object_from_prose() {
        let text = "Here is my assessment:\n\n```json\n{\"score\": 3, \"note\": \"a } in text\"}\n```\nDone.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["score"], 3);
        assert_eq!(value["note"], "a } in text");
    }

    #[test]
    fn test_extracts_nested_object() {
        let text = r#"result: {"outer": {"inner": [1, 2]}} trailing"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["outer"]["inner"][0], 1);
    }

    #[test]
    fn test_extracts_array_from_prose() {
        let text = "I found these items:\n[{\"title\": \"a\"}, {\"title\": \"b\"}]";
        let items = extract_json_array(text).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["title"], "b");
    }

    #[test]
    fn test_no_json_returns_none() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_array("still nothing").is_none());
    }

    #[test]
    fn test_unbalanced_returns_none() {
        assert!(extract_json_object(r#"{"open": true"#).is_none());
    }

    #[test]
    fn test_escaped_quotes_inside_strings() {
        let text = r#"{"msg": "she said \"hi\" {not a bracket}"}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["msg"], "she said \"hi\" {not a bracket}");
    }
}
