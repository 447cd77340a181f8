//! Configuration content parsers
//!
//! Two content kinds are supported: line-oriented properties files and
//! hierarchical JSON trees flattened to dotted keys. The content kind of a
//! source is a pure function of its URL unless overridden at construction.

use serde_json::Value;

use crate::common::{ConfigError, Result};

use super::data::{Configuration, LIST_SEPARATOR};

/// Content kind of a configuration source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Line-oriented `key=value` properties
    Properties,
    /// Hierarchical JSON object tree, flattened to dotted keys
    JsonTree,
}

impl ContentKind {
    /// Classify by URL/filename suffix; `.json` means a JSON tree,
    /// everything else is properties. A `.gz` compression suffix is
    /// stripped before classification.
    pub fn from_url(url: &str) -> ContentKind {
        let trimmed = url.trim_end_matches(".gz").trim_end_matches(".opt");
        if trimmed.ends_with(".json") {
            ContentKind::JsonTree
        } else {
            ContentKind::Properties
        }
    }
}

/// Parse raw content into a configuration according to its kind.
pub fn parse(kind: ContentKind, bytes: &[u8]) -> Result<Configuration> {
    match kind {
        ContentKind::Properties => parse_properties(bytes),
        ContentKind::JsonTree => parse_json_tree(bytes),
    }
}

/// Parse a properties file: `key=value` lines, `#` and `!` comments.
///
/// Content is decoded as UTF-8 with lossy replacement so latin-1 title
/// databases do not abort a pass.
pub fn parse_properties(bytes: &[u8]) -> Result<Configuration> {
    let text = String::from_utf8_lossy(bytes);
    let mut config = Configuration::new();

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }

        match line.split_once('=') {
            Some((key, value)) => {
                let key = key.trim();
                if key.is_empty() {
                    return Err(ConfigError::Malformed(format!(
                        "empty key on line {}",
                        lineno + 1
                    )));
                }
                config.put(key, value.trim())?;
            }
            None => {
                return Err(ConfigError::Malformed(format!(
                    "missing '=' on line {}: {:?}",
                    lineno + 1,
                    line
                )));
            }
        }
    }

    Ok(config)
}

/// Parse a JSON object tree, flattening nested objects to dotted keys.
///
/// Scalar array elements are joined into a semicolon-separated list value;
/// arrays of objects are rejected.
pub fn parse_json_tree(bytes: &[u8]) -> Result<Configuration> {
    let root: Value = serde_json::from_slice(bytes)
        .map_err(|e| ConfigError::Malformed(format!("invalid JSON: {}", e)))?;

    let obj = match root {
        Value::Object(map) => map,
        _ => {
            return Err(ConfigError::Malformed(
                "top-level JSON value must be an object".to_string(),
            ))
        }
    };

    let mut config = Configuration::new();
    for (key, value) in obj {
        flatten_into(&mut config, &key, &value)?;
    }
    Ok(config)
}

fn flatten_into(config: &mut Configuration, prefix: &str, value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let dotted = format!("{}.{}", prefix, key);
                flatten_into(config, &dotted, child)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match scalar_to_string(item) {
                    Some(s) => parts.push(s),
                    None => {
                        return Err(ConfigError::Malformed(format!(
                            "array under {:?} contains a non-scalar element",
                            prefix
                        )))
                    }
                }
            }
            config.put(prefix, parts.join(&LIST_SEPARATOR.to_string()))
        }
        scalar => match scalar_to_string(scalar) {
            Some(s) => config.put(prefix, s),
            None => Err(ConfigError::Malformed(format!(
                "unsupported JSON value under {:?}",
                prefix
            ))),
        },
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_kind_from_url() {
        assert_eq!(ContentKind::from_url("http://p/lockss.json"), ContentKind::JsonTree);
        assert_eq!(ContentKind::from_url("http://p/lockss.json.gz"), ContentKind::JsonTree);
        assert_eq!(ContentKind::from_url("/cache/expert_config.txt"), ContentKind::Properties);
        assert_eq!(ContentKind::from_url("/cache/titledb.json.opt"), ContentKind::JsonTree);
        assert_eq!(ContentKind::from_url("lockss.xml"), ContentKind::Properties);
    }

    #[test]
    fn test_parse_properties() {
        let text = b"# comment\n! also comment\n\norg.lockss.a = 1\norg.lockss.b=two \n";
        let config = parse_properties(text).unwrap();
        assert_eq!(config.get("org.lockss.a"), Some("1"));
        assert_eq!(config.get("org.lockss.b"), Some("two"));
        assert_eq!(config.len(), 2);
    }

    #[test]
    fn test_parse_properties_malformed() {
        assert!(matches!(
            parse_properties(b"no separator here"),
            Err(ConfigError::Malformed(_))
        ));
        assert!(matches!(
            parse_properties(b"=value-without-key"),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_json_tree() {
        let json = br#"{
            "org": { "lockss": {
                "config": { "reloadInterval": 600000 },
                "titleDbs": ["a.json", "b.json"],
                "enabled": true
            }}
        }"#;
        let config = parse_json_tree(json).unwrap();
        assert_eq!(config.get("org.lockss.config.reloadInterval"), Some("600000"));
        assert_eq!(
            config.get_list("org.lockss.titleDbs"),
            vec!["a.json", "b.json"]
        );
        assert_eq!(config.get_bool("org.lockss.enabled"), Some(true));
    }

    #[test]
    fn test_parse_json_tree_rejects_non_object() {
        assert!(matches!(
            parse_json_tree(b"[1,2,3]"),
            Err(ConfigError::Malformed(_))
        ));
        assert!(matches!(
            parse_json_tree(br#"{"a": [{"nested": 1}]}"#),
            Err(ConfigError::Malformed(_))
        ));
        assert!(matches!(
            parse_json_tree(b"not json"),
            Err(ConfigError::Malformed(_))
        ));
    }
}
