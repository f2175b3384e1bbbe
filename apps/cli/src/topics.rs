//! Loading topics from the command line or a topic file.

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr, eyre};
use serde::Deserialize;

use topicharvest_shared::Topic;

/// Supported topic file formats, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TopicFormat {
    /// A JSON list, or an object with a `topics` list.
    Json,
    /// A top-level `- item` list, or items under a `topics:` key.
    Yaml,
    /// One topic per non-empty line.
    Text,
    /// `-`/`*` list items, else non-empty lines.
    Markdown,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonTopics {
    List(Vec<String>),
    Keyed { topics: Vec<String> },
}

impl TopicFormat {
    pub(crate) fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "txt" => Ok(Self::Text),
            "md" | "markdown" => Ok(Self::Markdown),
            _ => Err(eyre!(
                "unsupported topic file '{}': expected .json, .yaml, .yml, .txt or .md",
                path.display()
            )),
        }
    }

    pub(crate) fn parse(self, content: &str) -> Result<Vec<String>> {
        match self {
            Self::Json => {
                let parsed: JsonTopics =
                    serde_json::from_str(content).wrap_err("topic file is not a JSON list of strings")?;
                Ok(match parsed {
                    JsonTopics::List(topics) | JsonTopics::Keyed { topics } => topics,
                })
            }
            Self::Yaml => Ok(parse_yaml(content)),
            Self::Text => Ok(non_empty_lines(content)),
            Self::Markdown => {
                let items: Vec<String> = content
                    .lines()
                    .filter_map(|l| {
                        let t = l.trim_start();
                        t.strip_prefix("- ").or_else(|| t.strip_prefix("* "))
                    })
                    .map(|s| s.trim().to_string())
                    .collect();
                if items.is_empty() {
                    Ok(non_empty_lines(content))
                } else {
                    Ok(items)
                }
            }
        }
    }
}

/// Resolve `--topics`: an existing file is parsed by extension, anything else
/// is a comma-separated list. Blank entries are dropped.
pub(crate) fn load_topics(arg: &str) -> Result<Vec<Topic>> {
    let path = Path::new(arg);
    let raw = if path.is_file() {
        let format = TopicFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read topic file '{}'", path.display()))?;
        format.parse(&content)?
    } else {
        arg.split(',').map(str::to_string).collect()
    };

    let topics: Vec<Topic> = raw.iter().filter_map(|t| Topic::new(t).ok()).collect();
    if topics.is_empty() {
        return Err(eyre!("no topics given"));
    }
    Ok(topics)
}

fn non_empty_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Minimal YAML reader for the two topic-file shapes we accept.
fn parse_yaml(content: &str) -> Vec<String> {
    let lines: Vec<&str> = content
        .lines()
        .map(strip_yaml_comment)
        .filter(|l| !l.trim().is_empty() && l.trim() != "---")
        .collect();
    let keyed = lines.iter().any(|l| l.starts_with("topics:"));

    let mut topics = Vec::new();
    let mut in_topics = false;
    for line in lines {
        let top_level = !line.starts_with([' ', '\t']);
        let trimmed = line.trim();

        if keyed {
            if top_level && !trimmed.starts_with('-') {
                in_topics = false;
                if let Some(rest) = trimmed.strip_prefix("topics:") {
                    in_topics = true;
                    if let Some(inline) = rest.trim().strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                        topics.extend(inline.split(',').map(unquote));
                    }
                }
                continue;
            }
            if !in_topics {
                continue;
            }
        } else if !top_level {
            continue;
        }

        if let Some(item) = trimmed.strip_prefix('-') {
            topics.push(unquote(item));
        }
    }
    topics
}

fn strip_yaml_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #") {
        Some(i) => &line[..i],
        None => line,
    }
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    let quoted = s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')));
    if quoted {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}
