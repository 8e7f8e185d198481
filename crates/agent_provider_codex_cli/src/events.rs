use serde_json::Value;

/// Lifecycle phase of a streamed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPhase {
    Started,
    Updated,
    Completed,
}

/// Normalized item payload from the CLI's JSONL stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodexItem {
    AgentMessage { text: String },
    Reasoning { text: String },
    CommandExecution { command: String },
    FileChange { paths: Vec<String> },
    McpToolCall { server: String, tool: String },
    WebSearch { query: String },
    Other { item_type: String },
}

/// One normalized JSONL event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodexEvent {
    ThreadStarted { thread_id: String },
    TurnCompleted,
    TurnFailed { message: String },
    Error { message: String },
    Item { phase: ItemPhase, item: CodexItem },
    Ignored { event_type: String },
}

/// Parses one stdout line. Returns `None` for blank or non-JSON lines.
#[must_use]
pub fn parse_event_line(line: &str) -> Option<CodexEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let value = serde_json::from_str::<Value>(line).ok()?;
    let event_type = value.get("type")?.as_str()?;

    Some(match event_type {
        "thread.started" => CodexEvent::ThreadStarted {
            thread_id: string_field(&value, "thread_id")?,
        },
        "turn.completed" => CodexEvent::TurnCompleted,
        "turn.failed" => CodexEvent::TurnFailed {
            message: value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("turn failed")
                .to_string(),
        },
        "error" => CodexEvent::Error {
            message: string_field(&value, "message").unwrap_or_else(|| "unknown error".to_string()),
        },
        "item.started" | "item.updated" | "item.completed" => {
            let phase = match event_type {
                "item.started" => ItemPhase::Started,
                "item.updated" => ItemPhase::Updated,
                _ => ItemPhase::Completed,
            };
            CodexEvent::Item {
                phase,
                item: parse_item(value.get("item")?),
            }
        }
        other => CodexEvent::Ignored {
            event_type: other.to_string(),
        },
    })
}

fn parse_item(item: &Value) -> CodexItem {
    let item_type = item.get("type").and_then(Value::as_str).unwrap_or("");

    match item_type {
        "agent_message" => CodexItem::AgentMessage {
            text: string_field(item, "text").unwrap_or_default(),
        },
        "reasoning" => CodexItem::Reasoning {
            text: string_field(item, "text").unwrap_or_default(),
        },
        "command_execution" => CodexItem::CommandExecution {
            command: string_field(item, "command").unwrap_or_default(),
        },
        "file_change" => CodexItem::FileChange {
            paths: item
                .get("changes")
                .and_then(Value::as_array)
                .map(|changes| {
                    changes
                        .iter()
                        .filter_map(|change| change.get("path").and_then(Value::as_str))
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        },
        "mcp_tool_call" => CodexItem::McpToolCall {
            server: string_field(item, "server").unwrap_or_default(),
            tool: string_field(item, "tool").unwrap_or_default(),
        },
        "web_search" => CodexItem::WebSearch {
            query: string_field(item, "query").unwrap_or_default(),
        },
        other => CodexItem::Other {
            item_type: other.to_string(),
        },
    }
}

/// Maps an item event onto the status text shown to the requester.
#[must_use]
pub fn status_for_item(phase: ItemPhase, item: &CodexItem) -> Option<String> {
    match (phase, item) {
        (ItemPhase::Started, CodexItem::CommandExecution { command }) if !command.is_empty() => {
            Some(format!("Running {command}"))
        }
        (ItemPhase::Started, CodexItem::McpToolCall { tool, .. }) if !tool.is_empty() => {
            Some(format!("Using {tool} tool..."))
        }
        (ItemPhase::Started, CodexItem::WebSearch { query }) => {
            Some(format!("Searching the web for {query}..."))
        }
        (ItemPhase::Completed, CodexItem::FileChange { paths }) if !paths.is_empty() => {
            Some(format!("Edited {}", paths.join(", ")))
        }
        (ItemPhase::Completed, CodexItem::AgentMessage { text }) => non_blank(text),
        (ItemPhase::Completed, CodexItem::Reasoning { text }) => text
            .lines()
            .map(|line| line.trim().trim_matches('*').trim())
            .find(|line| !line.is_empty())
            .map(ToString::to_string),
        _ => None,
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(ToString::to_string)
}

fn non_blank(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
