use chatwire_client::SessionSnapshot;
use chatwire_core::{ConversationTurn, MessagePart, Role, ToolState};
use std::collections::HashMap;
use std::io::{self, Write};
use uuid::Uuid;

/// Writes the assistant turn incrementally as snapshots arrive.
///
/// Only what is new since the previous snapshot is written, so the terminal
/// shows text as it streams instead of redrawing the whole turn.
#[derive(Debug, Default)]
pub struct TurnRenderer {
    turn_id: Option<Uuid>,
    text_len: usize,
    reasoning_len: usize,
    tools: HashMap<String, ToolState>,
    files: usize,
}

impl TurnRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, snapshot: &SessionSnapshot, out: &mut impl Write) -> io::Result<()> {
        match snapshot.last_turn() {
            Some(turn) if turn.role == Role::Assistant => self.render_turn(turn, out),
            _ => Ok(()),
        }
    }

    fn render_turn(&mut self, turn: &ConversationTurn, out: &mut impl Write) -> io::Result<()> {
        if self.turn_id != Some(turn.id) {
            *self = Self {
                turn_id: Some(turn.id),
                ..Self::default()
            };
        }

        let reasoning = turn.reasoning();
        if let Some(delta) = reasoning.get(self.reasoning_len..).filter(|d| !d.is_empty()) {
            if self.reasoning_len == 0 {
                write!(out, "(thinking) ")?;
            }
            write!(out, "{delta}")?;
            self.reasoning_len = reasoning.len();
        }

        for part in &turn.parts {
            let MessagePart::ToolInvocation(tool) = part else {
                continue;
            };
            if self.tools.get(&tool.key) != Some(&tool.state) {
                writeln!(out, "\n[tool {}: {}]", tool.name, tool_state_label(tool.state))?;
                self.tools.insert(tool.key.clone(), tool.state);
            }
        }

        let files: Vec<&str> = turn
            .parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::File { url, .. } => Some(url.as_str()),
                _ => None,
            })
            .collect();
        for url in files.iter().skip(self.files) {
            writeln!(out, "\n[file {}]", display_url(url))?;
        }
        self.files = files.len();

        let text = turn.text();
        if let Some(delta) = text.get(self.text_len..).filter(|d| !d.is_empty()) {
            write!(out, "{delta}")?;
            self.text_len = text.len();
        }
        out.flush()
    }
}

fn tool_state_label(state: ToolState) -> &'static str {
    match state {
        ToolState::Pending => "running",
        ToolState::InputAvailable => "called",
        ToolState::OutputAvailable => "done",
        ToolState::Errored => "failed",
    }
}

fn display_url(url: &str) -> &str {
    if url.starts_with("data:") {
        "inline data"
    } else {
        url
    }
}

/// Prints the citation list of a finished turn, one line per record.
pub fn render_sources(turn: &ConversationTurn, out: &mut impl Write) -> io::Result<()> {
    let Some(documents) = turn.source_documents().filter(|d| !d.is_empty()) else {
        return Ok(());
    };
    writeln!(out, "\nSources:")?;
    for doc in documents {
        let label = ["/url", "/metadata/source", "/title", "/sourceId"]
            .iter()
            .find_map(|p| doc.pointer(p).and_then(serde_json::Value::as_str))
            .map_or_else(|| doc.to_string(), str::to_string);
        writeln!(out, "  - {label}")?;
    }
    Ok(())
}
