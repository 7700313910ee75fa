use crate::document::{DocumentError, DocumentStore};
use crate::journal::model::{TaskLocation, TrackedTask};
use crate::lines::{find_anchor, has_anchor, link_block, references_id, LineClassifier, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateStrategy {
    Anchor,
    Identifier,
    LastKnownLine,
}

/// Current position and state of a tracked task's line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedTask {
    pub path: String,
    pub note_id: Option<String>,
    pub line: usize,
    pub text: String,
    pub anchor: Option<String>,
    pub status: TaskStatus,
    pub strategy: LocateStrategy,
    /// The line moved away from the recorded index.
    pub relocated: bool,
    /// The document resolved to a different path than the recorded one.
    pub path_changed: bool,
}

impl LocatedTask {
    pub fn completed(&self) -> bool {
        self.status.is_completed()
    }

    pub fn location(&self) -> TaskLocation {
        TaskLocation {
            note_id: self.note_id.clone(),
            path: self.path.clone(),
            line: self.line,
            anchor: self.anchor.clone(),
        }
    }

    /// Whether the journal's record needs rewriting to match.
    pub fn needs_writeback(&self, recorded: &TaskLocation) -> bool {
        self.relocated || self.path_changed || self.location() != *recorded
    }
}

/// Finds tracked tasks in the note collection.
///
/// The document is resolved through its durable note id when one is
/// recorded, falling back to the recorded path. Within the document the
/// line is found by anchor, then by a task line linking the canonical or
/// legacy id. Among several such lines the one at or nearest the last
/// known index wins.
pub struct TaskLocator<'a> {
    documents: &'a dyn DocumentStore,
    lines: &'a dyn LineClassifier,
    note_id_field: &'a str,
}

impl<'a> TaskLocator<'a> {
    pub fn new(
        documents: &'a dyn DocumentStore,
        lines: &'a dyn LineClassifier,
        note_id_field: &'a str,
    ) -> Self {
        Self {
            documents,
            lines,
            note_id_field,
        }
    }

    /// Current path of the document holding `location`, or `None` if it is gone.
    pub fn resolve_path(
        &self,
        location: &TaskLocation,
    ) -> Result<Option<(String, String)>, DocumentError> {
        if let Some(note_id) = &location.note_id {
            // The recorded path usually still holds the note.
            match self.documents.read(&location.path) {
                Ok(text) => {
                    if crate::document::front_matter_field(&text, self.note_id_field).as_deref()
                        == Some(note_id.as_str())
                    {
                        return Ok(Some((location.path.clone(), text)));
                    }
                }
                Err(DocumentError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
            if let Some(path) = self.documents.find_by_note_id(self.note_id_field, note_id)? {
                let text = self.documents.read(&path)?;
                return Ok(Some((path, text)));
            }
            return Ok(None);
        }
        match self.documents.read(&location.path) {
            Ok(text) => Ok(Some((location.path.clone(), text))),
            Err(DocumentError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn locate(&self, task: &TrackedTask) -> Result<Option<LocatedTask>, DocumentError> {
        let recorded = &task.location;
        let Some((path, text)) = self.resolve_path(recorded)? else {
            return Ok(None);
        };
        let lines: Vec<&str> = text.lines().collect();
        let Some((line, strategy)) = self.find_line(&lines, task) else {
            return Ok(None);
        };
        let line_text = lines[line];
        let Some(status) = self.lines.task_status(line_text) else {
            return Ok(None);
        };
        let note_id = recorded
            .note_id
            .clone()
            .or_else(|| crate::document::front_matter_field(&text, self.note_id_field));
        let path_changed = path != recorded.path;
        Ok(Some(LocatedTask {
            relocated: line != recorded.line,
            path_changed,
            path,
            note_id,
            line,
            text: line_text.to_string(),
            anchor: find_anchor(line_text),
            status,
            strategy,
        }))
    }

    fn find_line(&self, lines: &[&str], task: &TrackedTask) -> Option<(usize, LocateStrategy)> {
        if let Some(token) = &task.location.anchor {
            let by_anchor = lines
                .iter()
                .position(|line| has_anchor(line, token) && self.lines.is_task_line(line));
            if let Some(index) = by_anchor {
                return Some((index, LocateStrategy::Anchor));
            }
        }

        let matches: Vec<usize> = (0..lines.len())
            .filter(|&index| self.lines.is_task_line(lines[index]))
            .filter(|&index| {
                task.known_ids()
                    .any(|id| self.block_references(lines, index, id))
            })
            .collect();
        // Duplicated links: take the one nearest the last known line.
        let index = matches
            .into_iter()
            .min_by_key(|&index| index.abs_diff(task.location.line))?;
        if index == task.location.line {
            return Some((index, LocateStrategy::LastKnownLine));
        }
        Some((index, LocateStrategy::Identifier))
    }

    fn block_references(&self, lines: &[&str], index: usize, id: &str) -> bool {
        lines[link_block(self.lines, lines, index)]
            .iter()
            .any(|line| references_id(line, id))
    }
}
