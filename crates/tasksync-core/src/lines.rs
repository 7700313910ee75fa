use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Open,
    Completed,
}

impl TaskStatus {
    pub fn is_completed(self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

/// Decides whether a document line is a task and what its checkbox says.
pub trait LineClassifier: Send + Sync {
    fn is_task_line(&self, line: &str) -> bool {
        self.task_status(line).is_some()
    }

    fn task_status(&self, line: &str) -> Option<TaskStatus>;

    fn indentation<'a>(&self, line: &'a str) -> &'a str {
        let trimmed = line.trim_start_matches([' ', '\t']);
        &line[..line.len() - trimmed.len()]
    }
}

/// Markdown checkbox lists: `- [ ]`, `* [x]`, `+ [X]`, `1. [ ]`, `1) [x]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownLines;

impl LineClassifier for MarkdownLines {
    fn task_status(&self, line: &str) -> Option<TaskStatus> {
        let caps = task_regex().captures(line)?;
        let mark = caps.get(1).map(|m| m.as_str()).unwrap_or(" ");
        if mark.eq_ignore_ascii_case("x") {
            Some(TaskStatus::Completed)
        } else {
            Some(TaskStatus::Open)
        }
    }
}

/// Indentation width with tabs counted as four columns.
pub fn indent_width(indent: &str) -> usize {
    indent
        .chars()
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Extracts a remote task identifier from a link embedded in `text`.
pub fn find_remote_id(text: &str) -> Option<String> {
    link_regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Returns every remote identifier referenced in `text`.
pub fn find_remote_ids(text: &str) -> Vec<String> {
    link_regex()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn references_id(text: &str, id: &str) -> bool {
    find_remote_ids(text).iter().any(|found| found == id)
}

/// Index range of the lines that belong to the task at `task_index`: the
/// task line, then following lines indented deeper than it. A line at the
/// same indentation directly after the task also belongs when it is not a
/// task itself. A nested task or a blank line ends the block.
pub fn link_block(
    classifier: &dyn LineClassifier,
    lines: &[&str],
    task_index: usize,
) -> std::ops::Range<usize> {
    let Some(task_line) = lines.get(task_index) else {
        return task_index..task_index;
    };
    let base = indent_width(classifier.indentation(task_line));
    let mut end = task_index + 1;
    while let Some(line) = lines.get(end) {
        if line.trim().is_empty() || classifier.is_task_line(line) {
            break;
        }
        let width = indent_width(classifier.indentation(line));
        if width > base {
            end += 1;
            continue;
        }
        if width == base && end == task_index + 1 {
            end += 1;
        }
        break;
    }
    task_index..end
}

/// Remote ids linked from the task at `task_index`, in order of appearance.
pub fn linked_ids(classifier: &dyn LineClassifier, lines: &[&str], task_index: usize) -> Vec<String> {
    let mut ids = Vec::new();
    for line in &lines[link_block(classifier, lines, task_index)] {
        for id in find_remote_ids(line) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Trailing block anchor (`^token`) of a line, if any.
pub fn find_anchor(line: &str) -> Option<String> {
    anchor_regex()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn has_anchor(line: &str, token: &str) -> bool {
    find_anchor(line).as_deref() == Some(token)
}

fn task_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[ \t]*(?:[-*+]|\d+[.)])[ \t]+\[(.)\](?:[ \t]|$)").expect("regex")
    })
}

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)task(?:/(?:[a-z0-9_-]*-)?|\?id=)([a-z0-9]+)").expect("regex")
    })
}

fn anchor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)\^([A-Za-z0-9-]+)\s*$").expect("regex"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_checkbox_lines() {
        let lines = MarkdownLines;
        assert_eq!(lines.task_status("- [ ] Buy milk"), Some(TaskStatus::Open));
        assert_eq!(lines.task_status("  * [x] Done"), Some(TaskStatus::Completed));
        assert_eq!(lines.task_status("1. [X] Numbered"), Some(TaskStatus::Completed));
        assert_eq!(lines.task_status("- [ ]"), Some(TaskStatus::Open));
        assert_eq!(lines.task_status("- plain bullet"), None);
        assert_eq!(lines.task_status("[ ] no bullet"), None);
    }

    #[test]
    fn indentation_is_leading_whitespace() {
        let lines = MarkdownLines;
        assert_eq!(lines.indentation("    - [ ] nested"), "    ");
        assert_eq!(lines.indentation("\t- [ ] tab"), "\t");
        assert_eq!(indent_width("\t  "), 6);
    }

    #[test]
    fn extracts_ids_from_link_shapes() {
        assert_eq!(
            find_remote_id("[link](https://app.todoist.com/app/task/buy-milk-6X7rM8997g3RQmvh)"),
            Some("6X7rM8997g3RQmvh".to_string())
        );
        assert_eq!(
            find_remote_id("see https://todoist.com/showTask?id=123456"),
            Some("123456".to_string())
        );
        assert_eq!(
            find_remote_id("[o](todoist://task?id=987)"),
            Some("987".to_string())
        );
        assert_eq!(find_remote_id("  - link task/123456"), Some("123456".to_string()));
        assert_eq!(find_remote_id("no link here"), None);
    }

    #[test]
    fn link_block_follows_indentation() {
        let text = "- [ ] Buy milk\n    - link task/123456\n    notes\n- [ ] Next\n  task/999";
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(link_block(&MarkdownLines, &lines, 0), 0..3);
        assert_eq!(linked_ids(&MarkdownLines, &lines, 0), vec!["123456".to_string()]);
        assert_eq!(linked_ids(&MarkdownLines, &lines, 3), vec!["999".to_string()]);
    }

    #[test]
    fn same_level_line_directly_after_task_belongs() {
        let text = "- [ ] Call bob\n[open](https://app.todoist.com/app/task/abc123)\nunrelated task/zzz";
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(linked_ids(&MarkdownLines, &lines, 0), vec!["abc123".to_string()]);
    }

    #[test]
    fn nested_task_ends_the_block() {
        let text = "- [ ] Parent\n  - [ ] Child task/111\n  task/222";
        let lines: Vec<&str> = text.lines().collect();
        assert!(linked_ids(&MarkdownLines, &lines, 0).is_empty());
        assert_eq!(linked_ids(&MarkdownLines, &lines, 1), vec!["111".to_string(), "222".to_string()]);
    }

    #[test]
    fn anchors_must_trail_the_line() {
        assert_eq!(find_anchor("- [ ] Buy milk ^ab12"), Some("ab12".to_string()));
        assert_eq!(find_anchor("- [ ] costs 2^10 apples"), None);
        assert!(has_anchor("- [x] Done ^t-1  ", "t-1"));
    }
}
