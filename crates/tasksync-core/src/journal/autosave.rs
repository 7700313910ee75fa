use chrono::{DateTime, Duration, Utc};

/// Pending-write bookkeeping for the journal's debounced auto-save.
///
/// Every mutation calls [`mark_dirty`](Self::mark_dirty), which pushes the
/// flush deadline out by the debounce delay; a burst of updates therefore
/// produces a single write once the burst goes quiet. While suspended the
/// writer never reports itself due, and the owner must force a flush when
/// the suspension ends.
#[derive(Debug, Clone)]
pub struct DebouncedWriter {
    delay: Duration,
    dirty: bool,
    due_at: Option<DateTime<Utc>>,
    suspended: bool,
}

impl DebouncedWriter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            dirty: false,
            due_at: None,
            suspended: false,
        }
    }

    pub fn mark_dirty(&mut self, now: DateTime<Utc>) {
        self.dirty = true;
        self.due_at = Some(now + self.delay);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.due_at
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.suspended && self.dirty && self.due_at.map(|due| now >= due).unwrap_or(false)
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    /// Called after a successful write.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
        self.due_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_mutation_reschedules_the_flush() {
        let start = Utc::now();
        let mut writer = DebouncedWriter::new(Duration::seconds(2));
        writer.mark_dirty(start);
        writer.mark_dirty(start + Duration::milliseconds(1500));
        assert!(!writer.is_due(start + Duration::seconds(2)));
        assert!(writer.is_due(start + Duration::milliseconds(3500)));
        writer.mark_clean();
        assert!(!writer.is_due(start + Duration::seconds(10)));
    }

    #[test]
    fn suspended_writer_is_never_due() {
        let start = Utc::now();
        let mut writer = DebouncedWriter::new(Duration::seconds(2));
        writer.suspend();
        writer.mark_dirty(start);
        assert!(!writer.is_due(start + Duration::hours(1)));
        writer.resume();
        assert!(writer.is_due(start + Duration::hours(1)));
    }
}
