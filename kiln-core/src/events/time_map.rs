use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

/// One observed change, with the path relative to the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: String,
    pub change: Change,
}

impl FileEvent {
    pub fn new(path: impl Into<String>, change: Change) -> Self {
        Self {
            path: path.into(),
            change,
        }
    }
}

#[derive(Default)]
struct Inner {
    events: BTreeMap<(Instant, u64), FileEvent>,
    seq: u64,
}

/// Recent file events ordered by the time they were observed.
///
/// Entries older than `max_age` are dropped before every insert and every read, so the
/// map stays small whether or not anyone is subscribed.
pub struct TimeEventMap {
    max_age: Duration,
    inner: Mutex<Inner>,
}

impl TimeEventMap {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn insert(&self, event: FileEvent) {
        self.insert_at(event, Instant::now());
    }

    pub fn insert_at(&self, event: FileEvent, now: Instant) {
        let mut inner = self.inner.lock();
        evict(&mut inner.events, now, self.max_age);
        inner.seq += 1;
        let seq = inner.seq;
        inner.events.insert((now, seq), event);
    }

    /// The events one subscriber cycle sends: unexpired, oldest first, each path once at
    /// the time of its latest change.
    pub fn cycle(&self, now: Instant) -> Vec<FileEvent> {
        let mut inner = self.inner.lock();
        evict(&mut inner.events, now, self.max_age);
        let mut seen = HashSet::new();
        let mut events: Vec<FileEvent> = inner
            .events
            .values()
            .rev()
            .filter(|e| seen.insert(e.path.as_str()))
            .cloned()
            .collect();
        events.reverse();
        events
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict(events: &mut BTreeMap<(Instant, u64), FileEvent>, now: Instant, max_age: Duration) {
    let Some(cutoff) = now.checked_sub(max_age) else {
        return;
    };
    *events = events.split_off(&(cutoff, 0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const AGE: Duration = Duration::from_millis(350);

    fn paths(events: &[FileEvent]) -> Vec<&str> {
        events.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn old_events_are_evicted_before_insert() {
        let map = TimeEventMap::new(AGE);
        let t0 = Instant::now();
        map.insert_at(FileEvent::new("a.md", Change::Write), t0);
        map.insert_at(FileEvent::new("b.md", Change::Write), t0 + Duration::from_millis(100));
        assert_eq!(map.len(), 2);

        map.insert_at(FileEvent::new("c.md", Change::Create), t0 + Duration::from_millis(400));
        assert_eq!(paths(&map.cycle(t0 + Duration::from_millis(400))), vec!["b.md", "c.md"]);

        assert!(map.cycle(t0 + Duration::from_secs(2)).is_empty());
        assert!(map.is_empty());
    }

    #[test]
    fn each_path_is_sent_once_per_cycle_in_time_order() {
        let map = TimeEventMap::new(AGE);
        let t0 = Instant::now();
        map.insert_at(FileEvent::new("foo.md", Change::Write), t0);
        map.insert_at(FileEvent::new("foo.md", Change::Write), t0);
        map.insert_at(FileEvent::new("bar.md", Change::Create), t0 + Duration::from_millis(10));
        map.insert_at(FileEvent::new("foo.md", Change::Write), t0 + Duration::from_millis(20));
        assert_eq!(map.len(), 4);
        assert_eq!(paths(&map.cycle(t0 + Duration::from_millis(30))), vec!["bar.md", "foo.md"]);
    }

    #[test]
    fn a_repeated_path_keeps_its_last_change() {
        let map = TimeEventMap::new(AGE);
        let t0 = Instant::now();
        map.insert_at(FileEvent::new("foo.md", Change::Create), t0);
        map.insert_at(FileEvent::new("bar.md", Change::Write), t0 + Duration::from_millis(10));
        map.insert_at(FileEvent::new("foo.md", Change::Remove), t0 + Duration::from_millis(20));

        let events = map.cycle(t0 + Duration::from_millis(30));
        assert_eq!(
            events,
            vec![
                FileEvent::new("bar.md", Change::Write),
                FileEvent::new("foo.md", Change::Remove),
            ]
        );
    }
}
