use super::{Change, FileEvent, TimeEventMap};
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path};
use std::sync::Arc;

/// Watch `dir` and everything below it, recording changes to visible files.
/// The returned watcher stops when dropped.
pub fn watch(dir: &Path, events: Arc<TimeEventMap>) -> notify::Result<RecommendedWatcher> {
    let root = dir.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in file_events(&root, &event) {
                    tracing::debug!(path = %change.path, change = ?change.change, "file changed");
                    events.insert(change);
                }
            }
            Err(e) => tracing::warn!(error = %e, "file watch error"),
        },
        Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::Recursive)?;
    tracing::info!(dir = %dir.display(), "watching for changes");
    Ok(watcher)
}

/// Translate a watcher event into events for paths below `root`. Access events and
/// anything inside a hidden file or directory are dropped.
pub(crate) fn file_events(root: &Path, event: &Event) -> Vec<FileEvent> {
    let change = match event.kind {
        EventKind::Create(_) => Change::Create,
        EventKind::Modify(ModifyKind::Name(_)) => Change::Rename,
        EventKind::Modify(ModifyKind::Metadata(_)) => Change::Chmod,
        EventKind::Modify(_) => Change::Write,
        EventKind::Remove(_) => Change::Remove,
        _ => return Vec::new(),
    };
    event
        .paths
        .iter()
        .filter_map(|path| {
            let rel = path.strip_prefix(root).unwrap_or(path);
            let mut parts = Vec::new();
            for component in rel.components() {
                if let Component::Normal(name) = component {
                    let name = name.to_string_lossy();
                    if name.starts_with('.') {
                        return None;
                    }
                    parts.push(name.into_owned());
                }
            }
            (!parts.is_empty()).then(|| FileEvent::new(parts.join("/"), change))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RenameMode};
    use pretty_assertions::assert_eq;
    use std::time::{Duration, Instant};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(p.into());
        }
        event
    }

    #[test]
    fn paths_are_relative_and_hidden_files_skipped() {
        let root = Path::new("/srv/site");
        let ev = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/srv/site/blog/post.md", "/srv/site/.git/index", "/srv/site/.swp"],
        );
        assert_eq!(
            file_events(root, &ev),
            vec![FileEvent::new("blog/post.md", Change::Write)]
        );
    }

    #[test]
    fn access_events_are_ignored() {
        let ev = event(EventKind::Access(AccessKind::Any), &["/srv/site/a.md"]);
        assert!(file_events(Path::new("/srv/site"), &ev).is_empty());
        let ev = event(EventKind::Create(CreateKind::File), &["/srv/site/a.md"]);
        assert_eq!(file_events(Path::new("/srv/site"), &ev)[0].change, Change::Create);
    }

    #[test]
    fn renames_and_permission_changes_are_classified() {
        let root = Path::new("/srv/site");
        let ev = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/srv/site/old.md", "/srv/site/new.md"],
        );
        assert_eq!(
            file_events(root, &ev),
            vec![
                FileEvent::new("old.md", Change::Rename),
                FileEvent::new("new.md", Change::Rename),
            ]
        );
        let ev = event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["/srv/site/run.lua"],
        );
        assert_eq!(file_events(root, &ev), vec![FileEvent::new("run.lua", Change::Chmod)]);
    }

    #[test]
    fn renaming_a_file_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::write(root.join("draft.md"), "# draft").unwrap();
        let map = Arc::new(TimeEventMap::new(Duration::from_secs(10)));
        let _watcher = watch(&root, map.clone()).unwrap();

        std::fs::rename(root.join("draft.md"), root.join("post.md")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            events = map.cycle(Instant::now());
            if events.iter().any(|e| e.path == "post.md" && e.change == Change::Rename) {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(
            events.iter().any(|e| e.path == "post.md" && e.change == Change::Rename),
            "{events:?}"
        );
    }

    #[test]
    fn touching_a_file_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        let map = Arc::new(TimeEventMap::new(Duration::from_secs(10)));
        let _watcher = watch(&root, map.clone()).unwrap();

        std::fs::write(root.join("foo.md"), "# changed").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while map.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        let events = map.cycle(Instant::now());
        assert!(events.iter().any(|e| e.path == "foo.md"), "{events:?}");
    }
}
