//! Filesystem event handler for the notify watcher (hot-reload).

use std::path::{Path, PathBuf};

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind};
use tracing::{debug, info};

use super::core::is_yaml;

/// What the watcher is responsible for.
#[derive(Debug, Clone)]
pub(super) enum WatchScope {
    /// Every non-hidden YAML file below a directory.
    Directory,
    /// Exactly one file (watched through its parent directory).
    File(PathBuf),
}

impl WatchScope {
    fn covers(&self, path: &Path) -> bool {
        match self {
            WatchScope::Directory => {
                let hidden = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(true);
                is_yaml(path) && !hidden
            }
            WatchScope::File(file) => path.file_name() == file.file_name(),
        }
    }
}

/// Handle a single filesystem event from the notify watcher.
///
/// Relevant creates, writes, renames and deletes fire `signal`; the owner
/// of the signal reloads every declaration.
pub(super) fn handle_fs_event(event: &Event, scope: &WatchScope, signal: &tokio::sync::Notify) {
    let relevant = matches!(
        event.kind,
        EventKind::Create(CreateKind::File)
            | EventKind::Create(CreateKind::Any)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Remove(RemoveKind::File)
            | EventKind::Remove(RemoveKind::Any)
    );
    if !relevant {
        return;
    }

    let Some(path) = event.paths.iter().find(|p| scope.covers(p)) else {
        debug!(kind = ?event.kind, "ignoring filesystem event outside declarations");
        return;
    };

    info!(path = %path.display(), kind = ?event.kind, "declarations changed, scheduling reload");
    signal.notify_one();
}
