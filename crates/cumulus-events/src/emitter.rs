//! Publication path from the storage layer into the hub.
//!
//! A storage mutation names the changed file and the chain of ancestor
//! folders it lives under. Every ancestor folder is a topic; each of its
//! subscribers receives the event with the file's path rewritten relative to
//! that folder. The client that caused the change is excluded.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use cumulus_shared::RequestContext;

use crate::event::Event;
use crate::hub::EventHub;
use crate::subscriber::Subscriber;

pub const SEPARATOR: char = '/';

/// The changed file, identified by its opaque id and absolute path.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub id: String,
    pub path: String,
}

impl FileRef {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    /// Last path component.
    pub fn name(&self) -> &str {
        self.path.rsplit(SEPARATOR).next().unwrap_or(&self.path)
    }
}

/// An ancestor folder of the changed file: its topic id and absolute path.
#[derive(Debug, Clone)]
pub struct FolderRef {
    pub topic: i64,
    pub path: String,
}

impl FolderRef {
    pub fn new(topic: i64, path: impl Into<String>) -> Self {
        Self {
            topic,
            path: path.into(),
        }
    }
}

pub async fn emit_created(
    hub: &EventHub,
    ctx: &RequestContext,
    file: &FileRef,
    ancestors: &[FolderRef],
) {
    for (sub, root) in eligible_subscribers(hub, ctx, ancestors).await {
        let from = relative_path(&root.path, &file.path);
        sub.publish(Event::create(file.id.clone(), from)).await;
    }
}

pub async fn emit_modified(
    hub: &EventHub,
    ctx: &RequestContext,
    file: &FileRef,
    ancestors: &[FolderRef],
) {
    for (sub, root) in eligible_subscribers(hub, ctx, ancestors).await {
        let from = relative_path(&root.path, &file.path);
        sub.publish(Event::modify(file.id.clone(), from)).await;
    }
}

/// A rename in place: the file keeps its parent, only the name changes.
pub async fn emit_renamed(
    hub: &EventHub,
    ctx: &RequestContext,
    file: &FileRef,
    new_name: &str,
    ancestors: &[FolderRef],
) {
    for (sub, root) in eligible_subscribers(hub, ctx, ancestors).await {
        let from = relative_path(&root.path, &file.path);
        let to = format!(
            "{}{}",
            from.strip_suffix(file.name()).unwrap_or(&from),
            new_name
        );
        sub.publish(Event::rename(file.id.clone(), from, to)).await;
    }
}

pub async fn emit_deleted(
    hub: &EventHub,
    ctx: &RequestContext,
    file: &FileRef,
    ancestors: &[FolderRef],
) {
    for (sub, root) in eligible_subscribers(hub, ctx, ancestors).await {
        let from = relative_path(&root.path, &file.path);
        sub.publish(Event::delete(file.id.clone(), from)).await;
    }
}

/// A move across folders, emitted as a composite:
/// subscribers watching both source and destination see one `Rename`,
/// source-only subscribers see a `Delete`, destination-only subscribers see
/// a `Create`.
///
/// `src_ancestors` covers the file's old location, `dst_ancestors` the
/// destination folder `dst_parent` and its ancestors.
pub async fn emit_moved(
    hub: &EventHub,
    ctx: &RequestContext,
    file: &FileRef,
    src_ancestors: &[FolderRef],
    dst_parent: &FolderRef,
    dst_ancestors: &[FolderRef],
) {
    let src_subs = subscriber_map(hub, ctx, src_ancestors).await;
    let mut dst_subs = subscriber_map(hub, ctx, dst_ancestors).await;

    for (id, (sub, root)) in src_subs {
        if let Some((_, dst_root)) = dst_subs.remove(&id) {
            // Watching both sides: a single rename.
            let from = relative_path(&root.path, &file.path);
            let to = path_join(
                &relative_path(&dst_root.path, &dst_parent.path),
                file.name(),
            );
            sub.publish(Event::rename(file.id.clone(), from, to)).await;
        } else {
            // The file left this subscriber's view.
            let from = relative_path(&root.path, &file.path);
            sub.publish(Event::delete(file.id.clone(), from)).await;
        }
    }

    for (_, (sub, root)) in dst_subs {
        // The file entered this subscriber's view.
        let from = path_join(&relative_path(&root.path, &dst_parent.path), file.name());
        sub.publish(Event::create(file.id.clone(), from)).await;
    }
}

/// Subscribers of all given folders, minus the originating client.
async fn eligible_subscribers(
    hub: &EventHub,
    ctx: &RequestContext,
    ancestors: &[FolderRef],
) -> Vec<(Arc<Subscriber>, FolderRef)> {
    let mut found = Vec::new();
    for root in ancestors {
        for sub in hub.get_subscribers(root.topic).await {
            if ctx.client_id == Some(sub.id()) {
                continue;
            }
            found.push((sub, root.clone()));
        }
    }
    found
}

async fn subscriber_map(
    hub: &EventHub,
    ctx: &RequestContext,
    ancestors: &[FolderRef],
) -> HashMap<Uuid, (Arc<Subscriber>, FolderRef)> {
    eligible_subscribers(hub, ctx, ancestors)
        .await
        .into_iter()
        .map(|(sub, root)| (sub.id(), (sub, root)))
        .collect()
}

/// Path of `path` relative to the subscribed folder `root`, always with a
/// leading separator. The root itself maps to `/`.
pub fn relative_path(root: &str, path: &str) -> String {
    let rest = path.strip_prefix(root).unwrap_or(path);
    if rest.is_empty() {
        return SEPARATOR.to_string();
    }
    if rest.starts_with(SEPARATOR) {
        rest.to_string()
    } else {
        format!("{SEPARATOR}{rest}")
    }
}

fn path_join(base: &str, name: &str) -> String {
    if base.ends_with(SEPARATOR) {
        format!("{base}{name}")
    } else {
        format!("{base}{SEPARATOR}{name}")
    }
}
