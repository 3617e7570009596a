//! Subject taxonomy and wildcard matching.
//!
//! Every subject string in the system is minted here; no other module may
//! hard-code one. Subjects live under the `swarm` root prefix. Stream and
//! durable names use underscores only, since dots carry subject hierarchy.

/// Root prefix for every swarm subject.
pub const ROOT: &str = "swarm";

/// Durable stream holding task lifecycle events.
pub const TASKS_STREAM: &str = "TASKS";

/// Durable stream holding task checkpoints.
pub const CHECKPOINT_STREAM: &str = "TASK_CHECKPOINTS";

/// Durable consumer used by the active-task scan.
pub const ACTIVE_SCAN_CONSUMER: &str = "active-tasks-scan";

/// Node announce broadcasts (sent on join).
pub fn announce() -> String {
    format!("{ROOT}.disc.announce")
}

/// Periodic heartbeat broadcasts.
pub fn heartbeat() -> String {
    format!("{ROOT}.disc.heartbeat")
}

/// Point-to-point discovery queries (request/reply).
pub fn query() -> String {
    format!("{ROOT}.disc.query")
}

/// Work dispatch for one capability; workers join a queue group here.
pub fn task_dispatch(capability: &str) -> String {
    format!("{ROOT}.task.dispatch.{capability}")
}

/// Queue group workers join on dispatch subjects.
pub fn dispatch_group(capability: &str) -> String {
    format!("workers-{capability}")
}

/// One-shot result delivery for a task.
pub fn task_result(task_id: &str) -> String {
    format!("{ROOT}.task.result.{task_id}")
}

/// Progress updates for a task.
pub fn task_progress(task_id: &str) -> String {
    format!("{ROOT}.task.progress.{task_id}")
}

/// Lifecycle event subject for one task; captured by the TASKS stream.
pub fn task_status(task_id: &str) -> String {
    format!("{ROOT}.tasks.status.{task_id}")
}

/// Subject filter the TASKS stream captures.
pub fn task_status_filter() -> String {
    format!("{ROOT}.tasks.status.>")
}

/// Checkpoint subject for one task; captured by the checkpoint stream.
pub fn task_checkpoint(task_id: &str) -> String {
    format!("{ROOT}.tasks.checkpoint.{task_id}")
}

/// Subject filter the checkpoint stream captures.
pub fn task_checkpoint_filter() -> String {
    format!("{ROOT}.tasks.checkpoint.>")
}

/// Election traffic for one identity domain.
pub fn election(hid: &str) -> String {
    format!("{ROOT}.election.{hid}")
}

/// Cross-domain message subject.
pub fn cross_hid(from_hid: &str, to_hid: &str, msg_type: &str) -> String {
    format!("{ROOT}.x.{from_hid}.{to_hid}.{msg_type}")
}

/// Pattern a bridge subscribes to for everything addressed to its HID.
pub fn cross_hid_inbound(to_hid: &str) -> String {
    format!("{ROOT}.x.*.{to_hid}.>")
}

/// Split a cross-domain subject into `(from_hid, to_hid, msg_type)`.
pub fn parse_cross_hid(subject: &str) -> Option<(String, String, String)> {
    let mut tokens = subject.split('.');
    if tokens.next() != Some(ROOT) || tokens.next() != Some("x") {
        return None;
    }
    let from = tokens.next()?;
    let to = tokens.next()?;
    let msg_type: Vec<&str> = tokens.collect();
    if from.is_empty() || to.is_empty() || msg_type.is_empty() {
        return None;
    }
    Some((from.to_string(), to.to_string(), msg_type.join(".")))
}

/// Per-request reply inbox.
pub fn inbox() -> String {
    format!("{ROOT}._inbox.{}", uuid::Uuid::new_v4().simple())
}

/// Subject pattern match with `*` (one token) and `>` (rest) wildcards.
///
/// `>` only matches at the tail and requires at least one remaining token.
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pat = pattern.split('.').peekable();
    let mut sub = subject.split('.').peekable();

    loop {
        match (pat.next(), sub.next()) {
            (None, None) => return true,
            (Some(">"), Some(_)) => return pat.peek().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            _ => return false,
        }
    }
}
