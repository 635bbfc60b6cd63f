//! Descendant discovery and signalling for process trees.
//!
//! Discovery walks `/proc/<pid>/stat` parent links and only works on Linux;
//! elsewhere it reports no descendants and teardown falls back to killing the
//! direct child.

use std::collections::HashMap;

/// One entry of a process table snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
}

/// Parse the `pid (comm) state ppid ...` layout of `/proc/<pid>/stat`.
///
/// `comm` may itself contain spaces and parentheses, so it is delimited by
/// the first `(` and the last `)`.
pub fn parse_stat(content: &str) -> Option<ProcessInfo> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close < open {
        return None;
    }
    let pid = content[..open].trim().parse().ok()?;
    let name = content[open + 1..close].to_string();
    let mut rest = content[close + 1..].split_whitespace();
    let _state = rest.next()?;
    let ppid = rest.next()?.parse().ok()?;
    Some(ProcessInfo { pid, ppid, name })
}

#[cfg(target_os = "linux")]
pub fn read_process(pid: u32) -> Option<ProcessInfo> {
    let content = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_stat(&content)
}

#[cfg(not(target_os = "linux"))]
pub fn read_process(_pid: u32) -> Option<ProcessInfo> {
    None
}

/// Every process currently visible in `/proc`.
#[cfg(target_os = "linux")]
pub fn snapshot() -> Vec<ProcessInfo> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(read_process)
        .collect()
}

#[cfg(not(target_os = "linux"))]
pub fn snapshot() -> Vec<ProcessInfo> {
    Vec::new()
}

/// Transitive children of `root` within `table`, breadth first.
pub fn descendants_in(table: &[ProcessInfo], root: u32) -> Vec<ProcessInfo> {
    let mut children: HashMap<u32, Vec<&ProcessInfo>> = HashMap::new();
    for process in table {
        children.entry(process.ppid).or_default().push(process);
    }

    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for child in children.get(&parent).into_iter().flatten() {
            if child.pid != root && !found.iter().any(|p: &ProcessInfo| p.pid == child.pid) {
                frontier.push(child.pid);
                found.push((*child).clone());
            }
        }
    }
    found
}

/// Live descendants of `root` whose name contains `pattern` (all of them
/// when no pattern is given).
pub fn matching_descendants(root: u32, pattern: Option<&str>) -> Vec<ProcessInfo> {
    descendants_in(&snapshot(), root)
        .into_iter()
        .filter(|process| pattern.map_or(true, |pattern| process.name.contains(pattern)))
        .collect()
}

/// Outcome of signalling one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// The process no longer exists.
    AlreadyGone,
}

#[cfg(unix)]
pub mod signals {
    use super::SignalOutcome;
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    pub use nix::sys::signal::Signal::{SIGKILL, SIGTERM};

    fn outcome(result: nix::Result<()>) -> nix::Result<SignalOutcome> {
        match result {
            Ok(()) => Ok(SignalOutcome::Delivered),
            Err(Errno::ESRCH) => Ok(SignalOutcome::AlreadyGone),
            Err(err) => Err(err),
        }
    }

    /// Signal every member of the process group led by `pgid`.
    pub fn signal_group(pgid: u32, signal: Signal) -> nix::Result<SignalOutcome> {
        outcome(killpg(Pid::from_raw(pgid as i32), signal))
    }

    pub fn signal_process(pid: u32, signal: Signal) -> nix::Result<SignalOutcome> {
        outcome(kill(Pid::from_raw(pid as i32), signal))
    }
}
