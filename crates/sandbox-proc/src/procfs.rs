//! Minimal `/proc/<pid>/stat` reader used for CPU and memory sampling.

use std::io;
use std::path::Path;

/// Fields of `/proc/<pid>/stat` the sampler needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProcStat {
    pub pgrp: i32,
    /// User + system time of the process itself, in clock ticks.
    pub cpu_ticks: u64,
    /// User + system time of reaped children, in clock ticks.
    pub children_cpu_ticks: u64,
    pub rss_pages: u64,
}

/// Aggregated usage of a process group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GroupUsage {
    pub cpu_ticks: u64,
    pub rss_pages: u64,
}

/// Parse the content of a `/proc/<pid>/stat` file.
///
/// The command name (field 2) is parenthesised and may itself contain spaces
/// or parentheses, so fields are counted from the last `)`.
pub(crate) fn parse_stat(content: &str) -> Option<ProcStat> {
    let close = content.rfind(')')?;
    let rest = content.get(close + 1..)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // `fields[0]` is field 3 of proc(5).
    let field = |n: usize| fields.get(n - 3).copied();
    let number = |n: usize| field(n).and_then(|f| f.parse::<i64>().ok());
    let ticks = |n: usize| number(n).map(|v| u64::try_from(v).unwrap_or(0));

    Some(ProcStat {
        pgrp: i32::try_from(number(5)?).ok()?,
        cpu_ticks: ticks(14)?.saturating_add(ticks(15)?),
        children_cpu_ticks: ticks(16)?.saturating_add(ticks(17)?),
        rss_pages: ticks(24)?,
    })
}

/// Read and parse `/proc/<pid>/stat` under `proc_root`.
pub(crate) fn read_stat(proc_root: &Path, pid: i32) -> io::Result<ProcStat> {
    let content = std::fs::read_to_string(proc_root.join(pid.to_string()).join("stat"))?;
    parse_stat(&content).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed stat for pid {pid}"),
        )
    })
}

/// Sum CPU time and resident pages over every process in group `pgid`.
///
/// The group leader (`pid == pgid`) is always included, even if it moved to
/// another group. Processes that vanish mid-scan are skipped.
pub(crate) fn group_usage(proc_root: &Path, pgid: i32) -> io::Result<GroupUsage> {
    let mut usage = GroupUsage::default();
    let mut leader_seen = false;

    for entry in std::fs::read_dir(proc_root)? {
        let Ok(entry) = entry else { continue };
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i32>().ok())
        else {
            continue;
        };
        let Ok(stat) = read_stat(proc_root, pid) else {
            continue;
        };
        if stat.pgrp != pgid && pid != pgid {
            continue;
        }
        leader_seen |= pid == pgid;
        accumulate(&mut usage, &stat);
    }

    if !leader_seen {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("process {pgid} not found"),
        ));
    }
    Ok(usage)
}

fn accumulate(usage: &mut GroupUsage, stat: &ProcStat) {
    usage.cpu_ticks = usage
        .cpu_ticks
        .saturating_add(stat.cpu_ticks)
        .saturating_add(stat.children_cpu_ticks);
    usage.rss_pages = usage.rss_pages.saturating_add(stat.rss_pages);
}
