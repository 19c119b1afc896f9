//! Utility functions used to extract data from procfs

use glob::glob;
use nix::unistd::{Gid, Pid, Uid};
use std::{
    fs,
    io::{self},
    path::PathBuf,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcfsError {
    #[error("reading file failed {path}")]
    ReadFile {
        #[source]
        source: io::Error,
        path: String,
    },

    #[error("parent for process {0} not found")]
    ParentNotFound(Pid),
    #[error("user id for process {0} not found")]
    UserNotFound(Pid),
    #[error("group id for process {0} not found")]
    GroupNotFound(Pid),
    #[error("start time for process {0} not found")]
    StartTimeNotFound(Pid),

    #[error("globbing running processes")]
    GlobbingError(#[from] glob::PatternError),
    #[error("unreadable entry")]
    GlobError(#[from] glob::GlobError),
    #[error(transparent)]
    ParseIntError(#[from] std::num::ParseIntError),
}

/// Returns the path of the executable image of a given process.
pub fn get_process_image(pid: Pid) -> Result<PathBuf, ProcfsError> {
    read_link(&format!("/proc/{pid}/exe"))
}

/// Return where a link is pointing to.
fn read_link(path: &str) -> Result<PathBuf, ProcfsError> {
    fs::read_link(path).map_err(|source| ProcfsError::ReadFile {
        source,
        path: path.to_string(),
    })
}

fn read_to_string(path: String) -> Result<String, ProcfsError> {
    fs::read_to_string(&path).map_err(|source| ProcfsError::ReadFile { source, path })
}

/// Convenience type for command lines.
pub type CommandLine = Vec<String>;

/// Returns the command line for the given process.
pub fn get_process_command_line(pid: Pid) -> Result<CommandLine, ProcfsError> {
    let data = read_to_string(format!("/proc/{pid}/cmdline"))?;

    Ok(data
        .split('\0')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect())
}

/// Returns the command name for the given process.
pub fn get_process_comm(pid: Pid) -> Result<String, ProcfsError> {
    let data = read_to_string(format!("/proc/{pid}/comm"))?;
    Ok(data.trim().to_owned())
}

/// Subset of `/proc/<pid>/status` needed to seed the process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
    pub ppid: Pid,
    pub uid: Uid,
    pub gid: Gid,
}

/// Returns parent, real user and real group of a given process.
pub fn get_process_status(pid: Pid) -> Result<ProcessStatus, ProcfsError> {
    let data = read_to_string(format!("/proc/{pid}/status"))?;
    parse_status(pid, &data)
}

/// Returns the parent of a given process.
pub fn get_process_parent_pid(pid: Pid) -> Result<Pid, ProcfsError> {
    get_process_status(pid).map(|status| status.ppid)
}

fn parse_status(pid: Pid, data: &str) -> Result<ProcessStatus, ProcfsError> {
    let ppid = status_field(data, "PPid:")
        .ok_or(ProcfsError::ParentNotFound(pid))?
        .parse()?;
    let uid = status_field(data, "Uid:")
        .ok_or(ProcfsError::UserNotFound(pid))?
        .parse()?;
    let gid = status_field(data, "Gid:")
        .ok_or(ProcfsError::GroupNotFound(pid))?
        .parse()?;
    Ok(ProcessStatus {
        ppid: Pid::from_raw(ppid),
        uid: Uid::from_raw(uid),
        gid: Gid::from_raw(gid),
    })
}

/// First whitespace separated value of a `status` line. For `Uid:` and `Gid:`
/// this is the real id.
fn status_field<'a>(data: &'a str, name: &str) -> Option<&'a str> {
    data.lines()
        .find_map(|line| line.strip_prefix(name))
        .and_then(|rest| rest.split_whitespace().next())
}

/// Returns the start time of a process, in clock ticks since boot.
pub fn get_process_start_time(pid: Pid) -> Result<u64, ProcfsError> {
    let data = read_to_string(format!("/proc/{pid}/stat"))?;
    parse_stat_start_time(pid, &data)
}

fn parse_stat_start_time(pid: Pid, data: &str) -> Result<u64, ProcfsError> {
    // comm is wrapped in parentheses and may contain spaces, so we
    // start counting fields after the last ')'. starttime is field 22,
    // which is the 20th field after comm.
    let rest = data
        .rfind(')')
        .map(|idx| &data[idx + 1..])
        .ok_or(ProcfsError::StartTimeNotFound(pid))?;
    let value = rest
        .split_whitespace()
        .nth(19)
        .ok_or(ProcfsError::StartTimeNotFound(pid))?;
    Ok(value.parse()?)
}

pub fn get_running_processes() -> Result<Vec<Pid>, ProcfsError> {
    glob("/proc/[0-9]*")?
        .map(|entry| {
            let entry: String = entry?.to_string_lossy().into();
            let pid = entry.replace("/proc/", "").parse()?;
            Ok(Pid::from_raw(pid))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    const STATUS: &str = "Name:\tbash
Umask:\t0022
State:\tS (sleeping)
Tgid:\t4242
Ngid:\t0
Pid:\t4242
PPid:\t4100
TracerPid:\t0
Uid:\t1000\t1001\t1000\t1000
Gid:\t100\t100\t100\t100
";

    #[test]
    fn parse_status_fields() {
        let status = parse_status(Pid::from_raw(4242), STATUS).unwrap();
        assert_eq!(
            status,
            ProcessStatus {
                ppid: Pid::from_raw(4100),
                uid: Uid::from_raw(1000),
                gid: Gid::from_raw(100),
            }
        );
    }

    #[test]
    fn parse_status_missing_parent() {
        let err = parse_status(Pid::from_raw(1), "Name:\tinit\n").unwrap_err();
        assert!(matches!(err, ProcfsError::ParentNotFound(pid) if pid.as_raw() == 1));
    }

    #[test]
    fn parse_start_time_with_spaces_in_comm() {
        let stat = "4242 (tmux: server) S 1 4242 4242 0 -1 4194560 1035 0 0 0 \
                    12 3 0 0 20 0 1 0 987654 10000000 500";
        let start = parse_stat_start_time(Pid::from_raw(4242), stat).unwrap();
        assert_eq!(start, 987654);
    }

    #[test]
    fn current_process_is_running() {
        let me = Pid::from_raw(std::process::id() as i32);
        assert!(get_running_processes().unwrap().contains(&me));
        assert!(get_process_start_time(me).is_ok());
        assert_eq!(
            get_process_parent_pid(me).unwrap(),
            nix::unistd::getppid()
        );
    }
}
