//! Process locator
//!
//! Finds the local process listening on a TCP endpoint by reading the
//! kernel's socket tables under `/proc/net`, then follows that process's
//! standard output to its log file.
//!
//! ## Socket tables
//!
//! Each row of `/proc/net/tcp` (and `tcp6`) is whitespace separated:
//!
//! ```text
//!   sl  local_address rem_address   st tx_queue:rx_queue tr:tm->when retrnsmt   uid  timeout inode
//!    0: 0100007F:0CEA 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 51273
//! ```
//!
//! Addresses are printed as 32-bit words in host (little-endian) byte
//! order, ports as 4-digit hex. State `0A` is LISTEN.

use std::fs;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use casprobe_core::{Error, LogConfig, Result};

use crate::log_file::LogFile;
use crate::pool::ReadPool;

const TCP_LISTEN: &str = "0A";

/// Column holding the socket inode
const INODE_COLUMN: usize = 9;

/// View of a process filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        ProcFs::new()
    }
}

impl ProcFs {
    /// The real `/proc`
    pub fn new() -> Self {
        Self::at("/proc")
    }

    /// A process filesystem rooted elsewhere (tests build fake trees)
    pub fn at(root: impl Into<PathBuf>) -> Self {
        ProcFs { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Id of the process listening on `host:port`, if any.
    ///
    /// Processes whose descriptors cannot be read are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if `host` does not resolve or the socket table
    /// cannot be read.
    pub fn find_listener(&self, host: &str, port: u16) -> Result<Option<u32>> {
        let addr = resolve(host, port)?;
        let table = match addr {
            IpAddr::V4(_) => "tcp",
            IpAddr::V6(_) => "tcp6",
        };
        let contents = fs::read_to_string(self.root.join("net").join(table))?;

        let Some(inode) = listening_inode(&contents, addr, port) else {
            debug!(target: "casprobe::logwatch", host, port, "no listening socket");
            return Ok(None);
        };

        let pid = self.socket_owner(inode);
        match pid {
            Some(pid) => debug!(target: "casprobe::logwatch", host, port, inode, pid, "found listener"),
            None => debug!(target: "casprobe::logwatch", host, port, inode, "listening socket has no visible owner"),
        }
        Ok(pid)
    }

    /// First process holding a descriptor for socket `inode`
    fn socket_owner(&self, inode: u64) -> Option<u32> {
        let target = format!("socket:[{}]", inode);
        let entries = fs::read_dir(&self.root).ok()?;

        let mut pids: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();

        pids.into_iter().find(|pid| {
            let fd_dir = self.root.join(pid.to_string()).join("fd");
            // Other users' processes, or processes that exited mid-scan
            let Ok(fds) = fs::read_dir(fd_dir) else {
                return false;
            };
            fds.filter_map(|fd| fd.ok())
                .filter_map(|fd| fs::read_link(fd.path()).ok())
                .any(|link| link.as_os_str() == target.as_str())
        })
    }

    /// Log file a process writes its standard output to.
    ///
    /// # Errors
    ///
    /// Returns `Error::ResourceUnavailable` unless descriptor 1 of `pid` is
    /// an absolute path to a regular file whose contents begin with
    /// `sentinel`.
    pub fn log_file_path(&self, pid: u32, sentinel: &str) -> Result<PathBuf> {
        let stdout = self.root.join(pid.to_string()).join("fd").join("1");
        let path = fs::read_link(&stdout)
            .map_err(|e| Error::unavailable(format!("pid {}: cannot read stdout link: {}", pid, e)))?;

        if !path.is_absolute() {
            return Err(Error::unavailable(format!(
                "pid {}: stdout is {}, not a file",
                pid,
                path.display()
            )));
        }
        let is_file = fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false);
        if !is_file {
            return Err(Error::unavailable(format!(
                "pid {}: stdout {} is not a regular file",
                pid,
                path.display()
            )));
        }

        let mut head = Vec::with_capacity(sentinel.len());
        fs::File::open(&path)?
            .take(sentinel.len() as u64)
            .read_to_end(&mut head)?;
        if head != sentinel.as_bytes() {
            warn!(
                target: "casprobe::logwatch",
                pid,
                path = %path.display(),
                "stdout file does not look like a server log"
            );
            return Err(Error::unavailable(format!(
                "pid {}: {} does not start with {:?}",
                pid,
                path.display(),
                sentinel
            )));
        }
        Ok(path)
    }

    /// Open the log of the server listening on `host:port`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ResourceUnavailable` if no local process listens
    /// there or its output is not a server log.
    pub fn open_log_file(
        &self,
        pool: Arc<ReadPool>,
        host: &str,
        port: u16,
        config: &LogConfig,
    ) -> Result<LogFile> {
        let pid = self.find_listener(host, port)?.ok_or_else(|| {
            Error::unavailable(format!("no local process listening on {}:{}", host, port))
        })?;
        let path = self.log_file_path(pid, &config.sentinel)?;
        info!(target: "casprobe::logwatch", pid, path = %path.display(), "located server log");
        Ok(LogFile::open(path, pool)?.with_poll_interval(config.poll_interval()))
    }
}

/// Resolve `host`, preferring IPv4
fn resolve(host: &str, port: u16) -> Result<IpAddr> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip())
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} did not resolve", host),
            ))
        })
}

/// Address as it appears in the socket table: each 32-bit word printed
/// with its bytes reversed
pub fn encode_address(addr: IpAddr) -> String {
    let octets: Vec<u8> = match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };
    octets
        .chunks(4)
        .flat_map(|word| word.iter().rev())
        .map(|b| format!("{:02X}", b))
        .collect()
}

/// Port as it appears in the socket table
pub fn encode_port(port: u16) -> String {
    format!("{:04X}", port)
}

fn wildcard(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Inode of the LISTEN socket bound to `addr:port` or the wildcard address
fn listening_inode(table: &str, addr: IpAddr, port: u16) -> Option<u64> {
    let port = encode_port(port);
    let specific = format!("{}:{}", encode_address(addr), port);
    let any = format!("{}:{}", encode_address(wildcard(addr)), port);

    table.lines().skip(1).find_map(|row| {
        let cols: Vec<&str> = row.split_whitespace().collect();
        if cols.len() <= INODE_COLUMN || cols[3] != TCP_LISTEN {
            return None;
        }
        if cols[1] != specific && cols[1] != any {
            return None;
        }
        cols[INODE_COLUMN].parse().ok().filter(|inode| *inode != 0)
    })
}
