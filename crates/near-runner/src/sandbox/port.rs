//! Port allocation for sandbox nodes.
//!
//! Ports come from a counter that moves forward and starts over at the
//! beginning of the range once it passes the end. Within a process the
//! counter lives in the allocator; across processes it is mirrored in a
//! small file guarded by an exclusive `fs2` lock, so two test binaries
//! started side by side never hand out the same port.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::TcpListener;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use fs2::FileExt;
use rand::Rng;
use tracing::trace;

use crate::error::SandboxError;

/// Ports handed out by [`PortAllocator::shared`].
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 20_000..=60_000;

/// Width of the window the randomized starting port is drawn from.
const BASE_WINDOW: u16 = 10_000;

const COUNTER_FILE: &str = "near-runner-ports";

static SHARED: OnceLock<Arc<PortAllocator>> = OnceLock::new();

/// Hands out free TCP ports in increasing order.
#[derive(Debug)]
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    /// Next candidate. Wider than `u16` so it can step past `u16::MAX`.
    next: Mutex<u32>,
    counter_file: Option<PathBuf>,
}

impl PortAllocator {
    /// An allocator over `range`, starting at a random port near its
    /// beginning.
    pub fn new(range: RangeInclusive<u16>) -> Self {
        let (start, end) = (*range.start(), *range.end());
        let window_end = start.saturating_add(BASE_WINDOW).min(end);
        let base = rand::thread_rng().gen_range(start..=window_end);
        Self {
            range,
            next: Mutex::new(u32::from(base)),
            counter_file: None,
        }
    }

    /// Also coordinate through `path` with other processes.
    pub fn with_counter_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.counter_file = Some(path.into());
        self
    }

    /// The process-wide allocator, coordinated through a counter file in the
    /// system temp dir.
    pub fn shared() -> Arc<PortAllocator> {
        SHARED
            .get_or_init(|| {
                Arc::new(
                    Self::new(DEFAULT_PORT_RANGE)
                        .with_counter_file(std::env::temp_dir().join(COUNTER_FILE)),
                )
            })
            .clone()
    }

    pub fn range(&self) -> &RangeInclusive<u16> {
        &self.range
    }

    /// The next free port after every port this allocator (or any allocator
    /// sharing its counter file) has returned.
    pub fn next_port(&self) -> Result<u16, SandboxError> {
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());

        let port = match &self.counter_file {
            Some(path) => {
                let mut file = open_locked(path)?;
                let result = read_counter(&mut file).and_then(|shared| {
                    // The file is authoritative once anyone has written it.
                    let from = if shared == 0 { *next } else { shared };
                    let port = self.scan_from(from)?;
                    write_counter(&mut file, u32::from(port) + 1)?;
                    Ok(port)
                });
                let _ = FileExt::unlock(&file);
                result?
            }
            None => self.scan_from(*next)?,
        };

        *next = u32::from(port) + 1;
        trace!(port, "Allocated port");
        Ok(port)
    }

    /// First free port at or after `from`, wrapping to the start of the
    /// range once. A `from` outside the range (the counter ran past the end)
    /// starts over at the beginning.
    fn scan_from(&self, from: u32) -> Result<u16, SandboxError> {
        let (start, end) = (*self.range.start(), *self.range.end());
        let from = u16::try_from(from)
            .ok()
            .filter(|port| self.range.contains(port))
            .unwrap_or(start);
        (from..=end)
            .chain(start..from)
            .find(|&port| is_free(port))
            .ok_or(SandboxError::NoFreePort { start, end })
    }
}

/// Whether nothing is listening on `port`.
fn is_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

fn open_locked(path: &Path) -> Result<File, SandboxError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| SandboxError::PortLock(format!("{}: {e}", path.display())))?;
    file.lock_exclusive()
        .map_err(|e| SandboxError::PortLock(format!("{}: {e}", path.display())))?;
    Ok(file)
}

fn read_counter(file: &mut File) -> Result<u32, SandboxError> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut content)?;
    // Empty or garbled files count as "no port handed out yet".
    Ok(content.trim().parse().unwrap_or(0))
}

fn write_counter(file: &mut File, value: u32) -> Result<(), SandboxError> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{value}")?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ports_increase() {
        let ports = PortAllocator::new(DEFAULT_PORT_RANGE);
        let a = ports.next_port().unwrap();
        let b = ports.next_port().unwrap();
        assert_ne!(a, b);
        assert!(b >= a + 1);
        assert!(DEFAULT_PORT_RANGE.contains(&a));
    }

    #[test]
    fn test_counter_file_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports");
        let first = PortAllocator::new(40_000..=50_000).with_counter_file(&path);
        let second = PortAllocator::new(40_000..=50_000).with_counter_file(&path);

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(first.next_port().unwrap());
            seen.push(second.next_port().unwrap());
        }
        assert!(seen.windows(2).all(|w| w[1] > w[0]), "{seen:?}");

        let stored: u32 = std::fs::read_to_string(&path).unwrap().parse().unwrap();
        assert_eq!(stored, u32::from(seen[5]) + 1);
    }

    #[test]
    fn test_skips_ports_in_use() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let taken = listener.local_addr().unwrap().port();
        let ports = PortAllocator {
            range: taken..=taken.saturating_add(100),
            next: Mutex::new(u32::from(taken)),
            counter_file: None,
        };
        assert_ne!(ports.next_port().unwrap(), taken);
    }

    /// A small range high enough to stay clear of ephemeral ports.
    const NARROW_RANGE: RangeInclusive<u16> = 47_310..=47_312;

    fn narrow_allocator() -> PortAllocator {
        PortAllocator {
            range: NARROW_RANGE,
            next: Mutex::new(u32::from(*NARROW_RANGE.start())),
            counter_file: None,
        }
    }

    #[test]
    fn test_wraps_after_range_end() {
        let ports = narrow_allocator();
        let issued: Vec<u16> = (0..4).map(|_| ports.next_port().unwrap()).collect();

        assert!(issued.iter().all(|p| NARROW_RANGE.contains(p)), "{issued:?}");
        assert!(issued[..3].windows(2).all(|w| w[1] > w[0]), "{issued:?}");
        // Past the end the counter starts over instead of repeating the last port.
        assert_ne!(issued[3], issued[2], "{issued:?}");
        assert!(issued[3] < issued[2], "{issued:?}");
    }

    #[test]
    fn test_counter_file_past_range_end_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports");
        std::fs::write(&path, (u32::from(*NARROW_RANGE.end()) + 1).to_string()).unwrap();
        let ports = narrow_allocator().with_counter_file(&path);

        let first = ports.next_port().unwrap();
        let second = ports.next_port().unwrap();
        assert_ne!(first, second);
        assert!(NARROW_RANGE.contains(&first) && NARROW_RANGE.contains(&second));

        let stored: u32 = std::fs::read_to_string(&path).unwrap().parse().unwrap();
        assert_eq!(stored, u32::from(second) + 1);
    }

    #[test]
    fn test_range_ending_at_u16_max() {
        let ports = PortAllocator {
            range: 65_533..=65_535,
            next: Mutex::new(65_535),
            counter_file: None,
        };
        let a = ports.next_port().unwrap();
        let b = ports.next_port().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_no_free_port() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let taken = listener.local_addr().unwrap().port();
        let ports = PortAllocator::new(taken..=taken);
        assert!(matches!(
            ports.next_port(),
            Err(SandboxError::NoFreePort { start, end }) if start == taken && end == taken
        ));
    }

    #[test]
    fn test_shared_is_one_instance() {
        assert!(Arc::ptr_eq(&PortAllocator::shared(), &PortAllocator::shared()));
    }
}
