// src/keys/terminal.rs - Raw-mode keypress reader on the controlling terminal
use std::fmt;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use super::{KeyReaderError, KeySource, ReadOutcome};

const ESC: u8 = 0x1b;

/// Longest key we assemble. Anything longer is cut off and mapped as unknown.
const MAX_KEY_BYTES: usize = 8;

/// Bytes of one escape sequence arrive back to back; this bounds the wait
/// for each continuation byte.
const ESCAPE_GRACE: Duration = Duration::from_millis(5);

const READ_CHUNK: usize = 64;

/// Upper bound on one drain. A flood past this is flushed, not queued.
const MAX_DRAIN_BYTES: usize = 256;

/// Snapshot of the terminal's original attributes.
///
/// `Copy` so the process can keep one around for signal-driven shutdown while
/// the reader owns another.
#[derive(Clone, Copy)]
pub struct TerminalRestore {
    fd: RawFd,
    original: libc::termios,
}

impl TerminalRestore {
    fn capture(fd: RawFd) -> io::Result<Self> {
        // SAFETY: termios is plain data; all-zero is a valid value.
        let mut original: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: original is a valid, writable termios.
        if unsafe { libc::tcgetattr(fd, &mut original) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd, original })
    }

    /// Put the original attributes back.
    pub fn restore(&self) -> io::Result<()> {
        // SAFETY: original came from tcgetattr on the same fd.
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &self.original) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn enter_raw(&self) -> io::Result<RawModeGuard> {
        let mut raw = self.original;
        // SAFETY: raw is a valid termios copied from the captured state.
        unsafe { libc::cfmakeraw(&mut raw) };
        // Keep output post-processing so log lines still get carriage returns.
        raw.c_oflag |= libc::OPOST;
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;
        // SAFETY: raw is a fully initialised termios.
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &raw) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(RawModeGuard { restore: *self })
    }
}

impl fmt::Debug for TerminalRestore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalRestore").field("fd", &self.fd).finish()
    }
}

/// Raw, unbuffered, no-echo mode for the lifetime of the guard.
struct RawModeGuard {
    restore: TerminalRestore,
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore.restore() {
            tracing::warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

/// Reads the latest keypress from stdin.
///
/// Raw mode is only held for the duration of [`KeySource::read_key`]; between
/// calls the terminal is back in its original mode. Each call drains every
/// byte that is pending, so a held key's autorepeat backlog never outlives
/// the call that saw it.
#[derive(Debug)]
pub struct TerminalKeyReader {
    restore: TerminalRestore,
    quit_sequences: Vec<Vec<u8>>,
}

impl TerminalKeyReader {
    /// Attach to stdin and check that raw mode can be entered at all.
    pub fn open(quit_sequences: Vec<Vec<u8>>) -> Result<Self, KeyReaderError> {
        Self::attach(io::stdin().as_raw_fd(), quit_sequences)
    }

    fn attach(fd: RawFd, quit_sequences: Vec<Vec<u8>>) -> Result<Self, KeyReaderError> {
        // SAFETY: isatty only inspects the descriptor.
        if unsafe { libc::isatty(fd) } != 1 {
            return Err(KeyReaderError::NotATerminal);
        }
        let restore = TerminalRestore::capture(fd).map_err(KeyReaderError::RawMode)?;
        drop(restore.enter_raw().map_err(KeyReaderError::RawMode)?);
        tracing::debug!("Terminal on fd {} supports raw mode", fd);
        Ok(Self { restore, quit_sequences })
    }

    /// Copy of the original terminal state for out-of-band restoration.
    pub fn restore_handle(&self) -> TerminalRestore {
        self.restore
    }
}

impl KeySource for TerminalKeyReader {
    fn read_key(&mut self, timeout: Duration) -> Result<ReadOutcome, KeyReaderError> {
        let _raw = self.restore.enter_raw().map_err(KeyReaderError::RawMode)?;
        if !wait_readable(self.restore.fd, timeout).map_err(KeyReaderError::Poll)? {
            return Ok(ReadOutcome::Timeout);
        }
        let pending = drain_pending(self.restore.fd)?;
        let keys = split_keys(&pending);
        if keys.len() > 1 {
            tracing::debug!("Dropped {} queued keys", keys.len() - 1);
        }
        Ok(latest_outcome(&keys, &self.quit_sequences))
    }
}

/// One key cut out of a drained burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawKey<'a> {
    bytes: &'a [u8],
    complete: bool,
}

/// A quit key anywhere in the burst wins; otherwise the last complete key
/// stands for the whole burst. A burst of only fragments yields its last
/// fragment, which maps to stop.
fn latest_outcome(keys: &[RawKey<'_>], quit_sequences: &[Vec<u8>]) -> ReadOutcome {
    if keys
        .iter()
        .any(|key| quit_sequences.iter().any(|q| q.as_slice() == key.bytes))
    {
        return ReadOutcome::ExitRequested;
    }
    let chosen = keys
        .iter()
        .rev()
        .find(|key| key.complete)
        .or_else(|| keys.last())
        .map(|key| key.bytes.to_vec())
        .unwrap_or_default();
    ReadOutcome::classify(chosen, quit_sequences)
}

/// Read everything the terminal has queued. A trailing partial key gets
/// [`ESCAPE_GRACE`] for the rest of its bytes; past [`MAX_DRAIN_BYTES`] the
/// input queue is flushed instead.
fn drain_pending(fd: RawFd) -> Result<Vec<u8>, KeyReaderError> {
    let mut pending = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = read_chunk(fd, &mut chunk).map_err(KeyReaderError::Read)?;
        pending.extend_from_slice(&chunk[..n]);
        if pending.len() >= MAX_DRAIN_BYTES {
            discard_pending(fd);
            break;
        }
        let grace = match split_keys(&pending).last() {
            Some(key) if !key.complete => ESCAPE_GRACE,
            _ => Duration::ZERO,
        };
        if !wait_readable(fd, grace).map_err(KeyReaderError::Poll)? {
            break;
        }
    }
    Ok(pending)
}

/// Cut a burst into keys: escape sequences, UTF-8 characters, single bytes.
fn split_keys(buf: &[u8]) -> Vec<RawKey<'_>> {
    let mut keys = Vec::new();
    let mut start = 0;
    while start < buf.len() {
        let (len, complete) = key_extent(&buf[start..]);
        keys.push(RawKey {
            bytes: &buf[start..start + len],
            complete,
        });
        start += len;
    }
    keys
}

/// Length of the key at the head of `buf`, and whether it is whole.
fn key_extent(buf: &[u8]) -> (usize, bool) {
    match buf[0] {
        ESC => escape_extent(buf),
        lead @ 0xc2..=0xf4 => {
            let width = if lead < 0xe0 {
                2
            } else if lead < 0xf0 {
                3
            } else {
                4
            };
            let len = 1 + buf[1..]
                .iter()
                .take(width - 1)
                .take_while(|b| (0x80..=0xbf).contains(*b))
                .count();
            (len, len == width)
        }
        _ => (1, true),
    }
}

/// ESC [ ... final or ESC O final. A lone ESC or a sequence cut short by the
/// end of input or another ESC is a fragment.
fn escape_extent(buf: &[u8]) -> (usize, bool) {
    match buf.get(1) {
        None | Some(&ESC) => (1, false),
        Some(&b'[') | Some(&b'O') => {
            let mut len = 2;
            while len < buf.len() && len < MAX_KEY_BYTES && buf[len] != ESC {
                let byte = buf[len];
                len += 1;
                if (0x40..=0x7e).contains(&byte) {
                    return (len, true);
                }
            }
            (len, false)
        }
        // Alt chord: ESC followed by the key.
        Some(_) => (2, true),
    }
}

/// Poll `fd` for input, retrying on EINTR until `timeout` has elapsed.
fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let millis = remaining.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pfd is a single valid pollfd for the duration of the call.
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc > 0 {
            return Ok(true);
        }
        if rc == 0 {
            return Ok(false);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
        if remaining.is_zero() {
            return Ok(false);
        }
    }
}

/// One read of whatever is available, at least one byte.
fn read_chunk(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        // SAFETY: buf is valid for writes of buf.len() bytes.
        let rc = unsafe { libc::read(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len()) };
        match rc {
            0 => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "terminal closed")),
            n if n > 0 => return Ok(n as usize),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }
    }
}

fn discard_pending(fd: RawFd) {
    // SAFETY: tcflush only touches the kernel input queue of fd.
    if unsafe { libc::tcflush(fd, libc::TCIFLUSH) } != 0 {
        tracing::debug!("Could not flush terminal input: {}", io::Error::last_os_error());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CTRL_C;
    use crate::keys::KeyEvent;
    use std::thread;

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: fds has room for the two descriptors pipe writes.
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    fn write_all(fd: RawFd, data: &[u8]) {
        // SAFETY: data is valid for reads of data.len() bytes.
        let n = unsafe { libc::write(fd, data.as_ptr().cast::<libc::c_void>(), data.len()) };
        assert_eq!(n, data.len() as isize);
    }

    fn close(fd: RawFd) {
        // SAFETY: each test closes only descriptors it opened.
        unsafe { libc::close(fd) };
    }

    fn quits() -> Vec<Vec<u8>> {
        vec![vec![CTRL_C], b"q".to_vec()]
    }

    fn keys(buf: &[u8]) -> Vec<(&[u8], bool)> {
        split_keys(buf).into_iter().map(|k| (k.bytes, k.complete)).collect()
    }

    /// Pseudo terminal pair; input written to `master` is read from `slave`.
    struct Pty {
        master: RawFd,
        slave: RawFd,
    }

    impl Pty {
        fn open() -> Self {
            let (mut master, mut slave) = (0, 0);
            // SAFETY: both out-pointers are valid; name, termios and winsize may be null.
            let rc = unsafe {
                libc::openpty(
                    &mut master,
                    &mut slave,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            };
            assert_eq!(rc, 0, "openpty: {}", io::Error::last_os_error());
            Self { master, slave }
        }

        fn reader(&self) -> TerminalKeyReader {
            TerminalKeyReader::attach(self.slave, quits()).unwrap()
        }

        /// Write `data` to the terminal after `delay`, from another thread.
        fn send_later(&self, delay: Duration, data: &'static [u8]) -> thread::JoinHandle<()> {
            let master = self.master;
            thread::spawn(move || {
                thread::sleep(delay);
                write_all(master, data);
            })
        }

        fn is_cooked(&self) -> bool {
            let restore = TerminalRestore::capture(self.slave).unwrap();
            let lflag = restore.original.c_lflag;
            lflag & libc::ICANON != 0 && lflag & libc::ECHO != 0
        }
    }

    impl Drop for Pty {
        fn drop(&mut self) {
            close(self.slave);
            close(self.master);
        }
    }

    #[test]
    fn test_split_single_keys() {
        assert_eq!(keys(b"x"), vec![(&b"x"[..], true)]);
        assert_eq!(keys(b"\x1b[A"), vec![(&b"\x1b[A"[..], true)]);
        assert_eq!(keys(b"\x1b[1;5A"), vec![(&b"\x1b[1;5A"[..], true)]);
        assert_eq!(keys(b"\x1bOA"), vec![(&b"\x1bOA"[..], true)]);
        assert_eq!(keys("é".as_bytes()), vec![("é".as_bytes(), true)]);
        assert_eq!(keys("€".as_bytes()), vec![("€".as_bytes(), true)]);
    }

    #[test]
    fn test_split_burst_of_repeats() {
        assert_eq!(
            keys(b"\x1b[C\x1b[Cx"),
            vec![(&b"\x1b[C"[..], true), (&b"\x1b[C"[..], true), (&b"x"[..], true)]
        );
    }

    #[test]
    fn test_split_fragments() {
        assert_eq!(keys(b"\x1b"), vec![(&b"\x1b"[..], false)]);
        assert_eq!(keys(b"\x1b["), vec![(&b"\x1b["[..], false)]);
        // An ESC cuts the sequence before it short.
        assert_eq!(
            keys(b"\x1b[1\x1b[B"),
            vec![(&b"\x1b[1"[..], false), (&b"\x1b[B"[..], true)]
        );
        // Half a UTF-8 character.
        assert_eq!(keys(&[0xc3]), vec![(&[0xc3u8][..], false)]);
        assert_eq!(keys(&[0xc3, b'a']), vec![(&[0xc3u8][..], false), (&b"a"[..], true)]);
        // Over-long sequences are cut at the key limit.
        assert_eq!(keys(b"\x1b[11111111A")[0], (&b"\x1b[111111"[..], false));
    }

    #[test]
    fn test_latest_key_wins() {
        let burst = b"\x1b[A\x1b[A\x1b[A\x1b[C";
        assert_eq!(
            latest_outcome(&split_keys(burst), &quits()),
            ReadOutcome::Data(KeyEvent::new(b"\x1b[C".to_vec()))
        );
        // A trailing fragment does not hide the key before it.
        assert_eq!(
            latest_outcome(&split_keys(b"\x1b[A\x1b["), &quits()),
            ReadOutcome::Data(KeyEvent::new(b"\x1b[A".to_vec()))
        );
        assert_eq!(
            latest_outcome(&split_keys(b"\x1b["), &quits()),
            ReadOutcome::Data(KeyEvent::new(b"\x1b[".to_vec()))
        );
    }

    #[test]
    fn test_quit_anywhere_in_burst() {
        assert_eq!(
            latest_outcome(&split_keys(b"\x1b[Aq\x1b[A"), &quits()),
            ReadOutcome::ExitRequested
        );
        assert_eq!(
            latest_outcome(&split_keys(&[b'x', CTRL_C]), &quits()),
            ReadOutcome::ExitRequested
        );
    }

    #[test]
    fn test_wait_readable_times_out_on_empty_pipe() {
        let (rx, tx) = pipe();
        let started = Instant::now();
        assert!(!wait_readable(rx, Duration::from_millis(30)).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(25));
        close(rx);
        close(tx);
    }

    #[test]
    fn test_drain_takes_everything_pending() {
        let (rx, tx) = pipe();
        write_all(tx, b"\x1b[C\x1b[Cx");
        assert_eq!(drain_pending(rx).unwrap(), b"\x1b[C\x1b[Cx".to_vec());
        assert!(!wait_readable(rx, Duration::from_millis(1)).unwrap());
        close(rx);
        close(tx);
    }

    #[test]
    fn test_drain_waits_for_split_escape() {
        let (rx, tx) = pipe();
        write_all(tx, b"\x1b");
        let writer = thread::spawn(move || {
            write_all(tx, b"[A");
            tx
        });
        assert_eq!(drain_pending(rx).unwrap(), b"\x1b[A".to_vec());
        close(writer.join().unwrap());
        close(rx);
    }

    #[test]
    fn test_drain_reports_eof() {
        let (rx, tx) = pipe();
        close(tx);
        assert!(matches!(
            drain_pending(rx),
            Err(KeyReaderError::Read(e)) if e.kind() == io::ErrorKind::UnexpectedEof
        ));
        close(rx);
    }

    #[test]
    fn test_attach_rejects_non_terminal() {
        let (rx, tx) = pipe();
        assert!(matches!(
            TerminalKeyReader::attach(rx, quits()),
            Err(KeyReaderError::NotATerminal)
        ));
        close(rx);
        close(tx);
    }

    #[test]
    fn test_read_key_times_out_and_restores() {
        let pty = Pty::open();
        let mut reader = pty.reader();
        assert!(pty.is_cooked());

        let started = Instant::now();
        assert_eq!(reader.read_key(Duration::from_millis(500)).unwrap(), ReadOutcome::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(490));
        assert!(pty.is_cooked());
    }

    #[test]
    fn test_read_key_arrow_and_restores() {
        let pty = Pty::open();
        let mut reader = pty.reader();
        let writer = pty.send_later(Duration::from_millis(20), b"\x1b[A");
        assert_eq!(
            reader.read_key(Duration::from_secs(2)).unwrap(),
            ReadOutcome::Data(KeyEvent::new(b"\x1b[A".to_vec()))
        );
        writer.join().unwrap();
        assert!(pty.is_cooked());
    }

    #[test]
    fn test_read_key_quit_keys_and_restores() {
        let pty = Pty::open();
        let mut reader = pty.reader();
        let quit_keys: [&'static [u8]; 2] = [&[CTRL_C], b"q"];
        for data in quit_keys {
            let writer = pty.send_later(Duration::from_millis(20), data);
            assert_eq!(reader.read_key(Duration::from_secs(2)).unwrap(), ReadOutcome::ExitRequested);
            writer.join().unwrap();
            assert!(pty.is_cooked());
        }
    }

    #[test]
    fn test_read_key_utf8_is_one_key() {
        let pty = Pty::open();
        let mut reader = pty.reader();
        let writer = pty.send_later(Duration::from_millis(20), "é".as_bytes());
        assert_eq!(
            reader.read_key(Duration::from_secs(2)).unwrap(),
            ReadOutcome::Data(KeyEvent::new("é".as_bytes().to_vec()))
        );
        writer.join().unwrap();
        assert_eq!(reader.read_key(Duration::from_millis(50)).unwrap(), ReadOutcome::Timeout);
    }

    #[test]
    fn test_read_key_drops_backlog() {
        let pty = Pty::open();
        let mut reader = pty.reader();
        let writer = pty.send_later(Duration::from_millis(20), b"\x1b[A\x1b[A\x1b[A\x1b[A\x1b[A\x1b[A");
        assert_eq!(
            reader.read_key(Duration::from_secs(2)).unwrap(),
            ReadOutcome::Data(KeyEvent::new(b"\x1b[A".to_vec()))
        );
        writer.join().unwrap();
        assert_eq!(reader.read_key(Duration::from_millis(100)).unwrap(), ReadOutcome::Timeout);
    }

    #[test]
    fn test_held_key_stops_soon_after_release() {
        let pty = Pty::open();
        let mut reader = pty.reader();
        let master = pty.master;
        // Autorepeat at about 30 keys per second, faster than the 20 Hz tick.
        let held = thread::spawn(move || {
            for _ in 0..20 {
                write_all(master, b"\x1b[A");
                thread::sleep(Duration::from_millis(30));
            }
        });
        while !held.is_finished() {
            let _ = reader.read_key(Duration::from_millis(500)).unwrap();
            thread::sleep(Duration::from_millis(50));
        }
        held.join().unwrap();

        // At most the repeat that landed since the last read is still driven.
        let mut after_release = 0;
        loop {
            match reader.read_key(Duration::from_millis(100)).unwrap() {
                ReadOutcome::Data(_) => after_release += 1,
                ReadOutcome::Timeout => break,
                ReadOutcome::ExitRequested => panic!("no quit key was sent"),
            }
        }
        assert!(after_release <= 1, "{} stale keys after release", after_release);
        assert!(pty.is_cooked());
    }

    #[test]
    fn test_guard_restores_on_error_and_panic() {
        let pty = Pty::open();
        let restore = TerminalRestore::capture(pty.slave).unwrap();

        let fails_in_raw_mode = || -> io::Result<()> {
            let _raw = restore.enter_raw()?;
            Err(io::Error::other("read failed"))
        };
        assert!(fails_in_raw_mode().is_err());
        assert!(pty.is_cooked());

        let panicked = std::panic::catch_unwind(|| -> () {
            let _raw = restore.enter_raw().unwrap();
            panic!("tick panicked");
        });
        assert!(panicked.is_err());
        assert!(pty.is_cooked());
    }
}
