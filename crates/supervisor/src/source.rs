//! Readable output of a spawned child, as seen by the pump.

use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Result of one bounded read attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes from one stream; `stream` is the reader's index at construction.
    Data { stream: usize, bytes: Vec<u8> },
    /// Nothing arrived within the timeout.
    Idle,
    /// Every stream reached end of file.
    Closed,
}

/// Output descriptor(s) of a child. Reads never block longer than `timeout`.
pub trait OutputSource: Send {
    fn read_chunk(&mut self, timeout: Duration) -> io::Result<ReadOutcome>;
}

/// A PTY master reports EIO once the slave side is gone; that is end of file.
pub(crate) fn is_closed_error(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        if err.raw_os_error() == Some(libc::EIO) {
            return true;
        }
    }
    err.kind() == io::ErrorKind::BrokenPipe
}

#[cfg(unix)]
pub use self::unix::{PollSource, PolledReader};

#[cfg(unix)]
mod unix {
    use super::{is_closed_error, OutputSource, ReadOutcome};
    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use std::collections::VecDeque;
    use std::io::{self, Read};
    use std::os::fd::AsFd;
    use std::time::Duration;

    /// Anything that can be both polled and read.
    pub trait PolledReader: Read + AsFd + Send {}

    impl<T: Read + AsFd + Send> PolledReader for T {}

    struct Stream {
        reader: Box<dyn PolledReader>,
        open: bool,
    }

    /// Poll-gated reads over one or more descriptors (a PTY master, or a
    /// child's stdout and stderr pipes).
    pub struct PollSource {
        streams: Vec<Stream>,
        chunk_size: usize,
        /// Chunks read in the same poll round, handed out one per call.
        ready: VecDeque<(usize, Vec<u8>)>,
    }

    impl PollSource {
        pub fn new(readers: Vec<Box<dyn PolledReader>>, chunk_size: usize) -> Self {
            Self {
                streams: readers
                    .into_iter()
                    .map(|reader| Stream { reader, open: true })
                    .collect(),
                chunk_size: chunk_size.max(1),
                ready: VecDeque::new(),
            }
        }

        fn ready_streams(&self, timeout: Duration) -> io::Result<Vec<usize>> {
            let open: Vec<usize> = (0..self.streams.len())
                .filter(|&i| self.streams[i].open)
                .collect();
            let mut fds: Vec<PollFd<'_>> = open
                .iter()
                .map(|&i| PollFd::new(self.streams[i].reader.as_fd(), PollFlags::POLLIN))
                .collect();

            let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(0) => return Ok(Vec::new()),
                Ok(_) => {}
                Err(Errno::EINTR) => return Ok(Vec::new()),
                Err(errno) => return Err(io::Error::from(errno)),
            }

            let wake = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
            Ok(open
                .iter()
                .zip(fds.iter())
                .filter_map(|(&i, fd)| {
                    let revents = fd.revents()?;
                    if revents.contains(PollFlags::POLLNVAL) || revents.intersects(wake) {
                        Some(i)
                    } else {
                        None
                    }
                })
                .collect())
        }
    }

    impl OutputSource for PollSource {
        fn read_chunk(&mut self, timeout: Duration) -> io::Result<ReadOutcome> {
            if let Some((stream, bytes)) = self.ready.pop_front() {
                return Ok(ReadOutcome::Data { stream, bytes });
            }
            if self.streams.iter().all(|s| !s.open) {
                return Ok(ReadOutcome::Closed);
            }

            let ready = self.ready_streams(timeout)?;
            let mut buf = vec![0u8; self.chunk_size];
            for i in ready {
                let stream = &mut self.streams[i];
                match stream.reader.read(&mut buf) {
                    Ok(0) => stream.open = false,
                    Ok(n) => self.ready.push_back((i, buf[..n].to_vec())),
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(err) if is_closed_error(&err) => stream.open = false,
                    Err(err) => return Err(err),
                }
            }

            if let Some((stream, bytes)) = self.ready.pop_front() {
                Ok(ReadOutcome::Data { stream, bytes })
            } else if self.streams.iter().all(|s| !s.open) {
                Ok(ReadOutcome::Closed)
            } else {
                Ok(ReadOutcome::Idle)
            }
        }
    }
}

/// Blocking readers on helper threads feeding a channel. Used where the
/// descriptor cannot be polled (ConPTY, Windows pipes).
pub struct ChannelSource {
    rx: Receiver<(usize, io::Result<Vec<u8>>)>,
}

impl ChannelSource {
    pub fn spawn(
        label: &str,
        readers: Vec<Box<dyn Read + Send>>,
        chunk_size: usize,
    ) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        for (index, mut reader) in readers.into_iter().enumerate() {
            let tx = tx.clone();
            let chunk_size = chunk_size.max(1);
            thread::Builder::new()
                .name(format!("{label}-reader-{index}"))
                .spawn(move || {
                    let mut buf = vec![0u8; chunk_size];
                    loop {
                        match reader.read(&mut buf) {
                            Ok(0) => break,
                            Ok(n) => {
                                if tx.send((index, Ok(buf[..n].to_vec()))).is_err() {
                                    break;
                                }
                            }
                            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                            Err(err) if is_closed_error(&err) => break,
                            Err(err) => {
                                let _ = tx.send((index, Err(err)));
                                break;
                            }
                        }
                    }
                })?;
        }
        Ok(Self { rx })
    }
}

impl OutputSource for ChannelSource {
    fn read_chunk(&mut self, timeout: Duration) -> io::Result<ReadOutcome> {
        match self.rx.recv_timeout(timeout) {
            Ok((stream, Ok(bytes))) => Ok(ReadOutcome::Data { stream, bytes }),
            Ok((_, Err(err))) => Err(err),
            Err(RecvTimeoutError::Timeout) => Ok(ReadOutcome::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(ReadOutcome::Closed),
        }
    }
}
