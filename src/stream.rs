use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

/// A non-owning `Read + Write` view of a slot's socket.
///
/// The slot keeps ownership of the descriptor; this only borrows it for the
/// duration of one handler call. Writes use `MSG_NOSIGNAL` so a reset peer
/// surfaces as `EPIPE` instead of killing the process.
pub struct FdStream<'a> {
    fd: BorrowedFd<'a>,
}

impl<'a> FdStream<'a> {
    pub fn new(fd: BorrowedFd<'a>) -> Self {
        Self { fd }
    }
}

impl AsFd for FdStream<'_> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd
    }
}

impl Read for FdStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe { libc::recv(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len(), 0) };
        if n == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl Write for FdStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                buf.as_ptr().cast(),
                buf.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
