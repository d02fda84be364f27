//! The non-blocking I/O pump.
//!
//! Under edge-triggered notification a handler is woken once per readiness
//! transition, so it must keep reading or writing until the unit of work is
//! complete or the kernel says would-block. The two functions here run that
//! loop over any `Read`/`Write`:
//!
//! - `Interrupted` is retried in place;
//! - `WouldBlock` stops with [`Progress::WouldBlock`] (the handler re-arms
//!   and returns, see [`Context::rearm`]);
//! - a zero-length read is the peer's orderly shutdown, [`Progress::Closed`];
//! - any other error is returned and should become [`Action::Error`].
//!
//! Progress is kept in the caller's cursor, so a later call resumes exactly
//! where the previous one stopped.
//!
//! [`Context::rearm`]: crate::Context::rearm
//! [`Action::Error`]: crate::Action::Error

use std::io::{self, Read, Write};

/// How far one pump call got.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Progress {
    /// The whole buffer has been transferred.
    Done,
    /// The kernel would block; wait for the next readiness notification.
    WouldBlock,
    /// The peer shut down its writing half before the buffer was filled.
    Closed,
}

/// Reads into `buf[*filled..]` until it is full.
pub fn fill<R: Read + ?Sized>(
    io: &mut R,
    buf: &mut [u8],
    filled: &mut usize,
) -> io::Result<Progress> {
    while *filled < buf.len() {
        match io.read(&mut buf[*filled..]) {
            Ok(0) => return Ok(Progress::Closed),
            Ok(n) => *filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Progress::WouldBlock),
            Err(e) => return Err(e),
        }
    }
    Ok(Progress::Done)
}

/// Writes `buf[*written..]` until all of it has been accepted.
pub fn flush<W: Write + ?Sized>(
    io: &mut W,
    buf: &[u8],
    written: &mut usize,
) -> io::Result<Progress> {
    while *written < buf.len() {
        match io.write(&buf[*written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket accepted zero bytes",
                ))
            }
            Ok(n) => *written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Progress::WouldBlock),
            Err(e) => return Err(e),
        }
    }
    Ok(Progress::Done)
}
