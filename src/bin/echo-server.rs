//! Fixed-size echo server: `echo-server <bind-address>`, port 7788.

use std::env;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::process::ExitCode;

use log::LevelFilter;
use slotpoll::echo::EchoConnection;
use slotpoll::{interest, Acceptor, Direction, Reactor};

mod common;

const PORT: u16 = 7788;

fn main() -> ExitCode {
    common::init(LevelFilter::Info);

    let mut args = env::args().skip(1);
    let ip = match (args.next(), args.next()) {
        (Some(arg), None) => match arg.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(e) => {
                log::error!("invalid bind address {:?}: {}", arg, e);
                return ExitCode::FAILURE;
            }
        },
        _ => {
            eprintln!("usage: echo-server <bind-address>");
            return ExitCode::FAILURE;
        }
    };

    match serve(SocketAddr::new(ip, PORT)) {
        Ok(never) => match never {},
        Err(e) => {
            log::error!("cannot serve on {}: {}", SocketAddr::new(ip, PORT), e);
            ExitCode::FAILURE
        }
    }
}

fn serve(addr: SocketAddr) -> io::Result<std::convert::Infallible> {
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;

    let mut reactor = Reactor::builder().build()?;
    let token = reactor.acquire(listener.into())?;
    reactor.set_handler(token, Acceptor::new(|| Ok(EchoConnection::new())))?;
    reactor.add(token, Direction::Read, interest())?;

    log::info!("listening on {} ({} slots)", addr, reactor.capacity());
    reactor.run_forever()
}
