//! Load client for `echo-server`.
//!
//! `echo-client [-c clients] [-s host] [-p port]` opens `clients` concurrent
//! connections, sends 64 random letters on each, checks the echo and prints
//! how many came back intact.

use std::env;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::process::ExitCode;
use std::thread::{self, JoinHandle};

use log::LevelFilter;
use rand::Rng;
use slotpoll::echo::PACKET_SIZE;

mod common;

struct Options {
    clients: usize,
    host: String,
    port: u16,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            clients: 100,
            host: "127.0.0.1".to_owned(),
            port: 7788,
        }
    }
}

fn parse(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options::default();
    while let Some(flag) = args.next() {
        let value = args
            .next()
            .ok_or_else(|| format!("missing value for {}", flag))?;
        match flag.as_str() {
            "-c" => options.clients = value.parse().map_err(|e| format!("-c {}: {}", value, e))?,
            "-s" => options.host = value,
            "-p" => options.port = value.parse().map_err(|e| format!("-p {}: {}", value, e))?,
            _ => return Err(format!("unknown option {}", flag)),
        }
    }
    Ok(options)
}

fn letters(rng: &mut impl Rng) -> [u8; PACKET_SIZE] {
    let mut packet = [0; PACKET_SIZE];
    for byte in &mut packet {
        *byte = rng.gen_range(b'a'..=b'z');
    }
    packet
}

fn round_trip(host: &str, port: u16) -> io::Result<bool> {
    let request = letters(&mut rand::thread_rng());
    let mut stream = TcpStream::connect((host, port))?;
    stream.write_all(&request)?;
    let mut reply = Vec::with_capacity(PACKET_SIZE);
    stream.read_to_end(&mut reply)?;
    Ok(reply == request)
}

/// Joins every worker; a panicked worker counts as a failure.
fn succeeded(workers: Vec<JoinHandle<bool>>) -> usize {
    workers
        .into_iter()
        .map(|worker| worker.join())
        .filter(|joined| matches!(joined, Ok(true)))
        .count()
}

fn main() -> ExitCode {
    common::init(LevelFilter::Info);

    let options = match parse(env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("usage: echo-client [-c clients] [-s host] [-p port]");
            return ExitCode::FAILURE;
        }
    };

    let workers: Vec<_> = (0..options.clients)
        .map(|i| {
            let host = options.host.clone();
            let port = options.port;
            thread::spawn(move || match round_trip(&host, port) {
                Ok(true) => true,
                Ok(false) => {
                    log::warn!("client {}: echo mismatch", i);
                    false
                }
                Err(e) => {
                    log::warn!("client {}: {}", i, e);
                    false
                }
            })
        })
        .collect();

    let ok = succeeded(workers);
    println!("{}/{} clients echoed", ok, options.clients);

    if ok == options.clients {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
