//! Interactive client for the edge-echo server.
//!
//! Reads lines from stdin, sends each one newline-terminated and prints
//! the echo. `quit` or end of input closes the connection.

use clap::Parser;
use std::io::{self, BufRead, Read, Write};
use std::net::TcpStream;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "echo-client")]
#[command(about = "Interactive client for the edge-echo server", long_about = None)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short = 'p', long, default_value_t = 8080)]
    port: u16,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut stream = TcpStream::connect((args.host.as_str(), args.port))?;
    info!(peer = %stream.peer_addr()?, "Connected, type quit to exit");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim_end_matches(['\r', '\n']);
        if message == "quit" {
            break;
        }

        let mut request = message.as_bytes().to_vec();
        request.push(b'\n');
        stream.write_all(&request)?;

        // The echo may arrive in several pieces.
        let mut echo = vec![0u8; request.len()];
        if let Err(e) = stream.read_exact(&mut echo) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                info!("Server closed the connection");
            } else {
                error!(error = %e, "Failed to read echo");
            }
            break;
        }
        write!(stdout, "{}", String::from_utf8_lossy(&echo))?;
    }

    info!("Connection closed");
    Ok(())
}
