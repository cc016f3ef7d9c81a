use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use splice_proxy::tunnel::probe::{probe_backend, BackendProtocol};

#[derive(Parser)]
#[command(name = "backend-probe")]
#[command(about = "Check whether a backend answers plaintext HTTP or expects TLS", long_about = None)]
struct Cli {
    /// Backend address (host:port)
    address: String,

    /// Give up after this many seconds
    #[arg(short, long, default_value_t = 60)]
    timeout: u64,

    /// Exit non-zero unless the backend speaks this protocol
    #[arg(short, long, value_enum)]
    expect: Option<Expected>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Expected {
    Plaintext,
    Encrypted,
}

impl From<Expected> for BackendProtocol {
    fn from(expected: Expected) -> Self {
        match expected {
            Expected::Plaintext => BackendProtocol::Plaintext,
            Expected::Encrypted => BackendProtocol::Encrypted,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let protocol = match probe_backend(&cli.address, Duration::from_secs(cli.timeout)).await {
        Ok(protocol) => protocol,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    println!("{} {}", cli.address, protocol);

    match cli.expect.map(BackendProtocol::from) {
        Some(expected) if expected != protocol => {
            eprintln!("Error: expected {}, backend looks {}", expected, protocol);
            ExitCode::FAILURE
        }
        _ => ExitCode::SUCCESS,
    }
}
