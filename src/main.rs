//! send-code: send a source file to a remote code executor.

use send_code::config::Config;
use send_code::{Client, SendError, SourceFile, Status};
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> Result<bool, Box<dyn std::error::Error>> {
    debug!(
        file = %config.file.display(),
        host = %config.host,
        port = config.port,
        origin = %config.origin,
        encoding = %config.encoding,
        password = config.password.is_some(),
        "Sending code"
    );

    let request = SourceFile::load(&config.file)?
        .into_request(config.origin.as_str())
        .with_encoding(config.encoding.as_str())
        .with_password(config.password.as_deref());

    let client = Client::new(config.host.as_str(), config.port)
        .with_connect_timeout(config.connect_timeout)
        .with_io_timeout(config.io_timeout);

    match client.send(&request) {
        Ok(status) => Ok(report_status(&client, &status)),
        Err(e) => {
            report_failure(&client, &e);
            Ok(false)
        }
    }
}

fn report_status(client: &Client, status: &Status) -> bool {
    let addr = client.addr();
    match status {
        Status::Ok => info!("Code sent to {}", addr),
        Status::InvalidPassword => error!(
            "Password was not accepted by the Remote Code Executor Server at {}",
            addr
        ),
        Status::InvalidRequest => {
            error!("Request was invalid, maybe this client is outdated?")
        }
        Status::Unknown(token) => error!("error (unexpected): {}", token),
    }
    status.is_ok()
}

fn report_failure(client: &Client, err: &SendError) {
    match err {
        SendError::EmptyResponse => error!(
            "The server at {} closed the connection without answering",
            client.addr()
        ),
        other => error!("{}", other),
    }
}
