use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use shm_open::SharedMemory;
use tracing_subscriber::EnvFilter;

type Failure = Box<dyn std::error::Error>;

fn main() -> ExitCode {
    let AttachCommand { action } = AttachCommand::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(action) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(?err, "failed");
            eprintln!("shm-attach: {err}");
            ExitCode::FAILURE
        }
    }
}

#[derive(Parser)]
#[command(version, about)]
struct AttachCommand {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Print the name, length and content up to the first NUL byte, then close again.
    Dump {
        #[arg(help = "The name of the existing segment")]
        name: String,
        #[arg(help = "The number of bytes to map")]
        length: usize,
    },
    /// Copy bytes of the segment to stdout.
    Read {
        name: String,
        length: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Number of bytes, up to the end of the mapping by default.
        #[arg(long)]
        count: Option<usize>,
    },
    /// Copy the bytes of DATA into the segment.
    Write {
        name: String,
        length: usize,
        data: OsString,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
}

fn run(action: Action) -> Result<(), Failure> {
    match action {
        Action::Dump { name, length } => {
            let mut shm = SharedMemory::open(&name, length)?;
            let content = shm.as_slice()?;
            let end = content.iter().position(|&b| b == 0).unwrap_or(content.len());

            let mut out = std::io::stdout().lock();
            writeln!(out, "name:    {}", shm.name())?;
            writeln!(out, "length:  {}", shm.len())?;
            writeln!(out, "content: {}", String::from_utf8_lossy(&content[..end]))?;

            shm.close()?;
            writeln!(out, "name:    {}", shm.name())?;
            writeln!(out, "length:  {}", shm.len())?;
            writeln!(out, "content: <closed>")?;
        }
        Action::Read {
            name,
            length,
            offset,
            count,
        } => {
            let mut shm = SharedMemory::open(&name, length)?;
            let count = count.unwrap_or(length.saturating_sub(offset));
            let bytes = shm
                .as_slice()?
                .get(offset..)
                .and_then(|tail| tail.get(..count))
                .ok_or_else(|| out_of_bounds(offset, count, length))?;

            let mut out = std::io::stdout().lock();
            out.write_all(bytes)?;
            out.flush()?;
            shm.close()?;
        }
        Action::Write {
            name,
            length,
            data,
            offset,
        } => {
            let data = data.as_encoded_bytes();
            let mut shm = SharedMemory::open(&name, length)?;
            shm.as_mut_slice()?
                .get_mut(offset..)
                .and_then(|tail| tail.get_mut(..data.len()))
                .ok_or_else(|| out_of_bounds(offset, data.len(), length))?
                .copy_from_slice(data);

            tracing::info!(name, offset, len = data.len(), "wrote to segment");
            shm.close()?;
        }
    }

    Ok(())
}

fn out_of_bounds(offset: usize, count: usize, length: usize) -> Failure {
    format!("{count} bytes at offset {offset} do not fit a mapping of {length} bytes").into()
}
