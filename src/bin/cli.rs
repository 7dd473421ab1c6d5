//! rdagent CLI Client
//!
//! Command-line interface for talking to an rdagent server. Every
//! response is printed as JSON.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use rdagent::protocol::{
    read_response, write_command, write_ping, Command, ExecuteCommand, GetFileCommand,
    ListFilesCommand, ReadOutcome, Response, TransferStatus,
};
use rdagent::transfer::unpack_files;
use rdagent::{AgentError, Config, Result};

/// rdagent CLI
#[derive(Parser, Debug)]
#[command(name = "rdagent-cli")]
#[command(about = "CLI for the rdagent remote debug agent")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:9339")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the server's version, platform and capabilities
    Capabilities,

    /// Run a process on the server
    Exec {
        /// Executable to run
        executable: String,

        /// Argument string, split by the server
        #[arg(default_value = "")]
        arguments: String,

        /// Working directory on the server
        #[arg(short = 'C', long, default_value = "")]
        workdir: String,

        /// Extra environment variables (KEY=VALUE)
        #[arg(short, long)]
        env: Vec<String>,

        /// Timeout in seconds (0 = none)
        #[arg(short, long, default_value = "0")]
        timeout: i32,

        /// Start the process and return immediately
        #[arg(long)]
        detach: bool,
    },

    /// List file metadata below a path on the server
    ListFiles {
        /// Path, relative to the working directory
        path: String,

        /// Working directory on the server
        #[arg(short = 'C', long, default_value = "")]
        workdir: String,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// List the server's environment variables
    Env,

    /// Copy files from the server into a local directory
    Get {
        /// Root directory on the server
        root: String,

        /// Paths relative to the root (directories end with `/`)
        #[arg(required = true)]
        paths: Vec<String>,

        /// Local destination directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Ask the server to compress the response
        #[arg(short, long)]
        compress: bool,
    },

    /// Ping the server
    Ping,
}

/// A connected client
struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    max_message_size: usize,
}

impl Client {
    fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| AgentError::Network(format!("Failed to connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
            max_message_size: Config::default().max_message_size,
        })
    }

    /// Send a command and wait for its response, removing compression
    fn request(&mut self, command: &Command) -> Result<Response> {
        write_command(&mut self.writer, command)?;
        match read_response(&mut self.reader, self.max_message_size)? {
            ReadOutcome::Message(response) => response.into_uncompressed(self.max_message_size),
            ReadOutcome::Ping => Err(AgentError::Protocol("Unexpected ping".into())),
            ReadOutcome::Closed => Err(AgentError::Network("Server closed the connection".into())),
        }
    }

    fn ping(&mut self) -> Result<Duration> {
        let started = Instant::now();
        write_ping(&mut self.writer)?;
        match read_response(&mut self.reader, self.max_message_size)? {
            ReadOutcome::Ping => Ok(started.elapsed()),
            ReadOutcome::Message(response) => Err(AgentError::Protocol(format!(
                "Expected ping, got {:?}",
                response.response_type()
            ))),
            ReadOutcome::Closed => Err(AgentError::Network("Server closed the connection".into())),
        }
    }
}

fn parse_env(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| AgentError::Config(format!("Expected KEY=VALUE, got '{}'", pair)))
        })
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| AgentError::Protocol(format!("Failed to format output: {}", e)))?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text)?;
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let mut client = Client::connect(&args.server)?;

    match args.command {
        Commands::Capabilities => {
            print_json(&client.request(&Command::GetServerCapabilities)?)?;
        }
        Commands::Exec {
            executable,
            arguments,
            workdir,
            env,
            timeout,
            detach,
        } => {
            let command = Command::Execute(ExecuteCommand {
                working_directory: workdir,
                executable,
                arguments,
                environment: parse_env(&env)?,
                run_as_administrator: false,
                wait_for_completion: !detach,
                execution_timeout_secs: timeout,
            });
            print_json(&client.request(&command)?)?;
        }
        Commands::ListFiles {
            path,
            workdir,
            recursive,
        } => {
            let command = Command::ListFiles(ListFilesCommand {
                work_dir: workdir,
                path,
                include_subdirectories: recursive,
            });
            print_json(&client.request(&command)?)?;
        }
        Commands::Env => {
            print_json(&client.request(&Command::ListEnvironmentVariables)?)?;
        }
        Commands::Get {
            root,
            paths,
            output,
            compress,
        } => {
            let command = Command::GetFile(GetFileCommand {
                root_path: root,
                paths,
                use_compression: compress,
            });
            match client.request(&command)? {
                Response::GetFiles(files) if files.status == TransferStatus::Successful => {
                    let workers = Config::default().transfer_parallelism(files.files.len());
                    unpack_files(&output, &files.files, true, workers)
                        .map_err(|f| AgentError::Io(std::io::Error::other(f.to_string())))?;
                    print_json(&Response::GetFiles(files))?;
                }
                other => print_json(&other)?,
            }
        }
        Commands::Ping => {
            let rtt = client.ping()?;
            print_json(&serde_json::json!({ "round_trip_ms": rtt.as_secs_f64() * 1000.0 }))?;
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
