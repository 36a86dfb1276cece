use clap::{Parser, Subcommand};
use goodput::config::{parse_byte_target, DEFAULT_CHUNK_SIZE, DEFAULT_PORT};
use goodput::interval_reporter::run_reporter_task;
use goodput::{Client, Config, Mode, Reporter, Server, Unit};
use std::net::IpAddr;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "goodput")]
#[command(about = "Measure TCP throughput between a client and a server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run in server mode
    Server {
        /// Port to listen on
        #[arg(
            short,
            long,
            default_value_t = DEFAULT_PORT,
            value_parser = clap::value_parser!(u16).range(1024..)
        )]
        port: u16,

        /// IP address of the server interface
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: IpAddr,

        /// Unit for transfer amounts (B, KB or MB)
        #[arg(short, long, default_value = "MB")]
        format: Unit,

        /// Read buffer size in bytes
        #[arg(short = 'l', long, default_value_t = DEFAULT_CHUNK_SIZE)]
        length: usize,

        /// Output in JSON format
        #[arg(short = 'J', long)]
        json: bool,
    },

    /// Run in client mode
    Client {
        /// IP address of the server
        #[arg(short = 'I', long = "server-ip", default_value = "127.0.0.1")]
        server_ip: IpAddr,

        /// Port to connect to
        #[arg(
            short,
            long,
            default_value_t = DEFAULT_PORT,
            value_parser = clap::value_parser!(u16).range(1024..)
        )]
        port: u16,

        /// Test duration in seconds (25 when neither -t nor -n is given)
        #[arg(short = 't', long, conflicts_with = "num")]
        time: Option<u64>,

        /// Number of bytes to send, e.g. 10B, 10KB or 10MB
        #[arg(short = 'n', long)]
        num: Option<String>,

        /// Print statistics every N seconds
        #[arg(short, long)]
        interval: Option<u64>,

        /// Number of parallel connections (1 to 5)
        #[arg(short = 'P', long, default_value_t = 1)]
        parallel: usize,

        /// Unit for transfer amounts (B, KB or MB)
        #[arg(short, long, default_value = "MB")]
        format: Unit,

        /// Payload chunk size in bytes
        #[arg(short = 'l', long, default_value_t = DEFAULT_CHUNK_SIZE)]
        length: usize,

        /// Output in JSON format
        #[arg(short = 'J', long)]
        json: bool,
    },
}

fn build_config(command: Commands) -> goodput::Result<Config> {
    let config = match command {
        Commands::Server {
            port,
            bind,
            format,
            length,
            json,
        } => Config::server(port)
            .with_bind_addr(bind)
            .with_unit(format)
            .with_chunk_size(length)
            .with_json(json),

        Commands::Client {
            server_ip,
            port,
            time,
            num,
            interval,
            parallel,
            format,
            length,
            json,
        } => {
            let mut config = Config::client(server_ip, port)
                .with_parallel(parallel)
                .with_unit(format)
                .with_chunk_size(length)
                .with_json(json);

            if let Some(secs) = time {
                config = config.with_duration(Duration::from_secs(secs));
            }
            if let Some(num) = num {
                config = config.with_byte_target(parse_byte_target(&num)?);
            }
            if let Some(secs) = interval {
                config = config.with_interval(Duration::from_secs(secs));
            }
            config
        }
    };

    config.validate()?;
    Ok(config)
}

async fn run(config: Config, reporter: &Reporter) -> goodput::Result<()> {
    match config.mode {
        Mode::Server => Server::new(config, reporter.clone())?.run().await,
        Mode::Client => {
            Client::new(config, reporter.clone())?.run().await?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = build_config(cli.command)?;

    let (reporter, receiver) = Reporter::new();
    let printer = tokio::spawn(run_reporter_task(
        receiver,
        config.unit,
        config.json,
        std::io::stdout(),
    ));

    let outcome = run(config, &reporter).await;

    reporter.complete();
    printer.await?;
    outcome?;

    Ok(())
}
