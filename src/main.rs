use std::error::Error;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, Metadata, Record};
use rcon_exporter::{
    client::Client,
    games::Game,
    http,
    poll::{self, Target},
};

struct SimpleLogger;

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{} - {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

#[derive(Parser)]
#[command(name = "rcon-exporter")]
#[command(about = "Polls Source engine game servers over rcon")]
#[command(version)]
struct Cli {
    /// Timeout for connecting and for each command, in milliseconds
    #[arg(long, global = true, default_value_t = 5000)]
    timeout_ms: u64,

    /// More output, repeat for even more
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Server {
    /// Server host name or ip
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server rcon port
    #[arg(short, long, default_value_t = 27015)]
    port: u16,

    /// Rcon password
    #[arg(long, env = "RCON_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single command and print its output
    Exec {
        #[command(flatten)]
        server: Server,

        /// The console command, e.g. `status`
        command: String,
    },

    /// Poll the server once and print its metrics in Prometheus text format
    Poll {
        #[command(flatten)]
        server: Server,

        /// One of csgo, css, tf2, gmod, hl2, l4d2
        #[arg(short, long)]
        game: Game,
    },

    /// Serve `/metrics?ip=&port=&password=&game=` over HTTP for Prometheus
    Serve {
        /// Address to listen on
        #[arg(long, env = "HTTP_LISTEN", default_value = http::DEFAULT_LISTEN_ADDR)]
        listen: String,
    },
}

fn level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let _ = log::set_logger(&SimpleLogger).map(|()| log::set_max_level(level(cli.verbose)));

    let timeout = Duration::from_millis(cli.timeout_ms);

    match cli.command {
        Commands::Exec { server, command } => {
            let client =
                Client::connect(&server.host, server.port, &server.password, timeout).await?;
            let result = client.command(&command).await;
            client.disconnect().await;
            println!("{}", result?);
        }
        Commands::Poll { server, game } => {
            let target = Target {
                host: server.host,
                port: server.port,
                password: server.password,
                game,
                timeout,
            };
            print!("{}", poll::scrape(&target).await);
        }
        Commands::Serve { listen } => {
            let listener = http::bind(&listen).await?;
            http::run_metrics_server(listener, timeout).await;
        }
    }

    Ok(())
}
