use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "amqperf", version, about = "AMQP 0-9-1 publisher benchmark")]
pub(crate) struct Cli {
    /// Path to the config file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub(crate) config: Option<String>,

    /// Broker url, overrides the config file
    #[arg(long, value_name = "URL", global = true)]
    pub(crate) url: Option<String>,

    /// Print the report as JSON on stdout
    #[arg(long, global = true)]
    pub(crate) json: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Publish messages of the given size to an exchange
    Publish(PublishArgs),
    /// Publish to a private queue and consume every message before publishing the next one
    Altpubcons(AltPubConsArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::Publish(_) => "publish",
            Command::Altpubcons(_) => "altpubcons",
        }
    }

    pub(crate) fn implementation(&self) -> Impl {
        match self {
            Command::Publish(args) => args.implementation,
            Command::Altpubcons(args) => args.implementation,
        }
    }
}

/// Concurrency model of the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Impl {
    /// Calls block the caller thread until the broker replies
    Blocking,
    /// Single threaded event loop, completion is signalled by listeners
    Select,
}

#[derive(Debug, Args)]
pub(crate) struct PublishArgs {
    #[arg(long = "impl", value_enum)]
    pub(crate) implementation: Impl,

    /// Destination exchange, "" is the default exchange
    #[arg(long = "exg")]
    pub(crate) exchange: String,

    /// Number of messages to send
    #[arg(long, default_value_t = 1000)]
    pub(crate) msgs: u64,

    /// Size of each message in bytes
    #[arg(long, default_value_t = 1024)]
    pub(crate) size: usize,

    /// Publish in delivery confirmation mode
    #[arg(long)]
    pub(crate) pubacks: bool,

    /// Publish with the mandatory flag, a returned message fails the run
    #[arg(long)]
    pub(crate) mandatory: bool,

    #[arg(long, default_value = "test")]
    pub(crate) routing_key: String,

    /// Wait for the confirms once after publishing every message
    #[arg(long, requires = "pubacks")]
    pub(crate) pipelined: bool,
}

#[derive(Debug, Args)]
pub(crate) struct AltPubConsArgs {
    #[arg(long = "impl", value_enum)]
    pub(crate) implementation: Impl,

    #[arg(long, default_value_t = 1000)]
    pub(crate) msgs: u64,

    #[arg(long, default_value_t = 1024)]
    pub(crate) size: usize,
}
