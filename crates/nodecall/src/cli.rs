use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use nodecall_core::rpc::{Chain, Selector};

/// nodecall: batched JSON-RPC calls against a blockchain node or gateway.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Which transport to use.
    #[arg(long, value_enum, default_value = "http", env = "NODECALL_TRANSPORT")]
    pub transport: TransportKind,

    /// JSON-RPC node URL (http transport).
    #[arg(long, default_value = "http://127.0.0.1:8545", env = "NODECALL_RPC_URL")]
    pub rpc_url: String,

    /// WebSocket node URL (ws transport).
    #[arg(long, default_value = "ws://127.0.0.1:8546", env = "NODECALL_WS_URL")]
    pub ws_url: String,

    /// Origin header for the WebSocket handshake (ws transport).
    #[arg(long, env = "NODECALL_WS_ORIGIN")]
    pub ws_origin: Option<String>,

    /// RPC username (optional; http and ws transports).
    #[arg(long, env = "NODECALL_RPC_USER")]
    pub rpc_user: Option<String>,

    /// RPC password (optional; http and ws transports).
    #[arg(long, env = "NODECALL_RPC_PASS")]
    pub rpc_pass: Option<String>,

    /// File holding `user:password` on its first line (http transport).
    #[arg(long, env = "NODECALL_RPC_COOKIE_FILE")]
    pub rpc_cookie_file: Option<PathBuf>,

    /// Maximum outbound HTTP requests per second. A batch counts once.
    #[arg(long, env = "NODECALL_REQUESTS_PER_SECOND")]
    pub requests_per_second: Option<u32>,

    /// Gateway address as host[:port] (grpc transport).
    #[arg(long, default_value = "127.0.0.1:9001", env = "NODECALL_GATEWAY")]
    pub gateway: String,

    /// Chain to route gateway calls to, by name or numeric code.
    #[arg(long, default_value = "ethereum", env = "NODECALL_CHAIN")]
    pub chain: Chain,

    /// Upstream label the gateway must match, as name=value (repeatable).
    #[arg(long = "select", value_parser = parse_label)]
    pub selectors: Vec<(String, String)>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    Http,
    Ws,
    Grpc,
}

#[derive(Subcommand)]
pub enum Command {
    /// Execute a single call and print its result.
    Call {
        /// JSON-RPC method name.
        method: String,
        /// Positional params. Each is parsed as JSON, or taken as a string.
        params: Vec<String>,
    },
    /// Execute a JSON array of {"method", "params"} calls as one batch and
    /// print one JSON line per outcome.
    Batch {
        /// Batch file; reads stdin when omitted.
        file: Option<PathBuf>,
    },
    /// Open an `eth_subscribe` subscription and print one JSON line per
    /// notification (ws transport only).
    Subscribe {
        /// Subscription kind, e.g. newHeads or logs.
        kind: String,
        /// Extra params after the kind, parsed like `call` params.
        params: Vec<String>,
        /// Stop and unsubscribe after this many notifications.
        #[arg(long)]
        count: Option<usize>,
    },
}

impl Cli {
    /// All `--select` labels combined with AND, or `None` when there are none.
    pub fn selector(&self) -> Option<Selector> {
        self.selectors
            .iter()
            .map(|(name, value)| Selector::label(name, value))
            .reduce(Selector::and)
    }
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_owned(), value.trim().to_owned()))
        }
        _ => Err(format!("expected name=value, got `{raw}`")),
    }
}
