mod cli;
mod render;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use eyre::{eyre, WrapErr};
use tokio::io::AsyncReadExt;

use futures::StreamExt;
use nodecall_core::rpc::{GrpcConnection, HttpTransport, Transport, WsTransport};
use nodecall_core::{Call, RpcClient};
use serde_json::Value;

use cli::{Cli, Command, TransportKind};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    match args.transport {
        TransportKind::Http => {
            let mut builder = HttpTransport::builder().connect_to(&args.rpc_url);
            if let Some((user, pass)) = credentials(&args)? {
                builder = builder.basic_auth(user, pass);
            }
            if let Some(path) = &args.rpc_cookie_file {
                builder = builder.cookie_file(path);
            }
            if let Some(limit) = args.requests_per_second {
                builder = builder.requests_per_second(limit);
            }
            let transport = builder.build().context("configure HTTP transport")?;
            tracing::info!(url = %transport.url(), "using JSON-RPC node");

            run(&RpcClient::new(transport), &args.command, &args.rpc_url).await
        }
        TransportKind::Ws => {
            let mut builder = WsTransport::builder().connect_to(&args.ws_url);
            if let Some((user, pass)) = credentials(&args)? {
                builder = builder.basic_auth(user, pass);
            }
            if let Some(origin) = &args.ws_origin {
                builder = builder.origin(origin);
            }
            let transport = Arc::new(
                builder
                    .connect()
                    .await
                    .map_err(|err| eyre!(format_call_error(&args.ws_url, &err.to_string())))
                    .wrap_err("connect to WebSocket node")?,
            );
            tracing::info!(url = %transport.url(), "using WebSocket node");

            let result = match &args.command {
                Command::Subscribe {
                    kind,
                    params,
                    count,
                } => subscribe(&transport, kind, params, *count).await,
                command => {
                    let shared: Arc<dyn Transport> = transport.clone();
                    run(&RpcClient::from_arc(shared), command, &args.ws_url).await
                }
            };
            let closed = transport.close().await.context("close WebSocket connection");
            result.and(closed)
        }
        TransportKind::Grpc => {
            let connection = GrpcConnection::builder()
                .connect_to(&args.gateway)
                .chain(args.chain)
                .build()
                .context("configure gateway connection")?;
            let transport = connection.transport().with_selector(args.selector());
            tracing::info!(
                gateway = %args.gateway,
                chain = %args.chain,
                selector = ?transport.selector().map(ToString::to_string),
                "using gRPC gateway"
            );

            let result = run(&RpcClient::new(transport), &args.command, &args.gateway).await;
            let closed = connection.close().await.context("close gateway connection");
            result.and(closed)
        }
    }
}

/// `--rpc-user` and `--rpc-pass`, which only make sense together.
fn credentials(args: &Cli) -> eyre::Result<Option<(&str, &str)>> {
    match (&args.rpc_user, &args.rpc_pass) {
        (Some(user), Some(pass)) => Ok(Some((user, pass))),
        (None, None) => Ok(None),
        _ => Err(eyre!("--rpc-user and --rpc-pass must be set together")),
    }
}

async fn subscribe(
    transport: &WsTransport,
    kind: &str,
    params: &[String],
    count: Option<usize>,
) -> eyre::Result<()> {
    let params = params.iter().map(|raw| render::parse_param(raw)).collect();
    let mut subscription = transport
        .subscribe(kind, params)
        .await
        .wrap_err_with(|| format!("subscribe to `{kind}`"))?;
    tracing::info!(subscription = subscription.id(), kind, "subscribed");

    let mut received = 0;
    while count.map_or(true, |count| received < count) {
        let Some(notification) = subscription.next().await else {
            tracing::warn!(received, "subscription ended by the connection");
            return Ok(());
        };
        println!("{notification}");
        received += 1;
    }
    let removed = subscription.unsubscribe().await.wrap_err("unsubscribe")?;
    tracing::debug!(removed, "unsubscribed");
    Ok(())
}

async fn run(client: &RpcClient, command: &Command, endpoint: &str) -> eyre::Result<()> {
    match command {
        Command::Subscribe { .. } => Err(eyre!("subscribe needs `--transport ws`")),
        Command::Call { method, params } => {
            let params = params.iter().map(|raw| render::parse_param(raw)).collect();
            let call = Call::<Value>::new(method, params).wrap_err("invalid call")?;
            tracing::debug!(%call, "executing call");

            let value = client.execute(call).await.map_err(|err| {
                eyre!(format_call_error(endpoint, &err.to_string()))
                    .wrap_err(format!("call `{method}` failed"))
            })?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Command::Batch { file } => {
            let text = read_input(file.as_deref()).await?;
            let entries = render::parse_batch(&text).context("parse batch file")?;

            let mut batch = client.batch();
            let mut methods = Vec::with_capacity(entries.len());
            for (index, entry) in entries.into_iter().enumerate() {
                let method = entry.method.trim().to_owned();
                let call = entry
                    .into_call()
                    .wrap_err_with(|| format!("batch entry {index}"))?;
                batch.add(call);
                methods.push(method);
            }
            tracing::info!(rpc.batch_size = batch.len(), "executing batch");

            let outcomes = client.execute_all(batch).await;
            let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
            let mut stdout = std::io::stdout().lock();
            for (method, outcome) in methods.iter().zip(&outcomes) {
                writeln!(stdout, "{}", render::outcome_line(method, outcome))?;
            }
            if failed > 0 {
                tracing::warn!(failed, total = outcomes.len(), "some calls failed");
            }
            Ok(())
        }
    }
}

async fn read_input(file: Option<&Path>) -> eyre::Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read batch file {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("read batch from stdin")?;
            Ok(text)
        }
    }
}

fn format_call_error(endpoint: &str, source_error: &str) -> String {
    let mut lines = vec![
        format!("endpoint `{endpoint}`"),
        format!("RPC error: {source_error}"),
    ];

    if source_error.contains("dns error") {
        lines.push("hint: hostname resolution failed; verify the endpoint hostname".into());
    } else if source_error.contains("401") || source_error.contains("403") {
        lines.push("hint: authentication failed; verify --rpc-user/--rpc-pass".into());
    } else if source_error.contains("error sending request") || source_error.contains("Unavailable")
    {
        lines.push("hint: endpoint unreachable; verify the address and that it is running".into());
    }

    lines.join("\n")
}
