use linkwire_client::{Client, ClientConfig, ConnectionState};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::cmd::{parse_addr, ListenArgs};
use crate::exit::{client_error, CliError, CliResult, INTERRUPTED, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_envelope, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat, config: ClientConfig) -> CliResult<i32> {
    let (host, port) = parse_addr(&args.addr)?;
    let client = Client::tcp(config).map_err(|err| client_error("invalid config", err))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    for route in &args.route {
        let tx = tx.clone();
        client.subscribe(*route, move |envelope| {
            let _ = tx.send(envelope.clone());
            Ok(())
        });
    }
    drop(tx);

    let mut changes = client.state_changes();
    client
        .connect(&host, port)
        .await
        .map_err(|err| client_error("connect failed", err))?;
    info!(routes = args.route.len(), "listening for pushes");

    let mut printed = 0usize;
    let code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break INTERRUPTED,
            change = changes.recv() => match change {
                Ok(change) if change.to == ConnectionState::Disconnected => {
                    client.close();
                    return Err(CliError::new(
                        TRANSPORT_ERROR,
                        format!("connection lost: {}", change.reason),
                    ));
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed state changes");
                }
                Err(broadcast::error::RecvError::Closed) => break SUCCESS,
            },
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break SUCCESS };
                print_envelope(&envelope, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break SUCCESS;
                }
            }
        }
    };

    client.close();
    Ok(code)
}
