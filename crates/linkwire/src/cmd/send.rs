use linkwire_client::{Client, ClientConfig};

use crate::cmd::{parse_addr, parse_duration, resolve_payload, SendArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_envelope, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat, config: ClientConfig) -> CliResult<i32> {
    let (host, port) = parse_addr(&args.addr)?;
    let payload = resolve_payload(&args)?;
    let config = one_shot_config(config, args.timeout.as_deref())?;

    let client = Client::tcp(config).map_err(|err| client_error("invalid config", err))?;
    client
        .connect(&host, port)
        .await
        .map_err(|err| client_error("connect failed", err))?;

    let result = client.request(args.route, payload).await;
    client.close();
    let response = result.map_err(|err| client_error("request failed", err))?;

    print_envelope(&response, format);
    Ok(SUCCESS)
}

/// A single request never reconnects.
fn one_shot_config(mut config: ClientConfig, timeout: Option<&str>) -> CliResult<ClientConfig> {
    if let Some(timeout) = timeout {
        config.request_timeout = parse_duration(timeout)?;
    }
    config.reconnect.enabled = false;
    Ok(config)
}
