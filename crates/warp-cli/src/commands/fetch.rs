//! `warpbridge fetch` — one request through the blocking client.

use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::debug;
use warpgrid_bridge::{BridgeConfig, Client, Request};
use warpgrid_hostenv::{HttpFetch, Platform};

pub struct FetchArgs {
    pub url: String,
    pub method: String,
    pub headers: Vec<String>,
    pub data: Option<String>,
    pub content_type: String,
    pub include: bool,
}

/// Run the `warpbridge fetch` command.
pub fn fetch(config: &BridgeConfig, args: &FetchArgs) -> Result<()> {
    let request = build_request(args)?;

    let host = config
        .host
        .loop_builder()
        .start()
        .context("failed to start host loop")?;
    let handle = host.handle();
    let platform = Platform::builder(&handle)
        .fetch(HttpFetch::new(&handle))
        .build();

    let mut response = Client::new(&platform).execute(&request)?;
    debug!(status = response.status(), "response received");

    if args.include {
        let mut err = io::stderr().lock();
        writeln!(err, "{}", response.status())?;
        for (name, value) in response.headers() {
            writeln!(err, "{name}: {value}")?;
        }
        writeln!(err)?;
    }

    let mut out = io::stdout().lock();
    io::copy(&mut response, &mut out).context("failed to read response body")?;
    out.flush()?;
    response.close();

    host.shutdown();
    Ok(())
}

fn build_request(args: &FetchArgs) -> Result<Request> {
    let mut request = Request::new(args.method.to_ascii_uppercase(), args.url.clone());
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("header must look like `Name: value`, got {header:?}"))?;
        request.set_header(name.trim(), value.trim());
    }
    if let Some(data) = &args.data {
        if !args.content_type.is_empty() {
            request.set_header("Content-Type", args.content_type.clone());
        }
        request.set_body(data.clone().into_bytes());
    }
    Ok(request)
}
