//! `warpbridge serve` — HTTP front with the built-in echo handler.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;
use warpgrid_bridge::{BridgeConfig, IncomingRequest, Responder, ResponseWriter};
use warpgrid_hostenv::Platform;
use warpgrid_trigger::HttpTrigger;

/// Run the `warpbridge serve` command until Ctrl-C.
pub fn serve(config: &BridgeConfig, bind: &str) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind:?}"))?;

    let host = config
        .host
        .loop_builder()
        .start()
        .context("failed to start host loop")?;
    let handle = host.handle();
    let platform = Platform::new(&handle);
    let responder = Responder::with_config(&platform, echo, config);
    let trigger = HttpTrigger::new(addr, &handle, Arc::new(responder.into_route()));

    let runtime = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    runtime.block_on(async move {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl-C");
                let _ = tx.send(true);
            }
        });
        trigger.serve(rx).await
    })?;

    host.shutdown();
    Ok(())
}

/// Echo the request line, headers and body back as plain text.
pub fn echo(w: &mut ResponseWriter, r: &IncomingRequest) {
    w.header().set("Content-Type", "text/plain; charset=utf-8");
    w.write_header(200);

    let mut text = format!("{} {}\n", r.method(), r.uri());
    for header in r.headers().iter() {
        text.push_str(&format!("{}: {}\n", header.name, header.value));
    }
    if !r.body_bytes().is_empty() {
        text.push('\n');
    }
    if w.write_all(text.as_bytes()).is_ok() {
        let _ = w.write_all(r.body_bytes());
    }
}
