use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use lrmd::args::Cli;
use lrmd::cib::fake::FakeCib;
use lrmd::config::BridgeConfig;
use lrmd::executor::fake::FakeExecutor;
use lrmd::te::fake::FakeAckSink;

#[tokio::main]
async fn main() -> Result<()> {
    eosin_common::init();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config: BridgeConfig = cli.bridge.into();

    // A real deployment swaps these for clients of the local executor and
    // the CIB service; that transport is out of scope here (spec §1).
    let executor = Arc::new(FakeExecutor::new());
    let cib = Arc::new(FakeCib::new());
    let ack_sink = Arc::new(FakeAckSink::new());

    let handles = match lrmd::server::run_server(executor, cib, ack_sink, config).await {
        Ok(handles) => handles,
        Err(err) => {
            eosin_common::response::print_error(&err);
            return Err(err);
        }
    };

    handles.join.await?;
    Ok(())
}
