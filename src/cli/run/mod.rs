//! Run command - executes one chain locally and prints JSON on stdout

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::chain::ChainId;
use crate::domain::execution::{ChainEvent, ChainExecutionResult, ChainStatus};
use crate::infrastructure::services::ExecuteChainRequest;

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Chain to execute
    #[arg(long)]
    pub chain: u64,

    /// File holding the source text
    #[arg(long)]
    pub input: PathBuf,

    /// Estimate tokens and cost without calling any provider
    #[arg(long)]
    pub dry_run: bool,

    /// Print the final step's text as it is generated
    #[arg(long)]
    pub stream: bool,

    /// Seed file with chains and templates; overrides `seed.path`
    #[arg(long)]
    pub seed: Option<PathBuf>,
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = super::bootstrap()?;
    if let Some(seed) = &args.seed {
        config.seed.path = Some(seed.display().to_string());
    }

    let state = crate::create_app_state(&config).await?;
    let text = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Cannot read input file {}", args.input.display()))?;

    let mut request = ExecuteChainRequest::new(ChainId(args.chain)).with_source_text(text);
    request.dry_run = args.dry_run;
    request.stream = args.stream;

    let service = &state.chain_service;
    let mut stdout = tokio::io::stdout();

    if request.dry_run {
        let estimate = service.dry_run(&request).await?;
        write_json(&mut stdout, &estimate).await?;
        return Ok(());
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let result = if request.stream {
        let events = service.stream(&request, cancel).await?;
        write_events(events, &mut stdout)
            .await?
            .context("Stream ended without a result")?
    } else {
        service.execute(&request, &cancel).await?
    };

    write_json(&mut stdout, &result).await?;
    info!(chain_id = args.chain, status = ?result.status, "Run finished");

    if result.status != ChainStatus::Completed {
        anyhow::bail!("Chain {} finished with status {:?}", args.chain, result.status);
    }
    Ok(())
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling execution");
            cancel.cancel();
        }
    });
}

/// Write deltas as they arrive; returns the terminal result
async fn write_events<W>(
    events: impl Stream<Item = ChainEvent>,
    out: &mut W,
) -> anyhow::Result<Option<ChainExecutionResult>>
where
    W: AsyncWrite + Unpin,
{
    let mut events = std::pin::pin!(events);
    let mut streamed = false;

    while let Some(event) = events.next().await {
        match event {
            ChainEvent::Delta { text } => {
                out.write_all(text.as_bytes()).await?;
                out.flush().await?;
                streamed = true;
            }
            ChainEvent::Completed { result } => {
                if streamed {
                    out.write_all(b"\n").await?;
                }
                return Ok(Some(result));
            }
        }
    }

    Ok(None)
}

async fn write_json<W, T>(out: &mut W, value: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut json = serde_json::to_vec_pretty(value)?;
    json.push(b'\n');
    out.write_all(&json).await?;
    out.flush().await?;
    Ok(())
}
