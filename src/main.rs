//! HTLC Relayer - cross-chain escrow swaps between EVM and Tron resolvers
//!
//! Runs one swap per invocation: builds and signs the order, fills it on the
//! source chain, mirrors the escrow on the destination chain and settles both.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ethers::signers::LocalWallet;
use ethers::types::U256;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use htlc_relayer::address::{from_canonical, to_canonical, ChainFamily, CanonicalAddress};
use htlc_relayer::chain::tron::TronClientConfig;
use htlc_relayer::chain::{ChainClient, EscrowWatcher, EvmClient, TronClient};
use htlc_relayer::clock::SystemClock;
use htlc_relayer::config::{ChainConfig, Settings};
use htlc_relayer::metrics::MetricsServer;
use htlc_relayer::order::{create_order, OrderParams, Secret};
use htlc_relayer::resolver::ResolverAdapter;
use htlc_relayer::state::SwapJournal;
use htlc_relayer::swap::{ChainLeg, SwapDirection, SwapOrchestrator, SwapState};
use htlc_relayer::wallet::{LocalOrderSigner, OrderSigner};

#[derive(Debug, Parser)]
#[command(name = "htlc-relayer", version, about = "Cross-chain HTLC escrow swaps")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create, fill and settle one order
    Swap {
        #[arg(long, value_enum, default_value = "src-to-dst")]
        direction: Direction,
        /// Source-chain amount, in the token's smallest unit
        #[arg(long, value_parser = parse_amount)]
        making_amount: U256,
        /// Destination-chain amount, in the token's smallest unit
        #[arg(long, value_parser = parse_amount)]
        taking_amount: U256,
        /// 32-byte hex preimage; random when omitted
        #[arg(long)]
        secret: Option<Secret>,
        /// Destination recipient in native form; the maker when omitted
        #[arg(long)]
        receiver: Option<String>,
        /// Source token, a symbol from the chain's `tokens` or a native address;
        /// the source chain's `token` when omitted
        #[arg(long)]
        maker_asset: Option<String>,
        /// Destination token, a symbol or a native address; the destination
        /// chain's `token` when omitted
        #[arg(long)]
        taker_asset: Option<String>,
    },
    /// Show every native form of an address
    Address {
        #[arg(long, value_enum)]
        family: Family,
        address: String,
    },
    /// List journaled swaps that stopped before a terminal state
    Pending,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Direction {
    SrcToDst,
    DstToSrc,
}

impl From<Direction> for SwapDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::SrcToDst => SwapDirection::SrcToDst,
            Direction::DstToSrc => SwapDirection::DstToSrc,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Family {
    Evm,
    Tron,
}

impl From<Family> for ChainFamily {
    fn from(family: Family) -> Self {
        match family {
            Family::Evm => ChainFamily::Evm,
            Family::Tron => ChainFamily::Tron,
        }
    }
}

fn parse_amount(value: &str) -> Result<U256, String> {
    U256::from_dec_str(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Command::Address { family, address } => show_address(family.into(), &address),
        Command::Pending => list_pending().await,
        Command::Swap {
            direction,
            making_amount,
            taking_amount,
            secret,
            receiver,
            maker_asset,
            taker_asset,
        } => {
            run_swap(
                direction.into(),
                making_amount,
                taking_amount,
                secret,
                SwapParties {
                    receiver,
                    maker_asset,
                    taker_asset,
                },
            )
            .await
        }
    }
}

fn show_address(family: ChainFamily, address: &str) -> Result<()> {
    let canonical = to_canonical(address, family)?;
    println!("canonical: {}", canonical);
    println!("evm:       {}", from_canonical(&canonical, ChainFamily::Evm));
    println!("tron:      {}", from_canonical(&canonical, ChainFamily::Tron));
    println!(
        "tron hex:  {}",
        htlc_relayer::address::codec::to_tron_hex(&canonical)
    );
    Ok(())
}

async fn list_pending() -> Result<()> {
    let settings = Settings::load()?;
    let journal = SwapJournal::open(&settings.relayer.journal_dir).await?;
    for record in journal.unfinished().await? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

/// Native-form overrides for the order's recipient and assets
struct SwapParties {
    receiver: Option<String>,
    maker_asset: Option<String>,
    taker_asset: Option<String>,
}

async fn run_swap(
    direction: SwapDirection,
    making_amount: U256,
    taking_amount: U256,
    secret: Option<Secret>,
    parties: SwapParties,
) -> Result<()> {
    let SwapParties {
        receiver,
        maker_asset,
        taker_asset,
    } = parties;

    info!("Starting HTLC Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} <-> {}",
        settings.chains.src.name, settings.chains.dst.name
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received, stopping...");
            shutdown.cancel();
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        let shutdown = shutdown.clone();
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(shutdown).await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let journal = Arc::new(SwapJournal::open(&settings.relayer.journal_dir).await?);
    let src = connect_leg(&settings, &settings.chains.src)?;
    let dst = connect_leg(&settings, &settings.chains.dst)?;
    info!("Chain connections initialized");

    let (src_config, dst_config) = match direction {
        SwapDirection::SrcToDst => (&settings.chains.src, &settings.chains.dst),
        SwapDirection::DstToSrc => (&settings.chains.dst, &settings.chains.src),
    };

    // The maker signs on the source chain, with that chain's key
    let maker_wallet: LocalWallet = settings
        .maker_private_key(src_config)?
        .parse()
        .with_context(|| format!("Chain {}: invalid maker private key", src_config.name))?;
    let signer = Arc::new(LocalOrderSigner::new(maker_wallet));
    let maker = signer.address();
    info!(
        "Maker {} on {}",
        from_canonical(&maker, src_config.family),
        src_config.name
    );

    let receiver = match receiver {
        Some(native) => to_canonical(&native, dst_config.family)?,
        None => CanonicalAddress::ZERO,
    };
    let maker_asset = match maker_asset {
        Some(asset) => src_config.asset(&asset)?,
        None => src_config.token()?,
    };
    let taker_asset = match taker_asset {
        Some(asset) => dst_config.asset(&asset)?,
        None => dst_config.token()?,
    };
    let secret = secret.unwrap_or_else(Secret::random);

    let order = create_order(OrderParams {
        escrow_factory: src_config.resolver_config()?.escrow_factory,
        maker,
        receiver,
        maker_asset,
        taker_asset,
        making_amount,
        taking_amount,
        hash_lock: secret.hash_lock(),
        src_chain_id: src_config.chain_id,
        dst_chain_id: dst_config.chain_id,
        options: settings.order.options(),
    })?;

    let orchestrator = SwapOrchestrator::new(
        src,
        dst,
        signer,
        Arc::new(SystemClock),
        settings.orchestrator_config(),
        shutdown.clone(),
    )
    .with_journal(journal);

    let result = orchestrator.run_swap(&order, &secret, direction).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    shutdown.cancel();
    if let Some(handle) = metrics_handle {
        if let Err(e) = handle.await {
            warn!("Metrics server task failed: {}", e);
        }
    }

    info!("HTLC Relayer stopped");
    match result.state {
        SwapState::Completed => Ok(()),
        state => anyhow::bail!("swap {} ended {}", result.swap_id, state),
    }
}

/// Chain client, resolver adapter and watcher for one configured chain
fn connect_leg(settings: &Settings, chain: &ChainConfig) -> Result<ChainLeg> {
    let wallet: LocalWallet = chain
        .private_key()?
        .parse()
        .with_context(|| format!("Chain {}: invalid private key", chain.name))?;

    let client: Arc<dyn ChainClient> = match chain.family {
        ChainFamily::Evm => Arc::new(
            EvmClient::new(
                chain.chain_id,
                &chain.rpc_urls,
                wallet,
                chain.confirmation_blocks,
            )?
            .with_receipt_timeout(settings.event_timeout()),
        ),
        ChainFamily::Tron => {
            let poll_interval = settings.poll_interval();
            let max_polls = settings.event_timeout().as_millis() / poll_interval.as_millis().max(1);
            Arc::new(TronClient::new(
                TronClientConfig {
                    chain_id: chain.chain_id,
                    base_url: chain
                        .rpc_urls
                        .first()
                        .cloned()
                        .with_context(|| format!("Chain {} has no RPC URLs", chain.name))?,
                    api_key: chain.api_key.clone().filter(|key| !key.is_empty()),
                    fee_limit: chain.fee_limit,
                    receipt_poll_interval: poll_interval,
                    receipt_max_polls: u32::try_from(max_polls).unwrap_or(u32::MAX),
                    request_timeout: settings.request_timeout(),
                },
                wallet,
            )?)
        }
    };
    info!(
        "Chain {} ({}): {} as {}",
        chain.name,
        chain.chain_id,
        chain.family,
        from_canonical(&client.sender(), chain.family)
    );

    let resolver = Arc::new(ResolverAdapter::new(chain.resolver_config()?, client.clone())?);
    let watcher = EscrowWatcher::new(client, settings.poll_interval(), settings.event_timeout());
    Ok(ChainLeg::new(resolver, watcher))
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,htlc_relayer=debug,hyper=warn,reqwest=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
