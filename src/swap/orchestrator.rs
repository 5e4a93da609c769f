//! Two-chain swap driver
//!
//! Every step waits for on-chain confirmation before the next one starts.
//! Nothing is submitted to the destination chain until the source escrow's
//! creation event has been observed, and the secret is only revealed once
//! both escrows exist.

use super::state::{SwapEvent, SwapFailure, SwapPhase, SwapResult, TxRecord};
use crate::address::{from_canonical, CanonicalAddress};
use crate::chain::{Confirmed, EscrowWatcher, SubmittedTx};
use crate::clock::Clock;
use crate::error::{RelayerResult, SwapError};
use crate::immutables::Immutables;
use crate::order::{Order, Secret};
use crate::resolver::ResolverAdapter;
use crate::state::SwapJournal;
use crate::timelock::{EscrowAction, EscrowState, EscrowWindow, Side, Stage, TimelockPolicy};
use crate::wallet::OrderSigner;

use ethers::types::{H256, U256};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Which configured chain acts as the source of the swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwapDirection {
    SrcToDst,
    DstToSrc,
}

/// Resolver and watcher for one chain
pub struct ChainLeg {
    resolver: Arc<ResolverAdapter>,
    watcher: EscrowWatcher,
}

impl ChainLeg {
    pub fn new(resolver: Arc<ResolverAdapter>, watcher: EscrowWatcher) -> Self {
        Self { resolver, watcher }
    }

    pub fn chain_id(&self) -> u64 {
        self.resolver.chain_id()
    }

    pub fn resolver(&self) -> &ResolverAdapter {
        &self.resolver
    }
}

/// Retry and waiting policy
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Resubmissions allowed for a transaction that never left the process
    pub submit_retries: u32,
    pub retry_backoff: Duration,
    /// Watcher timeouts tolerated before giving up on an escrow event
    pub max_wait_rounds: u32,
    /// Extra wait after a window opens, covering clock skew against the chain
    pub window_margin: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            submit_retries: 3,
            retry_backoff: Duration::from_secs(2),
            max_wait_rounds: 3,
            window_margin: Duration::from_secs(2),
        }
    }
}

/// Outcome of a submission
#[derive(Debug, Clone, Copy)]
enum Submission {
    Included(SubmittedTx),
    /// Reached the network; inclusion still unknown
    Broadcast(H256),
}

#[derive(Debug, Clone, Copy)]
struct EscrowHandle {
    address: CanonicalAddress,
    immutables: Immutables,
}

/// Mutable progress of one `run_swap` call
struct SwapRun {
    result: SwapResult,
    phase: SwapPhase,
    side: Option<Side>,
    src: Option<EscrowHandle>,
    dst: Option<EscrowHandle>,
}

impl SwapRun {
    fn new(result: SwapResult) -> Self {
        Self {
            result,
            phase: SwapPhase::Validate,
            side: None,
            src: None,
            dst: None,
        }
    }

    fn enter(&mut self, phase: SwapPhase, side: Option<Side>) {
        self.phase = phase;
        self.side = side;
    }

    /// Append a transaction for the current phase; returns its hash
    fn record(&mut self, side: Side, chain_id: u64, submission: &Submission) -> H256 {
        let record = match submission {
            Submission::Included(tx) => TxRecord::included(side, self.phase, chain_id, tx),
            Submission::Broadcast(hash) => TxRecord::broadcast(side, self.phase, chain_id, *hash),
        };
        let hash = record.tx_hash;
        self.result.transactions.push(record);
        hash
    }

    /// Fill in inclusion data for a transaction recorded as broadcast
    fn confirm(&mut self, tx: &SubmittedTx) {
        if let Some(record) = self
            .result
            .transactions
            .iter_mut()
            .find(|record| record.tx_hash == tx.tx_hash)
        {
            record.block_number = Some(tx.block_number);
            record.block_timestamp = Some(tx.block_timestamp);
        }
    }

    fn set_escrow_state(&mut self, side: Side, state: EscrowState) {
        match side {
            Side::Src => self.result.src_escrow_state = Some(state),
            Side::Dst => self.result.dst_escrow_state = Some(state),
        }
    }
}

/// Drives one order through fill, escrow creation and settlement on two chains
pub struct SwapOrchestrator {
    src: ChainLeg,
    dst: ChainLeg,
    signer: Arc<dyn OrderSigner>,
    clock: Arc<dyn Clock>,
    journal: Option<Arc<SwapJournal>>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl SwapOrchestrator {
    pub fn new(
        src: ChainLeg,
        dst: ChainLeg,
        signer: Arc<dyn OrderSigner>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            src,
            dst,
            signer,
            clock,
            journal: None,
            config,
            cancel,
        }
    }

    /// Persist progress after every transition
    pub fn with_journal(mut self, journal: Arc<SwapJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// (source, destination) for `direction`
    pub fn legs(&self, direction: SwapDirection) -> (&ChainLeg, &ChainLeg) {
        match direction {
            SwapDirection::SrcToDst => (&self.src, &self.dst),
            SwapDirection::DstToSrc => (&self.dst, &self.src),
        }
    }

    /// Run `order` to a terminal state. Failures are reported in the result,
    /// after cancelling whatever escrows the swap had created.
    pub async fn run_swap(
        &self,
        order: &Order,
        secret: &Secret,
        direction: SwapDirection,
    ) -> SwapResult {
        let (source, destination) = self.legs(direction);
        let order_hash = order.hash(source.chain_id(), source.resolver.limit_order_protocol());
        let mut run = SwapRun::new(SwapResult::new(
            order_hash,
            source.chain_id(),
            destination.chain_id(),
        ));

        crate::metrics::record_swap_started();
        info!(
            "Swap {}: order {:?} from chain {} to chain {}",
            run.result.swap_id,
            order_hash,
            source.chain_id(),
            destination.chain_id()
        );
        self.checkpoint(&run.result).await;

        if let Err(e) = self
            .execute(&mut run, source, destination, order, secret)
            .await
        {
            self.recover(&mut run, source, destination, e).await;
        }

        crate::metrics::record_swap_finished(run.result.state);
        info!(
            "Swap {}: finished {} with {} transactions",
            run.result.swap_id,
            run.result.state,
            run.result.transactions.len()
        );
        run.result
    }

    async fn execute(
        &self,
        run: &mut SwapRun,
        source: &ChainLeg,
        destination: &ChainLeg,
        order: &Order,
        secret: &Secret,
    ) -> RelayerResult<()> {
        let swap_id = run.result.swap_id;
        let order_hash = run.result.order_hash;

        run.enter(SwapPhase::Validate, None);
        if order.src_chain_id() != source.chain_id() || order.dst_chain_id() != destination.chain_id()
        {
            return Err(SwapError::InvalidParameter(format!(
                "order routes chain {} to {}, but direction routes {} to {}",
                order.src_chain_id(),
                order.dst_chain_id(),
                source.chain_id(),
                destination.chain_id()
            )));
        }
        if secret.hash_lock() != order.hash_lock() {
            return Err(SwapError::SecretMismatch);
        }

        run.enter(SwapPhase::ReadImplementations, None);
        let (src_impl, dst_impl) = futures::try_join!(
            source.resolver.source_impl(),
            destination.resolver.destination_impl()
        )?;
        debug!(
            "Swap {}: escrow implementations src {} dst {}",
            swap_id, src_impl, dst_impl
        );

        run.enter(SwapPhase::Sign, Some(Side::Src));
        let signature = self
            .signer
            .sign_order(order, source.chain_id(), source.resolver.limit_order_protocol())
            .await?;
        self.advance(run, SwapEvent::OrderSigned).await?;

        // Source escrow, created by filling the order
        run.enter(SwapPhase::DeploySrc, Some(Side::Src));
        let fill = {
            let resolver = &source.resolver;
            let signature = &signature;
            let chain_id = source.chain_id();
            let amount = order.making_amount();
            self.submit(run, Side::Src, chain_id, "deploy_src", move || {
                resolver.deploy_src(chain_id, order, signature, amount)
            })
            .await?
        };
        let fill_hash = run.record(Side::Src, source.chain_id(), &fill);
        self.advance(run, SwapEvent::SrcFillSubmitted).await?;

        run.enter(SwapPhase::AwaitSrcEscrow, Some(Side::Src));
        let created = self
            .await_event(|| {
                source
                    .watcher
                    .wait_for_src_escrow_created(fill_hash, &self.cancel)
            })
            .await?;
        run.confirm(&created.tx);

        let src_immutables = created.event.immutables;
        if src_immutables.order_hash != order_hash
            || src_immutables.hash_lock != order.hash_lock()
            || src_immutables.taker != source.resolver.resolver_address()
        {
            return Err(SwapError::EventDecoding(format!(
                "SrcEscrowCreated in {:?} does not match order {:?}",
                fill_hash,
                order_hash
            )));
        }
        let complement = created.event.complement;
        if complement.chain_id() != U256::from(destination.chain_id()) {
            return Err(SwapError::InvalidParameter(format!(
                "source escrow targets chain {}, expected {}",
                complement.chain_id(),
                destination.chain_id()
            )));
        }

        let src_escrow = source.resolver.src_escrow_address(&src_immutables).await?;
        self.ensure_deployed(source, src_escrow).await?;
        run.src = Some(EscrowHandle {
            address: src_escrow,
            immutables: src_immutables,
        });
        run.result.src_escrow = Some(src_escrow);
        run.set_escrow_state(Side::Src, EscrowState::Open(EscrowWindow::Deployed));
        info!(
            "Swap {}: source escrow {} deployed at {}",
            swap_id,
            from_canonical(&src_escrow, source.resolver.family()),
            src_immutables.time_locks.deployed_at
        );
        self.advance(run, SwapEvent::SrcEscrowCreated).await?;

        // Destination escrow
        run.enter(SwapPhase::DeployDst, Some(Side::Dst));
        let src_cancellation = src_immutables
            .time_locks
            .stage_timestamp(Stage::SrcCancellation);
        let dst_template = src_immutables
            .with_complement(&complement)
            .with_taker(destination.resolver.resolver_address());
        let dst_cancellation = self.clock.now()
            + u64::from(dst_template.time_locks.schedule.offset(Stage::DstCancellation));
        if dst_cancellation > src_cancellation {
            return Err(SwapError::InvalidTimelockSchedule(format!(
                "destination cancellation at {} would open after source cancellation at {}",
                dst_cancellation, src_cancellation
            )));
        }

        let deploy = {
            let resolver = &destination.resolver;
            let immutables = &dst_template;
            self.submit(run, Side::Dst, destination.chain_id(), "deploy_dst", move || {
                resolver.deploy_dst(immutables, src_cancellation)
            })
            .await?
        };
        let deploy_hash = run.record(Side::Dst, destination.chain_id(), &deploy);

        run.enter(SwapPhase::AwaitDstEscrow, Some(Side::Dst));
        let created = self
            .await_event(|| {
                destination
                    .watcher
                    .wait_for_dst_escrow_created(deploy_hash, &self.cancel)
            })
            .await?;
        run.confirm(&created.tx);

        // The factory has created and funded this escrow; report it whatever
        // the checks below find
        let reported_escrow = created.event.escrow;
        run.result.dst_escrow = Some(reported_escrow);
        run.set_escrow_state(Side::Dst, EscrowState::Open(EscrowWindow::Deployed));

        let deployed_at = u32::try_from(created.tx.block_timestamp).map_err(|_| {
            SwapError::InvalidParameter(format!(
                "block timestamp {} does not fit the timelocks word",
                created.tx.block_timestamp
            ))
        })?;
        let dst_immutables = dst_template.with_deployed_at(deployed_at);
        run.dst = Some(EscrowHandle {
            address: reported_escrow,
            immutables: dst_immutables,
        });
        if created.event.hash_lock != dst_immutables.hash_lock
            || created.event.taker != dst_immutables.taker
        {
            return Err(SwapError::EventDecoding(format!(
                "DstEscrowCreated in {:?} does not match the destination immutables",
                deploy_hash
            )));
        }

        let dst_escrow = destination.resolver.dst_escrow_address(&dst_immutables).await?;
        if dst_escrow != reported_escrow {
            return Err(SwapError::Config(format!(
                "derived destination escrow {} but the factory reported {}; check create2_prefix",
                from_canonical(&dst_escrow, destination.resolver.family()),
                from_canonical(&reported_escrow, destination.resolver.family())
            )));
        }
        self.ensure_deployed(destination, dst_escrow).await?;
        info!(
            "Swap {}: destination escrow {} deployed at {}",
            swap_id,
            from_canonical(&dst_escrow, destination.resolver.family()),
            deployed_at
        );
        self.advance(run, SwapEvent::DstEscrowCreated).await?;

        // Settlement; the destination withdrawal reveals the secret
        run.enter(SwapPhase::WithdrawDst, Some(Side::Dst));
        let dst = EscrowHandle {
            address: dst_escrow,
            immutables: dst_immutables,
        };
        self.withdraw(run, destination, Side::Dst, dst, secret).await?;
        self.advance(run, SwapEvent::DstWithdrawn).await?;

        run.enter(SwapPhase::WithdrawSrc, Some(Side::Src));
        let src = EscrowHandle {
            address: src_escrow,
            immutables: src_immutables,
        };
        self.withdraw(run, source, Side::Src, src, secret).await?;
        self.advance(run, SwapEvent::SrcWithdrawn).await?;

        Ok(())
    }

    async fn withdraw(
        &self,
        run: &mut SwapRun,
        leg: &ChainLeg,
        side: Side,
        escrow: EscrowHandle,
        secret: &Secret,
    ) -> RelayerResult<()> {
        let taker = leg.resolver.resolver_address();
        let policy = self
            .await_window(side, &escrow, &taker, EscrowAction::Withdraw)
            .await?;
        policy.authorize_withdraw(&taker, secret, self.clock.now())?;

        let submission = {
            let resolver = &leg.resolver;
            let immutables = &escrow.immutables;
            self.submit(run, side, leg.chain_id(), "withdraw", move || {
                resolver.withdraw(side, escrow.address, secret, immutables)
            })
            .await?
        };
        self.settle(run, leg, side, submission).await?;
        run.set_escrow_state(side, EscrowState::Withdrawn);
        Ok(())
    }

    async fn cancel(
        &self,
        run: &mut SwapRun,
        leg: &ChainLeg,
        side: Side,
        escrow: EscrowHandle,
    ) -> RelayerResult<()> {
        let taker = leg.resolver.resolver_address();
        let policy = self
            .await_window(side, &escrow, &taker, EscrowAction::Cancel)
            .await?;
        policy.authorize_cancel(&taker, self.clock.now())?;

        let submission = {
            let resolver = &leg.resolver;
            let immutables = &escrow.immutables;
            self.submit(run, side, leg.chain_id(), "cancel", move || {
                resolver.cancel(side, escrow.address, immutables)
            })
            .await?
        };
        self.settle(run, leg, side, submission).await?;
        run.set_escrow_state(side, EscrowState::Cancelled);
        Ok(())
    }

    /// Record a settlement transaction and make sure it is included
    async fn settle(
        &self,
        run: &mut SwapRun,
        leg: &ChainLeg,
        side: Side,
        submission: Submission,
    ) -> RelayerResult<()> {
        let tx_hash = run.record(side, leg.chain_id(), &submission);
        if let Submission::Broadcast(_) = submission {
            let tx = leg.watcher.wait_for_inclusion(tx_hash, &self.cancel).await?;
            run.confirm(&tx);
        }
        Ok(())
    }

    /// Sleep until `principal` may perform `action` on `escrow`
    async fn await_window(
        &self,
        side: Side,
        escrow: &EscrowHandle,
        principal: &CanonicalAddress,
        action: EscrowAction,
    ) -> RelayerResult<TimelockPolicy> {
        let policy = TimelockPolicy::new(side, &escrow.immutables);
        let now = self.clock.now();
        let opens_at = policy
            .opens_at(principal, action, now)
            .ok_or(SwapError::ActionNotPermitted {
                side,
                action,
                window: policy.window(now),
            })?;

        if opens_at > now {
            info!(
                "Waiting {}s for {} on {} escrow (opens at {})",
                opens_at - now,
                action,
                side,
                opens_at
            );
            let delay = Duration::from_secs(opens_at - now) + self.config.window_margin;
            self.sleep(delay).await?;
        }
        Ok(policy)
    }

    /// Submit with bounded retries. Only failures that happened before the
    /// transaction left the process are resent; a reverted transaction is
    /// recorded before its error is returned.
    async fn submit<F, Fut>(
        &self,
        run: &mut SwapRun,
        side: Side,
        chain_id: u64,
        label: &str,
        mut send: F,
    ) -> RelayerResult<Submission>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RelayerResult<SubmittedTx>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match send().await {
                Ok(tx) => return Ok(Submission::Included(tx)),
                Err(err) => err,
            };

            if let SwapError::SubmissionFailed {
                tx_hash: Some(tx_hash),
                ..
            } = &err
            {
                warn!(
                    "Chain {}: {} {:?} broadcast but unconfirmed: {}",
                    chain_id, label, tx_hash, err
                );
                return Ok(Submission::Broadcast(*tx_hash));
            }

            if !err.failed_before_broadcast() || attempt >= self.config.submit_retries {
                if let Some(tx_hash) = err.broadcast_tx() {
                    run.record(side, chain_id, &Submission::Broadcast(tx_hash));
                }
                return Err(err);
            }
            attempt += 1;
            warn!(
                "Chain {}: {} failed before broadcast (attempt {}/{}): {}",
                chain_id, label, attempt, self.config.submit_retries, err
            );
            self.sleep(self.config.retry_backoff * attempt).await?;
        }
    }

    /// Re-wait on watcher timeouts; the transaction is never resubmitted
    async fn await_event<T, F, Fut>(&self, mut wait: F) -> RelayerResult<Confirmed<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RelayerResult<Confirmed<T>>>,
    {
        let mut round: u32 = 1;
        loop {
            match wait().await {
                Err(SwapError::EscrowCreationTimeout { tx_hash, polls })
                    if round < self.config.max_wait_rounds =>
                {
                    warn!(
                        "No escrow event for {:?} after {} polls, waiting again ({}/{})",
                        tx_hash, polls, round, self.config.max_wait_rounds
                    );
                    round += 1;
                }
                other => return other,
            }
        }
    }

    async fn ensure_deployed(&self, leg: &ChainLeg, escrow: CanonicalAddress) -> RelayerResult<()> {
        if leg.resolver.escrow_exists(escrow).await? {
            Ok(())
        } else {
            Err(SwapError::ContractNotFound {
                chain_id: leg.chain_id(),
                address: from_canonical(&escrow, leg.resolver.family()),
            })
        }
    }

    async fn sleep(&self, duration: Duration) -> RelayerResult<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SwapError::Aborted),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn advance(&self, run: &mut SwapRun, event: SwapEvent) -> RelayerResult<()> {
        let state = run.result.apply(event)?;
        info!("Swap {}: {}", run.result.swap_id, state);
        self.checkpoint(&run.result).await;
        Ok(())
    }

    async fn checkpoint(&self, result: &SwapResult) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(result).await {
                warn!("Swap {}: failed to journal progress: {}", result.swap_id, e);
            }
        }
    }

    /// Record the failure, then cancel any escrow this swap left open
    async fn recover(
        &self,
        run: &mut SwapRun,
        source: &ChainLeg,
        destination: &ChainLeg,
        error: SwapError,
    ) {
        let swap_id = run.result.swap_id;
        let (phase, side) = (run.phase, run.side);
        if error.should_alert() {
            error!("ALERT swap {}: {:?} failed: {}", swap_id, phase, error);
        } else {
            error!("Swap {}: {:?} failed: {}", swap_id, phase, error);
        }

        let mut message = error.to_string();
        let event = if matches!(error, SwapError::Aborted) {
            warn!("Swap {}: aborted; open escrows need manual recovery", swap_id);
            SwapEvent::Failed
        } else {
            match self.unwind(run, source, destination).await {
                Ok(true) => SwapEvent::EscrowsCancelled,
                Ok(false) => SwapEvent::Failed,
                Err((failed_phase, e)) => {
                    message = format!("{}; then {:?} failed: {}", message, failed_phase, e);
                    SwapEvent::Failed
                }
            }
        };

        run.result.failure = Some(SwapFailure {
            side,
            phase,
            error: message,
            retryable: error.is_retryable(),
            transactions: run.result.transactions.clone(),
        });
        if let Err(e) = run.result.apply(event) {
            error!("Swap {}: {}", swap_id, e);
        }
        self.checkpoint(&run.result).await;
    }

    /// Cancel the escrows this swap created, destination first. A failed
    /// cancellation does not stop the next one. `Ok(true)` when at least one
    /// escrow was cancelled; otherwise the first failure and its phase.
    async fn unwind(
        &self,
        run: &mut SwapRun,
        source: &ChainLeg,
        destination: &ChainLeg,
    ) -> Result<bool, (SwapPhase, SwapError)> {
        if run.result.dst_escrow_state == Some(EscrowState::Withdrawn) {
            // Secret is public; the source escrow must be withdrawn, not cancelled
            warn!(
                "Swap {}: destination already withdrawn, source escrow left for withdrawal",
                run.result.swap_id
            );
            return Ok(false);
        }

        let mut cancelled = false;
        let mut first_failure = None;
        let steps = [
            (run.dst, SwapPhase::CancelDst, Side::Dst, destination),
            (run.src, SwapPhase::CancelSrc, Side::Src, source),
        ];
        for (escrow, phase, side, leg) in steps {
            let escrow = match escrow {
                Some(escrow) => escrow,
                None => continue,
            };
            run.enter(phase, Some(side));
            match self.cancel(run, leg, side, escrow).await {
                Ok(()) => cancelled = true,
                Err(SwapError::Aborted) => return Err((phase, SwapError::Aborted)),
                Err(e) => {
                    error!(
                        "Swap {}: cancelling {} escrow {} failed: {}",
                        run.result.swap_id,
                        side,
                        from_canonical(&escrow.address, leg.resolver.family()),
                        e
                    );
                    if first_failure.is_none() {
                        first_failure = Some((phase, e));
                    }
                }
            }
        }

        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(cancelled),
        }
    }
}
