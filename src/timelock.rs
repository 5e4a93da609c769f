//! Timelock schedule and escrow permission policy
//!
//! Offsets are relative to the escrow's deployment timestamp. A policy is
//! bound to one escrow side; source and destination offsets are never
//! compared against each other.

use crate::address::CanonicalAddress;
use crate::error::{RelayerResult, SwapError};
use crate::immutables::{Immutables, TimeLocks};
use crate::order::Secret;

use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which escrow of the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Src,
    Dst,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Src => write!(f, "src"),
            Side::Dst => write!(f, "dst"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscrowAction {
    Withdraw,
    Cancel,
}

impl fmt::Display for EscrowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscrowAction::Withdraw => write!(f, "withdraw"),
            EscrowAction::Cancel => write!(f, "cancel"),
        }
    }
}

/// Time window an escrow is in, in lifecycle order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowWindow {
    /// Finality lock right after deployment; nobody may act
    Deployed,
    PrivateWithdrawal,
    PublicWithdrawal,
    PrivateCancellation,
    /// Source side only
    PublicCancellation,
}

impl fmt::Display for EscrowWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EscrowWindow::Deployed => "finality lock",
            EscrowWindow::PrivateWithdrawal => "private withdrawal",
            EscrowWindow::PublicWithdrawal => "public withdrawal",
            EscrowWindow::PrivateCancellation => "private cancellation",
            EscrowWindow::PublicCancellation => "public cancellation",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one escrow: open in some window, or settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowState {
    Open(EscrowWindow),
    Withdrawn,
    Cancelled,
}

/// Index of each offset inside the packed timelocks word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SrcWithdrawal = 0,
    SrcPublicWithdrawal = 1,
    SrcCancellation = 2,
    SrcPublicCancellation = 3,
    DstWithdrawal = 4,
    DstPublicWithdrawal = 5,
    DstCancellation = 6,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::SrcWithdrawal,
        Stage::SrcPublicWithdrawal,
        Stage::SrcCancellation,
        Stage::SrcPublicCancellation,
        Stage::DstWithdrawal,
        Stage::DstPublicWithdrawal,
        Stage::DstCancellation,
    ];
}

/// Seven relative offsets, in seconds from deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockSchedule {
    pub src_withdrawal: u32,
    pub src_public_withdrawal: u32,
    pub src_cancellation: u32,
    pub src_public_cancellation: u32,
    pub dst_withdrawal: u32,
    pub dst_public_withdrawal: u32,
    pub dst_cancellation: u32,
}

impl Default for TimelockSchedule {
    fn default() -> Self {
        Self {
            src_withdrawal: 10,
            src_public_withdrawal: 120,
            src_cancellation: 121,
            src_public_cancellation: 122,
            dst_withdrawal: 10,
            dst_public_withdrawal: 100,
            dst_cancellation: 101,
        }
    }
}

impl TimelockSchedule {
    pub fn offset(&self, stage: Stage) -> u32 {
        match stage {
            Stage::SrcWithdrawal => self.src_withdrawal,
            Stage::SrcPublicWithdrawal => self.src_public_withdrawal,
            Stage::SrcCancellation => self.src_cancellation,
            Stage::SrcPublicCancellation => self.src_public_cancellation,
            Stage::DstWithdrawal => self.dst_withdrawal,
            Stage::DstPublicWithdrawal => self.dst_public_withdrawal,
            Stage::DstCancellation => self.dst_cancellation,
        }
    }

    pub fn from_offsets(offsets: [u32; 7]) -> Self {
        Self {
            src_withdrawal: offsets[0],
            src_public_withdrawal: offsets[1],
            src_cancellation: offsets[2],
            src_public_cancellation: offsets[3],
            dst_withdrawal: offsets[4],
            dst_public_withdrawal: offsets[5],
            dst_cancellation: offsets[6],
        }
    }

    /// Offsets must strictly increase within each side
    pub fn validate(&self) -> RelayerResult<()> {
        let src = [
            ("src_withdrawal", self.src_withdrawal),
            ("src_public_withdrawal", self.src_public_withdrawal),
            ("src_cancellation", self.src_cancellation),
            ("src_public_cancellation", self.src_public_cancellation),
        ];
        let dst = [
            ("dst_withdrawal", self.dst_withdrawal),
            ("dst_public_withdrawal", self.dst_public_withdrawal),
            ("dst_cancellation", self.dst_cancellation),
        ];

        for chain in [&src[..], &dst[..]] {
            for pair in chain.windows(2) {
                let ((prev_name, prev), (next_name, next)) = (pair[0], pair[1]);
                if next <= prev {
                    return Err(SwapError::InvalidTimelockSchedule(format!(
                        "{} ({}) must be greater than {} ({})",
                        next_name, next, prev_name, prev
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Permission policy for one deployed escrow
#[derive(Debug, Clone)]
pub struct TimelockPolicy {
    side: Side,
    time_locks: TimeLocks,
    taker: CanonicalAddress,
    hash_lock: H256,
}

impl TimelockPolicy {
    pub fn new(side: Side, immutables: &Immutables) -> Self {
        Self {
            side,
            time_locks: immutables.time_locks,
            taker: immutables.taker,
            hash_lock: immutables.hash_lock,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Windows for this side with their `[start, end)` absolute bounds
    fn windows(&self) -> Vec<(EscrowWindow, u64, Option<u64>)> {
        let at = |stage| self.time_locks.stage_timestamp(stage);
        let deployed = u64::from(self.time_locks.deployed_at);
        match self.side {
            Side::Src => vec![
                (EscrowWindow::Deployed, deployed, Some(at(Stage::SrcWithdrawal))),
                (
                    EscrowWindow::PrivateWithdrawal,
                    at(Stage::SrcWithdrawal),
                    Some(at(Stage::SrcPublicWithdrawal)),
                ),
                (
                    EscrowWindow::PublicWithdrawal,
                    at(Stage::SrcPublicWithdrawal),
                    Some(at(Stage::SrcCancellation)),
                ),
                (
                    EscrowWindow::PrivateCancellation,
                    at(Stage::SrcCancellation),
                    Some(at(Stage::SrcPublicCancellation)),
                ),
                (EscrowWindow::PublicCancellation, at(Stage::SrcPublicCancellation), None),
            ],
            Side::Dst => vec![
                (EscrowWindow::Deployed, deployed, Some(at(Stage::DstWithdrawal))),
                (
                    EscrowWindow::PrivateWithdrawal,
                    at(Stage::DstWithdrawal),
                    Some(at(Stage::DstPublicWithdrawal)),
                ),
                (
                    EscrowWindow::PublicWithdrawal,
                    at(Stage::DstPublicWithdrawal),
                    Some(at(Stage::DstCancellation)),
                ),
                (EscrowWindow::PrivateCancellation, at(Stage::DstCancellation), None),
            ],
        }
    }

    /// Window the escrow is in at `now`
    pub fn window(&self, now: u64) -> EscrowWindow {
        self.windows()
            .into_iter()
            .rev()
            .find(|(_, start, _)| now >= *start)
            .map(|(window, _, _)| window)
            .unwrap_or(EscrowWindow::Deployed)
    }

    fn permits(&self, window: EscrowWindow, principal: &CanonicalAddress, action: EscrowAction) -> bool {
        let is_taker = *principal == self.taker;
        match (action, window) {
            (EscrowAction::Withdraw, EscrowWindow::PrivateWithdrawal) => is_taker,
            (EscrowAction::Withdraw, EscrowWindow::PublicWithdrawal) => true,
            (EscrowAction::Cancel, EscrowWindow::PrivateCancellation) => is_taker,
            (EscrowAction::Cancel, EscrowWindow::PublicCancellation) => self.side == Side::Src,
            _ => false,
        }
    }

    /// Whether `principal` may perform `action` on this escrow at `now`
    pub fn can_act(&self, principal: &CanonicalAddress, action: EscrowAction, now: u64) -> bool {
        self.permits(self.window(now), principal, action)
    }

    /// Earliest time at or after `now` when `principal` may perform `action`.
    /// `None` when every permitting window has already closed.
    pub fn opens_at(&self, principal: &CanonicalAddress, action: EscrowAction, now: u64) -> Option<u64> {
        self.windows()
            .into_iter()
            .filter(|(window, _, _)| self.permits(*window, principal, action))
            .find(|(_, _, end)| end.map_or(true, |end| end > now))
            .map(|(_, start, _)| start.max(now))
    }

    /// Secret check first, then the window
    pub fn authorize_withdraw(
        &self,
        principal: &CanonicalAddress,
        secret: &Secret,
        now: u64,
    ) -> RelayerResult<()> {
        if secret.hash_lock() != self.hash_lock {
            return Err(SwapError::SecretMismatch);
        }
        self.authorize(principal, EscrowAction::Withdraw, now)
    }

    pub fn authorize_cancel(&self, principal: &CanonicalAddress, now: u64) -> RelayerResult<()> {
        self.authorize(principal, EscrowAction::Cancel, now)
    }

    fn authorize(&self, principal: &CanonicalAddress, action: EscrowAction, now: u64) -> RelayerResult<()> {
        if self.can_act(principal, action, now) {
            Ok(())
        } else {
            Err(SwapError::ActionNotPermitted {
                side: self.side,
                action,
                window: self.window(now),
            })
        }
    }
}

/// Stateless form of [`TimelockPolicy::can_act`]
pub fn can_act(
    immutables: &Immutables,
    principal: &CanonicalAddress,
    action: EscrowAction,
    side: Side,
    now: u64,
) -> bool {
    TimelockPolicy::new(side, immutables).can_act(principal, action, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::immutables::TimeLocks;

    const DEPLOYED_AT: u32 = 1_700_000_000;

    fn taker() -> CanonicalAddress {
        CanonicalAddress::from_bytes([0x7a; 20])
    }

    fn stranger() -> CanonicalAddress {
        CanonicalAddress::from_bytes([0x5e; 20])
    }

    fn immutables(secret: &Secret) -> Immutables {
        Immutables {
            order_hash: H256::repeat_byte(0x01),
            hash_lock: secret.hash_lock(),
            maker: CanonicalAddress::from_bytes([0x3a; 20]),
            taker: taker(),
            token: CanonicalAddress::from_bytes([0x70; 20]),
            amount: 1_000_000u64.into(),
            safety_deposit: 1_000u64.into(),
            time_locks: TimeLocks::new(TimelockSchedule::default()).with_deployed_at(DEPLOYED_AT),
        }
    }

    fn at(offset: u32) -> u64 {
        u64::from(DEPLOYED_AT) + u64::from(offset)
    }

    #[test]
    fn test_default_schedule_is_valid() {
        assert!(TimelockSchedule::default().validate().is_ok());
    }

    #[test]
    fn test_non_increasing_schedule_rejected() {
        let mut schedule = TimelockSchedule::default();
        schedule.src_public_withdrawal = schedule.src_withdrawal;
        assert!(matches!(
            schedule.validate(),
            Err(SwapError::InvalidTimelockSchedule(_))
        ));

        let mut schedule = TimelockSchedule::default();
        schedule.dst_cancellation = schedule.dst_public_withdrawal - 1;
        assert!(matches!(
            schedule.validate(),
            Err(SwapError::InvalidTimelockSchedule(_))
        ));
    }

    #[test]
    fn test_src_windows_follow_offsets() {
        let secret = Secret::from_bytes([0x42; 32]);
        let policy = TimelockPolicy::new(Side::Src, &immutables(&secret));
        let schedule = TimelockSchedule::default();

        assert_eq!(policy.window(at(0)), EscrowWindow::Deployed);
        assert_eq!(policy.window(at(schedule.src_withdrawal)), EscrowWindow::PrivateWithdrawal);
        assert_eq!(
            policy.window(at(schedule.src_public_withdrawal)),
            EscrowWindow::PublicWithdrawal
        );
        assert_eq!(
            policy.window(at(schedule.src_cancellation)),
            EscrowWindow::PrivateCancellation
        );
        assert_eq!(
            policy.window(at(schedule.src_public_cancellation) + 1_000),
            EscrowWindow::PublicCancellation
        );
    }

    #[test]
    fn test_withdraw_permissions() {
        let secret = Secret::from_bytes([0x42; 32]);
        let policy = TimelockPolicy::new(Side::Dst, &immutables(&secret));
        let schedule = TimelockSchedule::default();

        assert!(!policy.can_act(&taker(), EscrowAction::Withdraw, at(0)));
        assert!(policy.can_act(&taker(), EscrowAction::Withdraw, at(schedule.dst_withdrawal)));
        assert!(!policy.can_act(&stranger(), EscrowAction::Withdraw, at(schedule.dst_withdrawal)));
        assert!(policy.can_act(
            &stranger(),
            EscrowAction::Withdraw,
            at(schedule.dst_public_withdrawal)
        ));
        assert!(!policy.can_act(&taker(), EscrowAction::Withdraw, at(schedule.dst_cancellation)));
    }

    #[test]
    fn test_src_cancel_opens_at_cancellation_offset() {
        let secret = Secret::from_bytes([0x42; 32]);
        let imm = immutables(&secret);
        let schedule = TimelockSchedule::default();
        let cancellation = at(schedule.src_cancellation);

        assert!(!can_act(&imm, &taker(), EscrowAction::Cancel, Side::Src, cancellation - 1));
        assert!(can_act(&imm, &taker(), EscrowAction::Cancel, Side::Src, cancellation));
        assert!(!can_act(&imm, &stranger(), EscrowAction::Cancel, Side::Src, cancellation));
        assert!(can_act(
            &imm,
            &stranger(),
            EscrowAction::Cancel,
            Side::Src,
            at(schedule.src_public_cancellation)
        ));
    }

    #[test]
    fn test_dst_has_no_public_cancellation() {
        let secret = Secret::from_bytes([0x42; 32]);
        let imm = immutables(&secret);
        let far_future = at(1_000_000);
        assert!(can_act(&imm, &taker(), EscrowAction::Cancel, Side::Dst, far_future));
        assert!(!can_act(&imm, &stranger(), EscrowAction::Cancel, Side::Dst, far_future));
    }

    #[test]
    fn test_wrong_secret_rejected_in_every_window() {
        let secret = Secret::from_bytes([0x42; 32]);
        let wrong = Secret::from_bytes([0x43; 32]);
        let policy = TimelockPolicy::new(Side::Src, &immutables(&secret));

        for offset in [0, 10, 60, 120, 121, 122, 10_000] {
            assert!(matches!(
                policy.authorize_withdraw(&taker(), &wrong, at(offset)),
                Err(SwapError::SecretMismatch)
            ));
        }
        assert!(policy.authorize_withdraw(&taker(), &secret, at(10)).is_ok());
        assert!(matches!(
            policy.authorize_withdraw(&taker(), &secret, at(0)),
            Err(SwapError::ActionNotPermitted { .. })
        ));
    }

    #[test]
    fn test_opens_at() {
        let secret = Secret::from_bytes([0x42; 32]);
        let policy = TimelockPolicy::new(Side::Src, &immutables(&secret));
        let schedule = TimelockSchedule::default();

        assert_eq!(
            policy.opens_at(&taker(), EscrowAction::Withdraw, at(0)),
            Some(at(schedule.src_withdrawal))
        );
        assert_eq!(
            policy.opens_at(&taker(), EscrowAction::Withdraw, at(50)),
            Some(at(50))
        );
        assert_eq!(
            policy.opens_at(&stranger(), EscrowAction::Withdraw, at(0)),
            Some(at(schedule.src_public_withdrawal))
        );
        assert_eq!(
            policy.opens_at(&taker(), EscrowAction::Withdraw, at(schedule.src_cancellation)),
            None
        );
        assert_eq!(
            policy.opens_at(&taker(), EscrowAction::Cancel, at(0)),
            Some(at(schedule.src_cancellation))
        );
    }
}
