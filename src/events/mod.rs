//! Escrow factory event types and parsing
//!
//! Event ABIs are declared once below; logs are matched by topic0 and
//! decoded from their ABI schema.

use crate::address::CanonicalAddress;
use crate::chain::LogRecord;
use crate::error::{RelayerResult, SwapError};
use crate::immutables::{DstImmutablesComplement, Immutables};

use ethers::abi::{Event, EventParam, ParamType, RawLog, Token};
use ethers::types::{H256, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Source escrow created during an order fill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrcEscrowCreated {
    pub immutables: Immutables,
    pub complement: DstImmutablesComplement,
}

/// Destination escrow created by the resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DstEscrowCreated {
    pub escrow: CanonicalAddress,
    pub hash_lock: H256,
    pub taker: CanonicalAddress,
}

/// Events emitted by the escrow factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowEvent {
    SrcEscrowCreated(SrcEscrowCreated),
    DstEscrowCreated(DstEscrowCreated),
}


fn immutables_type() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::FixedBytes(32),
        ParamType::FixedBytes(32),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
    ])
}

fn complement_type() -> ParamType {
    ParamType::Tuple(vec![ParamType::Uint(256); 5])
}

fn param(name: &str, kind: ParamType) -> EventParam {
    EventParam {
        name: name.to_string(),
        kind,
        indexed: false,
    }
}

/// `SrcEscrowCreated(Immutables srcImmutables, DstImmutablesComplement dstImmutablesComplement)`
pub fn src_escrow_created_event() -> Event {
    Event {
        name: "SrcEscrowCreated".to_string(),
        inputs: vec![
            param("srcImmutables", immutables_type()),
            param("dstImmutablesComplement", complement_type()),
        ],
        anonymous: false,
    }
}

/// `DstEscrowCreated(address escrow, bytes32 hashlock, Address taker)`
pub fn dst_escrow_created_event() -> Event {
    Event {
        name: "DstEscrowCreated".to_string(),
        inputs: vec![
            param("escrow", ParamType::Address),
            param("hashlock", ParamType::FixedBytes(32)),
            param("taker", ParamType::Uint(256)),
        ],
        anonymous: false,
    }
}

/// Event topic signatures (keccak256 of event signature)
pub mod topics {
    use ethers::types::H256;
    use lazy_static::lazy_static;

    lazy_static! {
        pub static ref SRC_ESCROW_CREATED: H256 = super::src_escrow_created_event().signature();
        pub static ref DST_ESCROW_CREATED: H256 = super::dst_escrow_created_event().signature();
    }
}

/// Decoder for escrow factory logs
#[derive(Debug, Clone)]
pub struct EscrowEventDecoder {
    src_created: Event,
    dst_created: Event,
}

impl Default for EscrowEventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EscrowEventDecoder {
    pub fn new() -> Self {
        Self {
            src_created: src_escrow_created_event(),
            dst_created: dst_escrow_created_event(),
        }
    }

    /// Decode one log. `Ok(None)` when topic0 belongs to some other event.
    pub fn decode(&self, log: &LogRecord) -> RelayerResult<Option<EscrowEvent>> {
        let topic = match log.topics.first() {
            Some(topic) => *topic,
            None => return Ok(None),
        };

        if topic == *topics::SRC_ESCROW_CREATED {
            let tokens = self.parse(&self.src_created, log)?;
            return decode_src_created(tokens).map(|e| Some(EscrowEvent::SrcEscrowCreated(e)));
        }
        if topic == *topics::DST_ESCROW_CREATED {
            let tokens = self.parse(&self.dst_created, log)?;
            return decode_dst_created(tokens).map(|e| Some(EscrowEvent::DstEscrowCreated(e)));
        }

        Ok(None)
    }

    fn parse(&self, event: &Event, log: &LogRecord) -> RelayerResult<Vec<Token>> {
        let parsed = event
            .parse_log(RawLog {
                topics: log.topics.clone(),
                data: log.data.to_vec(),
            })
            .map_err(|e| SwapError::EventDecoding(format!("{}: {}", event.name, e)))?;
        Ok(parsed.params.into_iter().map(|p| p.value).collect())
    }

    /// First `SrcEscrowCreated` among `logs`; others and undecodable ones are skipped
    pub fn find_src_escrow_created(&self, logs: &[LogRecord]) -> Option<SrcEscrowCreated> {
        self.find(logs, |event| match event {
            EscrowEvent::SrcEscrowCreated(created) => Some(created),
            _ => None,
        })
    }

    pub fn find_dst_escrow_created(&self, logs: &[LogRecord]) -> Option<DstEscrowCreated> {
        self.find(logs, |event| match event {
            EscrowEvent::DstEscrowCreated(created) => Some(created),
            _ => None,
        })
    }

    fn find<T>(&self, logs: &[LogRecord], select: impl Fn(EscrowEvent) -> Option<T>) -> Option<T> {
        logs.iter().find_map(|log| match self.decode(log) {
            Ok(Some(event)) => select(event),
            Ok(None) => None,
            Err(e) => {
                debug!("Skipping undecodable log from {}: {}", log.address, e);
                None
            }
        })
    }
}

fn malformed(event: &str) -> SwapError {
    SwapError::EventDecoding(format!("{} has unexpected field layout", event))
}

fn decode_src_created(tokens: Vec<Token>) -> RelayerResult<SrcEscrowCreated> {
    let mut iter = tokens.into_iter();
    let immutables = iter
        .next()
        .and_then(Token::into_tuple)
        .and_then(Immutables::from_tokens)
        .ok_or_else(|| malformed("SrcEscrowCreated"))?;

    let words: Vec<U256> = iter
        .next()
        .and_then(Token::into_tuple)
        .and_then(|fields| fields.into_iter().map(Token::into_uint).collect())
        .ok_or_else(|| malformed("SrcEscrowCreated"))?;
    if words.len() != 5 {
        return Err(malformed("SrcEscrowCreated"));
    }

    let complement = DstImmutablesComplement::from_event(
        CanonicalAddress::from_word(words[0]),
        words[1],
        CanonicalAddress::from_word(words[2]),
        words[3],
        words[4],
    );

    Ok(SrcEscrowCreated {
        immutables,
        complement,
    })
}

fn decode_dst_created(tokens: Vec<Token>) -> RelayerResult<DstEscrowCreated> {
    match <[Token; 3]>::try_from(tokens) {
        Ok([Token::Address(escrow), Token::FixedBytes(hash_lock), Token::Uint(taker)])
            if hash_lock.len() == 32 =>
        {
            Ok(DstEscrowCreated {
                escrow: escrow.into(),
                hash_lock: H256::from_slice(&hash_lock),
                taker: CanonicalAddress::from_word(taker),
            })
        }
        _ => Err(malformed("DstEscrowCreated")),
    }
}
