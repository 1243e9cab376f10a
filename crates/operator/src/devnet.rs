//! In-memory source ledger running the currency contract.
//!
//! Submitted transactions are executed immediately and queued; `seal_block`
//! packs the queue into the next block. Block 0 is an empty genesis block and
//! block 1 holds the initial player set, so a fresh devnet has height 2.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use primitives::ledger::source;
use primitives::{ops, ChainInfo, LedgerError, LedgerGateway, Player, StructuredBlock, TxRecord};
use tracing::*;

/// USD to in-game exchange rate, three implied decimals.
const EXCHANGE_RATE: u64 = 1_000;

#[derive(Debug, Default)]
struct Chain {
    players: BTreeMap<u64, Player>,
    blocks: Vec<StructuredBlock>,
    queued: Vec<TxRecord>,
    tx_counter: u64,
}

#[derive(Debug)]
pub struct DevnetLedger {
    channel: String,
    chain: Mutex<Chain>,
}

impl DevnetLedger {
    /// Genesis plus a block creating players `1..=initial_players`.
    pub fn new(channel: impl Into<String>, initial_players: u64) -> Self {
        let mut chain = Chain::default();
        chain.seal();
        for id in 1..=initial_players {
            if let Err(e) = chain.execute(ops::CREATE_PLAYER, &[id.to_string()]) {
                trace!(%id, %e, "initial player refused");
            }
        }
        chain.seal();
        Self { channel: channel.into(), chain: Mutex::new(chain) }
    }

    pub fn channel(&self) -> &str { &self.channel }

    /// Seal queued transactions into a block, returning its number.
    pub fn seal_block(&self) -> Result<u64, LedgerError> { Ok(self.lock()?.seal()) }

    pub fn height(&self) -> Result<u64, LedgerError> { Ok(self.lock()?.blocks.len() as u64) }

    pub fn player(&self, id: u64) -> Result<Option<Player>, LedgerError> {
        Ok(self.lock()?.players.get(&id).copied())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Chain>, LedgerError> {
        self.chain.lock().map_err(|_| LedgerError::Transport("devnet lock poisoned".into()))
    }

    fn check_channel(&self, op: &str, args: &[String]) -> Result<(), LedgerError> {
        match args.first() {
            Some(channel) if *channel == self.channel => Ok(()),
            Some(other) => Err(LedgerError::rejected(op, format!("unknown channel {other}"))),
            None => Err(LedgerError::rejected(op, "missing channel")),
        }
    }
}

impl Chain {
    fn seal(&mut self) -> u64 {
        let number = self.blocks.len() as u64;
        let transactions = std::mem::take(&mut self.queued);
        self.blocks.push(StructuredBlock { number, transactions });
        number
    }

    fn execute(&mut self, method: &str, args: &[String]) -> Result<(), LedgerError> {
        let num = |i: usize| -> Result<i64, LedgerError> {
            let raw = args.get(i).ok_or_else(|| LedgerError::rejected(method, format!("missing argument {i}")))?;
            raw.trim().parse().map_err(|_| LedgerError::rejected(method, format!("bad number {raw:?}")))
        };
        match method {
            ops::CREATE_PLAYER => {
                let id = to_id(method, num(0)?)?;
                if self.players.contains_key(&id) {
                    return Err(LedgerError::rejected(method, format!("the player {id} already exists")));
                }
                self.players.insert(id, Player { id, balance: 0, usd_balance: 0 });
            }
            ops::RECORD_BANK_TX => {
                let (id, amount) = (to_id(method, num(0)?)?, num(1)?);
                let _bank_ref = num(2)?;
                let amount = u64::try_from(amount).map_err(|_| LedgerError::rejected(method, "negative amount"))?;
                let player = self.player_mut(method, id)?;
                player.usd_balance = player
                    .usd_balance
                    .checked_add(amount)
                    .ok_or_else(|| LedgerError::rejected(method, "usd balance overflow"))?;
            }
            ops::EXCHANGE => {
                let (id, change) = (to_id(method, num(0)?)?, num(1)?);
                let player = self.player_mut(method, id)?;
                let magnitude = change.unsigned_abs();
                if change > 0 {
                    let usd_required = magnitude.saturating_mul(1_000) / EXCHANGE_RATE;
                    if player.usd_balance < usd_required {
                        return Err(LedgerError::rejected(
                            method,
                            format!("insufficient USD balance: have {}, need {usd_required}", player.usd_balance),
                        ));
                    }
                    player.usd_balance -= usd_required;
                    player.balance = player.balance.saturating_add(magnitude);
                } else {
                    if player.balance < magnitude {
                        return Err(LedgerError::rejected(
                            method,
                            format!("insufficient balance: have {}, need {magnitude}", player.balance),
                        ));
                    }
                    player.balance -= magnitude;
                    player.usd_balance = player.usd_balance.saturating_add(magnitude.saturating_mul(EXCHANGE_RATE) / 1_000);
                }
            }
            other => return Err(LedgerError::UnknownOperation(other.to_string())),
        }

        self.tx_counter += 1;
        let mut record_args = vec![method.to_string()];
        record_args.extend(args.iter().cloned());
        self.queued.push(TxRecord { tx_id: format!("devnet-{:08x}", self.tx_counter), args: record_args });
        Ok(())
    }

    fn player_mut(&mut self, method: &str, id: u64) -> Result<&mut Player, LedgerError> {
        self.players.get_mut(&id).ok_or_else(|| LedgerError::rejected(method, format!("player {id} does not exist")))
    }
}

/// Deterministic demo traffic: each player in turn is created, funded in
/// USD, buys in-game currency and sells part of it back.
#[derive(Clone, Debug)]
pub struct Workload {
    step: u64,
    next_id: u64,
}

impl Workload {
    /// Continue after players `1..=existing`.
    pub fn new(existing: u64) -> Self { Self { step: 0, next_id: existing + 1 } }

    pub fn next_tx(&mut self) -> (&'static str, Vec<String>) {
        let step = self.step;
        self.step += 1;
        if step % 4 == 0 {
            let id = self.next_id;
            self.next_id += 1;
            return (ops::CREATE_PLAYER, vec![id.to_string()]);
        }
        let player = (step / 4) % (self.next_id - 1) + 1;
        match step % 4 {
            1 => (ops::RECORD_BANK_TX, vec![player.to_string(), "5000".into(), step.to_string()]),
            2 => (ops::EXCHANGE, vec![player.to_string(), "2000".into()]),
            _ => (ops::EXCHANGE, vec![player.to_string(), "-500".into()]),
        }
    }
}

fn to_id(method: &str, raw: i64) -> Result<u64, LedgerError> {
    u64::try_from(raw).map_err(|_| LedgerError::rejected(method, format!("bad player id {raw}")))
}

fn to_json<T: serde::Serialize>(op: &str, value: &T) -> Result<Vec<u8>, LedgerError> {
    serde_json::to_vec(value).map_err(|e| LedgerError::rejected(op, e))
}

#[async_trait]
impl LedgerGateway for DevnetLedger {
    async fn evaluate(&self, op: &str, args: &[String]) -> Result<Vec<u8>, LedgerError> {
        match op {
            source::GET_ALL_PLAYERS => {
                let chain = self.lock()?;
                to_json(op, &chain.players.values().collect::<Vec<_>>())
            }
            source::GET_CHAIN_INFO => {
                self.check_channel(op, args)?;
                to_json(op, &ChainInfo { height: self.height()? })
            }
            source::GET_BLOCK_BY_NUMBER => {
                self.check_channel(op, args)?;
                let raw = args.get(1).ok_or_else(|| LedgerError::rejected(op, "missing block number"))?;
                let number: usize =
                    raw.parse().map_err(|_| LedgerError::rejected(op, format!("bad block number {raw:?}")))?;
                let chain = self.lock()?;
                let block = chain.blocks.get(number).ok_or_else(|| LedgerError::rejected(op, "no such block"))?;
                to_json(op, block)
            }
            other => Err(LedgerError::UnknownOperation(other.to_string())),
        }
    }

    async fn submit(&self, op: &str, args: &[String]) -> Result<Vec<u8>, LedgerError> {
        self.lock()?.execute(op, args)?;
        Ok(Vec::new())
    }
}
