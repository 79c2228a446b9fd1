use crate::{
    Error,
    Result,
    chain::{
        RoundData,
        TicketPrize,
        TicketRecord,
    },
    numeric::{
        serialize_decimal,
        serialize_decimal_tiers,
    },
    odds::{
        MAX_TICKET_NUMBERS,
        MIN_TICKET_NUMBERS,
        MIN_WINNING_MATCHES,
        TOTAL_NUMBERS,
    },
};
use alloy::primitives::{
    Address,
    TxHash,
};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::Serialize;
use std::collections::BTreeSet;

/// Checks a ticket's picks and returns them sorted ascending.
pub fn validate_numbers(numbers: &[u8]) -> Result<Vec<u8>> {
    if !(MIN_TICKET_NUMBERS..=MAX_TICKET_NUMBERS).contains(&numbers.len()) {
        return Err(Error::InvalidTicket(format!(
            "pick between {MIN_TICKET_NUMBERS} and {MAX_TICKET_NUMBERS} numbers, got {}",
            numbers.len()
        )));
    }
    if let Some(out_of_range) = numbers
        .iter()
        .find(|n| **n == 0 || u64::from(**n) > TOTAL_NUMBERS)
    {
        return Err(Error::InvalidTicket(format!(
            "{out_of_range} is not between 1 and {TOTAL_NUMBERS}"
        )));
    }
    let unique: BTreeSet<u8> = numbers.iter().copied().collect();
    if unique.len() != numbers.len() {
        return Err(Error::InvalidTicket("numbers must be distinct".to_string()));
    }
    Ok(unique.into_iter().collect())
}

/// How many of `picked` appear in `drawn`.
pub fn count_matches(picked: &[u8], drawn: &[u8]) -> usize {
    let drawn: BTreeSet<u8> = drawn.iter().copied().collect();
    picked.iter().filter(|n| drawn.contains(n)).count()
}

/// Outcome of one round as recorded by the lottery contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Draw {
    pub round: u64,
    /// Block of the randomness request, zero if not requested yet.
    pub draw_block: u64,
    /// Block in which the round was closed, zero while still open.
    pub closure_block: u64,
    /// Prize per winning ticket for 2, 3, 4, 5 and 6 matches.
    #[serde(serialize_with = "serialize_decimal_tiers")]
    pub prizes: [BigUint; 5],
    #[serde(serialize_with = "serialize_decimal")]
    pub stash: BigUint,
    #[serde(serialize_with = "serialize_decimal")]
    pub total_combinations: BigUint,
    pub numbers: Vec<u8>,
    /// Winning tickets for 2, 3, 4, 5 and 6 matches.
    pub winners: [u64; 5],
}

impl Draw {
    pub fn from_round_data(round: u64, data: RoundData) -> Self {
        Self {
            round,
            draw_block: data.draw_block_number,
            closure_block: data.closure_block_number,
            prizes: data.prizes,
            stash: data.stash,
            total_combinations: data.total_combinations,
            numbers: data.numbers,
            winners: data.winners,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closure_block != 0
    }

    fn tier(matches: usize) -> Option<usize> {
        let lowest = MIN_WINNING_MATCHES as usize;
        (lowest..lowest + 5)
            .contains(&matches)
            .then(|| matches - lowest)
    }

    pub fn prize_for(&self, matches: usize) -> Option<&BigUint> {
        Self::tier(matches).map(|tier| &self.prizes[tier])
    }

    pub fn winners_for(&self, matches: usize) -> Option<u64> {
        Self::tier(matches).map(|tier| self.winners[tier])
    }
}

/// Draw together with the transactions that requested and closed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrawExtended {
    #[serde(flatten)]
    pub draw: Draw,
    /// Randomness request, found through its `VRFRequest` log.
    pub draw_transaction: Option<TxHash>,
    /// Round closure, found through its `Draw` log.
    pub closure_transaction: Option<TxHash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ticket {
    pub id: u64,
    pub player: Address,
    pub round: u64,
    pub block_number: u64,
    pub numbers: Vec<u8>,
    /// Present once the ticket's round has been closed.
    pub draw: Option<Draw>,
}

impl Ticket {
    pub fn new(record: TicketRecord, draw: Option<Draw>) -> Self {
        Self {
            id: record.id,
            player: record.player,
            round: record.round,
            block_number: record.block_number,
            numbers: record.numbers,
            draw: draw.filter(Draw::is_closed),
        }
    }

    pub fn matches(&self) -> Option<usize> {
        self.draw
            .as_ref()
            .map(|draw| count_matches(&self.numbers, &draw.numbers))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketExtended {
    #[serde(flatten)]
    pub ticket: Ticket,
    #[serde(serialize_with = "serialize_decimal")]
    pub prize: BigUint,
    /// Block of the prize withdrawal, zero if not withdrawn.
    pub withdraw_block: u64,
}

impl TicketExtended {
    pub fn new(ticket: Ticket, prize: TicketPrize) -> Self {
        Self {
            ticket,
            prize: prize.prize,
            withdraw_block: prize.withdraw_block_number,
        }
    }

    pub fn is_withdrawn(&self) -> bool {
        self.withdraw_block != 0
    }

    pub fn can_withdraw(&self) -> bool {
        !self.prize.is_zero() && !self.is_withdrawn()
    }
}

/// Revenue share of a governance-token holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartnerStatus {
    pub account: Address,
    #[serde(serialize_with = "serialize_decimal")]
    pub balance: BigUint,
    #[serde(serialize_with = "serialize_decimal")]
    pub unclaimed_revenue: BigUint,
}

impl PartnerStatus {
    pub fn is_partner(&self) -> bool {
        !self.balance.is_zero()
    }

    pub fn can_withdraw(&self) -> bool {
        !self.unclaimed_revenue.is_zero()
    }
}
