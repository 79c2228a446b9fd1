use crate::{
    Error,
    Result,
    numeric::{
        choose,
        divide_big_ints,
        round2,
        serialize_decimal,
    },
};
use num_bigint::BigUint;
use serde::Serialize;

/// Numbers a ticket can pick from.
pub const TOTAL_NUMBERS: u64 = 90;
/// Numbers drawn per round.
pub const DRAWN_NUMBERS: u64 = 6;
pub const MIN_TICKET_NUMBERS: usize = 6;
pub const MAX_TICKET_NUMBERS: usize = 20;
/// Fewest matches that win a prize.
pub const MIN_WINNING_MATCHES: u64 = 2;

/// How many 6-number combinations a ticket with `numbers` picks plays.
pub fn covered_combinations(numbers: usize) -> BigUint {
    choose(numbers as u64, DRAWN_NUMBERS)
}

/// "1 in N" odds of matching exactly `matches` of the drawn numbers with a
/// ticket of `numbers` picks, rounded to two decimals.
///
/// `None` when that outcome is impossible.
pub fn inverse_odds(numbers: usize, matches: u64) -> Option<f64> {
    let numbers = numbers as u64;
    if matches > DRAWN_NUMBERS || matches > numbers {
        return None;
    }
    let favorable = choose(DRAWN_NUMBERS, matches)
        * choose(TOTAL_NUMBERS - DRAWN_NUMBERS, numbers - matches);
    divide_big_ints(&choose(TOTAL_NUMBERS, numbers), &favorable).map(round2)
}

/// "1 in N" odds of winning any prize (two or more matches).
///
/// Probabilities add up, so the combined odds are the reciprocal of the sum
/// of the reciprocals of each tier's odds.
pub fn inverse_odds_of_any_prize(numbers: usize) -> Option<f64> {
    let total_probability: f64 = (MIN_WINNING_MATCHES..=DRAWN_NUMBERS)
        .rev()
        .filter_map(|matches| inverse_odds(numbers, matches))
        .map(|inverse| 1.0 / inverse)
        .sum();
    (total_probability > 0.0).then(|| round2(1.0 / total_probability))
}

pub fn validate_ticket_size(numbers: usize) -> Result<()> {
    if (MIN_TICKET_NUMBERS..=MAX_TICKET_NUMBERS).contains(&numbers) {
        Ok(())
    } else {
        Err(Error::InvalidTicket(format!(
            "a ticket plays between {MIN_TICKET_NUMBERS} and {MAX_TICKET_NUMBERS} numbers, got {numbers}"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OddsRow {
    pub matches: u64,
    pub inverse_odds: f64,
    /// `C(6, matches)`
    #[serde(serialize_with = "serialize_decimal")]
    pub drawn_ways: BigUint,
    /// `C(84, numbers - matches)`
    #[serde(serialize_with = "serialize_decimal")]
    pub other_ways: BigUint,
    /// `C(90, numbers)`
    #[serde(serialize_with = "serialize_decimal")]
    pub total_ways: BigUint,
}

/// Everything the odds calculator shows for one ticket size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OddsTable {
    pub numbers: usize,
    #[serde(serialize_with = "serialize_decimal")]
    pub combinations: BigUint,
    /// Six matches first, two matches last.
    pub rows: Vec<OddsRow>,
    pub any_prize: f64,
}

impl OddsTable {
    pub fn for_ticket(numbers: usize) -> Result<Self> {
        validate_ticket_size(numbers)?;
        let total_ways = choose(TOTAL_NUMBERS, numbers as u64);
        let rows = (MIN_WINNING_MATCHES..=DRAWN_NUMBERS)
            .rev()
            .filter_map(|matches| {
                Some(OddsRow {
                    matches,
                    inverse_odds: inverse_odds(numbers, matches)?,
                    drawn_ways: choose(DRAWN_NUMBERS, matches),
                    other_ways: choose(
                        TOTAL_NUMBERS - DRAWN_NUMBERS,
                        numbers as u64 - matches,
                    ),
                    total_ways: total_ways.clone(),
                })
            })
            .collect();
        let any_prize = inverse_odds_of_any_prize(numbers).ok_or_else(|| {
            Error::InvalidTicket(format!("no winning outcome for {numbers} numbers"))
        })?;
        Ok(Self {
            numbers,
            combinations: covered_combinations(numbers),
            rows,
            any_prize,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn inverse_odds__six_numbers() {
        assert_eq!(inverse_odds(6, 6), Some(622_614_630.0));
        assert_eq!(inverse_odds(6, 5), Some(1_235_346.49));
        assert_eq!(inverse_odds(6, 4), Some(11_906.95));
        assert_eq!(inverse_odds(6, 3), Some(326.72));
        assert_eq!(inverse_odds(6, 2), Some(21.51));
    }

    #[test]
    fn inverse_odds_of_any_prize__combines_reciprocals() {
        assert_eq!(inverse_odds_of_any_prize(6), Some(20.15));
        assert_eq!(inverse_odds_of_any_prize(7), Some(14.85));
        assert_eq!(inverse_odds_of_any_prize(10), Some(7.62));
        assert_eq!(inverse_odds_of_any_prize(20), Some(2.49));
    }

    #[test]
    fn inverse_odds_of_any_prize__is_not_the_average() {
        let tiers: Vec<f64> = (2..=6).filter_map(|i| inverse_odds(6, i)).collect();
        let average = tiers.iter().sum::<f64>() / tiers.len() as f64;
        let combined = inverse_odds_of_any_prize(6).unwrap();
        assert!(combined < tiers.iter().cloned().fold(f64::INFINITY, f64::min));
        assert!(combined < average);
    }

    #[test]
    fn covered_combinations__matches_ticket_sizes() {
        let expected = [
            1u64, 7, 28, 84, 210, 462, 924, 1716, 3003, 5005, 8008, 12376, 18564, 27132,
            38760,
        ];
        for (offset, combinations) in expected.iter().enumerate() {
            assert_eq!(
                covered_combinations(MIN_TICKET_NUMBERS + offset),
                BigUint::from(*combinations)
            );
        }
    }

    #[test]
    fn for_ticket__ten_numbers__builds_all_rows() {
        // when
        let table = OddsTable::for_ticket(10).unwrap();

        // then
        let matches: Vec<u64> = table.rows.iter().map(|row| row.matches).collect();
        assert_eq!(matches, vec![6, 5, 4, 3, 2]);
        assert_eq!(table.rows[4].inverse_odds, 8.75);
        assert_eq!(table.rows[0].drawn_ways, BigUint::from(1u8));
        assert_eq!(table.rows[0].other_ways, choose(84, 4));
        assert_eq!(table.any_prize, 7.62);
        assert_eq!(table.combinations, BigUint::from(210u16));
    }

    #[test]
    fn for_ticket__out_of_range__is_invalid() {
        assert!(matches!(
            OddsTable::for_ticket(5),
            Err(Error::InvalidTicket(_))
        ));
        assert!(matches!(
            OddsTable::for_ticket(21),
            Err(Error::InvalidTicket(_))
        ));
    }
}
