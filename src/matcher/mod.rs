//! Market matcher: pairs a maker-venue market with a hedge-venue market for
//! the same real-world event (§4.4).
//!
//! Three strategies are tried in order, the first hit wins:
//! 1. shared external `condition_id`;
//! 2. a sport-specific slug heuristic (`"nba-<team1>-<team2>-<date>"` against
//!    a "home at away" title, ±1 day for time-zone skew);
//! 3. a generic `<league>-<teamA>-<teamB>-<date>` slug pattern.
//!
//! This module is pure pairing logic: it never calls out to a venue itself.
//! The runtime is responsible for fetching the candidate lists and calling
//! [`match_markets`].

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::MarketPair;

/// A single venue's market listing entry, normalized enough to pair on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueMarketSummary {
    pub market_id: String,
    pub condition_id: Option<String>,
    pub slug: String,
    pub title: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub tick_size: Decimal,
    pub neg_risk: bool,
    pub fee_rate_bps: u32,
    pub event_date: Option<NaiveDate>,
}

/// Generic titles that don't identify the event on their own; when the maker
/// market's title matches one of these, the hedge venue's title is substituted.
const GENERIC_TITLES: &[&str] = &["match winner", "moneyline", "winner"];

fn is_generic_title(title: &str) -> bool {
    let lowered = title.trim().to_ascii_lowercase();
    GENERIC_TITLES.iter().any(|g| lowered == *g)
}

/// `"nba-<team1>-<team2>-<yyyy-mm-dd>"` style slug: league token, two team
/// tokens, a trailing ISO date. Returns `(league, team_a, team_b, date)`.
fn parse_dated_slug(slug: &str) -> Option<(String, String, String, NaiveDate)> {
    let parts: Vec<&str> = slug.split('-').collect();
    if parts.len() < 4 {
        return None;
    }
    // Last three tokens are expected to be a YYYY-MM-DD date.
    let len = parts.len();
    let date_str = format!("{}-{}-{}", parts[len - 3], parts[len - 2], parts[len - 1]);
    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").ok()?;

    let league = parts[0].to_string();
    let rest = &parts[1..len - 3];
    if rest.len() < 2 {
        return None;
    }
    // Team tokens may themselves be hyphenated; split the remainder in half.
    let mid = rest.len() / 2;
    let team_a = rest[..mid.max(1)].join("-");
    let team_b = rest[mid.max(1)..].join("-");
    if team_a.is_empty() || team_b.is_empty() {
        return None;
    }
    Some((league, team_a, team_b, date))
}

fn same_team_set(a1: &str, b1: &str, a2: &str, b2: &str) -> bool {
    let norm = |s: &str| s.to_ascii_lowercase();
    let (a1, b1, a2, b2) = (norm(a1), norm(b1), norm(a2), norm(b2));
    (a1 == a2 && b1 == b2) || (a1 == b2 && b1 == a2)
}

fn dates_within_tolerance(a: NaiveDate, b: NaiveDate, tolerance_days: i64) -> bool {
    (a - b).num_days().abs() <= tolerance_days
}

/// Try to pair by `condition_id`. Cheapest and most reliable; tried first.
fn match_by_condition_id<'a>(
    maker: &'a VenueMarketSummary,
    hedge_candidates: &'a [VenueMarketSummary],
) -> Option<&'a VenueMarketSummary> {
    let cid = maker.condition_id.as_deref()?;
    hedge_candidates
        .iter()
        .find(|h| h.condition_id.as_deref() == Some(cid))
}

/// Sport-specific slug heuristic with ±1 day date tolerance.
fn match_by_sport_slug<'a>(
    maker: &'a VenueMarketSummary,
    hedge_candidates: &'a [VenueMarketSummary],
) -> Option<&'a VenueMarketSummary> {
    let (m_league, m_a, m_b, m_date) = parse_dated_slug(&maker.slug)?;
    hedge_candidates.iter().find(|h| {
        let Some((h_league, h_a, h_b, h_date)) = parse_dated_slug(&h.slug) else {
            return false;
        };
        h_league.eq_ignore_ascii_case(&m_league)
            && same_team_set(&m_a, &m_b, &h_a, &h_b)
            && dates_within_tolerance(m_date, h_date, 1)
    })
}

/// Generic `<league>-<teamA>-<teamB>-<date>` slug pattern, last resort.
/// Structurally identical to the sport heuristic but applied without
/// requiring a recognized league token, and with zero date tolerance.
fn match_by_generic_slug<'a>(
    maker: &'a VenueMarketSummary,
    hedge_candidates: &'a [VenueMarketSummary],
) -> Option<&'a VenueMarketSummary> {
    let (_, m_a, m_b, m_date) = parse_dated_slug(&maker.slug)?;
    hedge_candidates.iter().find(|h| {
        let Some((_, h_a, h_b, h_date)) = parse_dated_slug(&h.slug) else {
            return false;
        };
        same_team_set(&m_a, &m_b, &h_a, &h_b) && m_date == h_date
    })
}

/// Effective title for a matched pair: the hedge venue's question substitutes
/// for a generic maker title (§4.4), otherwise the maker's own title wins.
pub fn effective_title(maker: &VenueMarketSummary, hedge: &VenueMarketSummary) -> String {
    if is_generic_title(&maker.title) {
        hedge.title.clone()
    } else {
        maker.title.clone()
    }
}

/// Pair every maker-venue market against the hedge-venue candidate list.
/// Markets with no match on any of the three strategies are dropped silently
/// — they simply never enter the matched-pair set the scanner iterates.
pub fn match_markets(
    maker_markets: &[VenueMarketSummary],
    hedge_markets: &[VenueMarketSummary],
) -> Vec<MarketPair> {
    maker_markets
        .iter()
        .filter_map(|maker| {
            let hedge = match_by_condition_id(maker, hedge_markets)
                .or_else(|| match_by_sport_slug(maker, hedge_markets))
                .or_else(|| match_by_generic_slug(maker, hedge_markets))?;

            Some(build_pair(maker, hedge))
        })
        .collect()
}

fn build_pair(maker: &VenueMarketSummary, hedge: &VenueMarketSummary) -> MarketPair {
    MarketPair {
        maker_market_id: maker.market_id.clone(),
        hedge_condition_id: hedge
            .condition_id
            .clone()
            .unwrap_or_else(|| hedge.market_id.clone()),
        maker_yes_token_id: maker.yes_token_id.clone(),
        maker_no_token_id: maker.no_token_id.clone(),
        hedge_yes_token_id: hedge.yes_token_id.clone(),
        hedge_no_token_id: hedge.no_token_id.clone(),
        fee_rate_bps: maker.fee_rate_bps,
        tick_size: maker.tick_size,
        // Orientation is decided by the condition_id/slug match itself, not
        // inferred here; an inverted pair is one the caller explicitly flags
        // after reading the venues' own outcome ordering. Default false.
        inverted: false,
        neg_risk: maker.neg_risk,
        settlement_date: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market(id: &str, condition_id: Option<&str>, slug: &str, title: &str) -> VenueMarketSummary {
        VenueMarketSummary {
            market_id: id.to_string(),
            condition_id: condition_id.map(|s| s.to_string()),
            slug: slug.to_string(),
            title: title.to_string(),
            yes_token_id: format!("{id}-yes"),
            no_token_id: format!("{id}-no"),
            tick_size: dec!(0.01),
            neg_risk: false,
            fee_rate_bps: 0,
            event_date: None,
        }
    }

    #[test]
    fn condition_id_match_wins_first() {
        let maker = market("m1", Some("cid-1"), "nba-lakers-celtics-2026-01-01", "Lakers at Celtics");
        let hedge = market("h1", Some("cid-1"), "totally-different-slug", "Lakers vs Celtics");
        let pairs = match_markets(&[maker], &[hedge]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].hedge_condition_id, "cid-1");
    }

    #[test]
    fn sport_slug_matches_within_one_day_tolerance() {
        let maker = market("m1", None, "nba-lakers-celtics-2026-01-02", "Lakers at Celtics");
        let hedge = market("h1", None, "nba-celtics-lakers-2026-01-01", "Celtics vs Lakers");
        let pairs = match_markets(&[maker], &[hedge]);
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn sport_slug_rejects_beyond_tolerance() {
        let maker = market("m1", None, "nba-lakers-celtics-2026-01-05", "Lakers at Celtics");
        let hedge = market("h1", None, "nba-celtics-lakers-2026-01-01", "Celtics vs Lakers");
        let pairs = match_markets(&[maker], &[hedge]);
        assert!(pairs.is_empty());
    }

    #[test]
    fn generic_title_is_substituted_with_hedge_question() {
        let maker = market("m1", Some("cid-1"), "nba-lakers-celtics-2026-01-01", "Match Winner");
        let hedge = market("h1", Some("cid-1"), "slug", "Will the Lakers beat the Celtics?");
        assert_eq!(
            effective_title(&maker, &hedge),
            "Will the Lakers beat the Celtics?"
        );
    }

    #[test]
    fn unmatched_maker_market_is_dropped() {
        let maker = market("m1", None, "no-date-here", "Some Market");
        let pairs = match_markets(&[maker], &[]);
        assert!(pairs.is_empty());
    }
}
