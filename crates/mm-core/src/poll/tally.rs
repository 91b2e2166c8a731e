//! Vote counting. Pure functions over a [`PollSnapshot`].

use crate::poll::{model::Choice, state::PollSnapshot};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TallyRow {
    pub choice: Choice,
    pub count: u64,
    /// `floor(100 * count / total)`, 0 when nobody voted.
    pub percent: u64,
}

impl TallyRow {
    /// Bar cells drawn for this row, one per full ten percent.
    pub fn weight(&self) -> usize {
        (self.percent / 10) as usize
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tally {
    /// Sum of all counts. A voter holding two choices counts twice.
    pub total: u64,
    /// In choice position order.
    pub rows: Vec<TallyRow>,
}

pub fn percent(count: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    count.saturating_mul(100) / total
}

pub fn tally(snapshot: &PollSnapshot) -> Tally {
    let total: u64 = snapshot.counts.iter().sum();
    let mut rows: Vec<TallyRow> = snapshot
        .poll
        .choices
        .iter()
        .zip(snapshot.counts.iter().copied())
        .map(|(choice, count)| TallyRow {
            choice: choice.clone(),
            count,
            percent: percent(count, total),
        })
        .collect();
    rows.sort_by_key(|r| r.choice.position);
    Tally { total, rows }
}
