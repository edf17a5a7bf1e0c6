use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Simulation time in months. `Month(0)` is the opening state; the first
/// simulated month is `Month(1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Month(pub u32);

impl Month {
    pub const MONTHS_PER_YEAR: u32 = 12;

    /// Advance by a number of months (deferred joins, term boundaries).
    pub fn offset(self, months: u32) -> Self {
        Month(self.0 + months)
    }

    /// Zero-based simulation year this month falls in (months 1-12 → 0).
    pub fn year_index(self) -> u32 {
        self.0.saturating_sub(1) / Self::MONTHS_PER_YEAR
    }

    /// Calendar month for this simulation month given the calendar month of `Month(1)`.
    pub fn calendar(self, start: CalendarMonth) -> CalendarMonth {
        let zero_based = (start.0 as u32 - 1 + self.0.saturating_sub(1)) % Self::MONTHS_PER_YEAR;
        CalendarMonth(zero_based as u8 + 1)
    }
}

/// Calendar month, 1 = January … 12 = December.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CalendarMonth(pub u8);

impl CalendarMonth {
    pub const JANUARY: CalendarMonth = CalendarMonth(1);

    /// Zero-based index into 12-entry lookup tables.
    pub fn index(self) -> usize {
        (self.0 as usize).clamp(1, 12) - 1
    }
}

/// Behavioural member segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    Hobbyist,
    CommittedArtist,
    ProductionPotter,
    SeasonalUser,
}

impl Archetype {
    pub const ALL: [Archetype; 4] = [
        Archetype::Hobbyist,
        Archetype::CommittedArtist,
        Archetype::ProductionPotter,
        Archetype::SeasonalUser,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Shared studio equipment whose hours bound membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Station {
    Wheels,
    Handbuilding,
    Glaze,
}

impl Station {
    pub const ALL: [Station; 3] = [Station::Wheels, Station::Handbuilding, Station::Glaze];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Finite external prospect population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    /// People with no current pottery access; highest intent.
    NoAccess,
    /// People with a home setup.
    Home,
    /// Community-centre potters; only the unlocked share may join.
    Community,
}

impl Pool {
    /// Join-draw order within a month.
    pub const ALL: [Pool; 3] = [Pool::NoAccess, Pool::Home, Pool::Community];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Legal form of the business; selects the tax cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Sole proprietorship / single-member LLC: income tax plus self-employment tax.
    PassThrough,
    /// S-corp style: fixed owner salary through payroll, remainder passes through.
    SalarySplit,
    /// C-corp style: statutory corporate tax only.
    TaxableCorporation,
}

/// Class cohort cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassCalendar {
    /// A new cohort set starts every month.
    Monthly,
    /// A new cohort set starts at the beginning of every term.
    Semester,
}

/// Where a deferred convert came from; selects its early-tenure churn multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertSource {
    Workshop,
    Class,
}

/// Member counts bucketed by archetype.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchetypeCounts(pub [u32; 4]);

impl ArchetypeCounts {
    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Archetype, u32)> + '_ {
        Archetype::ALL.iter().map(|&a| (a, self.0[a.index()]))
    }

    pub fn add(&mut self, other: &ArchetypeCounts) {
        for (slot, n) in self.0.iter_mut().zip(other.0) {
            *slot += n;
        }
    }
}

impl Index<Archetype> for ArchetypeCounts {
    type Output = u32;

    fn index(&self, a: Archetype) -> &u32 {
        &self.0[a.index()]
    }
}

impl IndexMut<Archetype> for ArchetypeCounts {
    fn index_mut(&mut self, a: Archetype) -> &mut u32 {
        &mut self.0[a.index()]
    }
}
