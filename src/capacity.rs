use serde::{Deserialize, Serialize};

use crate::config::Assumptions;
use crate::types::{ArchetypeCounts, Station};

/// Average weeks per month, used to turn weekly hours into monthly hours.
pub const WEEKS_PER_MONTH: f64 = 4.33;

/// Station utilization for one month, demand hours over usable hours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    /// Indexed by [`Station::index`].
    pub by_station: [f64; 3],
}

impl Utilization {
    pub fn measure(a: &Assumptions, members: &ArchetypeCounts) -> Self {
        let mut by_station = [0.0; 3];
        for station in Station::ALL {
            by_station[station.index()] = station_utilization(a, station, members);
        }
        Utilization { by_station }
    }

    /// The binding constraint: the busiest station.
    pub fn binding(&self) -> f64 {
        self.by_station.iter().copied().fold(0.0, f64::max)
    }
}

/// Utilization of one station. A station the studio does not have (count 0)
/// reports 0 and never binds.
pub fn station_utilization(a: &Assumptions, station: Station, members: &ArchetypeCounts) -> f64 {
    let demand_hours: f64 = members
        .iter()
        .map(|(archetype, count)| {
            count as f64 * a.archetype(archetype).usage[station.index()].weekly_hours()
        })
        .sum::<f64>()
        * WEEKS_PER_MONTH;
    let usable_hours = a.station_count(station) as f64
        * a.capacity.efficiency_alpha
        * a.capacity.open_hours_per_week
        * WEEKS_PER_MONTH;
    if usable_hours <= 0.0 { 0.0 } else { demand_hours / usable_hours }
}

/// `(1 - u)^beta`, with `1 - u` floored at 0 so a saturated studio gets no joins.
pub fn capacity_damping(utilization: f64, beta: f64) -> f64 {
    (1.0 - utilization).max(0.0).powf(beta)
}

/// `1 + uplift * max(0, u - 1)`: churn pressure from overcrowding.
pub fn crowding_churn_factor(utilization: f64, uplift: f64) -> f64 {
    1.0 + uplift * (utilization - 1.0).max(0.0)
}
