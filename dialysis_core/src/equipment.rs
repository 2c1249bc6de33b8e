//! Equipment reuse threshold policy.
//!
//! Evaluated alongside session creation. Alerts are advisory: they are
//! logged and recorded in the activity log but never block a booking.

use crate::Prescription;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Equipment {
    Dialyser,
    BloodTubing,
}

impl fmt::Display for Equipment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Equipment::Dialyser => write!(f, "dialyser"),
            Equipment::BloodTubing => write!(f, "blood tubing"),
        }
    }
}

/// A reuse count at or past its limit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EquipmentAlert {
    pub equipment: Equipment,
    pub reuse_count: u32,
    pub max_reuse: u32,
}

impl fmt::Display for EquipmentAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} reused {} times (limit {}); replace before next session",
            self.equipment, self.reuse_count, self.max_reuse
        )
    }
}

pub trait EquipmentMonitor: Send + Sync {
    fn check(&self, prescription: &Prescription) -> Vec<EquipmentAlert>;
}

/// Fixed maxima for each reusable item
#[derive(Clone, Copy, Debug)]
pub struct ReuseThresholds {
    pub dialyser_max_reuse: u32,
    pub blood_tubing_max_reuse: u32,
}

impl EquipmentMonitor for ReuseThresholds {
    fn check(&self, prescription: &Prescription) -> Vec<EquipmentAlert> {
        let counters = &prescription.equipment;
        let mut alerts = Vec::new();
        if counters.dialyser_reuse_count >= self.dialyser_max_reuse {
            alerts.push(EquipmentAlert {
                equipment: Equipment::Dialyser,
                reuse_count: counters.dialyser_reuse_count,
                max_reuse: self.dialyser_max_reuse,
            });
        }
        if counters.blood_tubing_reuse_count >= self.blood_tubing_max_reuse {
            alerts.push(EquipmentAlert {
                equipment: Equipment::BloodTubing,
                reuse_count: counters.blood_tubing_reuse_count,
                max_reuse: self.blood_tubing_max_reuse,
            });
        }
        alerts
    }
}
