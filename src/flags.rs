//! Anomaly flag rules
//!
//! Each flag compares one metric either against its rolling baseline or against
//! a fixed threshold. Thresholds are documented constants, not runtime tunables.
//! A null value or a null baseline never triggers a flag.

use crate::types::Column;
use serde::{Deserialize, Serialize};

/// HRV below 70% of baseline
pub const LOW_HRV_RATIO: f64 = 0.70;
/// Resting HR above 115% of baseline
pub const HIGH_RHR_RATIO: f64 = 1.15;
/// Absolute sleep score floor
pub const LOW_SLEEP_SCORE: f64 = 60.0;
/// Absolute recovery index floor
pub const LOW_RECOVERY_INDEX: f64 = 50.0;
/// Absolute movement index floor
pub const LOW_MOVEMENT_INDEX: f64 = 40.0;
/// Steps below 60% of baseline
pub const LOW_STEPS_RATIO: f64 = 0.60;
/// Active minutes below 60% of baseline
pub const LOW_ACTIVE_RATIO: f64 = 0.60;
/// VO2 max below 90% of baseline
pub const LOW_VO2_RATIO: f64 = 0.90;

/// How a flag decides whether a value is anomalous
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    /// value < baseline * ratio
    BelowBaseline(f64),
    /// value > baseline * ratio
    AboveBaseline(f64),
    /// value < threshold
    BelowAbsolute(f64),
}

impl Rule {
    pub fn evaluate(&self, value: Option<f64>, baseline: Option<f64>) -> bool {
        match (*self, value, baseline) {
            (Rule::BelowBaseline(ratio), Some(v), Some(b)) => v < b * ratio,
            (Rule::AboveBaseline(ratio), Some(v), Some(b)) => v > b * ratio,
            (Rule::BelowAbsolute(threshold), Some(v), _) => v < threshold,
            _ => false,
        }
    }
}

/// Per-metric anomaly flag, in canonical evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyFlag {
    LowHrv,
    HighRhr,
    LowSleep,
    LowRecovery,
    LowMovement,
    LowSteps,
    LowActive,
    LowVo2,
}

impl AnomalyFlag {
    pub const ALL: [AnomalyFlag; 8] = [
        AnomalyFlag::LowHrv,
        AnomalyFlag::HighRhr,
        AnomalyFlag::LowSleep,
        AnomalyFlag::LowRecovery,
        AnomalyFlag::LowMovement,
        AnomalyFlag::LowSteps,
        AnomalyFlag::LowActive,
        AnomalyFlag::LowVo2,
    ];

    /// Metric column the flag inspects
    pub fn column(&self) -> Column {
        match self {
            AnomalyFlag::LowHrv => Column::Hrv,
            AnomalyFlag::HighRhr => Column::RestingHr,
            AnomalyFlag::LowSleep => Column::SleepScore,
            AnomalyFlag::LowRecovery => Column::RecoveryIndex,
            AnomalyFlag::LowMovement => Column::MovementIndex,
            AnomalyFlag::LowSteps => Column::Steps,
            AnomalyFlag::LowActive => Column::ActiveMinutes,
            AnomalyFlag::LowVo2 => Column::Vo2Max,
        }
    }

    pub fn rule(&self) -> Rule {
        match self {
            AnomalyFlag::LowHrv => Rule::BelowBaseline(LOW_HRV_RATIO),
            AnomalyFlag::HighRhr => Rule::AboveBaseline(HIGH_RHR_RATIO),
            AnomalyFlag::LowSleep => Rule::BelowAbsolute(LOW_SLEEP_SCORE),
            AnomalyFlag::LowRecovery => Rule::BelowAbsolute(LOW_RECOVERY_INDEX),
            AnomalyFlag::LowMovement => Rule::BelowAbsolute(LOW_MOVEMENT_INDEX),
            AnomalyFlag::LowSteps => Rule::BelowBaseline(LOW_STEPS_RATIO),
            AnomalyFlag::LowActive => Rule::BelowBaseline(LOW_ACTIVE_RATIO),
            AnomalyFlag::LowVo2 => Rule::BelowBaseline(LOW_VO2_RATIO),
        }
    }

    /// Serialized column name of the flag
    pub fn column_name(&self) -> &'static str {
        match self {
            AnomalyFlag::LowHrv => "low_hrv_flag",
            AnomalyFlag::HighRhr => "high_rhr_flag",
            AnomalyFlag::LowSleep => "low_sleep_flag",
            AnomalyFlag::LowRecovery => "low_recovery_flag",
            AnomalyFlag::LowMovement => "low_movement_flag",
            AnomalyFlag::LowSteps => "low_steps_flag",
            AnomalyFlag::LowActive => "low_active_flag",
            AnomalyFlag::LowVo2 => "low_vo2_flag",
        }
    }

    /// Human-readable name used in summaries
    pub fn display_name(&self) -> &'static str {
        match self {
            AnomalyFlag::LowHrv => "Low HRV",
            AnomalyFlag::HighRhr => "High Resting HR",
            AnomalyFlag::LowSleep => "Low Sleep Score",
            AnomalyFlag::LowRecovery => "Low Recovery Index",
            AnomalyFlag::LowMovement => "Low Movement Index",
            AnomalyFlag::LowSteps => "Low Steps",
            AnomalyFlag::LowActive => "Low Active Minutes",
            AnomalyFlag::LowVo2 => "Low VO2 Max",
        }
    }

    pub fn evaluate(&self, value: Option<f64>, baseline: Option<f64>) -> bool {
        self.rule().evaluate(value, baseline)
    }
}

impl std::fmt::Display for AnomalyFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Flag values for one row. `None` means the flag was not computed because
/// the table lacks its column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_hrv_flag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_rhr_flag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_sleep_flag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_recovery_flag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_movement_flag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_steps_flag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_active_flag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_vo2_flag: Option<bool>,
}

impl Flags {
    pub fn get(&self, flag: AnomalyFlag) -> Option<bool> {
        *self.slot(flag)
    }

    pub fn set(&mut self, flag: AnomalyFlag, value: bool) {
        *self.slot_mut(flag) = Some(value);
    }

    /// Flags that are computed and true, in canonical order
    pub fn triggered(&self) -> impl Iterator<Item = AnomalyFlag> + '_ {
        AnomalyFlag::ALL
            .into_iter()
            .filter(move |flag| self.get(*flag) == Some(true))
    }

    /// Flags that were computed for this row
    pub fn computed(&self) -> impl Iterator<Item = AnomalyFlag> + '_ {
        AnomalyFlag::ALL
            .into_iter()
            .filter(move |flag| self.get(*flag).is_some())
    }

    fn slot(&self, flag: AnomalyFlag) -> &Option<bool> {
        match flag {
            AnomalyFlag::LowHrv => &self.low_hrv_flag,
            AnomalyFlag::HighRhr => &self.high_rhr_flag,
            AnomalyFlag::LowSleep => &self.low_sleep_flag,
            AnomalyFlag::LowRecovery => &self.low_recovery_flag,
            AnomalyFlag::LowMovement => &self.low_movement_flag,
            AnomalyFlag::LowSteps => &self.low_steps_flag,
            AnomalyFlag::LowActive => &self.low_active_flag,
            AnomalyFlag::LowVo2 => &self.low_vo2_flag,
        }
    }

    fn slot_mut(&mut self, flag: AnomalyFlag) -> &mut Option<bool> {
        match flag {
            AnomalyFlag::LowHrv => &mut self.low_hrv_flag,
            AnomalyFlag::HighRhr => &mut self.high_rhr_flag,
            AnomalyFlag::LowSleep => &mut self.low_sleep_flag,
            AnomalyFlag::LowRecovery => &mut self.low_recovery_flag,
            AnomalyFlag::LowMovement => &mut self.low_movement_flag,
            AnomalyFlag::LowSteps => &mut self.low_steps_flag,
            AnomalyFlag::LowActive => &mut self.low_active_flag,
            AnomalyFlag::LowVo2 => &mut self.low_vo2_flag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_threshold_is_strict() {
        let baseline = 100.0;
        let edge = baseline * LOW_HRV_RATIO;
        assert!(!AnomalyFlag::LowHrv.evaluate(Some(edge), Some(baseline)));
        assert!(AnomalyFlag::LowHrv.evaluate(Some(edge - 0.01), Some(baseline)));
    }

    #[test]
    fn test_high_rhr_above_ratio() {
        assert!(AnomalyFlag::HighRhr.evaluate(Some(70.0), Some(60.0)));
        assert!(!AnomalyFlag::HighRhr.evaluate(Some(68.0), Some(60.0)));
    }

    #[test]
    fn test_absolute_rules_ignore_baseline() {
        assert!(AnomalyFlag::LowSleep.evaluate(Some(59.9), None));
        assert!(!AnomalyFlag::LowSleep.evaluate(Some(60.0), None));
        assert!(AnomalyFlag::LowRecovery.evaluate(Some(49.0), Some(10.0)));
        assert!(AnomalyFlag::LowMovement.evaluate(Some(39.0), None));
    }

    #[test]
    fn test_nulls_never_trigger() {
        for flag in AnomalyFlag::ALL {
            assert!(!flag.evaluate(None, Some(100.0)));
            assert!(!flag.evaluate(None, None));
        }
        assert!(!AnomalyFlag::LowSteps.evaluate(Some(0.0), None));
    }

    #[test]
    fn test_flags_triggered_in_canonical_order() {
        let mut flags = Flags::default();
        flags.set(AnomalyFlag::LowVo2, true);
        flags.set(AnomalyFlag::LowHrv, true);
        flags.set(AnomalyFlag::LowSleep, false);

        let triggered: Vec<_> = flags.triggered().collect();
        assert_eq!(triggered, vec![AnomalyFlag::LowHrv, AnomalyFlag::LowVo2]);
        assert_eq!(flags.computed().count(), 3);
        assert_eq!(flags.get(AnomalyFlag::HighRhr), None);
    }
}
