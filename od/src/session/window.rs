//! Context-window zones and optimization profiles

use crate::config::ZoneThresholds;

/// Qualitative band of context-window usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Zone {
    /// Proceed
    Green,
    /// Monitor; a checkpoint is recommended
    Yellow,
    /// Optimize and checkpoint
    Orange,
    /// Mandatory refresh before the next iteration
    Red,
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Green => write!(f, "green"),
            Self::Yellow => write!(f, "yellow"),
            Self::Orange => write!(f, "orange"),
            Self::Red => write!(f, "red"),
        }
    }
}

/// Classify a utilization fraction against the configured thresholds
pub fn zone_for(utilization: f64, zones: &ZoneThresholds) -> Zone {
    if utilization >= zones.red {
        Zone::Red
    } else if utilization >= zones.orange {
        Zone::Orange
    } else if utilization >= zones.yellow {
        Zone::Yellow
    } else {
        Zone::Green
    }
}

/// Whether utilization is past the emergency threshold
pub fn is_emergency(utilization: f64, zones: &ZoneThresholds) -> bool {
    utilization >= zones.emergency
}

/// Context-management intensity, auto-selected from the window limit.
/// Smaller windows summarize sooner, retain less, and checkpoint more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationProfile {
    UltraAggressive,
    Aggressive,
    BalancedAggressive,
    Balanced,
    Minimal,
}

impl OptimizationProfile {
    /// Select a profile for the given window limit
    pub fn from_limit(limit: u64) -> Self {
        match limit {
            0..8_000 => Self::UltraAggressive,
            8_000..32_000 => Self::Aggressive,
            32_000..100_000 => Self::BalancedAggressive,
            100_000..250_000 => Self::Balanced,
            _ => Self::Minimal,
        }
    }

    /// Iterations of working memory retained in prompts and summaries
    pub fn retained_iterations(&self) -> usize {
        match self {
            Self::UltraAggressive => 2,
            Self::Aggressive => 4,
            Self::BalancedAggressive => 8,
            Self::Balanced => 16,
            Self::Minimal => 32,
        }
    }

    /// Checkpoint every this many iterations
    pub fn checkpoint_cadence(&self) -> u32 {
        match self {
            Self::UltraAggressive => 1,
            Self::Aggressive => 2,
            Self::BalancedAggressive => 4,
            Self::Balanced => 8,
            Self::Minimal => 16,
        }
    }
}

impl std::fmt::Display for OptimizationProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UltraAggressive => write!(f, "ultra-aggressive"),
            Self::Aggressive => write!(f, "aggressive"),
            Self::BalancedAggressive => write!(f, "balanced-aggressive"),
            Self::Balanced => write!(f, "balanced"),
            Self::Minimal => write!(f, "minimal"),
        }
    }
}

impl std::str::FromStr for OptimizationProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ultra-aggressive" => Ok(Self::UltraAggressive),
            "aggressive" => Ok(Self::Aggressive),
            "balanced-aggressive" => Ok(Self::BalancedAggressive),
            "balanced" => Ok(Self::Balanced),
            "minimal" => Ok(Self::Minimal),
            _ => Err(format!("Unknown optimization profile: {}", s)),
        }
    }
}
