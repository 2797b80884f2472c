//! Combat: the pure engine and the periodic scheduler that drives it.

pub mod engine;
pub mod scheduler;

pub use engine::{
    AppliedDamage, BattleOutcome, DamageBreakdown, NextShot, TechModifiers, TurnReport,
};
pub use scheduler::BattleScheduler;
