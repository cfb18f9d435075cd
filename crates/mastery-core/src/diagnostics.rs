//! Convergence and calibration reporting over stored ratings.

use serde::{Deserialize, Serialize};

use crate::{
  rating::{DEVIATION_CEILING, DEVIATION_FLOOR, DifficultyBand, ItemRating, SkillRating},
  selector,
};

/// Ratings at or below this deviation are treated as settled.
pub const CONVERGED_DEVIATION: f64 = 100.0;

/// How settled a deviation is: `0` at the ceiling, `1` at the floor.
pub fn confidence(deviation: f64) -> f64 {
  ((DEVIATION_CEILING - deviation) / (DEVIATION_CEILING - DEVIATION_FLOOR)).clamp(0.0, 1.0)
}

pub fn is_converged(deviation: f64) -> bool { deviation <= CONVERGED_DEVIATION }

// ─── Skill summary ───────────────────────────────────────────────────────────

/// One row of a learner's skill summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillSummary {
  pub skill_id:  String,
  pub rating:    f64,
  pub deviation: f64,
  pub band:      DifficultyBand,
}

impl From<&SkillRating> for SkillSummary {
  fn from(r: &SkillRating) -> Self {
    Self {
      skill_id:  r.skill_id.clone(),
      rating:    r.rating,
      deviation: r.deviation,
      band:      r.band(),
    }
  }
}

/// Summaries sorted by `skill_id`.
pub fn skill_summary(ratings: &[SkillRating]) -> Vec<SkillSummary> {
  let mut rows: Vec<SkillSummary> = ratings.iter().map(SkillSummary::from).collect();
  rows.sort_by(|a, b| a.skill_id.cmp(&b.skill_id));
  rows
}

// ─── Learner convergence ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillConvergence {
  pub skill_id:     String,
  pub rating:       f64,
  pub deviation:    f64,
  pub observations: u32,
  pub confidence:   f64,
  pub converged:    bool,
}

/// How far each of a learner's skill estimates has settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceReport {
  pub user_id:            String,
  pub skills:             Vec<SkillConvergence>,
  pub converged_skills:   usize,
  pub total_observations: u64,
  /// `None` when the learner has no skills yet.
  pub mean_deviation:     Option<f64>,
  pub weakest_skill:      Option<String>,
}

pub fn convergence_report(user_id: &str, ratings: &[SkillRating]) -> ConvergenceReport {
  let mut skills: Vec<SkillConvergence> = ratings
    .iter()
    .map(|r| SkillConvergence {
      skill_id:     r.skill_id.clone(),
      rating:       r.rating,
      deviation:    r.deviation,
      observations: r.observations,
      confidence:   confidence(r.deviation),
      converged:    is_converged(r.deviation),
    })
    .collect();
  skills.sort_by(|a, b| a.skill_id.cmp(&b.skill_id));

  ConvergenceReport {
    user_id:            user_id.to_owned(),
    converged_skills:   skills.iter().filter(|s| s.converged).count(),
    total_observations: skills.iter().map(|s| u64::from(s.observations)).sum(),
    mean_deviation:     mean(skills.iter().map(|s| s.deviation)),
    weakest_skill:      selector::weakest_skill(ratings).map(|r| r.skill_id.clone()),
    skills,
  }
}

// ─── Item calibration ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandCounts {
  pub foundation: usize,
  pub core:       usize,
  pub challenge:  usize,
}

impl BandCounts {
  fn add(&mut self, band: DifficultyBand) {
    match band {
      DifficultyBand::Foundation => self.foundation += 1,
      DifficultyBand::Core => self.core += 1,
      DifficultyBand::Challenge => self.challenge += 1,
    }
  }
}

/// How well the live catalog's difficulty estimates have settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
  pub total_items:      usize,
  pub by_band:          BandCounts,
  pub calibrated_items: usize,
  pub mean_deviation:   Option<f64>,
  /// Items that have never been attempted.
  pub unobserved_items: usize,
}

pub fn calibration_report(items: &[ItemRating]) -> CalibrationReport {
  let mut by_band = BandCounts::default();
  for item in items {
    by_band.add(item.band);
  }

  CalibrationReport {
    total_items: items.len(),
    by_band,
    calibrated_items: items.iter().filter(|i| is_converged(i.deviation)).count(),
    mean_deviation: mean(items.iter().map(|i| i.deviation)),
    unobserved_items: items.iter().filter(|i| i.observations == 0).count(),
  }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
  let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
  (n > 0).then(|| sum / n as f64)
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;
  use crate::rating::LifecycleStatus;

  fn skill(id: &str, rating: f64, deviation: f64, observations: u32) -> SkillRating {
    SkillRating {
      rating,
      deviation,
      observations,
      ..SkillRating::seed("u1", id, Utc::now())
    }
  }

  #[test]
  fn confidence_spans_unit_interval() {
    assert_eq!(confidence(DEVIATION_CEILING), 0.0);
    assert_eq!(confidence(DEVIATION_FLOOR), 1.0);
    assert!((confidence(200.0) - 0.5).abs() < 1e-12);
  }

  #[test]
  fn report_counts_converged_skills() {
    let ratings = vec![
      skill("b", 1600.0, 80.0, 30),
      skill("a", 1450.0, 332.5, 1),
      skill("c", 1520.0, 100.0, 25),
    ];
    let report = convergence_report("u1", &ratings);
    assert_eq!(report.converged_skills, 2);
    assert_eq!(report.total_observations, 56);
    assert_eq!(report.weakest_skill.as_deref(), Some("a"));
    let ids: Vec<&str> = report.skills.iter().map(|s| s.skill_id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert!(!report.skills[0].converged);
  }

  #[test]
  fn empty_report_has_no_mean() {
    let report = convergence_report("nobody", &[]);
    assert!(report.skills.is_empty());
    assert_eq!(report.mean_deviation, None);
    assert_eq!(report.weakest_skill, None);
  }

  #[test]
  fn summary_is_sorted_and_banded() {
    let ratings = vec![skill("zeta", 1650.0, 300.0, 3), skill("alpha", 1300.0, 300.0, 3)];
    let rows = skill_summary(&ratings);
    assert_eq!(rows[0].skill_id, "alpha");
    assert_eq!(rows[0].band, DifficultyBand::Foundation);
    assert_eq!(rows[1].band, DifficultyBand::Challenge);
  }

  #[test]
  fn calibration_counts_bands() {
    let now = Utc::now();
    let mut settled = ItemRating::seed("c", Some(1700.0), vec![], LifecycleStatus::Live, now);
    settled.deviation = 60.0;
    settled.observations = 90;
    let items = vec![
      ItemRating::seed("a", Some(1300.0), vec![], LifecycleStatus::Live, now),
      ItemRating::seed("b", Some(1500.0), vec![], LifecycleStatus::Live, now),
      settled,
    ];
    let report = calibration_report(&items);
    assert_eq!(report.total_items, 3);
    assert_eq!(report.by_band, BandCounts { foundation: 1, core: 1, challenge: 1 });
    assert_eq!(report.calibrated_items, 1);
    assert_eq!(report.unobserved_items, 2);
    assert!((report.mean_deviation.unwrap() - 760.0 / 3.0).abs() < 1e-9);
  }
}
