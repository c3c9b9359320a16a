//! Continuation policy: a pure function of question count and score history
//! deciding whether the interview goes on.

use serde::{Deserialize, Serialize};

/// Thresholds of the continuation policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    /// Hard cap on the number of questions.
    pub max_questions: u32,
    pub strong_min_questions: u32,
    pub strong_min_average: f64,
    pub strong_min_high: u32,
    pub weak_min_questions: u32,
    pub weak_max_average: f64,
    pub weak_min_low: u32,
    /// Scores at or above this count as high.
    pub high_score: u8,
    /// Scores at or below this count as low.
    pub low_score: u8,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_questions: 12,
            strong_min_questions: 4,
            strong_min_average: 3.5,
            strong_min_high: 2,
            weak_min_questions: 6,
            weak_max_average: 2.5,
            weak_min_low: 3,
            high_score: 4,
            low_score: 2,
        }
    }
}

/// Running statistics over the scores recorded so far.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreLedger {
    count: u32,
    total: u32,
    high: u32,
    low: u32,
}

impl ScoreLedger {
    /// Builds a ledger over a complete history in one pass.
    pub fn from_scores(scores: impl IntoIterator<Item = u8>, config: &PolicyConfig) -> Self {
        let mut ledger = Self::default();
        for score in scores {
            ledger.push(score, config);
        }
        ledger
    }

    pub fn push(&mut self, score: u8, config: &PolicyConfig) {
        self.count += 1;
        self.total += score as u32;
        if score >= config.high_score {
            self.high += 1;
        }
        if score <= config.low_score {
            self.low += 1;
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Mean score, or 0 with no history.
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total as f64 / self.count as f64
        }
    }

    pub fn high_count(&self) -> u32 {
        self.high
    }

    pub fn low_count(&self) -> u32 {
        self.low
    }

    pub fn signal(&self) -> SignalQuality {
        let average = self.average();
        if average >= 4.0 && self.high >= 2 {
            SignalQuality::Strong
        } else if average >= 3.0 {
            SignalQuality::Moderate
        } else {
            SignalQuality::Weak
        }
    }
}

/// Coarse hint given to the evaluator about how the interview is going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalQuality {
    Strong,
    Moderate,
    Weak,
}

/// Why the interview ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Enough high scores to conclude early.
    StrongSignal,
    /// Enough low scores to conclude early.
    WeakSignal,
    /// The question cap was reached.
    QuestionCap,
    /// The evaluator recommended ending.
    Recommended,
    /// The candidate stopped answering.
    Abandoned,
    /// The candidate declined to take part.
    ConsentDeclined,
    /// The channel closed before a natural conclusion.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    End(EndReason),
}

impl Decision {
    pub fn is_end(&self) -> bool {
        matches!(self, Decision::End(_))
    }
}

/// Decides whether to continue after `question_count` answered questions.
///
/// The evaluator's recommendation is honored only when none of the
/// deterministic rules already decide, and never before the first answer.
pub fn decide(
    config: &PolicyConfig,
    question_count: u32,
    ledger: &ScoreLedger,
    end_recommended: bool,
) -> Decision {
    if question_count == 0 {
        return Decision::Continue;
    }
    if question_count >= config.max_questions {
        return Decision::End(EndReason::QuestionCap);
    }
    let average = ledger.average();
    if question_count >= config.strong_min_questions
        && ledger.count() > 0
        && average >= config.strong_min_average
        && ledger.high_count() >= config.strong_min_high
    {
        return Decision::End(EndReason::StrongSignal);
    }
    if question_count >= config.weak_min_questions
        && ledger.count() > 0
        && average <= config.weak_max_average
        && ledger.low_count() >= config.weak_min_low
    {
        return Decision::End(EndReason::WeakSignal);
    }
    if end_recommended {
        return Decision::End(EndReason::Recommended);
    }
    Decision::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ledger(scores: &[u8]) -> ScoreLedger {
        ScoreLedger::from_scores(scores.iter().copied(), &PolicyConfig::default())
    }

    #[test]
    fn test_never_ends_before_first_answer() {
        let config = PolicyConfig::default();
        assert_eq!(
            decide(&config, 0, &ScoreLedger::default(), true),
            Decision::Continue
        );
    }

    #[test]
    fn test_strong_signal_at_question_four() {
        let config = PolicyConfig::default();
        let decision = decide(&config, 4, &ledger(&[4, 3, 4, 3]), false);
        assert_eq!(decision, Decision::End(EndReason::StrongSignal));

        // Three questions are not enough, even with perfect scores.
        assert_eq!(
            decide(&config, 3, &ledger(&[5, 5, 5]), false),
            Decision::Continue
        );
        // Average high enough but only one high score.
        assert_eq!(
            decide(&config, 4, &ledger(&[5, 3, 3, 3]), false),
            Decision::Continue
        );
    }

    #[test]
    fn test_weak_signal_at_question_six() {
        let config = PolicyConfig::default();
        let decision = decide(&config, 6, &ledger(&[2, 3, 2, 3, 2, 3]), false);
        assert_eq!(decision, Decision::End(EndReason::WeakSignal));

        assert_eq!(
            decide(&config, 5, &ledger(&[1, 1, 1, 1, 1]), false),
            Decision::Continue
        );
        // Only two low scores.
        assert_eq!(
            decide(&config, 6, &ledger(&[2, 3, 3, 3, 3, 2]), false),
            Decision::Continue
        );
    }

    #[test]
    fn test_hard_cap_is_unconditional() {
        let config = PolicyConfig::default();
        assert_eq!(
            decide(&config, 12, &ledger(&[3; 12]), false),
            Decision::End(EndReason::QuestionCap)
        );
        assert_eq!(
            decide(&config, 12, &ScoreLedger::default(), false),
            Decision::End(EndReason::QuestionCap)
        );
    }

    #[test]
    fn test_recommendation_honored_otherwise() {
        let config = PolicyConfig::default();
        let mid = ledger(&[3, 3]);
        assert_eq!(
            decide(&config, 2, &mid, true),
            Decision::End(EndReason::Recommended)
        );
        assert_eq!(decide(&config, 2, &mid, false), Decision::Continue);
    }

    #[test]
    fn test_incremental_ledger_matches_full_history() {
        let config = PolicyConfig::default();
        let scores = [4u8, 2, 5, 3, 1, 4, 4, 2];

        let mut incremental = ScoreLedger::default();
        let mut decisions = Vec::new();
        for (i, score) in scores.iter().enumerate() {
            incremental.push(*score, &config);
            decisions.push(decide(&config, i as u32 + 1, &incremental, false));
        }

        let full = ScoreLedger::from_scores(scores, &config);
        assert_eq!(incremental, full);
        assert_abs_diff_eq!(full.average(), 25.0 / 8.0, epsilon = 1e-9);
        assert_eq!(
            decisions.last().copied(),
            Some(decide(&config, scores.len() as u32, &full, false))
        );
    }

    #[test]
    fn test_signal_quality() {
        assert_eq!(ledger(&[4, 5]).signal(), SignalQuality::Strong);
        assert_eq!(ledger(&[3, 4]).signal(), SignalQuality::Moderate);
        assert_eq!(ledger(&[2, 3]).signal(), SignalQuality::Weak);
        assert_eq!(ScoreLedger::default().signal(), SignalQuality::Weak);
    }
}
