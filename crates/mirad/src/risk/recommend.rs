//! Static per-risk-type guidance.
//!
//! A fixed lookup table, not generated text. The same strings double as the
//! deterministic fallback when the generation dependency is unavailable.

use mira_common::RiskType;

pub fn advice_for(risk_type: RiskType) -> &'static str {
    match risk_type {
        RiskType::CopyPaste => {
            "Try writing the solution in your own words first; pasted code is hard to build on when the exercise changes."
        }
        RiskType::Frustration => {
            "Take a short break and re-read the exercise statement; a fresh look usually beats one more rapid retry."
        }
        RiskType::HintDependency => {
            "Attempt the exercise at least once between hints; each attempt tells you more than the next hint will."
        }
        RiskType::DuplicateSubmission => {
            "Resubmitting the same code will not change the result; change one specific thing and test that change."
        }
    }
}
