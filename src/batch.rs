//! Case batches: enter, infer and clear, one case at a time.
//!
//! Each case runs inside its own exclusive lock on the network, so other
//! callers may interleave between cases but never observe a case's findings.
//! A failing case is recorded in its own result slot and the batch moves on.

use serde::{Deserialize, Serialize};

use crate::error::LookupError;
use crate::evidence::Case;
use crate::network::{Network, NetworkWrite};

/// Result of one case, aligned with the case's position in the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub index: usize,
    /// Empty when the case succeeded.
    pub error: String,
    /// Empty when the case failed.
    pub value: String,
}

impl CaseOutcome {
    fn ok(index: usize, value: String) -> Self {
        Self {
            index,
            error: String::new(),
            value,
        }
    }

    fn failed(index: usize, error: impl ToString) -> Self {
        Self {
            index,
            error: error.to_string(),
            value: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }
}

/// Run every case against `network` and infer `target` for each.
///
/// Only an unknown target fails the batch as a whole; everything else is
/// reported per case.
pub fn run_batch(
    network: &Network,
    target: &str,
    cases: &[Case],
) -> Result<Vec<CaseOutcome>, LookupError> {
    let target = network.read().node(target)?.name().to_string();
    tracing::debug!(network = network.name(), %target, cases = cases.len(), "running batch");

    let outcomes: Vec<CaseOutcome> = cases
        .iter()
        .enumerate()
        .map(|(index, case)| run_case(&network.write(), &target, index, case))
        .collect();

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failed > 0 {
        tracing::debug!(network = network.name(), %target, failed, "batch finished with failed cases");
    }
    Ok(outcomes)
}

fn run_case(view: &NetworkWrite<'_>, target: &str, index: usize, case: &Case) -> CaseOutcome {
    // enter_case retracts everything itself when it fails.
    if let Err(e) = view.enter_case(case) {
        return CaseOutcome::failed(index, e);
    }
    let inferred = view
        .node(target)
        .map_err(|e| e.to_string())
        .and_then(|node| node.infer().map_err(|e| e.to_string()));
    let outcome = match inferred {
        Ok(value) => CaseOutcome::ok(index, value),
        Err(e) => CaseOutcome::failed(index, e),
    };
    match view.clear_findings() {
        Ok(()) => outcome,
        Err(e) => {
            tracing::warn!(network = view.network().name(), index, error = %e, "failed to clear case findings");
            if outcome.is_ok() {
                CaseOutcome::failed(index, e)
            } else {
                outcome
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::{SPRINKLER, open};

    fn case(pairs: &[(&str, &str)]) -> Case {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn results_are_index_aligned() {
        let network = open(SPRINKLER);
        let cases = vec![
            case(&[("Rain", "yes")]),
            case(&[("Rain", "maybe")]),
            case(&[]),
            case(&[("Rain", "#9")]),
            case(&[("Rain", "#1")]),
        ];
        let outcomes = run_batch(&network, "Wet", &cases).unwrap();
        assert_eq!(outcomes.len(), cases.len());
        for (i, o) in outcomes.iter().enumerate() {
            assert_eq!(o.index, i);
        }
        assert_eq!(outcomes[0], CaseOutcome::ok(0, "yes".into()));
        assert!(!outcomes[1].is_ok());
        assert!(outcomes[1].value.is_empty());
        assert_eq!(outcomes[2].value, "no");
        assert!(!outcomes[3].is_ok());
        assert_eq!(outcomes[4].value, "no");
    }

    #[test]
    fn network_is_clean_after_each_case() {
        let network = open(SPRINKLER);
        run_batch(&network, "Depth", &[case(&[("Rain", "no")])]).unwrap();
        assert!(network.read().findings().unwrap().is_empty());
    }

    #[test]
    fn target_can_be_given_by_ordinal() {
        let network = open(SPRINKLER);
        // Ordinal 0 is Depth; with no rain its mean is 0.5.
        let outcomes = run_batch(&network, "0", &[case(&[("Rain", "no")])]).unwrap();
        assert_eq!(outcomes[0].value, "5E-01");
    }

    #[test]
    fn unknown_target_fails_the_batch() {
        let network = open(SPRINKLER);
        let err = run_batch(&network, "Sun", &[case(&[])]).unwrap_err();
        assert!(matches!(err, LookupError::NodeNotFound { .. }));
    }

    #[test]
    fn inconsistent_case_fails_at_inference() {
        let network = open(SPRINKLER);
        // Depth can only exceed 1 when it rains.
        let outcomes = run_batch(
            &network,
            "Wet",
            &[case(&[("Rain", "no"), ("Depth", "2")])],
        )
        .unwrap();
        assert!(!outcomes[0].is_ok());
        assert!(network.read().findings().unwrap().is_empty());
    }
}
