//! Hysteresis decision engine
//!
//! Evidence has to be consecutive: a node's sticky count grows by one for
//! every cycle it keeps its classification and drops back to one the moment
//! the classification changes. A node becomes a shrink candidate once it has
//! been idle for `shrink_sensitivity` cycles including this one. The fleet
//! grows only when every scored node is busy now *and* already was busy for
//! `expand_sensitivity` cycles before this one, so a single busy burst never
//! buys a new node. Quarantined (freshly started) nodes are tracked but never
//! scored.

use elastic_core::{
    HistoryDocument, ScalingConfig, ScalingVerdict, UtilizationEntry, UtilizationState,
};
use std::collections::BTreeMap;
use tracing::debug;

/// One probed node as fed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub name: String,
    /// Workload marker present
    pub busy: bool,
    /// Node was started by us and its workload has not been seen yet
    pub quarantined: bool,
}

impl Observation {
    pub fn new(name: impl Into<String>, busy: bool, quarantined: bool) -> Self {
        Self {
            name: name.into(),
            busy,
            quarantined,
        }
    }

    /// Utilization classification for this cycle; busy wins over quarantine
    pub fn classify(&self) -> UtilizationState {
        if self.busy {
            UtilizationState::Busy
        } else if self.quarantined {
            UtilizationState::Managed
        } else {
            UtilizationState::NotBusy
        }
    }
}

/// Complete result of probing the fleet once
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Nodes probed successfully
    pub observations: Vec<Observation>,
    /// Listed nodes that could not be probed; their history is carried over untouched
    pub unreachable: Vec<String>,
}

/// How the engine scored one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub name: String,
    pub state: UtilizationState,
    pub sticky_count: u32,
    /// Consecutive cycles in `state` before this one
    pub prior_count: u32,
}

/// Output of one engine run
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub verdict: ScalingVerdict,
    /// History to persist before the verdict is executed
    pub history: HistoryDocument,
    pub assessments: Vec<Assessment>,
    /// Nodes idle long enough to justify a shrink
    pub shrink_candidates: Vec<String>,
}

/// Compare a snapshot against stored history and decide what to do.
///
/// Pure: the caller owns persisting `Evaluation::history`.
pub fn compute_verdict(
    snapshot: &Snapshot,
    history: &HistoryDocument,
    config: &ScalingConfig,
) -> Evaluation {
    let mut nodes = BTreeMap::new();
    let mut assessments = Vec::with_capacity(snapshot.observations.len());
    let mut shrink_candidates = Vec::new();
    let mut busy = 0usize;
    let mut quarantined = 0usize;
    let mut busy_long_enough = true;

    for obs in &snapshot.observations {
        let state = obs.classify();
        let prior_count = match history.utilization(&obs.name) {
            Some(entry) if entry.state == state => entry.sticky_count,
            _ => 0,
        };
        let sticky_count = prior_count + 1;

        match state {
            UtilizationState::Managed => quarantined += 1,
            UtilizationState::Busy => {
                busy += 1;
                if prior_count < config.expand_sensitivity {
                    busy_long_enough = false;
                }
            }
            UtilizationState::NotBusy => {
                if sticky_count >= config.shrink_sensitivity {
                    shrink_candidates.push(obs.name.clone());
                }
            }
        }

        nodes.insert(
            obs.name.clone(),
            UtilizationEntry {
                state,
                sticky_count,
            },
        );
        assessments.push(Assessment {
            name: obs.name.clone(),
            state,
            sticky_count,
            prior_count,
        });
    }

    for name in &snapshot.unreachable {
        if let Some(entry) = history.utilization(name) {
            nodes.insert(name.clone(), *entry);
        }
    }

    let scored = snapshot.observations.len() - quarantined;
    let expand = scored > 0 && busy == scored && busy_long_enough;

    let verdict = if !shrink_candidates.is_empty() {
        ScalingVerdict::Shrink(shrink_candidates.len() as u32)
    } else if expand {
        ScalingVerdict::Expand(1)
    } else {
        ScalingVerdict::DoNothing
    };

    debug!(
        busy,
        quarantined,
        scored,
        candidates = shrink_candidates.len(),
        verdict = %verdict,
        "Computed scaling verdict"
    );

    Evaluation {
        verdict,
        history: HistoryDocument {
            version: history.version,
            nodes,
            containers: history.containers.clone(),
        },
        assessments,
        shrink_candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elastic_core::ContainerState;

    fn config(expand: u32, shrink: u32) -> ScalingConfig {
        ScalingConfig {
            min_nodes: 1,
            max_nodes: 3,
            expand_sensitivity: expand,
            shrink_sensitivity: shrink,
        }
    }

    fn snapshot(obs: &[(&str, bool)]) -> Snapshot {
        Snapshot {
            observations: obs
                .iter()
                .map(|(name, busy)| Observation::new(*name, *busy, false))
                .collect(),
            unreachable: Vec::new(),
        }
    }

    fn history(entries: &[(&str, UtilizationState, u32)]) -> HistoryDocument {
        let mut doc = HistoryDocument::default();
        for (name, state, sticky_count) in entries {
            doc.nodes.insert(
                name.to_string(),
                UtilizationEntry {
                    state: *state,
                    sticky_count: *sticky_count,
                },
            );
        }
        doc
    }

    #[test]
    fn test_idle_count_grows_until_shrink() {
        let cfg = config(1, 4);
        let mut doc = HistoryDocument::default();

        for cycle in 1..=4u32 {
            let eval = compute_verdict(&snapshot(&[("a", false)]), &doc, &cfg);
            assert_eq!(eval.history.utilization("a").unwrap().sticky_count, cycle);
            if cycle < 4 {
                assert_eq!(eval.verdict, ScalingVerdict::DoNothing, "cycle {}", cycle);
            } else {
                assert_eq!(eval.verdict, ScalingVerdict::Shrink(1));
                assert_eq!(eval.shrink_candidates, vec!["a".to_string()]);
            }
            doc = eval.history;
        }
    }

    #[test]
    fn test_state_change_resets_count() {
        let cfg = config(5, 5);
        let doc = history(&[("a", UtilizationState::Busy, 9)]);

        let eval = compute_verdict(&snapshot(&[("a", false)]), &doc, &cfg);
        let entry = eval.history.utilization("a").unwrap();
        assert_eq!(entry.state, UtilizationState::NotBusy);
        assert_eq!(entry.sticky_count, 1);
        assert_eq!(eval.assessments[0].prior_count, 0);
    }

    #[test]
    fn test_expand_needs_every_node_busy() {
        let cfg = config(1, 10);
        let doc = history(&[
            ("a", UtilizationState::Busy, 50),
            ("b", UtilizationState::Busy, 50),
            ("c", UtilizationState::NotBusy, 50),
        ]);

        let eval = compute_verdict(&snapshot(&[("a", true), ("b", true), ("c", false)]), &doc, &cfg);
        assert_ne!(eval.verdict, ScalingVerdict::Expand(1));
    }

    #[test]
    fn test_expand_needs_every_node_busy_long_enough() {
        let e = 3;
        let cfg = config(e, 10);
        let doc = history(&[
            ("a", UtilizationState::Busy, e),
            ("b", UtilizationState::Busy, e),
            ("c", UtilizationState::Busy, e - 1),
        ]);
        let snap = snapshot(&[("a", true), ("b", true), ("c", true)]);

        let eval = compute_verdict(&snap, &doc, &cfg);
        assert_eq!(eval.verdict, ScalingVerdict::DoNothing);

        let eval = compute_verdict(&snap, &eval.history, &cfg);
        assert_eq!(eval.verdict, ScalingVerdict::Expand(1));
    }

    #[test]
    fn test_empty_fleet_never_expands() {
        let eval = compute_verdict(&Snapshot::default(), &HistoryDocument::default(), &config(1, 1));
        assert_eq!(eval.verdict, ScalingVerdict::DoNothing);
    }

    #[test]
    fn test_quarantined_nodes_are_not_scored() {
        let cfg = config(1, 1);
        let snap = Snapshot {
            observations: vec![Observation::new("fresh", false, true)],
            unreachable: Vec::new(),
        };

        let eval = compute_verdict(&snap, &HistoryDocument::default(), &cfg);
        assert_eq!(eval.verdict, ScalingVerdict::DoNothing);
        assert!(eval.shrink_candidates.is_empty());
        assert_eq!(
            eval.history.utilization("fresh").unwrap().state,
            UtilizationState::Managed
        );

        // An all-quarantined fleet stays put however long it waits
        let eval = compute_verdict(&snap, &eval.history, &cfg);
        assert_eq!(eval.verdict, ScalingVerdict::DoNothing);
        assert_eq!(eval.history.utilization("fresh").unwrap().sticky_count, 2);
    }

    #[test]
    fn test_quarantined_node_does_not_block_expand() {
        let cfg = config(1, 1);
        let doc = history(&[("old", UtilizationState::Busy, 2)]);
        let snap = Snapshot {
            observations: vec![
                Observation::new("old", true, false),
                Observation::new("fresh", false, true),
            ],
            unreachable: Vec::new(),
        };

        let eval = compute_verdict(&snap, &doc, &cfg);
        assert_eq!(eval.verdict, ScalingVerdict::Expand(1));
    }

    #[test]
    fn test_busy_quarantined_node_graduates() {
        let obs = Observation::new("fresh", true, true);
        assert_eq!(obs.classify(), UtilizationState::Busy);
    }

    #[test]
    fn test_scenario_sustained_load_expands_on_third_cycle() {
        let cfg = config(2, 2);
        let snap = snapshot(&[("a", true)]);

        let c1 = compute_verdict(&snap, &HistoryDocument::default(), &cfg);
        assert_eq!(c1.verdict, ScalingVerdict::DoNothing);
        assert_eq!(c1.history.utilization("a").unwrap().sticky_count, 1);

        let c2 = compute_verdict(&snap, &c1.history, &cfg);
        assert_eq!(c2.verdict, ScalingVerdict::DoNothing);
        assert_eq!(c2.history.utilization("a").unwrap().sticky_count, 2);

        let c3 = compute_verdict(&snap, &c2.history, &cfg);
        assert_eq!(c3.verdict, ScalingVerdict::Expand(1));
    }

    #[test]
    fn test_scenario_idle_node_shrinks_on_second_cycle() {
        let cfg = config(2, 2);
        let snap = snapshot(&[("a", false)]);

        let c1 = compute_verdict(&snap, &HistoryDocument::default(), &cfg);
        assert_eq!(c1.verdict, ScalingVerdict::DoNothing);

        let c2 = compute_verdict(&snap, &c1.history, &cfg);
        assert_eq!(c2.verdict, ScalingVerdict::Shrink(1));
    }

    #[test]
    fn test_shrink_counts_every_candidate() {
        let cfg = config(1, 2);
        let doc = history(&[
            ("a", UtilizationState::NotBusy, 1),
            ("b", UtilizationState::NotBusy, 7),
            ("c", UtilizationState::NotBusy, 0),
            ("d", UtilizationState::Busy, 3),
        ]);
        let snap = snapshot(&[("a", false), ("b", false), ("c", false), ("d", true)]);

        let eval = compute_verdict(&snap, &doc, &cfg);
        assert_eq!(eval.verdict, ScalingVerdict::Shrink(2));
        assert_eq!(eval.shrink_candidates, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_idle_node_always_blocks_expand() {
        let cfg = config(1, 2);
        let states = [
            UtilizationState::Busy,
            UtilizationState::NotBusy,
            UtilizationState::Managed,
        ];
        // (busy, quarantined) of node b this cycle
        let observed = [(true, false), (false, false), (false, true)];

        // Every combination of prior state and count, consistent or not
        for prior_a in states {
            for prior_b in states {
                for count_a in [0, 1, 5, 50] {
                    for count_b in [0, 1, 5, 50] {
                        for (busy_b, quarantined_b) in observed {
                            let doc =
                                history(&[("a", prior_a, count_a), ("b", prior_b, count_b)]);
                            let snap = Snapshot {
                                observations: vec![
                                    Observation::new("a", true, false),
                                    Observation::new("b", busy_b, quarantined_b),
                                ],
                                unreachable: Vec::new(),
                            };
                            let idle = snap
                                .observations
                                .iter()
                                .any(|o| o.classify() == UtilizationState::NotBusy);

                            let eval = compute_verdict(&snap, &doc, &cfg);
                            if idle {
                                assert!(
                                    !matches!(eval.verdict, ScalingVerdict::Expand(_)),
                                    "expanded with an idle node: {:?}",
                                    eval.assessments
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_inconsistent_history_never_expands() {
        let cfg = config(1, 3);

        // Long-busy peers next to a node idle far beyond the shrink threshold
        let doc = history(&[
            ("a", UtilizationState::Busy, 40),
            ("b", UtilizationState::Busy, 40),
            ("c", UtilizationState::NotBusy, 50),
        ]);
        let snap = snapshot(&[("a", true), ("b", true), ("c", false)]);
        let eval = compute_verdict(&snap, &doc, &cfg);
        assert_eq!(eval.verdict, ScalingVerdict::Shrink(1));

        // Idle but not yet a candidate still vetoes growth
        let doc = history(&[
            ("a", UtilizationState::Busy, 40),
            ("b", UtilizationState::Busy, 40),
            ("c", UtilizationState::Busy, 40),
        ]);
        let eval = compute_verdict(&snap, &doc, &cfg);
        assert!(eval.shrink_candidates.is_empty());
        assert_eq!(eval.verdict, ScalingVerdict::DoNothing);
    }

    #[test]
    fn test_unreachable_nodes_keep_their_history() {
        let cfg = config(1, 3);
        let doc = history(&[
            ("a", UtilizationState::NotBusy, 2),
            ("gone", UtilizationState::Busy, 4),
        ]);
        let snap = Snapshot {
            observations: vec![Observation::new("b", true, false)],
            unreachable: vec!["a".to_string(), "never-seen".to_string()],
        };

        let eval = compute_verdict(&snap, &doc, &cfg);
        let a = eval.history.utilization("a").unwrap();
        assert_eq!(a.state, UtilizationState::NotBusy);
        assert_eq!(a.sticky_count, 2);
        assert!(eval.history.utilization("never-seen").is_none());
        // Nodes no longer listed drop out of the history
        assert!(eval.history.utilization("gone").is_none());
    }

    #[test]
    fn test_container_states_and_version_pass_through() {
        let mut doc = HistoryDocument {
            version: 12,
            ..HistoryDocument::default()
        };
        doc.set_container_state("a", ContainerState::Running);

        let eval = compute_verdict(&snapshot(&[("a", true)]), &doc, &config(1, 1));
        assert_eq!(eval.history.version, 12);
        assert_eq!(eval.history.container_state("a"), Some(ContainerState::Running));
    }
}
