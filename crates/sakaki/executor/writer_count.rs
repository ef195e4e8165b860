//! Partition/writer count derivation from the plan shape.

use tracing::warn;

use sakaki_common::config::Config;

use crate::plan::{OperatorKind, ProcessStep, StepBody, StepGraph, StepId};

/// True when the process chain contains an emit operator.
pub fn has_emit_operator(step: &ProcessStep) -> bool {
    step.operators.iter().any(|o| matches!(o.kind, OperatorKind::Emit(_)))
}

fn terminal_partitions(
    process: &ProcessStep,
    config: &Config,
    tx_readonly: bool,
) -> usize {
    let mut result = config.default_partitions;
    for op in &process.operators {
        match op.kind {
            OperatorKind::Scan(ref scan) => {
                result = if tx_readonly && scan.parallel && config.scan_default_parallel > 0 {
                    config.scan_default_parallel
                } else {
                    1
                };
            }
            OperatorKind::Find(_) => result = 1,
            OperatorKind::Values(_) => result = 1,
            _ => {}
        }
    }
    result
}

/// Maximum useful writer/task count for `step`, derived by walking the
/// upstream subtree: terminal scans fan out only under a read-only
/// transaction, point lookups stay single, shuffles reset to the configured
/// default, forwards propagate their upstream width.
pub fn calculate_partitions(
    graph: &StepGraph,
    step: StepId,
    config: &Config,
    tx_readonly: bool,
) -> usize {
    match &graph.step(step).body {
        StepBody::Process(process) => {
            if let Some(fixed) = process.partitions {
                return fixed.max(1);
            }
            let upstreams = &graph.step(step).inputs;
            if upstreams.is_empty() {
                return terminal_partitions(process, config, tx_readonly);
            }
            let mut width = 0usize;
            for &u in upstreams {
                let up = calculate_partitions(graph, u, config, tx_readonly);
                if width != 0 && width != up {
                    warn!(step, "upstream partition widths disagree: {width} vs {up}");
                }
                width = up;
            }
            width.max(1)
        }
        StepBody::Group(_) | StepBody::Aggregate(_) => config.default_partitions.max(1),
        StepBody::Forward(_) => {
            let mut width = 1usize;
            for &u in &graph.step(step).inputs {
                width = width.max(calculate_partitions(graph, u, config, tx_readonly));
            }
            width
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ScanBound, ScanSpec, Step};
    use sakaki_common::meta::RecordMeta;

    fn scan_step(id: StepId, parallel: bool) -> Step {
        let spec = ScanSpec {
            storage_name: "T".into(),
            secondary: None,
            key_fields: vec![],
            value_fields: vec![],
            begin: ScanBound::unbound(),
            end: ScanBound::unbound(),
            limit: None,
            parallel,
            storage_entry: None,
        };
        Step {
            id,
            inputs: vec![],
            sub_inputs: vec![],
            body: StepBody::Process(ProcessStep {
                operators: vec![crate::plan::OperatorSpec {
                    index: 0,
                    block: 0,
                    downstream: None,
                    kind: OperatorKind::Scan(spec),
                }],
                root: 0,
                block_metas: vec![RecordMeta::all_nullable(vec![])],
                partitions: None,
            }),
        }
    }

    #[test]
    fn parallel_scan_fans_out_only_when_readonly() {
        let graph = StepGraph::new(vec![scan_step(0, true)]);
        let config = Config { scan_default_parallel: 4, ..Config::default() };
        assert_eq!(calculate_partitions(&graph, 0, &config, true), 4);
        assert_eq!(calculate_partitions(&graph, 0, &config, false), 1);
    }

    #[test]
    fn serial_scan_stays_single() {
        let graph = StepGraph::new(vec![scan_step(0, false)]);
        let config = Config::default();
        assert_eq!(calculate_partitions(&graph, 0, &config, true), 1);
    }
}
