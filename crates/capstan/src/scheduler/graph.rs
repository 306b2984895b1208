//! Batch dependency planning.
//!
//! A batch of tool calls becomes a DAG: a hard edge runs from every call
//! of tool `A` to every call whose tool declares `A` in its dependencies.
//! Kahn's algorithm orders the graph into waves — calls in a wave have no
//! unfinished prerequisites. A cycle rejects the whole batch.
//!
//! Resource tags add soft constraints on top: two calls sharing a tag may
//! not run in the same stage, but neither orders the other. Waves are
//! therefore split into conflict-free stages, additionally capped at the
//! concurrency limit, by first-fit in submission order.

use crate::error::ToolError;
use std::collections::{HashMap, HashSet, VecDeque};

/// One call's scheduling-relevant facts.
#[derive(Clone, Debug)]
pub struct BatchNode {
    pub request_id: String,
    pub tool_name: String,
    /// Tool names that must complete before this call.
    pub dependencies: Vec<String>,
    pub resource_tags: Vec<String>,
}

/// Indices into the input batch, grouped into sequential stages.
pub type StagePlan = Vec<Vec<usize>>;

/// Order a batch into parallelism-safe stages.
///
/// Returns stages of input indices. Calls inside a stage are mutually
/// independent and tag-disjoint; stage `N` must finish before stage `N+1`
/// starts. Fails with [`CyclicDependency`](crate::error::ErrorKind) when
/// the dependency graph cannot be ordered.
pub fn plan_stages(nodes: &[BatchNode], max_concurrent: usize) -> Result<StagePlan, ToolError> {
    if nodes.is_empty() {
        return Ok(Vec::new());
    }

    // Tool name → indices of its calls, for dependency edge expansion.
    let mut by_tool: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, node) in nodes.iter().enumerate() {
        by_tool.entry(node.tool_name.as_str()).or_default().push(index);
    }

    // Build in-degrees and adjacency. An edge dep → node exists for every
    // call of a declared prerequisite tool present in this batch.
    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for (index, node) in nodes.iter().enumerate() {
        for dep_tool in &node.dependencies {
            for &dep_index in by_tool.get(dep_tool.as_str()).map(Vec::as_slice).unwrap_or(&[]) {
                if dep_index == index {
                    continue;
                }
                in_degree[index] += 1;
                dependents.entry(dep_index).or_default().push(index);
            }
        }
    }

    // Kahn's algorithm, wave by wave.
    let mut waves: Vec<Vec<usize>> = Vec::new();
    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut processed = 0;

    while !queue.is_empty() {
        let wave_size = queue.len();
        let mut wave = Vec::with_capacity(wave_size);
        for _ in 0..wave_size {
            let index = queue.pop_front().expect("queue length checked above");
            processed += 1;
            for &dependent in dependents.get(&index).map(Vec::as_slice).unwrap_or(&[]) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
            wave.push(index);
        }
        wave.sort_unstable(); // keep submission order within a wave
        waves.push(wave);
    }

    if processed < nodes.len() {
        return Err(ToolError::cyclic_dependency(nodes.len() - processed, nodes.len()));
    }

    // Split waves into tag-disjoint stages capped at the concurrency limit.
    let cap = max_concurrent.max(1);
    let mut stages: StagePlan = Vec::new();
    for wave in waves {
        let mut open: Vec<(Vec<usize>, HashSet<&str>)> = Vec::new();
        for index in wave {
            let tags: Vec<&str> = nodes[index].resource_tags.iter().map(String::as_str).collect();
            let slot = open.iter_mut().find(|(members, held)| {
                members.len() < cap && tags.iter().all(|t| !held.contains(t))
            });
            match slot {
                Some((members, held)) => {
                    members.push(index);
                    held.extend(tags);
                }
                None => {
                    open.push((vec![index], tags.into_iter().collect()));
                }
            }
        }
        stages.extend(open.into_iter().map(|(members, _)| members));
    }

    Ok(stages)
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn node(id: &str, tool: &str, deps: &[&str], tags: &[&str]) -> BatchNode {
        BatchNode {
            request_id: id.to_string(),
            tool_name: tool.to_string(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            resource_tags: tags.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn empty_batch_has_no_stages() {
        assert!(plan_stages(&[], 4).unwrap().is_empty());
    }

    #[test]
    fn independent_calls_form_a_single_stage() {
        let nodes = vec![
            node("1", "read", &[], &[]),
            node("2", "grep", &[], &[]),
            node("3", "list", &[], &[]),
        ];
        let stages = plan_stages(&nodes, 4).unwrap();
        assert_eq!(stages, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn linear_dependency_chain() {
        // c depends on b's tool, b depends on a's tool.
        let nodes = vec![
            node("1", "a", &[], &[]),
            node("2", "b", &["a"], &[]),
            node("3", "c", &["b"], &[]),
        ];
        let stages = plan_stages(&nodes, 4).unwrap();
        assert_eq!(stages, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn diamond_dependency() {
        let nodes = vec![
            node("1", "fetch", &[], &[]),
            node("2", "parse", &["fetch"], &[]),
            node("3", "lint", &["fetch"], &[]),
            node("4", "report", &["parse"], &[]),
        ];
        let stages = plan_stages(&nodes, 4).unwrap();
        assert_eq!(stages, vec![vec![0], vec![1, 2], vec![3]]);
    }

    #[test]
    fn cycle_rejects_the_whole_batch() {
        let nodes = vec![
            node("1", "a", &["b"], &[]),
            node("2", "b", &["a"], &[]),
        ];
        let err = plan_stages(&nodes, 4).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CyclicDependency);
        assert!(err.message.contains("2 of 2"));
    }

    #[test]
    fn dependency_on_absent_tool_is_ignored() {
        let nodes = vec![node("1", "b", &["not_in_batch"], &[])];
        let stages = plan_stages(&nodes, 4).unwrap();
        assert_eq!(stages, vec![vec![0]]);
    }

    #[test]
    fn self_dependency_does_not_deadlock() {
        let nodes = vec![node("1", "a", &["a"], &[])];
        let stages = plan_stages(&nodes, 4).unwrap();
        assert_eq!(stages, vec![vec![0]]);
    }

    #[test]
    fn shared_tags_split_a_wave() {
        let nodes = vec![
            node("1", "writer_a", &[], &["notes"]),
            node("2", "writer_b", &[], &["notes"]),
            node("3", "reader", &[], &[]),
        ];
        let stages = plan_stages(&nodes, 4).unwrap();
        // The two tagged calls may not share a stage; the untagged one
        // slots in with the first.
        assert_eq!(stages, vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn tags_do_not_order_across_waves() {
        // Tagged call in wave 2 is unaffected by wave-1 tag usage.
        let nodes = vec![
            node("1", "writer", &[], &["db"]),
            node("2", "reporter", &["writer"], &["db"]),
        ];
        let stages = plan_stages(&nodes, 4).unwrap();
        assert_eq!(stages, vec![vec![0], vec![1]]);
    }

    #[test]
    fn concurrency_cap_limits_stage_size() {
        let nodes: Vec<BatchNode> = (0..5)
            .map(|i| node(&i.to_string(), &format!("tool{i}"), &[], &[]))
            .collect();
        let stages = plan_stages(&nodes, 2).unwrap();
        assert_eq!(stages.len(), 3);
        assert!(stages.iter().all(|s| s.len() <= 2));
        let all: Vec<usize> = stages.into_iter().flatten().collect();
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn multiple_calls_of_a_dependency_tool_all_block() {
        let nodes = vec![
            node("1", "fetch", &[], &[]),
            node("2", "fetch", &[], &[]),
            node("3", "merge", &["fetch"], &[]),
        ];
        let stages = plan_stages(&nodes, 4).unwrap();
        assert_eq!(stages, vec![vec![0, 1], vec![2]]);
    }
}
