use std::collections::{HashMap, HashSet};

use crate::error::{MaosError, Result};
use crate::project::Task;

/// Reject unknown `depends_on` references and cycles.
pub fn validate_dependencies(tasks: &[Task]) -> Result<()> {
    let known: HashSet<&str> = tasks.iter().map(|t| t.task_id.as_str()).collect();

    for task in tasks {
        for dep in &task.depends_on {
            if !known.contains(dep.as_str()) {
                return Err(MaosError::UnknownDependency {
                    task_id: task.task_id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let deps: HashMap<String, Vec<String>> = tasks
        .iter()
        .map(|t| (t.task_id.clone(), t.depends_on.clone()))
        .collect();

    if let Some(path) = detect_cycle(&deps) {
        return Err(MaosError::CycleDetected { path });
    }

    Ok(())
}

/// DFS cycle detection. Returns the path that closes the cycle, if any.
pub fn detect_cycle(dependencies: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    let mut roots: Vec<&String> = dependencies.keys().collect();
    roots.sort();

    for node in roots {
        if dfs_cycle(node, dependencies, &mut visited, &mut rec_stack, &mut path) {
            return Some(path);
        }
    }

    None
}

fn dfs_cycle(
    node: &str,
    graph: &HashMap<String, Vec<String>>,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool {
    let node_str = node.to_string();

    if rec_stack.contains(&node_str) {
        path.push(node_str);
        return true;
    }

    if visited.contains(&node_str) {
        return false;
    }

    visited.insert(node_str.clone());
    rec_stack.insert(node_str.clone());
    path.push(node_str.clone());

    if let Some(deps) = graph.get(node) {
        for dep in deps {
            if dfs_cycle(dep, graph, visited, rec_stack, path) {
                return true;
            }
        }
    }

    rec_stack.remove(&node_str);
    path.pop();
    false
}

/// Longest-path depth per task (Kahn's algorithm). Roots are depth 0; every
/// other task sits one past its deepest dependency. Callers must have
/// validated the graph first; tasks left unprocessed by a cycle are omitted.
pub fn dependency_depths(tasks: &[Task]) -> HashMap<String, usize> {
    let mut depths: HashMap<String, usize> = HashMap::new();
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in tasks {
        indegree.insert(&task.task_id, task.depends_on.len());
        for dep in &task.depends_on {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(&task.task_id);
        }
    }

    let mut frontier: Vec<&str> = tasks
        .iter()
        .filter(|t| t.depends_on.is_empty())
        .map(|t| t.task_id.as_str())
        .collect();
    frontier.sort();

    for id in &frontier {
        depths.insert((*id).to_string(), 0);
    }

    while let Some(id) = frontier.pop() {
        let depth = depths[id];
        if let Some(next) = dependents.get(id) {
            for dependent in next {
                let entry = depths.entry((*dependent).to_string()).or_insert(0);
                *entry = (*entry).max(depth + 1);

                let remaining = indegree.get_mut(dependent).expect("dependent is indexed");
                *remaining -= 1;
                if *remaining == 0 {
                    frontier.push(dependent);
                }
            }
        }
    }

    depths
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(id, id, format!("task {}", id))
            .with_depends_on(deps.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn no_cycle_in_diamond() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ];
        assert!(validate_dependencies(&tasks).is_ok());
    }

    #[test]
    fn simple_cycle_rejected() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        let err = validate_dependencies(&tasks).unwrap_err();
        assert!(matches!(err, MaosError::CycleDetected { .. }));
    }

    #[test]
    fn self_cycle_rejected() {
        let tasks = vec![task("a", &["a"])];
        assert!(matches!(
            validate_dependencies(&tasks).unwrap_err(),
            MaosError::CycleDetected { .. }
        ));
    }

    #[test]
    fn unknown_dependency_rejected() {
        let tasks = vec![task("a", &["ghost"])];
        let err = validate_dependencies(&tasks).unwrap_err();
        match err {
            MaosError::UnknownDependency {
                task_id,
                dependency,
            } => {
                assert_eq!(task_id, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected UnknownDependency, got {:?}", other),
        }
    }

    #[test]
    fn depths_follow_longest_path() {
        // a -> b -> d, a -> c -> d plus a shortcut a -> d: depth(d) = 2.
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c", "a"]),
        ];
        let depths = dependency_depths(&tasks);
        assert_eq!(depths["a"], 0);
        assert_eq!(depths["b"], 1);
        assert_eq!(depths["c"], 1);
        assert_eq!(depths["d"], 2);
    }

    #[test]
    fn independent_tasks_all_depth_zero() {
        let tasks = vec![task("a", &[]), task("b", &[]), task("c", &[])];
        let depths = dependency_depths(&tasks);
        assert!(depths.values().all(|&d| d == 0));
        assert_eq!(depths.len(), 3);
    }

    #[test]
    fn chain_depths_increase() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["b"]),
            task("d", &["c"]),
        ];
        let depths = dependency_depths(&tasks);
        assert_eq!(depths["d"], 3);
    }
}
