use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::graph::{dependency_depths, validate_dependencies};
use crate::config::Strategy;
use crate::error::Result;
use crate::project::{Task, Team};

/// A set of same-team tasks with no dependencies between each other,
/// executed by one Team Lead with bounded concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub team: Team,
    pub task_ids: Vec<String>,
}

impl Group {
    pub fn len(&self) -> usize {
        self.task_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }
}

/// Groups that may run concurrently. Every dependency of every task in a
/// stage lives in a strictly earlier stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub index: usize,
    pub groups: Vec<Group>,
}

impl Stage {
    pub fn task_count(&self) -> usize {
        self.groups.iter().map(Group::len).sum()
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|g| g.task_ids.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub strategy: Strategy,
    pub stages: Vec<Stage>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.stages.iter().map(Stage::task_count).sum()
    }

    /// Total tasks over number of stages. At or above 1.5 the hybrid mode
    /// picks parallel execution.
    pub fn parallelism_score(&self) -> f64 {
        if self.stages.is_empty() {
            return 0.0;
        }
        self.task_count() as f64 / self.stages.len() as f64
    }
}

/// Build the execution plan for the given tasks.
///
/// Tasks at equal dependency depth form a candidate stage; within it they
/// are partitioned by team and chunked to the strategy's group size. The
/// conservative strategy additionally forbids mixed-team stages, so each
/// depth level splits into one stage per team.
pub fn analyze(tasks: &[Task], strategy: Strategy) -> Result<ExecutionPlan> {
    validate_dependencies(tasks)?;

    if tasks.is_empty() {
        return Ok(ExecutionPlan {
            strategy,
            stages: Vec::new(),
        });
    }

    let depths = dependency_depths(tasks);

    // depth -> team -> ordered task ids. BTreeMaps keep the plan
    // deterministic for identical input.
    let mut levels: BTreeMap<usize, BTreeMap<&'static str, (Team, Vec<String>)>> = BTreeMap::new();
    for task in tasks {
        let depth = depths.get(&task.task_id).copied().unwrap_or(0);
        levels
            .entry(depth)
            .or_default()
            .entry(task.team.as_str())
            .or_insert_with(|| (task.team, Vec::new()))
            .1
            .push(task.task_id.clone());
    }

    let max_group_size = strategy.max_group_size();
    let mut stages = Vec::new();

    for (_, teams) in levels {
        if strategy.allows_cross_team_stages() {
            let mut groups = Vec::new();
            for (_, (team, ids)) in teams {
                chunk_into_groups(&mut groups, stages.len(), team, ids, max_group_size);
            }
            push_stage(&mut stages, groups);
        } else {
            // One stage per team at this depth.
            for (_, (team, ids)) in teams {
                let mut groups = Vec::new();
                chunk_into_groups(&mut groups, stages.len(), team, ids, max_group_size);
                push_stage(&mut stages, groups);
            }
        }
    }

    Ok(ExecutionPlan { strategy, stages })
}

fn chunk_into_groups(
    groups: &mut Vec<Group>,
    stage_index: usize,
    team: Team,
    ids: Vec<String>,
    max_group_size: usize,
) {
    for chunk in ids.chunks(max_group_size) {
        groups.push(Group {
            id: format!("stage{}_{}_g{}", stage_index, team, groups.len()),
            team,
            task_ids: chunk.to_vec(),
        });
    }
}

fn push_stage(stages: &mut Vec<Stage>, groups: Vec<Group>) {
    if groups.is_empty() {
        return;
    }
    stages.push(Stage {
        index: stages.len(),
        groups,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MaosError;

    fn task(id: &str, team: Team, deps: &[&str]) -> Task {
        Task::new(id, id, format!("task {}", id))
            .with_team(team)
            .with_depends_on(deps.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn empty_task_list_yields_empty_plan() {
        let plan = analyze(&[], Strategy::Balanced).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.parallelism_score(), 0.0);
    }

    #[test]
    fn independent_tasks_form_one_stage_partitioned_by_team() {
        let tasks = vec![
            task("t1", Team::Frontend, &[]),
            task("t2", Team::Frontend, &[]),
            task("t3", Team::Backend, &[]),
        ];
        let plan = analyze(&tasks, Strategy::Balanced).unwrap();

        assert_eq!(plan.stages.len(), 1);
        let stage = &plan.stages[0];
        assert!(stage.groups.len() >= 2);
        assert_eq!(stage.task_count(), 3);

        for group in &stage.groups {
            for id in &group.task_ids {
                let owner = tasks.iter().find(|t| &t.task_id == id).unwrap();
                assert_eq!(owner.team, group.team);
            }
        }
    }

    #[test]
    fn chain_yields_one_stage_per_task_for_every_strategy() {
        let tasks = vec![
            task("a", Team::General, &[]),
            task("b", Team::General, &["a"]),
            task("c", Team::General, &["b"]),
            task("d", Team::General, &["c"]),
        ];
        for strategy in [
            Strategy::Conservative,
            Strategy::Balanced,
            Strategy::Aggressive,
        ] {
            let plan = analyze(&tasks, strategy).unwrap();
            assert_eq!(plan.stages.len(), 4, "strategy {}", strategy);
            for stage in &plan.stages {
                assert_eq!(stage.groups.len(), 1);
                assert_eq!(stage.groups[0].len(), 1);
            }
            assert!((plan.parallelism_score() - 1.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn dependencies_always_land_in_earlier_stages() {
        let tasks = vec![
            task("a", Team::Backend, &[]),
            task("b", Team::Frontend, &["a"]),
            task("c", Team::Backend, &["a"]),
            task("d", Team::Qa, &["b", "c"]),
        ];
        let plan = analyze(&tasks, Strategy::Balanced).unwrap();

        let stage_of = |id: &str| {
            plan.stages
                .iter()
                .position(|s| s.task_ids().any(|t| t == id))
                .unwrap()
        };

        for t in &tasks {
            for dep in &t.depends_on {
                assert!(stage_of(dep) < stage_of(&t.task_id));
            }
        }
    }

    #[test]
    fn groups_respect_max_group_size() {
        let tasks: Vec<Task> = (0..9)
            .map(|i| task(&format!("t{}", i), Team::Frontend, &[]))
            .collect();

        let plan = analyze(&tasks, Strategy::Balanced).unwrap();
        assert_eq!(plan.stages.len(), 1);
        let sizes: Vec<usize> = plan.stages[0].groups.iter().map(Group::len).collect();
        assert_eq!(sizes, vec![4, 4, 1]);

        let plan = analyze(&tasks, Strategy::Aggressive).unwrap();
        let sizes: Vec<usize> = plan.stages[0].groups.iter().map(Group::len).collect();
        assert_eq!(sizes, vec![8, 1]);
    }

    #[test]
    fn conservative_splits_mixed_team_levels() {
        let tasks = vec![
            task("f1", Team::Frontend, &[]),
            task("b1", Team::Backend, &[]),
        ];
        let conservative = analyze(&tasks, Strategy::Conservative).unwrap();
        assert_eq!(conservative.stages.len(), 2);
        for stage in &conservative.stages {
            let teams: Vec<Team> = stage.groups.iter().map(|g| g.team).collect();
            assert!(teams.windows(2).all(|w| w[0] == w[1]));
        }

        let balanced = analyze(&tasks, Strategy::Balanced).unwrap();
        assert_eq!(balanced.stages.len(), 1);
    }

    #[test]
    fn cycle_propagates_as_error() {
        let tasks = vec![
            task("a", Team::General, &["b"]),
            task("b", Team::General, &["a"]),
        ];
        assert!(matches!(
            analyze(&tasks, Strategy::Balanced).unwrap_err(),
            MaosError::CycleDetected { .. }
        ));
    }

    #[test]
    fn parallelism_score_reflects_width() {
        let tasks = vec![
            task("a", Team::General, &[]),
            task("b", Team::General, &[]),
            task("c", Team::General, &[]),
        ];
        let plan = analyze(&tasks, Strategy::Balanced).unwrap();
        assert!((plan.parallelism_score() - 3.0).abs() < f64::EPSILON);
    }
}
