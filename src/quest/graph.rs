//! Stage Dependency Graph
//!
//! A quest's stages declare their children; each stage is a prerequisite of
//! every child it lists. The graph validates those declarations at build
//! time (dangling names, cycles) and then drives execution order: ready
//! stages are handed out at most once per graph lifetime, and a stage's
//! children only become ready after it is marked done.
//!
//! Graphs are rebuilt fresh for every execution pass; only completion state
//! is persisted.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::error::QuestDefinitionError;

#[derive(Debug)]
pub struct StageGraph {
    /// stage -> stages that must be done before it
    prereqs: BTreeMap<String, BTreeSet<String>>,
    /// stages marked done
    satisfied: BTreeSet<String>,
    /// stages already handed out by `take_ready`
    emitted: BTreeSet<String>,
}

impl StageGraph {
    /// Build and validate a graph from a stage -> children mapping. Every
    /// defect is reported here, before any stage executes.
    pub fn build(
        quest: &str,
        children: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, QuestDefinitionError> {
        let mut prereqs: BTreeMap<String, BTreeSet<String>> = children
            .keys()
            .map(|name| (name.clone(), BTreeSet::new()))
            .collect();

        for (stage, kids) in children {
            for child in kids {
                if !children.contains_key(child) {
                    return Err(QuestDefinitionError::UnknownChild {
                        quest: quest.to_string(),
                        stage: stage.clone(),
                        child: child.clone(),
                    });
                }
                if let Some(deps) = prereqs.get_mut(child) {
                    deps.insert(stage.clone());
                }
            }
        }

        detect_cycles(quest, children)?;

        Ok(Self {
            prereqs,
            satisfied: BTreeSet::new(),
            emitted: BTreeSet::new(),
        })
    }

    /// Stages whose prerequisites are all satisfied, each returned at most
    /// once per graph lifetime. Order within a wavefront is by name.
    pub fn take_ready(&mut self) -> Vec<String> {
        let ready: Vec<String> = self
            .prereqs
            .iter()
            .filter(|(name, deps)| {
                !self.emitted.contains(*name)
                    && !self.satisfied.contains(*name)
                    && deps.iter().all(|dep| self.satisfied.contains(dep))
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in &ready {
            self.emitted.insert(name.clone());
        }
        ready
    }

    /// Mark a stage satisfied, unblocking its children.
    pub fn mark_done(&mut self, name: &str) {
        self.satisfied.insert(name.to_string());
    }
}

/// Depth-first cycle check over the child edges.
fn detect_cycles(
    quest: &str,
    children: &BTreeMap<String, Vec<String>>,
) -> Result<(), QuestDefinitionError> {
    let mut visited = HashSet::new();
    let mut visiting = HashSet::new();

    fn visit(
        quest: &str,
        name: &str,
        children: &BTreeMap<String, Vec<String>>,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
    ) -> Result<(), QuestDefinitionError> {
        if visited.contains(name) {
            return Ok(());
        }
        if visiting.contains(name) {
            return Err(QuestDefinitionError::Cycle {
                quest: quest.to_string(),
                stage: name.to_string(),
            });
        }

        visiting.insert(name.to_string());
        if let Some(kids) = children.get(name) {
            for child in kids {
                visit(quest, child, children, visited, visiting)?;
            }
        }
        visiting.remove(name);
        visited.insert(name.to_string());

        Ok(())
    }

    for name in children.keys() {
        visit(quest, name, children, &mut visited, &mut visiting)?;
    }

    Ok(())
}
