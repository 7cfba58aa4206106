//! Quest Execution Engine
//!
//! Drives one quest instance through its stage graph, one pass per trigger
//! (fork webhook, scheduled tick, manual tick). A pass rebuilds the graph
//! from the definition, replays persisted completion state into it, then
//! walks ready stages: prepare, cadence-appropriate condition, execute,
//! completion check. The instance is persisted exactly once, after the
//! pass; a pass that errors persists nothing, so the last saved state stays
//! intact and the failed stage is retried on the next trigger.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::definition::QuestDefinition;
use super::error::QuestError;
use super::registry::QuestRegistry;
use super::stage::StageContext;
use super::state::{QuestKey, QuestProgress};
use crate::character::Character;
use crate::game::Game;
use crate::store::{GameStore, QuestStore};

/// Which check/execute pair a pass uses. Fast ticks run frequently and must
/// stay cheap; full ticks may do complete (API-touching) checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickCadence {
    Fast,
    Full,
}

/// What one execution pass did.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PassReport {
    /// Stages whose execute hook ran this pass, in order
    pub executed: Vec<String>,
    /// Whether the quest is complete after the pass
    pub complete: bool,
}

/// Summary of one tick over all incomplete quest instances.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TickReport {
    pub processed: usize,
    pub advanced: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct QuestEngine {
    registry: Arc<QuestRegistry>,
    store: Arc<dyn QuestStore>,
    games: Arc<dyn GameStore>,
    character: Arc<dyn Character>,
    /// Per-game pass serialization; two triggers for the same game must not
    /// race load-modify-save
    pass_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl QuestEngine {
    pub fn new(
        registry: Arc<QuestRegistry>,
        store: Arc<dyn QuestStore>,
        games: Arc<dyn GameStore>,
        character: Arc<dyn Character>,
    ) -> Self {
        Self {
            registry,
            store,
            games,
            character,
            pass_locks: DashMap::new(),
        }
    }

    /// Instantiate the entry quest for a game (if absent) and run one full
    /// pass. Safe to call again on webhook re-delivery: an existing
    /// instance is simply advanced, a complete one is left untouched.
    pub async fn start_quest(&self, game: &Game) -> Result<PassReport, QuestError> {
        let definition = self.registry.first();
        self.run_definition(game, &definition, TickCadence::Full).await
    }

    /// Load, advance and persist one quest instance.
    pub async fn run(
        &self,
        game: &Game,
        quest_name: &str,
        cadence: TickCadence,
    ) -> Result<PassReport, QuestError> {
        let definition = self.registry.get(quest_name)?;
        self.run_definition(game, &definition, cadence).await
    }

    /// Advance every incomplete quest instance. One instance failing does
    /// not stop the sweep; failures are logged and counted.
    pub async fn tick(&self, cadence: TickCadence) -> Result<TickReport, QuestError> {
        let keys = self.store.incomplete_keys().await?;
        let mut report = TickReport::default();

        for key in keys {
            let game = match self.games.get_game(&key.game).await? {
                Some(game) => game,
                None => {
                    warn!("Quest {} has no game; skipping", key);
                    report.failed += 1;
                    continue;
                }
            };

            match self.run(&game, &key.quest, cadence).await {
                Ok(pass) => {
                    report.processed += 1;
                    if !pass.executed.is_empty() {
                        report.advanced += 1;
                    }
                    if pass.complete {
                        report.completed += 1;
                    }
                }
                Err(e) => {
                    error!("Tick pass failed for {}: {}", key, e);
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Tick ({:?}): {} processed, {} advanced, {} completed, {} failed",
            cadence, report.processed, report.advanced, report.completed, report.failed
        );
        Ok(report)
    }

    async fn run_definition(
        &self,
        game: &Game,
        definition: &QuestDefinition,
        cadence: TickCadence,
    ) -> Result<PassReport, QuestError> {
        let lock = self
            .pass_locks
            .entry(game.key.clone())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let key = QuestKey::new(&game.key, definition.name());
        let mut progress = match self.store.load(&key).await? {
            Some(record) => QuestProgress::from_record(definition, &record)?,
            None => {
                info!("Creating quest instance {}", key);
                QuestProgress::new(definition)
            }
        };

        let report = self
            .execute_pass(game, definition, &mut progress, cadence)
            .await?;

        // the single persist of the pass; reached only when every mutation
        // above succeeded
        self.store.save(&key, &progress.to_record(definition)?).await?;

        if !report.executed.is_empty() {
            info!(
                "Quest {} advanced through [{}]{}",
                key,
                report.executed.join(", "),
                if report.complete { ", complete" } else { "" }
            );
        }
        Ok(report)
    }

    async fn execute_pass(
        &self,
        game: &Game,
        definition: &QuestDefinition,
        progress: &mut QuestProgress,
        cadence: TickCadence,
    ) -> Result<PassReport, QuestError> {
        let mut report = PassReport::default();

        // global early exit: a complete quest is inert on re-delivery
        if progress.complete {
            report.complete = true;
            return Ok(report);
        }

        let mut graph = definition.graph()?;
        for name in progress.completed_stages().to_vec() {
            graph.mark_done(&name);
        }

        'pass: loop {
            let ready = graph.take_ready();
            if ready.is_empty() {
                // finished, or blocked on an external/time condition
                break;
            }

            for name in ready {
                // a terminal stage earlier in this pass ends it immediately;
                // a quest never executes two terminal stages in one pass
                if progress.complete {
                    break 'pass;
                }

                // guards against engine re-entry; completed stages are
                // normally pre-marked and never emitted
                if progress.is_stage_complete(&name) {
                    graph.mark_done(&name);
                    continue;
                }

                let Some(stage) = definition.stage(&name).map(Arc::clone) else {
                    continue;
                };

                let done = {
                    let mut ctx =
                        StageContext::new(progress, game, self.character.as_ref(), &name);

                    stage.prepare(&mut ctx).await?;

                    let passed = match cadence {
                        TickCadence::Fast => stage.fast_condition(&mut ctx).await?,
                        TickCadence::Full => stage.condition(&mut ctx).await?,
                    };
                    if !passed {
                        debug!("Stage {} of {} not ready", name, definition.name());
                        continue;
                    }

                    match cadence {
                        TickCadence::Fast => stage.fast_execute(&mut ctx).await?,
                        TickCadence::Full => stage.execute(&mut ctx).await?,
                    }

                    stage.is_done(&mut ctx).await?
                };

                progress.data.last_run = Some(Utc::now());
                report.executed.push(name.clone());

                if done {
                    progress.mark_stage_complete(&name);
                    graph.mark_done(&name);
                }
            }
        }

        report.complete = progress.complete;
        Ok(report)
    }
}
