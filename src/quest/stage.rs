//! Quest Stages
//!
//! A stage is one node in a quest's graph. Every pass over a ready stage
//! runs the same flow:
//!
//! ```text
//! stage.prepare(ctx)
//! if stage.condition(ctx) {
//!     stage.execute(ctx)
//!     if stage.is_done(ctx) {
//!         // stage joins completed_stages, children unblock
//!     }
//! }
//! ```
//!
//! Fast ticks swap in `fast_condition`/`fast_execute`, which default to the
//! full versions; API-heavy stages override them to stay off rate-limited
//! services between full ticks.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rand::seq::SliceRandom;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::error::QuestError;
use super::state::QuestProgress;
use crate::character::Character;
use crate::game::Game;

/// Everything a stage hook may touch: the quest instance (data bag plus
/// this stage's scratch slot), the owning game, and the character.
pub struct StageContext<'a> {
    pub progress: &'a mut QuestProgress,
    pub game: &'a Game,
    pub character: &'a dyn Character,
    stage_name: &'a str,
}

impl<'a> StageContext<'a> {
    pub fn new(
        progress: &'a mut QuestProgress,
        game: &'a Game,
        character: &'a dyn Character,
        stage_name: &'a str,
    ) -> Self {
        Self {
            progress,
            game,
            character,
            stage_name,
        }
    }

    pub fn get(&self, field: &str) -> Result<Value, QuestError> {
        self.progress.data.get(field).cloned()
    }

    pub fn set(&mut self, field: &str, value: Value) -> Result<(), QuestError> {
        self.progress.data.set(field, value)
    }

    /// This stage's scratch slot, if it has written one.
    pub fn stage_data(&self) -> Option<&Value> {
        self.progress.data.stage_data(self.stage_name)
    }

    pub fn set_stage_data(&mut self, value: Value) {
        self.progress.data.set_stage_data(self.stage_name, value);
    }

    pub fn mark_quest_complete(&mut self) {
        self.progress.mark_quest_complete();
    }
}

/// One unit of quest logic. Implementations override only the hooks they
/// need; the defaults make a stage that always runs and completes in one
/// execution.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stages unblocked by this one. Declared statically; these are the
    /// edges of the quest graph.
    fn children(&self) -> &[String];

    /// One-time-per-ready-cycle setup. May run several times before the
    /// stage completes, so it must be idempotent.
    async fn prepare(&self, _ctx: &mut StageContext<'_>) -> Result<(), QuestError> {
        Ok(())
    }

    /// Whether `execute` should run this pass. May call external services;
    /// quest progression is driven by external state.
    async fn condition(&self, _ctx: &mut StageContext<'_>) -> Result<bool, QuestError> {
        Ok(true)
    }

    /// Cheap variant used on high-frequency ticks.
    async fn fast_condition(&self, ctx: &mut StageContext<'_>) -> Result<bool, QuestError> {
        self.condition(ctx).await
    }

    /// The stage's side effect.
    async fn execute(&self, _ctx: &mut StageContext<'_>) -> Result<(), QuestError> {
        Ok(())
    }

    /// Cheap variant used on high-frequency ticks.
    async fn fast_execute(&self, ctx: &mut StageContext<'_>) -> Result<(), QuestError> {
        self.execute(ctx).await
    }

    /// Whether the stage should be marked completed after `execute`.
    async fn is_done(&self, _ctx: &mut StageContext<'_>) -> Result<bool, QuestError> {
        Ok(true)
    }
}

fn to_children(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

// ============================================================================
// DebugStage
// ============================================================================

/// Logs and completes; used by the debug quest and tests.
pub struct DebugStage {
    children: Vec<String>,
}

impl DebugStage {
    pub fn new(children: &[&str]) -> Self {
        Self {
            children: to_children(children),
        }
    }
}

#[async_trait]
impl Stage for DebugStage {
    fn children(&self) -> &[String] {
        &self.children
    }

    async fn prepare(&self, ctx: &mut StageContext<'_>) -> Result<(), QuestError> {
        debug!("Debug stage prepare for {}", ctx.progress.quest_name);
        Ok(())
    }

    async fn execute(&self, ctx: &mut StageContext<'_>) -> Result<(), QuestError> {
        info!("Debug stage execute for {}", ctx.progress.quest_name);
        Ok(())
    }
}

// ============================================================================
// FinalStage
// ============================================================================

/// Terminal node: executing it marks the owning quest complete. Declares no
/// children by construction.
pub struct FinalStage {
    children: Vec<String>,
}

impl FinalStage {
    pub fn new() -> Self {
        Self {
            children: Vec::new(),
        }
    }
}

impl Default for FinalStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for FinalStage {
    fn children(&self) -> &[String] {
        &self.children
    }

    async fn execute(&self, ctx: &mut StageContext<'_>) -> Result<(), QuestError> {
        info!("Quest {} reached its ending", ctx.progress.quest_name);
        ctx.mark_quest_complete();
        Ok(())
    }
}

// ============================================================================
// ConditionStage
// ============================================================================

/// Comparison operator for branch conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    /// Apply to two data values. Ordering works on numbers and strings;
    /// anything else only supports equality.
    fn apply(self, left: &Value, right: &Value) -> Result<bool, QuestError> {
        match self {
            CompareOp::Eq => return Ok(left == right),
            CompareOp::Ne => return Ok(left != right),
            _ => {}
        }

        let ordering = match (left, right) {
            (Value::Number(l), Value::Number(r)) => {
                let (l, r) = (l.as_f64(), r.as_f64());
                match (l, r) {
                    (Some(l), Some(r)) => l.partial_cmp(&r),
                    _ => None,
                }
            }
            (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
            _ => None,
        };
        let Some(ordering) = ordering else {
            return Err(QuestError::Data(format!(
                "cannot order {} against {}",
                left, right
            )));
        };

        Ok(match self {
            CompareOp::Gt => ordering.is_gt(),
            CompareOp::Ge => ordering.is_ge(),
            CompareOp::Lt => ordering.is_lt(),
            CompareOp::Le => ordering.is_le(),
            CompareOp::Eq | CompareOp::Ne => unreachable!(),
        })
    }
}

/// What the named variable is compared against.
enum CompareTarget {
    Field(String),
    Literal(Value),
}

/// Branch gate: compares a data field against another field or a literal.
/// The comparison itself is the condition; there is no side effect.
pub struct ConditionStage {
    children: Vec<String>,
    variable: String,
    target: CompareTarget,
    op: CompareOp,
}

impl ConditionStage {
    /// Compare `variable` against another data field, with equality.
    pub fn against_field(children: &[&str], variable: &str, other: &str) -> Self {
        Self {
            children: to_children(children),
            variable: variable.to_string(),
            target: CompareTarget::Field(other.to_string()),
            op: CompareOp::Eq,
        }
    }

    /// Compare `variable` against a fixed value, with equality.
    pub fn against_value(children: &[&str], variable: &str, value: Value) -> Self {
        Self {
            children: to_children(children),
            variable: variable.to_string(),
            target: CompareTarget::Literal(value),
            op: CompareOp::Eq,
        }
    }

    pub fn with_op(mut self, op: CompareOp) -> Self {
        self.op = op;
        self
    }
}

#[async_trait]
impl Stage for ConditionStage {
    fn children(&self) -> &[String] {
        &self.children
    }

    async fn condition(&self, ctx: &mut StageContext<'_>) -> Result<bool, QuestError> {
        let left = ctx.get(&self.variable)?;
        let right = match &self.target {
            CompareTarget::Field(name) => ctx.get(name)?,
            CompareTarget::Literal(value) => value.clone(),
        };

        let result = self.op.apply(&left, &right)?;
        debug!(
            "Condition stage: {} {:?} {} -> {}",
            left, self.op, right, result
        );
        Ok(result)
    }
}

// ============================================================================
// DelayStage
// ============================================================================

/// Holds its children back until a wall-clock duration has elapsed since the
/// stage first became ready.
pub struct DelayStage {
    children: Vec<String>,
    delay: TimeDelta,
}

impl DelayStage {
    pub fn new(children: &[&str], delay: TimeDelta) -> Self {
        Self {
            children: to_children(children),
            delay,
        }
    }
}

#[async_trait]
impl Stage for DelayStage {
    fn children(&self) -> &[String] {
        &self.children
    }

    /// On first visit, stamp the current time. Later visits leave the stamp
    /// alone, so the delay never re-arms.
    async fn prepare(&self, ctx: &mut StageContext<'_>) -> Result<(), QuestError> {
        if ctx.stage_data().is_none() {
            let now = Utc::now().timestamp_millis();
            debug!("Delay stage armed at {}", now);
            ctx.set_stage_data(json!(now));
        }
        Ok(())
    }

    async fn condition(&self, ctx: &mut StageContext<'_>) -> Result<bool, QuestError> {
        let armed = ctx
            .stage_data()
            .and_then(Value::as_i64)
            .unwrap_or_default();
        let target = armed + self.delay.num_milliseconds();
        Ok(Utc::now().timestamp_millis() > target)
    }
}

// ============================================================================
// CreateIssueStage
// ============================================================================

/// Opens an issue on the game's fork and records its number in the data bag
/// for downstream comment and reply stages.
pub struct CreateIssueStage {
    children: Vec<String>,
    title: String,
    body: String,
    issue_field: String,
}

impl CreateIssueStage {
    pub fn new(children: &[&str], title: &str, body: &str, issue_field: &str) -> Self {
        Self {
            children: to_children(children),
            title: title.to_string(),
            body: body.to_string(),
            issue_field: issue_field.to_string(),
        }
    }
}

#[async_trait]
impl Stage for CreateIssueStage {
    fn children(&self) -> &[String] {
        &self.children
    }

    async fn execute(&self, ctx: &mut StageContext<'_>) -> Result<(), QuestError> {
        let issue = ctx
            .character
            .create_issue(&ctx.game.fork_url, &self.title, &self.body)
            .await?;
        info!(
            "Opened issue #{} on {} for game {}",
            issue, ctx.game.fork_url, ctx.game.key
        );
        ctx.set(&self.issue_field, json!(issue))
    }
}

// ============================================================================
// CommentStage
// ============================================================================

/// Posts one or more scripted comments (a single message or a short
/// conversation) on a previously recorded issue.
pub struct CommentStage {
    children: Vec<String>,
    issue_field: String,
    messages: Vec<String>,
    /// Data field stamped with the last comment's post time, for downstream
    /// reply polling
    stamp_field: Option<String>,
}

impl CommentStage {
    pub fn new(children: &[&str], issue_field: &str, messages: &[&str]) -> Self {
        Self {
            children: to_children(children),
            issue_field: issue_field.to_string(),
            messages: messages.iter().map(|m| m.to_string()).collect(),
            stamp_field: None,
        }
    }

    pub fn stamping(mut self, field: &str) -> Self {
        self.stamp_field = Some(field.to_string());
        self
    }
}

#[async_trait]
impl Stage for CommentStage {
    fn children(&self) -> &[String] {
        &self.children
    }

    async fn execute(&self, ctx: &mut StageContext<'_>) -> Result<(), QuestError> {
        let issue = issue_number(ctx, &self.issue_field)?;

        for message in &self.messages {
            ctx.character
                .create_comment(&ctx.game.fork_url, issue, message)
                .await?;
        }
        debug!(
            "Posted {} comment(s) on {}#{}",
            self.messages.len(),
            ctx.game.fork_url,
            issue
        );

        if let Some(field) = &self.stamp_field {
            ctx.set(field, json!(Utc::now().timestamp_millis()))?;
        }
        Ok(())
    }
}

// ============================================================================
// ReplyCheckStage
// ============================================================================

/// Polls a recorded issue for a reply from the player matching a pattern.
/// On the first match it stores the capture groups (and optionally the
/// comment id) and passes; on a non-matching reply it posts a configured
/// "incorrect" response. The fast cadence only ever performs the first
/// check, then defers to full ticks so the issue API is not hammered.
pub struct ReplyCheckStage {
    children: Vec<String>,
    issue_field: String,
    pattern: Regex,
    /// Data fields receiving capture groups 1..=N of the matching body
    capture_fields: Vec<String>,
    comment_id_field: Option<String>,
    /// Data field holding an externally stamped "last comment" time
    since_field: Option<String>,
    incorrect_responses: Vec<String>,
}

impl ReplyCheckStage {
    pub fn new(children: &[&str], issue_field: &str, pattern: Regex) -> Self {
        Self {
            children: to_children(children),
            issue_field: issue_field.to_string(),
            pattern,
            capture_fields: Vec::new(),
            comment_id_field: None,
            since_field: None,
            incorrect_responses: Vec::new(),
        }
    }

    pub fn capturing(mut self, fields: &[&str]) -> Self {
        self.capture_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn storing_comment_id(mut self, field: &str) -> Self {
        self.comment_id_field = Some(field.to_string());
        self
    }

    pub fn since(mut self, field: &str) -> Self {
        self.since_field = Some(field.to_string());
        self
    }

    pub fn incorrect_responses(mut self, responses: &[&str]) -> Self {
        self.incorrect_responses = responses.iter().map(|r| r.to_string()).collect();
        self
    }

    /// The later of this stage's own last-checked time and the externally
    /// stamped last-comment time.
    fn since_time(&self, ctx: &StageContext<'_>) -> Result<Option<DateTime<Utc>>, QuestError> {
        let own = ctx.stage_data().and_then(Value::as_i64);
        let external = match &self.since_field {
            Some(field) => ctx.progress.data.get(field)?.as_i64(),
            None => None,
        };
        let millis = match (own, external) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        Ok(millis.and_then(DateTime::from_timestamp_millis))
    }
}

#[async_trait]
impl Stage for ReplyCheckStage {
    fn children(&self) -> &[String] {
        &self.children
    }

    async fn condition(&self, ctx: &mut StageContext<'_>) -> Result<bool, QuestError> {
        let issue = issue_number(ctx, &self.issue_field)?;
        let since = self.since_time(ctx)?;

        let comments = ctx
            .character
            .comments_from_user_since(&ctx.game.fork_url, issue, ctx.game.user_id, since)
            .await?;

        // remember that a check happened, whatever its outcome
        ctx.set_stage_data(json!(Utc::now().timestamp_millis()));

        for (comment_id, body) in &comments {
            let Some(captures) = self.pattern.captures(body) else {
                continue;
            };
            info!("Reply {} matched on issue #{}", comment_id, issue);

            for (i, field) in self.capture_fields.iter().enumerate() {
                let text = captures.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
                ctx.set(field, json!(text))?;
            }
            if let Some(field) = &self.comment_id_field {
                ctx.set(field, json!(comment_id))?;
            }
            return Ok(true);
        }

        if !comments.is_empty() && !self.incorrect_responses.is_empty() {
            let response = {
                let mut rng = rand::thread_rng();
                self.incorrect_responses.choose(&mut rng).cloned()
            };
            if let Some(response) = response {
                debug!("No matching reply on issue #{}, nudging player", issue);
                ctx.character
                    .create_comment(&ctx.game.fork_url, issue, &response)
                    .await?;
            }
        }

        Ok(false)
    }

    /// Check for real only while the scratch is empty (never checked);
    /// afterwards leave polling to the full cadence.
    async fn fast_condition(&self, ctx: &mut StageContext<'_>) -> Result<bool, QuestError> {
        if ctx.stage_data().is_some() {
            return Ok(false);
        }
        self.condition(ctx).await
    }
}

/// Read a previously recorded issue number from the data bag.
fn issue_number(ctx: &StageContext<'_>, field: &str) -> Result<i64, QuestError> {
    ctx.progress
        .data
        .get(field)?
        .as_i64()
        .filter(|n| *n > 0)
        .ok_or_else(|| QuestError::Data(format!("field '{}' holds no issue number", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::testing::StubCharacter;
    use crate::quest::content;
    use crate::quest::data::DataSchema;
    use crate::quest::state::QuestProgress;

    fn test_game() -> Game {
        Game {
            key: "4242".to_string(),
            user_login: "player".to_string(),
            user_id: 4242,
            fork_url: "player/sandbox".to_string(),
        }
    }

    fn progress_with(schema: DataSchema) -> QuestProgress {
        // borrow the debug quest's shape, swap in the schema under test
        let definition = content::debug::quest().unwrap();
        let mut progress = QuestProgress::new(&definition);
        progress.data = schema.instantiate();
        progress
    }

    fn reply_schema() -> DataSchema {
        DataSchema::new()
            .field("issue", json!(7))
            .field("answer", json!(""))
            .field("reply_id", json!(0))
    }

    #[tokio::test]
    async fn test_condition_stage_field_compare() {
        let stage = ConditionStage::against_field(&[], "value_a", "value_b");
        let schema = DataSchema::new()
            .field("value_a", json!(1))
            .field("value_b", json!(2));
        let mut progress = progress_with(schema);
        let game = test_game();
        let character = StubCharacter::new();

        let mut ctx = StageContext::new(&mut progress, &game, &character, "Branch");
        assert!(!stage.condition(&mut ctx).await.unwrap());

        ctx.set("value_b", json!(1)).unwrap();
        assert!(stage.condition(&mut ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_condition_stage_value_compare() {
        let stage =
            ConditionStage::against_value(&[], "value_a", json!(10)).with_op(CompareOp::Gt);
        let mut progress = progress_with(DataSchema::new().field("value_a", json!(1)));
        let game = test_game();
        let character = StubCharacter::new();

        let mut ctx = StageContext::new(&mut progress, &game, &character, "Branch");
        assert!(!stage.condition(&mut ctx).await.unwrap());

        ctx.set("value_a", json!(100)).unwrap();
        assert!(stage.condition(&mut ctx).await.unwrap());
    }

    #[test]
    fn test_compare_op_ordering() {
        assert!(CompareOp::Le.apply(&json!(1), &json!(1)).unwrap());
        assert!(CompareOp::Lt.apply(&json!(1), &json!(2)).unwrap());
        assert!(CompareOp::Ge.apply(&json!("b"), &json!("a")).unwrap());
        assert!(CompareOp::Ne.apply(&json!(true), &json!(false)).unwrap());
        // ordering across types is a data error, not a silent false
        assert!(CompareOp::Gt.apply(&json!(1), &json!("a")).is_err());
    }

    #[tokio::test]
    async fn test_delay_stage_arms_once() {
        let stage = DelayStage::new(&[], TimeDelta::hours(1));
        let mut progress = progress_with(DataSchema::new());
        let game = test_game();
        let character = StubCharacter::new();

        let mut ctx = StageContext::new(&mut progress, &game, &character, "Delay");
        stage.prepare(&mut ctx).await.unwrap();
        let armed = ctx.stage_data().cloned().unwrap();

        // prepare runs on every ready pass; the stamp must not move
        stage.prepare(&mut ctx).await.unwrap();
        assert_eq!(ctx.stage_data().cloned().unwrap(), armed);
        assert!(!stage.condition(&mut ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_delay_stage_elapses() {
        let stage = DelayStage::new(&[], TimeDelta::milliseconds(-10));
        let mut progress = progress_with(DataSchema::new());
        let game = test_game();
        let character = StubCharacter::new();

        let mut ctx = StageContext::new(&mut progress, &game, &character, "Delay");
        stage.prepare(&mut ctx).await.unwrap();
        assert!(stage.condition(&mut ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_issue_stage_records_number() {
        let stage = CreateIssueStage::new(&[], "Welcome", "Hello there", "issue");
        let mut progress = progress_with(DataSchema::new().field("issue", json!(0)));
        let game = test_game();
        let character = StubCharacter::new();

        let mut ctx = StageContext::new(&mut progress, &game, &character, "Start");
        stage.execute(&mut ctx).await.unwrap();

        let issue = ctx.get("issue").unwrap();
        assert_eq!(issue, json!(100));
        assert_eq!(character.posted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_comment_stage_conversation() {
        let stage = CommentStage::new(&[], "issue", &["first", "second", "third"])
            .stamping("commented_at");
        let schema = DataSchema::new()
            .field("issue", json!(7))
            .field("commented_at", json!(0));
        let mut progress = progress_with(schema);
        let game = test_game();
        let character = StubCharacter::new();

        let mut ctx = StageContext::new(&mut progress, &game, &character, "Chat");
        stage.execute(&mut ctx).await.unwrap();

        assert_eq!(
            *character.posted.lock().unwrap(),
            vec!["first", "second", "third"]
        );
        assert!(ctx.get("commented_at").unwrap().as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_reply_check_match_stores_captures() {
        let stage = ReplyCheckStage::new(&[], "issue", Regex::new(r"(?i)the word is (\w+)").unwrap())
            .capturing(&["answer"])
            .storing_comment_id("reply_id");
        let mut progress = progress_with(reply_schema());
        let game = test_game();
        let character = StubCharacter::new();
        character.set_replies(&[(900, "The word is sesame")]);

        let mut ctx = StageContext::new(&mut progress, &game, &character, "Await");
        assert!(stage.condition(&mut ctx).await.unwrap());
        assert_eq!(ctx.get("answer").unwrap(), json!("sesame"));
        assert_eq!(ctx.get("reply_id").unwrap(), json!(900));
    }

    #[tokio::test]
    async fn test_reply_check_wrong_answer_nudges() {
        let stage = ReplyCheckStage::new(&[], "issue", Regex::new(r"(?i)sesame").unwrap())
            .incorrect_responses(&["Not quite."]);
        let mut progress = progress_with(reply_schema());
        let game = test_game();
        let character = StubCharacter::new();
        character.set_replies(&[(900, "open barley")]);

        let mut ctx = StageContext::new(&mut progress, &game, &character, "Await");
        assert!(!stage.condition(&mut ctx).await.unwrap());
        assert_eq!(*character.posted.lock().unwrap(), vec!["Not quite."]);
    }

    #[tokio::test]
    async fn test_reply_check_fast_checks_only_once() {
        let stage = ReplyCheckStage::new(&[], "issue", Regex::new(r"(?i)sesame").unwrap());
        let mut progress = progress_with(reply_schema());
        let game = test_game();
        let character = StubCharacter::new();

        let mut ctx = StageContext::new(&mut progress, &game, &character, "Await");

        // first fast check hits the API for real
        assert!(!stage.fast_condition(&mut ctx).await.unwrap());
        assert_eq!(character.fetches(), 1);

        // later fast checks stay off the API entirely
        assert!(!stage.fast_condition(&mut ctx).await.unwrap());
        assert!(!stage.fast_condition(&mut ctx).await.unwrap());
        assert_eq!(character.fetches(), 1);

        // the full cadence keeps checking
        assert!(!stage.condition(&mut ctx).await.unwrap());
        assert_eq!(character.fetches(), 2);
    }

    #[tokio::test]
    async fn test_reply_check_fast_passes_on_first_match() {
        let stage = ReplyCheckStage::new(&[], "issue", Regex::new(r"(?i)sesame").unwrap());
        let mut progress = progress_with(reply_schema());
        let game = test_game();
        let character = StubCharacter::new();
        character.set_replies(&[(900, "sesame!")]);

        let mut ctx = StageContext::new(&mut progress, &game, &character, "Await");
        assert!(stage.fast_condition(&mut ctx).await.unwrap());
    }
}
