//! The intro quest: the entry point of the game.
//!
//! When a player forks the upstream repository, the caretaker bot opens a
//! welcome issue on their fork, follows up with a short briefing, waits a
//! moment, and then listens for the player to answer the challenge in a
//! reply comment.

use chrono::TimeDelta;
use regex::Regex;
use semver::Version;
use serde_json::json;

use crate::quest::data::DataSchema;
use crate::quest::definition::{Difficulty, QuestDefinition};
use crate::quest::error::QuestDefinitionError;
use crate::quest::stage::{
    CommentStage, CreateIssueStage, DelayStage, FinalStage, ReplyCheckStage,
};

pub const NAME: &str = "intro";

const WELCOME_TITLE: &str = "A visitor, already?";

const WELCOME_BODY: &str = "\
Well met, traveler.

I am the caretaker of this repository, and I keep track of everyone who \
forks it. Few do, fewer still on purpose. Since you are here: the archive \
has work for someone with your talents.

Stay close to this issue. I will explain shortly.";

const BRIEFING_ONE: &str = "\
First things first. The archive only opens for those who know the \
passphrase, and the passphrase is hidden in plain sight: it is the word \
everyone says when a change is good to merge.";

const BRIEFING_TWO: &str = "\
When you have it, reply here with `the word is <your answer>`. Take your \
time. The archive has waited years; it can wait for you.";

const WRONG_ANSWERS: [&str; 3] = [
    "Close, but the archive stays shut. Look again at how changes get approved.",
    "That is not it. Think about what a reviewer says when everything looks good.",
    "The archive does not stir. The word is shorter than you think.",
];

pub fn quest() -> Result<QuestDefinition, QuestDefinitionError> {
    let answer_pattern = Regex::new(r"(?i)the word is\s+`?(lgtm)`?").map_err(|e| {
        QuestDefinitionError::BadStageConfig {
            quest: NAME.to_string(),
            stage: "AwaitAnswer".to_string(),
            message: e.to_string(),
        }
    })?;

    QuestDefinition::builder(
        NAME,
        Version::new(0, 1, 0),
        Difficulty::Beginner,
        "The caretaker greets a new fork and tests its owner",
    )
    .schema(
        DataSchema::new()
            .field("welcome_issue", json!(0))
            .field("briefed_at", json!(0))
            .field("answer", json!(""))
            .field("answer_comment", json!(0)),
    )
    .stage(
        "Start",
        CreateIssueStage::new(&["Briefing"], WELCOME_TITLE, WELCOME_BODY, "welcome_issue"),
    )
    .stage(
        "Briefing",
        CommentStage::new(
            &["Breather"],
            "welcome_issue",
            &[BRIEFING_ONE, BRIEFING_TWO],
        )
        .stamping("briefed_at"),
    )
    .stage(
        "Breather",
        DelayStage::new(&["AwaitAnswer"], TimeDelta::seconds(60)),
    )
    .stage(
        "AwaitAnswer",
        ReplyCheckStage::new(&["Finish"], "welcome_issue", answer_pattern)
            .capturing(&["answer"])
            .storing_comment_id("answer_comment")
            .since("briefed_at")
            .incorrect_responses(&WRONG_ANSWERS),
    )
    .stage("Finish", FinalStage::new())
    .build()
}
