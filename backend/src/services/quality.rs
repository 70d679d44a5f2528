//! OKR quality heuristic
//!
//! Advisory score for a draft objective and its key results. Four checks
//! contribute up to 25 points each. Nothing here is persisted or enforced.

use crate::config::{
    KEY_RESULT_TASK_VERBS, METRIC_KEYWORDS, MIN_OBJECTIVE_LENGTH, OBJECTIVE_TASK_VERBS,
};
use crate::database::KeyResultKind;
use serde::{Deserialize, Serialize};

/// Draft OKR to assess
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QualityInput {
    #[serde(default)]
    pub objective: String,
    #[serde(default, rename = "keyResults")]
    pub key_results: Vec<DraftKeyResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DraftKeyResult {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<KeyResultKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feedback {
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Excellent,
    Good,
    Fair,
    NeedsWork,
}

impl Grade {
    pub fn from_score(score: u32) -> Self {
        match score {
            80.. => Grade::Excellent,
            60..=79 => Grade::Good,
            40..=59 => Grade::Fair,
            _ => Grade::NeedsWork,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Grade::Excellent => "Excellent OKR!",
            Grade::Good => "Good OKR",
            Grade::Fair => "Needs improvement",
            Grade::NeedsWork => "Needs significant improvement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub score: u32,
    pub grade: Grade,
    pub label: &'static str,
    pub feedback: Vec<Feedback>,
}

fn feedback(kind: FeedbackKind, title: &str, message: impl Into<String>) -> Feedback {
    Feedback {
        kind,
        title: title.to_string(),
        message: message.into(),
        example: None,
    }
}

fn with_example(mut item: Feedback, example: &str) -> Feedback {
    item.example = Some(example.to_string());
    item
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Score a draft OKR
pub fn assess(input: &QualityInput) -> QualityReport {
    let mut score = 0;
    let mut items = Vec::new();

    // Objective reads as an outcome
    if !input.objective.trim().is_empty() {
        let lower = input.objective.to_lowercase();

        if input.objective.chars().count() < MIN_OBJECTIVE_LENGTH {
            items.push(with_example(
                feedback(
                    FeedbackKind::Warning,
                    "Objective too short",
                    "A good Objective should be inspirational and descriptive. Try to make it more compelling.",
                ),
                "Instead of \"Get users\" → \"Become the go-to platform for daily goal tracking\"",
            ));
        } else if OBJECTIVE_TASK_VERBS.iter().any(|verb| lower.starts_with(verb)) {
            items.push(with_example(
                feedback(
                    FeedbackKind::Warning,
                    "Objective sounds like a task",
                    "Objectives should describe outcomes, not actions. Focus on the \"why\" not the \"how\".",
                ),
                "Instead of \"Build new feature\" → \"Delight users with effortless goal tracking\"",
            ));
        } else {
            score += 25;
            items.push(feedback(
                FeedbackKind::Success,
                "Good objective!",
                "Your objective is inspirational and outcome-focused.",
            ));
        }
    }

    let described: Vec<String> = input
        .key_results
        .iter()
        .filter_map(|kr| kr.description.as_deref())
        .filter(|d| !d.trim().is_empty())
        .map(str::to_lowercase)
        .collect();
    let count = described.len();

    // Three to five key results
    match count {
        0 => items.push(with_example(
            feedback(
                FeedbackKind::Error,
                "No Key Results",
                "You need 3-5 Key Results to measure progress toward your Objective.",
            ),
            "Each Key Result should answer: \"How will I know I've achieved this objective?\"",
        )),
        1 | 2 => {
            score += 10;
            items.push(with_example(
                feedback(
                    FeedbackKind::Warning,
                    "Too few Key Results",
                    format!(
                        "You have {} Key Result{}. Radical Focus recommends 3-5 to properly measure success.",
                        count,
                        plural(count)
                    ),
                ),
                "Add more measurable outcomes that define success for this objective.",
            ));
        }
        3..=5 => {
            score += 25;
            items.push(feedback(
                FeedbackKind::Success,
                "Perfect number of Key Results!",
                format!("{} Key Results is the sweet spot for tracking progress.", count),
            ));
        }
        _ => {
            score += 10;
            items.push(with_example(
                feedback(
                    FeedbackKind::Warning,
                    "Too many Key Results",
                    format!(
                        "You have {} Key Results. This can dilute focus. Try to consolidate to 3-5.",
                        count
                    ),
                ),
                "Ask yourself: which metrics truly define success? Combine or remove less critical ones.",
            ));
        }
    }

    if !input.key_results.is_empty() {
        // Key results carry a metric
        let measurable = input
            .key_results
            .iter()
            .filter(|kr| {
                let desc = kr.description.as_deref().unwrap_or("");
                !desc.trim().is_empty() && is_measurable(kr.kind, &desc.to_lowercase())
            })
            .count();
        let ratio = if count == 0 {
            0.0
        } else {
            measurable as f64 / count as f64
        };

        if ratio >= 0.8 {
            score += 25;
            items.push(feedback(
                FeedbackKind::Success,
                "Key Results are measurable",
                "Your Key Results have clear metrics for tracking progress.",
            ));
        } else if ratio >= 0.5 {
            score += 15;
            items.push(with_example(
                feedback(
                    FeedbackKind::Warning,
                    "Some Key Results lack metrics",
                    "Make sure each Key Result has a clear number or metric.",
                ),
                "Instead of \"Improve engagement\" → \"Increase daily active users from 100 to 150\"",
            ));
        } else {
            items.push(with_example(
                feedback(
                    FeedbackKind::Warning,
                    "Key Results need metrics",
                    "Key Results should be specific and measurable. Add numbers, percentages, or clear targets.",
                ),
                "Instead of \"Get more users\" → \"Grow user base by 25% (from 400 to 500)\"",
            ));
        }

        // Key results are outcomes
        let task_like = described
            .iter()
            .filter(|desc| KEY_RESULT_TASK_VERBS.iter().any(|verb| desc.contains(verb)))
            .count();

        if task_like == 0 {
            score += 25;
            items.push(feedback(
                FeedbackKind::Success,
                "Key Results are outcome-focused",
                "Your Key Results describe results, not tasks. Great work!",
            ));
        } else {
            score += 10;
            items.push(with_example(
                feedback(
                    FeedbackKind::Warning,
                    "Some Key Results sound like tasks",
                    format!(
                        "{} Key Result{} may be describing activities rather than outcomes.",
                        task_like,
                        plural(task_like)
                    ),
                ),
                "Instead of \"Launch new feature\" → \"Increase user retention to 85%\"",
            ));
        }
    }

    let grade = Grade::from_score(score);
    QualityReport {
        score,
        grade,
        label: grade.label(),
        feedback: items,
    }
}

fn is_measurable(kind: Option<KeyResultKind>, lower: &str) -> bool {
    kind == Some(KeyResultKind::Numeric)
        || lower.chars().any(|c| c.is_ascii_digit())
        || METRIC_KEYWORDS.iter().any(|word| lower.contains(word))
}
