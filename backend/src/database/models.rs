//! Database models
//!
//! Rust structs representing stored entities, the request shapes used to
//! create them and the patch shapes used to partially update them.
//! All models use serde for serialization to API clients.

use crate::config::{
    DEFAULT_CONFIDENCE_LEVEL, DEFAULT_TARGET_VALUE, MAX_CONFIDENCE_LEVEL, MIN_CONFIDENCE_LEVEL,
};
use crate::error::{AppError, Result};
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

// ===== Enumerations =====

/// How progress on a key result is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum KeyResultKind {
    #[default]
    Numeric,
    Binary,
}

/// Traffic-light state of a health metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MetricStatus {
    #[default]
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }
}

/// What a task contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AssignmentType {
    Objective,
    HealthMetric,
    HeartbeatWork,
}

/// Filter applied when listing top-level tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskView {
    Today,
    Upcoming,
    Completed,
    #[default]
    All,
}

// ===== Entities =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    /// IANA timezone name, e.g. "America/Los_Angeles"
    pub timezone: String,
    /// Local time of day ("HH:MM") for the daily digest
    pub email_time: String,
    pub email_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// A quarterly objective
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Objective {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub quarter: i64,
    pub year: i64,
    /// "active" or any other free-text state; unset counts as active
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct KeyResult {
    pub id: String,
    pub objective_id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: KeyResultKind,
    pub start_value: f64,
    pub current_value: f64,
    pub target_value: f64,
    pub confidence_level: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl KeyResult {
    /// Percentage progress from start to target; `None` for binary key results.
    pub fn progress(&self) -> Option<i64> {
        if self.kind == KeyResultKind::Binary {
            return None;
        }

        let span = self.target_value - self.start_value;
        if span.abs() < f64::EPSILON {
            return Some(if self.current_value >= self.target_value { 100 } else { 0 });
        }

        Some(((self.current_value - self.start_value) / span * 100.0).round() as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HealthMetric {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: MetricStatus,
    pub notes: Option<String>,
    /// Soft-delete marker; list queries only return active rows
    pub active: bool,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HeartbeatWork {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    /// Server-local wall time
    #[serde(default, deserialize_with = "deadline::deserialize")]
    pub deadline: Option<NaiveDateTime>,
    pub status: TaskStatus,
    pub assignment_type: Option<AssignmentType>,
    pub assignment_id: Option<String>,
    pub parent_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set exactly when `status` is `done`
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MagicLink {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl MagicLink {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && now < self.expires_at
    }
}

// ===== Create requests =====

#[derive(Debug, Clone, Deserialize)]
pub struct NewObjective {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub quarter: i64,
    pub year: i64,
    #[serde(default, rename = "keyResults")]
    pub key_results: Vec<NewKeyResult>,
}

impl NewObjective {
    pub fn validate(&self) -> Result<()> {
        require_text("title", &self.title)?;
        validate_quarter(self.quarter)?;
        self.key_results.iter().try_for_each(NewKeyResult::validate)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewKeyResult {
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: Option<KeyResultKind>,
    #[serde(default)]
    pub start_value: Option<f64>,
    #[serde(default)]
    pub current_value: Option<f64>,
    #[serde(default)]
    pub target_value: Option<f64>,
    #[serde(default)]
    pub confidence_level: Option<i64>,
}

impl NewKeyResult {
    pub fn validate(&self) -> Result<()> {
        require_text("description", &self.description)?;
        if let Some(level) = self.confidence_level {
            validate_confidence(level)?;
        }
        Ok(())
    }

    /// Resolve creation defaults into the stored row values
    pub(crate) fn resolved(&self) -> ResolvedKeyResult {
        let start_value = self.start_value.unwrap_or(0.0);
        ResolvedKeyResult {
            kind: self.kind.unwrap_or_default(),
            start_value,
            current_value: self.current_value.unwrap_or(start_value),
            target_value: self.target_value.unwrap_or(DEFAULT_TARGET_VALUE),
            confidence_level: self.confidence_level.unwrap_or(DEFAULT_CONFIDENCE_LEVEL),
        }
    }
}

pub(crate) struct ResolvedKeyResult {
    pub kind: KeyResultKind,
    pub start_value: f64,
    pub current_value: f64,
    pub target_value: f64,
    pub confidence_level: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewHealthMetric {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<MetricStatus>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewHealthMetric {
    pub fn validate(&self) -> Result<()> {
        require_text("name", &self.name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewHeartbeatWork {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl NewHeartbeatWork {
    pub fn validate(&self) -> Result<()> {
        require_text("name", &self.name)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deadline::deserialize")]
    pub deadline: Option<NaiveDateTime>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub assignment_type: Option<AssignmentType>,
    #[serde(default)]
    pub assignment_id: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    /// Backfilled completion time for imported done tasks
    #[serde(skip)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn validate(&self) -> Result<()> {
        require_text("title", &self.title)?;
        validate_assignment(self.assignment_type, self.assignment_id.as_deref())
    }

    /// Completion timestamp a new row must carry for its initial status
    pub(crate) fn completion_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.status {
            Some(TaskStatus::Done) => Some(self.completed_at.unwrap_or(now)),
            _ => None,
        }
    }
}

/// Objective update carrying an optional replacement key result set
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectiveUpdate {
    #[serde(flatten)]
    pub patch: ObjectivePatch,
    /// When present, key results not listed here are deleted
    #[serde(default, rename = "keyResults")]
    pub key_results: Option<Vec<KeyResultDraft>>,
}

/// Key result entry in an objective update: known ids are updated, the rest created
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyResultDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub fields: NewKeyResult,
}

impl KeyResultDraft {
    /// Patch applying every slot the draft carries
    pub fn to_patch(&self) -> KeyResultPatch {
        KeyResultPatch {
            description: Some(self.fields.description.clone()),
            kind: self.fields.kind,
            start_value: self.fields.start_value,
            current_value: self.fields.current_value,
            target_value: self.fields.target_value,
            confidence_level: self.fields.confidence_level,
            status: None,
        }
    }
}

// ===== Patches =====
//
// Every slot is optional. Nullable columns use `Option<Option<T>>` so that a
// missing key (`None`) is distinct from an explicit null (`Some(None)`).

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub email_time: Option<String>,
    #[serde(default)]
    pub email_enabled: Option<bool>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.timezone.is_none() && self.email_time.is_none() && self.email_enabled.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(tz) = &self.timezone {
            tz.parse::<chrono_tz::Tz>()
                .map_err(|_| AppError::Validation(format!("Unknown timezone: {}", tz)))?;
        }
        if let Some(time) = &self.email_time {
            parse_email_time(time)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectivePatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub status: Option<Option<String>>,
    #[serde(default)]
    pub quarter: Option<i64>,
    #[serde(default)]
    pub year: Option<i64>,
}

impl ObjectivePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.quarter.is_none()
            && self.year.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            require_text("title", title)?;
        }
        if let Some(quarter) = self.quarter {
            validate_quarter(quarter)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyResultPatch {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<KeyResultKind>,
    #[serde(default)]
    pub start_value: Option<f64>,
    #[serde(default)]
    pub current_value: Option<f64>,
    #[serde(default)]
    pub target_value: Option<f64>,
    #[serde(default)]
    pub confidence_level: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

impl KeyResultPatch {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.kind.is_none()
            && self.start_value.is_none()
            && self.current_value.is_none()
            && self.target_value.is_none()
            && self.confidence_level.is_none()
            && self.status.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(description) = &self.description {
            require_text("description", description)?;
        }
        if let Some(level) = self.confidence_level {
            validate_confidence(level)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthMetricPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<MetricStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

impl HealthMetricPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.notes.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        match &self.name {
            Some(name) => require_text("name", name),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartbeatWorkPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub category: Option<Option<String>>,
}

impl HeartbeatWorkPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.category.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        match &self.name {
            Some(name) => require_text("name", name),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "deadline::deserialize_patch")]
    pub deadline: Option<Option<NaiveDateTime>>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignment_type: Option<Option<AssignmentType>>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignment_id: Option<Option<String>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.deadline.is_none()
            && self.status.is_none()
            && self.assignment_type.is_none()
            && self.assignment_id.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            require_text("title", title)?;
        }
        Ok(())
    }

    /// New `completed_at` value implied by a status change, if any.
    ///
    /// Entering `done` stamps `now`, staying in `done` keeps the original
    /// stamp, and any other status clears it.
    pub(crate) fn completion_change(
        &self,
        current: &Task,
        now: DateTime<Utc>,
    ) -> Option<Option<DateTime<Utc>>> {
        match self.status? {
            TaskStatus::Done if current.status == TaskStatus::Done => {
                Some(current.completed_at.or(Some(now)))
            }
            TaskStatus::Done => Some(Some(now)),
            _ => Some(None),
        }
    }
}

// ===== API views =====

/// Objective with its key results nested, as returned by list endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ObjectiveWithKeyResults {
    #[serde(flatten)]
    pub objective: Objective,
    #[serde(rename = "keyResults")]
    pub key_results: Vec<KeyResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentDetails {
    pub id: String,
    pub title: String,
}

/// Top-level task with its direct subtasks and resolved assignment
#[derive(Debug, Clone, Serialize)]
pub struct TaskWithDetails {
    #[serde(flatten)]
    pub task: Task,
    pub subtasks: Vec<Task>,
    #[serde(rename = "assignmentDetails", skip_serializing_if = "Option::is_none")]
    pub assignment_details: Option<AssignmentDetails>,
}

// ===== Validation helpers =====

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

pub fn validate_confidence(level: i64) -> Result<()> {
    if !(MIN_CONFIDENCE_LEVEL..=MAX_CONFIDENCE_LEVEL).contains(&level) {
        return Err(AppError::Validation(format!(
            "confidence_level must be between {} and {}, got {}",
            MIN_CONFIDENCE_LEVEL, MAX_CONFIDENCE_LEVEL, level
        )));
    }
    Ok(())
}

pub fn validate_quarter(quarter: i64) -> Result<()> {
    if !(1..=4).contains(&quarter) {
        return Err(AppError::Validation(format!(
            "quarter must be between 1 and 4, got {}",
            quarter
        )));
    }
    Ok(())
}

fn validate_assignment(kind: Option<AssignmentType>, id: Option<&str>) -> Result<()> {
    match (kind, id) {
        (Some(_), None) => Err(AppError::Validation(
            "assignment_id is required with assignment_type".to_string(),
        )),
        (None, Some(_)) => Err(AppError::Validation(
            "assignment_type is required with assignment_id".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Parse an "HH:MM" email time
pub fn parse_email_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| AppError::Validation(format!("email_time must be HH:MM, got '{}'", value)))
}

/// Distinguish a present-but-null key from a missing one.
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Lenient deadline parsing: dates, local date-times and RFC 3339 instants.
pub mod deadline {
    use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
    use serde::{Deserialize, Deserializer};

    const DATE_TIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];

    pub fn parse(value: &str) -> Option<NaiveDateTime> {
        let value = value.trim();

        if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
            return Some(instant.with_timezone(&Local).naive_local());
        }

        for format in DATE_TIME_FORMATS {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
                return Some(parsed);
            }
        }

        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    }

    fn parse_nullable<E: serde::de::Error>(raw: Option<String>) -> Result<Option<NaiveDateTime>, E> {
        match raw {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => parse(&s)
                .map(Some)
                .ok_or_else(|| E::custom(format!("invalid deadline '{}'", s))),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_nullable(Option::<String>::deserialize(deserializer)?)
    }

    pub fn deserialize_patch<'de, D>(
        deserializer: D,
    ) -> Result<Option<Option<NaiveDateTime>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_nullable(Option::<String>::deserialize(deserializer)?).map(Some)
    }
}
