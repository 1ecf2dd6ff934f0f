use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one pipeline run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the ride-hailing service the user is on.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Customer,
    Driver,
}

const CUSTOMER_INTENTS: &[&str] = &[
    "coupon inquiry",
    "order inquiry",
    "basic service inquiry",
    "account inquiry",
    "privacy and rules inquiry",
];

const DRIVER_INTENTS: &[&str] = &[
    "coupon inquiry",
    "certification inquiry",
    "order acceptance inquiry",
    "order inquiry",
    "basic service inquiry",
];

impl UserType {
    /// The fixed intent label set for this user type, in tally order.
    pub fn intent_labels(&self) -> &'static [&'static str] {
        match self {
            Self::Customer => CUSTOMER_INTENTS,
            Self::Driver => DRIVER_INTENTS,
        }
    }

    /// Numeric code used by upstream callers (1 = customer, 2 = driver).
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Customer),
            2 => Some(Self::Driver),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Driver => "driver",
        }
    }
}

impl std::str::FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "customer" | "1" => Ok(Self::Customer),
            "driver" | "2" => Ok(Self::Driver),
            other => Err(format!("unknown user type: {}", other)),
        }
    }
}

/// Role of a pipeline history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the per-run pipeline history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Final result of an input-screening run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningRecord {
    pub user_id: String,
    pub user_input: String,
    pub is_passed: bool,
    pub reason: String,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
}

/// Final result of an intent-recognition run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRecord {
    pub user_id: String,
    pub user_input: String,
    pub cleaned_input: String,
    pub success_finish: bool,
    pub is_intent_clear: bool,
    pub output: String,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
}

/// Final result of a decision (ReAct) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub user_id: String,
    pub user_input: String,
    pub observations: Vec<String>,
    pub final_answer: String,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
}

/// A pipeline result handed to the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineRecord {
    Screening(ScreeningRecord),
    Intent(IntentRecord),
    Decision(DecisionRecord),
}

impl PipelineRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Screening(_) => "screening",
            Self::Intent(_) => "intent",
            Self::Decision(_) => "decision",
        }
    }
}

/// A registered tool as offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub required_params: Vec<String>,
}
