/// Coarse classification of a database failure, used for user messaging and
/// for mapping into the pipeline's error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Unreachable,
    Authentication,
    Timeout,
    Syntax,
    Permission,
    ObjectNotFound,
    Other,
}

impl FailureClass {
    pub fn code(self) -> &'static str {
        match self {
            FailureClass::Unreachable => "DB001",
            FailureClass::Authentication => "DB002",
            FailureClass::Syntax => "DB003",
            FailureClass::Permission => "DB004",
            FailureClass::ObjectNotFound => "DB005",
            FailureClass::Timeout => "DB006",
            FailureClass::Other => "DB009",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FailureClass::Unreachable => "database unreachable",
            FailureClass::Authentication => {
                "database authentication failed, check the configured credentials"
            }
            FailureClass::Timeout => "database operation timed out",
            FailureClass::Syntax => "SQL syntax error",
            FailureClass::Permission => "insufficient database privileges",
            FailureClass::ObjectNotFound => "database object not found",
            FailureClass::Other => "SQL execution error",
        }
    }
}

// Checked in order; the first list with a hit wins.
const PATTERNS: &[(FailureClass, &[&str])] = &[
    (
        FailureClass::Authentication,
        &[
            "18456",
            "login failed",
            "authentication failed",
            "invalid credentials",
        ],
    ),
    (
        FailureClass::Permission,
        &[
            "permission denied",
            "permission was denied",
            "access denied",
            "not authorized",
            "readonly database",
            "read-only",
        ],
    ),
    (
        FailureClass::Timeout,
        &[
            "timeout",
            "timed out",
            "database is locked",
            "database is busy",
            "interrupted",
        ],
    ),
    (
        FailureClass::Unreachable,
        &[
            "unable to open database",
            "cannot connect",
            "connection failed",
            "server not found",
            "network-related",
            "not a database",
        ],
    ),
    (
        FailureClass::ObjectNotFound,
        &[
            "no such table",
            "no such column",
            "no such trigger",
            "invalid object name",
            "does not exist",
        ],
    ),
    (
        FailureClass::Syntax,
        &[
            "42000",
            "syntax error",
            "incorrect syntax",
            "unexpected token",
            "incomplete input",
        ],
    ),
];

/// Classify a failure from its message text alone.
pub fn classify_message(message: &str) -> FailureClass {
    let lower = message.to_lowercase();
    PATTERNS
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(class, _)| *class)
        .unwrap_or(FailureClass::Other)
}

/// A failure reported by a [`super::SqlSession`] or [`super::SqlBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbFailure {
    pub class: FailureClass,
    pub message: String,
}

impl DbFailure {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            class: classify_message(&message),
            message,
        }
    }
}

impl std::fmt::Display for DbFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.class.code(), self.class.label(), self.message)
    }
}
