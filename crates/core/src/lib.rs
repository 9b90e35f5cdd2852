#![forbid(unsafe_code)]

pub mod checkpoint;
pub mod contract;
pub mod events;
pub mod glob;
pub mod strikes;

pub mod ids {
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct ProjectKey(String);

    impl ProjectKey {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, ProjectKeyError> {
            let value = value.into();
            validate_project_key(&value)?;
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for ProjectKey {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum ProjectKeyError {
        Empty,
        TooLong,
        InvalidFirstChar,
        InvalidChar { ch: char, index: usize },
    }

    impl ProjectKeyError {
        pub fn message(&self) -> &'static str {
            match self {
                Self::Empty => "project key must not be empty",
                Self::TooLong => "project key is too long",
                Self::InvalidFirstChar => "project key must start with an ascii letter or digit",
                Self::InvalidChar { .. } => "project key contains an invalid character",
            }
        }
    }

    fn validate_project_key(value: &str) -> Result<(), ProjectKeyError> {
        if value.is_empty() {
            return Err(ProjectKeyError::Empty);
        }
        if value.len() > 128 {
            return Err(ProjectKeyError::TooLong);
        }
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return Err(ProjectKeyError::Empty);
        };
        if !first.is_ascii_alphanumeric() {
            return Err(ProjectKeyError::InvalidFirstChar);
        }
        for (index, ch) in value.chars().enumerate() {
            if index == 0 {
                continue;
            }
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '/' | '-') {
                continue;
            }
            return Err(ProjectKeyError::InvalidChar { ch, index });
        }
        Ok(())
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum CellIdError {
        Empty,
        TooLong,
        ContainsWhitespace,
        ContainsControl,
    }

    impl CellIdError {
        pub fn message(&self) -> &'static str {
            match self {
                Self::Empty => "cell id must not be empty",
                Self::TooLong => "cell id is too long",
                Self::ContainsWhitespace => "cell id must not contain whitespace",
                Self::ContainsControl => "cell id contains control characters",
            }
        }
    }

    /// Cell ids are caller-supplied or counter-generated (`<project>-<n>`); both must pass.
    pub fn validate_cell_id(value: &str) -> Result<(), CellIdError> {
        if value.is_empty() {
            return Err(CellIdError::Empty);
        }
        if value.len() > 128 {
            return Err(CellIdError::TooLong);
        }
        if value.chars().any(|c| c.is_control()) {
            return Err(CellIdError::ContainsControl);
        }
        if value.chars().any(char::is_whitespace) {
            return Err(CellIdError::ContainsWhitespace);
        }
        Ok(())
    }

    pub fn generated_cell_id(project: &ProjectKey, seq: i64) -> String {
        let prefix = project
            .as_str()
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or("cell");
        format!("{prefix}-{seq}")
    }
}

pub mod model {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum CellStatus {
        Open,
        InProgress,
        Blocked,
        Closed,
        Tombstone,
    }

    impl CellStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Open => "open",
                Self::InProgress => "in_progress",
                Self::Blocked => "blocked",
                Self::Closed => "closed",
                Self::Tombstone => "tombstone",
            }
        }

        pub fn parse(raw: &str) -> Option<Self> {
            match raw.trim() {
                "open" => Some(Self::Open),
                "in_progress" => Some(Self::InProgress),
                "blocked" => Some(Self::Blocked),
                "closed" => Some(Self::Closed),
                "tombstone" => Some(Self::Tombstone),
                _ => None,
            }
        }

        pub fn is_terminal(self) -> bool {
            matches!(self, Self::Closed | Self::Tombstone)
        }

        /// Transitions accepted by `cell_status_changed`.
        ///
        /// `cell_closed` is its own event and closes from any non-terminal status.
        pub fn can_transition_to(self, to: CellStatus) -> bool {
            match (self, to) {
                (Self::Open, Self::InProgress)
                | (Self::InProgress, Self::Blocked)
                | (Self::InProgress, Self::Closed)
                | (Self::Blocked, Self::InProgress) => true,
                (from, Self::Tombstone) => !from.is_terminal(),
                _ => false,
            }
        }
    }

    impl std::fmt::Display for CellStatus {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum CellType {
        Task,
        Bug,
        Feature,
        Epic,
        Chore,
    }

    impl CellType {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Task => "task",
                Self::Bug => "bug",
                Self::Feature => "feature",
                Self::Epic => "epic",
                Self::Chore => "chore",
            }
        }

        pub fn parse(raw: &str) -> Option<Self> {
            match raw.trim() {
                "task" => Some(Self::Task),
                "bug" => Some(Self::Bug),
                "feature" => Some(Self::Feature),
                "epic" => Some(Self::Epic),
                "chore" => Some(Self::Chore),
                _ => None,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DependencyKind {
        Blocks,
        Relates,
    }

    impl DependencyKind {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Blocks => "blocks",
                Self::Relates => "relates",
            }
        }

        pub fn parse(raw: &str) -> Option<Self> {
            match raw.trim() {
                "blocks" => Some(Self::Blocks),
                "relates" => Some(Self::Relates),
                _ => None,
            }
        }
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Importance {
        Low,
        #[default]
        Normal,
        High,
        Urgent,
    }

    impl Importance {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Low => "low",
                Self::Normal => "normal",
                Self::High => "high",
                Self::Urgent => "urgent",
            }
        }

        pub fn parse(raw: &str) -> Option<Self> {
            match raw.trim() {
                "low" => Some(Self::Low),
                "normal" => Some(Self::Normal),
                "high" => Some(Self::High),
                "urgent" => Some(Self::Urgent),
                _ => None,
            }
        }
    }
}
