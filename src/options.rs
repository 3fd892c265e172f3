use serde::{Deserialize, Serialize};

/// Knobs for a compilation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Keep trailing `; comment` text on instructions.
    pub comments: bool,
    /// Reject built-in calls with the wrong number of arguments.
    pub check_builtin_arity: bool,
    /// Name of the function the preamble enters.
    pub entry: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            comments: true,
            check_builtin_arity: true,
            entry: "main".to_string(),
        }
    }
}

impl CompileOptions {
    pub fn with_comments(mut self, comments: bool) -> Self {
        self.comments = comments;
        self
    }

    pub fn with_builtin_arity_check(mut self, check: bool) -> Self {
        self.check_builtin_arity = check;
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }
}
