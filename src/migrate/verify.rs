//! Post-migration checks.
//!
//! Every check compares a count taken before the rewrite with one taken after
//! it. A run passes only when all of them hold.

use super::analysis::{Analysis, MailStoreAnalysis, TaskStoreAnalysis};
use super::fields::{DEPENDENCY_ISSUE, DEPENDENCY_TARGET};
use serde::Serialize;

/// One named comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub name: String,
    pub expected: i64,
    pub actual: i64,
    pub passed: bool,
}

impl Check {
    fn new(name: impl Into<String>, expected: i64, actual: i64) -> Self {
        Self {
            name: name.into(),
            expected,
            actual,
            passed: expected == actual,
        }
    }

    /// Passes when `actual` does not exceed `limit`.
    fn at_most(name: impl Into<String>, limit: i64, actual: i64) -> Self {
        Self {
            name: name.into(),
            expected: limit,
            actual,
            passed: actual <= limit,
        }
    }
}

impl std::fmt::Display for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: expected {}, found {}",
            self.name, self.expected, self.actual
        )
    }
}

/// Outcome of every post-migration check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostValidation {
    pub checks: Vec<Check>,
}

impl PostValidation {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> Vec<&Check> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }
}

/// Compare the stores after a rewrite with the analysis taken before it.
///
/// `after_*` are analyses of the same rename run against the rewritten
/// stores: their "matching" counts are the residue of the old prefix and
/// their "target" counts the keys now under the new one.
pub fn post_validate(
    before: &Analysis,
    after_tasks: &TaskStoreAnalysis,
    after_mail: Option<&MailStoreAnalysis>,
) -> PostValidation {
    let tasks = &before.tasks;
    let mut checks = vec![
        Check::new("issues with old prefix", 0, after_tasks.issues_matching),
        Check::new(
            "dependency edges with old prefix",
            0,
            after_tasks.dependencies_matching,
        ),
    ];

    for field in &after_tasks.references {
        // Edge endpoints are already covered by the edge check above
        if field.field == DEPENDENCY_ISSUE.label() || field.field == DEPENDENCY_TARGET.label() {
            continue;
        }
        checks.push(Check::new(
            format!("{} with old prefix", field.field),
            0,
            field.rows,
        ));
    }

    checks.extend([
        Check::new("total issues", tasks.issues_total, after_tasks.issues_total),
        Check::new(
            "total dependency edges",
            tasks.dependencies_total,
            after_tasks.dependencies_total,
        ),
        Check::new(
            "issues with new prefix",
            tasks.issues_target + tasks.issues_matching,
            after_tasks.issues_target,
        ),
        Check::at_most(
            "dangling dependency edges",
            tasks.dangling_dependencies,
            after_tasks.dangling_dependencies,
        ),
    ]);

    if let (Some(mail_before), Some(mail_after)) = (before.mail.as_ref(), after_mail) {
        checks.push(Check::new(
            "thread ids with old prefix",
            0,
            mail_after.thread_refs,
        ));
        checks.push(Check::new(
            "total messages",
            mail_before.messages_total,
            mail_after.messages_total,
        ));
    }

    PostValidation { checks }
}
