//! Check outcomes and the report document
//!
//! The engine hands every finished section to [`aggregate`], which folds the
//! outcomes into the JSON document consumed by the report renderer. The fold
//! is pure: section order is the order of the input sequence, never the
//! order in which sections finished.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Result of invoking one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The check measured something and compared it with what is expected
    Completed {
        /// Whether the measurement satisfies the expectation
        result: bool,
        /// What was found in the cluster
        measured: String,
        /// What the product needs
        expected: String,
    },
    /// The check does not apply; it gets no report entry
    Skipped,
    /// The comparison is meaningless; the check is reported failed
    MajorProblem {
        /// Diagnostic shown to the user
        message: String,
    },
}

impl CheckOutcome {
    /// Completed outcome
    pub fn completed(result: bool, measured: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::Completed {
            result,
            measured: measured.into(),
            expected: expected.into(),
        }
    }

    /// Major problem outcome
    pub fn major_problem(message: impl Into<String>) -> Self {
        Self::MajorProblem {
            message: message.into(),
        }
    }

    /// Short label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { result: true, .. } => "PASSED",
            Self::Completed { result: false, .. } => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::MajorProblem { .. } => "MAJOR PROBLEM",
        }
    }
}

/// One check's outcome, labelled for the report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRecord {
    /// Check display name
    pub name: String,
    /// Check description
    pub description: String,
    /// What happened
    pub outcome: CheckOutcome,
}

/// What the engine knows about a section once it has finished with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionOutcome {
    /// Checks ran (possibly some were skipped), records are in declaration order
    Completed {
        /// Section display name
        name: String,
        /// Section description
        description: String,
        /// One record per declared, selected check
        checks: Vec<CheckRecord>,
    },
    /// The section could not run any checks
    Failed {
        /// Section display name
        name: String,
        /// Section description
        description: String,
        /// Why the section failed
        major_problem: String,
    },
}

/// The `check` object of a report entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Pass/fail
    pub result: bool,
    /// Measured value
    pub measured: String,
    /// Expected value
    pub expected: String,
    /// Present only when the outcome was a major problem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_problem: Option<String>,
}

/// A check in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckEntry {
    /// Check display name
    pub name: String,
    /// Check description
    pub description: String,
    /// Outcome
    pub check: CheckResult,
}

/// A section in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionReport {
    /// Section display name
    pub name: String,
    /// Section description
    pub description: String,
    /// True iff every reported check passed
    pub result: bool,
    /// Distinct major problems of this section, sorted
    pub major_problems: Vec<String>,
    /// Non-skipped checks in declaration order
    pub checks: Vec<CheckEntry>,
}

/// The report document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Report {
    /// True iff every section passed
    pub result: bool,
    /// Distinct major problems of all sections, sorted
    pub major_problems: Vec<String>,
    /// Sections in declaration order
    pub sections: Vec<SectionReport>,
}

impl Report {
    /// Number of reported checks that passed and failed
    pub fn counts(&self) -> (usize, usize) {
        self.sections
            .iter()
            .flat_map(|s| &s.checks)
            .fold((0, 0), |(passed, failed), entry| {
                if entry.check.result {
                    (passed + 1, failed)
                } else {
                    (passed, failed + 1)
                }
            })
    }
}

/// Distinct problems in lexicographic order
fn unique_sorted<'a>(problems: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    problems
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl CheckEntry {
    fn from_record(record: CheckRecord) -> Option<Self> {
        let check = match record.outcome {
            CheckOutcome::Skipped => return None,
            CheckOutcome::Completed {
                result,
                measured,
                expected,
            } => CheckResult {
                result,
                measured,
                expected,
                major_problem: None,
            },
            CheckOutcome::MajorProblem { message } => CheckResult {
                result: false,
                measured: String::new(),
                expected: String::new(),
                major_problem: Some(message),
            },
        };
        Some(Self {
            name: record.name,
            description: record.description,
            check,
        })
    }
}

impl SectionReport {
    /// Fold one section. `None` when every check of a completed section was skipped.
    pub fn from_outcome(outcome: SectionOutcome) -> Option<Self> {
        match outcome {
            SectionOutcome::Failed {
                name,
                description,
                major_problem,
            } => Some(Self {
                name,
                description,
                result: false,
                major_problems: vec![major_problem],
                checks: Vec::new(),
            }),
            SectionOutcome::Completed {
                name,
                description,
                checks,
            } => {
                let checks: Vec<CheckEntry> =
                    checks.into_iter().filter_map(CheckEntry::from_record).collect();
                if checks.is_empty() {
                    return None;
                }
                let major_problems =
                    unique_sorted(checks.iter().filter_map(|c| c.check.major_problem.as_deref()));
                Some(Self {
                    name,
                    description,
                    result: checks.iter().all(|c| c.check.result),
                    major_problems,
                    checks,
                })
            }
        }
    }
}

/// Fold section outcomes, given in declaration order, into the report.
pub fn aggregate(sections: impl IntoIterator<Item = SectionOutcome>) -> Report {
    let sections: Vec<SectionReport> = sections
        .into_iter()
        .filter_map(SectionReport::from_outcome)
        .collect();

    let major_problems = unique_sorted(
        sections
            .iter()
            .flat_map(|s| s.major_problems.iter().map(String::as_str)),
    );

    Report {
        result: sections.iter().all(|s| s.result),
        major_problems,
        sections,
    }
}
