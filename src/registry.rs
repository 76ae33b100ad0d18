//! Check registry
//!
//! Sections and checks are declared through [`SectionDef`] values, registered
//! once at startup in declaration order. Every run instantiates fresh check
//! objects from the registered factories, so no state survives between runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::deps::{DependencyKey, ResolvedDeps};
use crate::report::CheckOutcome;
use compliance_common::{Error, Result};

/// A unit of validation
///
/// `perform` receives only the dependencies the check declared. Returning
/// `Err` is treated as an unexpected fault and reported as a major problem
/// by the engine, so checks return `CheckOutcome::MajorProblem` themselves
/// when they can explain what is wrong.
#[async_trait]
pub trait Check: Send + Sync {
    /// Identifier used by `--check section.check`
    fn id(&self) -> &'static str;

    /// Display name
    fn name(&self) -> &str;

    /// Description shown in the report
    fn description(&self) -> &str;

    /// Dependencies `perform` needs
    fn dependencies(&self) -> &[DependencyKey] {
        &[]
    }

    /// Cheap dependencies the skip predicate needs
    fn skip_dependencies(&self) -> &[DependencyKey] {
        &[]
    }

    /// Whether the check does not apply to this run.
    ///
    /// Evaluated before any expensive dependency is resolved.
    fn should_skip(&self, _deps: &ResolvedDeps) -> Result<bool> {
        Ok(false)
    }

    /// Checks sharing a tag never run at the same time
    fn exclusive_tag(&self) -> Option<&'static str> {
        None
    }

    /// Timeout overriding the run-wide per-check timeout
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the check
    async fn perform(&self, deps: &ResolvedDeps) -> Result<CheckOutcome>;
}

/// Creates a fresh check instance
pub type CheckFactory = Arc<dyn Fn() -> Box<dyn Check> + Send + Sync>;

/// Section skip predicate over cheap dependencies
pub type SkipPredicate = fn(&ResolvedDeps) -> Result<bool>;

/// Declaration of a section
#[derive(Clone)]
pub struct SectionDef {
    /// Identifier used by `--check section`
    pub id: &'static str,
    /// Display name, unique within a registry
    pub name: &'static str,
    /// Description shown in the report
    pub description: &'static str,
    /// Cheap dependencies of the skip predicate
    pub skip_dependencies: &'static [DependencyKey],
    /// Skip predicate
    pub skip: Option<SkipPredicate>,
    /// Checks in declaration order
    pub checks: Vec<CheckFactory>,
}

impl SectionDef {
    /// Section without checks
    pub fn new(id: &'static str, name: &'static str, description: &'static str) -> Self {
        Self {
            id,
            name,
            description,
            skip_dependencies: &[],
            skip: None,
            checks: Vec::new(),
        }
    }

    /// Skip the whole section when `predicate` holds
    pub fn skip_when(mut self, dependencies: &'static [DependencyKey], predicate: SkipPredicate) -> Self {
        self.skip_dependencies = dependencies;
        self.skip = Some(predicate);
        self
    }

    /// Append a check
    pub fn check<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Check> + Send + Sync + 'static,
    {
        self.checks.push(Arc::new(factory));
        self
    }
}

impl std::fmt::Debug for SectionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionDef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("checks", &self.checks.len())
            .finish()
    }
}

/// A section instantiated for one run
pub struct SectionPlan {
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Cheap dependencies of the skip predicate
    pub skip_dependencies: &'static [DependencyKey],
    /// Skip predicate
    pub skip: Option<SkipPredicate>,
    /// Fresh check instances, in declaration order
    pub checks: Vec<Arc<dyn Check>>,
}

/// Ordered collection of sections
#[derive(Debug, Clone, Default)]
pub struct Registry {
    sections: Vec<SectionDef>,
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a section after validating it
    pub fn register(&mut self, section: SectionDef) -> Result<()> {
        let resource = format!("section {:?}", section.name);
        if section.id.is_empty() || section.name.is_empty() {
            return Err(Error::validation_for(resource, "id and name must not be empty"));
        }
        if self
            .sections
            .iter()
            .any(|s| s.id == section.id || s.name == section.name)
        {
            return Err(Error::validation_for(resource, "section registered twice"));
        }
        if section.skip.is_none() && !section.skip_dependencies.is_empty() {
            return Err(Error::validation_for(
                resource,
                "skip dependencies declared without a skip predicate",
            ));
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for factory in &section.checks {
            let check = factory();
            if !ids.insert(check.id()) {
                return Err(Error::validation_for(
                    resource,
                    format!("check id {:?} declared twice", check.id()),
                ));
            }
            if !names.insert(check.name().to_string()) {
                return Err(Error::validation_for(
                    resource,
                    format!("check name {:?} declared twice", check.name()),
                ));
            }
        }

        self.sections.push(section);
        Ok(())
    }

    /// Registered sections in declaration order
    pub fn sections(&self) -> &[SectionDef] {
        &self.sections
    }

    /// Number of registered checks
    pub fn check_count(&self) -> usize {
        self.sections.iter().map(|s| s.checks.len()).sum()
    }

    /// Keep only the selected sections and checks, preserving declaration order
    pub fn select(&self, selection: &Selection) -> Result<Registry> {
        if selection.is_all() {
            return Ok(self.clone());
        }

        for (section_id, check_ids) in &selection.entries {
            let section = self
                .sections
                .iter()
                .find(|s| s.id == section_id.as_str())
                .ok_or_else(|| {
                    Error::validation_for_field("selection", "check", format!("unknown section {:?}", section_id))
                })?;
            for check_id in check_ids {
                if !section.checks.iter().any(|f| f().id() == check_id.as_str()) {
                    return Err(Error::validation_for_field(
                        "selection",
                        "check",
                        format!("unknown check {:?} in section {:?}", check_id, section_id),
                    ));
                }
            }
        }

        let sections = self
            .sections
            .iter()
            .filter_map(|section| {
                let check_ids = selection.entries.get(section.id)?;
                let mut section = section.clone();
                if !check_ids.is_empty() {
                    section
                        .checks
                        .retain(|f| check_ids.iter().any(|id| id.as_str() == f().id()));
                }
                Some(section)
            })
            .collect();
        Ok(Registry { sections })
    }

    /// Instantiate every section and check for one run
    pub fn instantiate(&self) -> Vec<SectionPlan> {
        self.sections
            .iter()
            .map(|section| SectionPlan {
                name: section.name.to_string(),
                description: section.description.to_string(),
                skip_dependencies: section.skip_dependencies,
                skip: section.skip,
                checks: section.checks.iter().map(|f| Arc::from(f())).collect(),
            })
            .collect()
    }
}

/// Sections and checks picked on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Section id to check ids; an empty list selects the whole section
    entries: BTreeMap<String, Vec<String>>,
}

impl Selection {
    /// Select everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse `section` or `section.check` entries.
    ///
    /// Selecting a whole section overrides individual checks of it.
    pub fn parse<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        let mut entries: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut whole_sections = HashSet::new();
        for item in items {
            let item = item.as_ref().trim();
            let invalid = || {
                Error::validation_for_field(
                    "selection",
                    "check",
                    format!("{:?} is not of the form section or section.check", item),
                )
            };
            let mut parts = item.split('.');
            let section = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
            let check = parts.next();
            if parts.next().is_some() {
                return Err(invalid());
            }

            match check {
                None => {
                    whole_sections.insert(section.to_string());
                }
                Some("") => return Err(invalid()),
                Some(check) => {
                    let checks = entries.entry(section.to_string()).or_default();
                    if !checks.iter().any(|c| c == check) {
                        checks.push(check.to_string());
                    }
                }
            }
        }
        for section in whole_sections {
            entries.insert(section, Vec::new());
        }
        Ok(Self { entries })
    }

    /// Whether nothing was selected explicitly
    pub fn is_all(&self) -> bool {
        self.entries.is_empty()
    }
}
