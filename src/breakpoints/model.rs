//! Breakpoint model
//!
//! Breakpoints are created from a [`BreakpointSpec`] and owned exclusively
//! by the registry; every other component holds a [`BreakpointId`] and asks
//! the registry. All mutation routes through the registry so lifecycle
//! notifications stay consistent.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::protocol::{BreakpointId, ClassId, ClassRef, Location, ObjectId, TargetId};

/// What a breakpoint triggers on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BreakpointKind {
    /// Suspend at a source line
    Line { location: Location },
    /// Suspend on entry into a method
    MethodEntry { class_name: String, method: String },
    /// Suspend on exit from a method
    MethodExit { class_name: String, method: String },
    /// Suspend when an exception of the given type is thrown
    Exception {
        class_name: String,
        caught: bool,
        uncaught: bool,
    },
    /// Suspend when a field is read
    AccessWatchpoint { class_name: String, field: String },
    /// Suspend when a field is written
    ModificationWatchpoint { class_name: String, field: String },
    /// Line breakpoint over a class-name pattern instead of one type
    Pattern { pattern: String, line: u32 },
    /// Pattern breakpoint scoped to a single debug target
    TargetPattern {
        target: TargetId,
        pattern: String,
        line: u32,
    },
}

impl BreakpointKind {
    /// Source location for kinds that have one
    pub fn location(&self) -> Option<Location> {
        match self {
            Self::Line { location } => Some(location.clone()),
            _ => None,
        }
    }

    /// Class name or pattern this kind binds to
    pub fn class_pattern(&self) -> &str {
        match self {
            Self::Line { location } => &location.class_name,
            Self::MethodEntry { class_name, .. }
            | Self::MethodExit { class_name, .. }
            | Self::Exception { class_name, .. }
            | Self::AccessWatchpoint { class_name, .. }
            | Self::ModificationWatchpoint { class_name, .. } => class_name,
            Self::Pattern { pattern, .. } | Self::TargetPattern { pattern, .. } => pattern,
        }
    }
}

/// User-supplied description of a breakpoint to create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointSpec {
    pub kind: BreakpointKind,
    /// Owning project; drives the resource close/open lifecycle
    pub project: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Suspend only on every nth post-filter hit
    #[serde(default)]
    pub hit_count: Option<u32>,
    /// Conditional breakpoints evaluate this expression inside the target VM
    #[serde(default)]
    pub condition: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl BreakpointSpec {
    pub fn line(project: impl Into<String>, class_name: impl Into<String>, line: u32) -> Self {
        Self {
            kind: BreakpointKind::Line {
                location: Location::new(class_name, line),
            },
            project: project.into(),
            enabled: true,
            hit_count: None,
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_hit_count(mut self, count: u32) -> Self {
        self.hit_count = Some(count);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A registered breakpoint
#[derive(Debug, Clone)]
pub struct Breakpoint {
    id: BreakpointId,
    pub kind: BreakpointKind,
    pub project: String,
    pub enabled: bool,
    pub hit_count: Option<u32>,
    pub condition: Option<String>,
    /// Class-name patterns restricting where the breakpoint applies
    pub class_filters: Vec<String>,
    /// Whether `class_filters` is an allow list (`true`) or a deny list
    pub filters_inclusive: bool,
    /// Suspend only when the event receiver is this object
    pub instance_filter: Option<ObjectId>,
    /// Concrete types this breakpoint has been installed into
    pub installed_types: HashSet<ClassId>,
    /// Hits remaining until the hit count fires; mirrors `hit_count`
    pub(crate) remaining_hits: Option<u32>,
}

impl Breakpoint {
    pub(crate) fn from_spec(id: BreakpointId, spec: BreakpointSpec) -> Self {
        Self {
            id,
            kind: spec.kind,
            project: spec.project,
            enabled: spec.enabled,
            hit_count: spec.hit_count,
            condition: spec.condition,
            class_filters: Vec::new(),
            filters_inclusive: true,
            instance_filter: None,
            installed_types: HashSet::new(),
            remaining_hits: spec.hit_count,
        }
    }

    pub fn id(&self) -> BreakpointId {
        self.id
    }

    /// True when the condition must be evaluated inside the target VM,
    /// which forces hit handling onto a dispatch job
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    pub fn location(&self) -> Option<Location> {
        self.kind.location()
    }

    /// Whether this breakpoint applies to a newly prepared class, honoring
    /// the kind's class binding and the class filters
    pub fn applies_to_class(&self, class: &ClassRef) -> bool {
        if !matches_pattern(self.kind.class_pattern(), &class.name) {
            return false;
        }
        self.passes_filters(&class.name)
    }

    /// Apply the inclusive/exclusive filter patterns to a type name
    pub fn passes_filters(&self, class_name: &str) -> bool {
        if self.class_filters.is_empty() {
            return true;
        }
        let matched = self
            .class_filters
            .iter()
            .any(|p| matches_pattern(p, class_name));
        if self.filters_inclusive {
            matched
        } else {
            !matched
        }
    }

    /// Instance filter check for a hit's receiver
    pub fn passes_instance_filter(&self, instance: Option<ObjectId>) -> bool {
        match self.instance_filter {
            None => true,
            Some(wanted) => instance == Some(wanted),
        }
    }

}

/// Match a class-name pattern against a fully qualified type name.
///
/// Supports a single leading or trailing `*`, the forms JDWP class-match
/// filters allow: `com.example.*`, `*.Main`, exact names, and bare `*`.
pub fn matches_pattern(pattern: &str, class_name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return class_name.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return class_name.ends_with(suffix);
    }
    pattern == class_name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("*", "com.example.Main"));
        assert!(matches_pattern("com.example.*", "com.example.Main"));
        assert!(matches_pattern("com.example.*", "com.example.inner.Deep"));
        assert!(!matches_pattern("com.example.*", "org.example.Main"));
        assert!(matches_pattern("*.Main", "com.example.Main"));
        assert!(matches_pattern("com.example.Main", "com.example.Main"));
        assert!(!matches_pattern("com.example.Main", "com.example.Main$Inner"));
    }

    #[test]
    fn test_inclusive_and_exclusive_filters() {
        let spec = BreakpointSpec::line("proj", "com.example.Main", 10);
        let mut bp = Breakpoint::from_spec(BreakpointId(1), spec);

        bp.class_filters = vec!["com.example.*".to_string()];
        bp.filters_inclusive = true;
        assert!(bp.passes_filters("com.example.Main"));
        assert!(!bp.passes_filters("org.other.Main"));

        bp.filters_inclusive = false;
        assert!(!bp.passes_filters("com.example.Main"));
        assert!(bp.passes_filters("org.other.Main"));
    }

    #[test]
    fn test_instance_filter() {
        let spec = BreakpointSpec::line("proj", "com.example.Main", 10);
        let mut bp = Breakpoint::from_spec(BreakpointId(1), spec);
        assert!(bp.passes_instance_filter(None));

        bp.instance_filter = Some(ObjectId(42));
        assert!(bp.passes_instance_filter(Some(ObjectId(42))));
        assert!(!bp.passes_instance_filter(Some(ObjectId(43))));
        assert!(!bp.passes_instance_filter(None));
    }
}
