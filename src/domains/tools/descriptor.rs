//! Tool descriptors - the frozen record behind every registered tool.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use super::error::ConfigError;
use super::handlers::ToolImplementation;
use super::schema::{InputSchema, OutputSchema};

/// Version given to tools that do not declare one.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Closed set of tool categories.
///
/// The declaration order is the reporting order of
/// [`ToolRegistry::counts_by_category`](super::ToolRegistry::counts_by_category).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolCategory {
    Search,
    Calculation,
    Optimization,
    Analysis,
    Utils,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 5] = [
        Self::Search,
        Self::Calculation,
        Self::Optimization,
        Self::Analysis,
        Self::Utils,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "SEARCH",
            Self::Calculation => "CALCULATION",
            Self::Optimization => "OPTIMIZATION",
            Self::Analysis => "ANALYSIS",
            Self::Utils => "UTILS",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolCategory {
    type Err = ConfigError;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownCategory(s.to_string()))
    }
}

/// Stability of a tool. Informational only; it never gates invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolStatus {
    #[default]
    Stable,
    Experimental,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "STABLE",
            Self::Experimental => "EXPERIMENTAL",
        }
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolStatus {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STABLE" => Ok(Self::Stable),
            "EXPERIMENTAL" => Ok(Self::Experimental),
            _ => Err(ConfigError::UnknownStatus(s.to_string())),
        }
    }
}

/// Immutable metadata + schemas + implementation of one tool.
///
/// Built once through [`ToolDescriptorBuilder`]; there are no setters.
pub struct ToolDescriptor {
    name: String,
    description: String,
    category: ToolCategory,
    version: String,
    tags: BTreeSet<String>,
    requires: BTreeSet<String>,
    status: ToolStatus,
    implementation: Arc<dyn ToolImplementation>,
    input_schema: InputSchema,
    output_schema: OutputSchema,
}

impl ToolDescriptor {
    pub fn builder(name: impl Into<String>) -> ToolDescriptorBuilder {
        ToolDescriptorBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category(&self) -> ToolCategory {
        self.category
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn requires(&self) -> &BTreeSet<String> {
        &self.requires
    }

    pub fn status(&self) -> ToolStatus {
        self.status
    }

    pub fn implementation(&self) -> &Arc<dyn ToolImplementation> {
        &self.implementation
    }

    pub fn input_schema(&self) -> &InputSchema {
        &self.input_schema
    }

    pub fn output_schema(&self) -> &OutputSchema {
        &self.output_schema
    }

    /// Public metadata, as exposed by catalog listings.
    pub fn summary(&self) -> ToolSummary {
        ToolSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category,
            version: self.version.clone(),
            tags: self.tags.iter().cloned().collect(),
            status: self.status,
            requires: self.requires.iter().cloned().collect(),
        }
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("version", &self.version)
            .field("tags", &self.tags)
            .field("requires", &self.requires)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Catalog entry returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub version: String,
    pub tags: Vec<String>,
    pub status: ToolStatus,
    pub requires: Vec<String>,
}

/// Assembles and freezes a [`ToolDescriptor`].
pub struct ToolDescriptorBuilder {
    name: String,
    description: String,
    category: Option<ToolCategory>,
    version: String,
    tags: BTreeSet<String>,
    requires: BTreeSet<String>,
    status: ToolStatus,
    implementation: Option<Arc<dyn ToolImplementation>>,
    input_schema: Option<InputSchema>,
    output_schema: Option<OutputSchema>,
}

impl ToolDescriptorBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category: None,
            version: DEFAULT_VERSION.to_string(),
            tags: BTreeSet::new(),
            requires: BTreeSet::new(),
            status: ToolStatus::default(),
            implementation: None,
            input_schema: None,
            output_schema: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn category(mut self, category: ToolCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn requires<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn status(mut self, status: ToolStatus) -> Self {
        self.status = status;
        self
    }

    pub fn implementation(mut self, implementation: Arc<dyn ToolImplementation>) -> Self {
        self.implementation = Some(implementation);
        self
    }

    pub fn input_schema(mut self, schema: InputSchema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Freeze the descriptor, checking that every part is present.
    ///
    /// Names are taken verbatim: surrounding whitespace is an error, never
    /// silently trimmed.
    pub fn build(self) -> Result<ToolDescriptor, ConfigError> {
        let name = self.name;
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if name.trim() != name {
            return Err(ConfigError::UntrimmedName(name));
        }
        if self.description.trim().is_empty() {
            return Err(ConfigError::EmptyDescription(name));
        }
        if self.version.trim().is_empty() {
            return Err(ConfigError::EmptyVersion(name));
        }

        let category = self
            .category
            .ok_or_else(|| ConfigError::missing(&name, "category"))?;
        let implementation = self
            .implementation
            .ok_or_else(|| ConfigError::missing(&name, "implementation"))?;
        let input_schema = self
            .input_schema
            .ok_or_else(|| ConfigError::missing(&name, "input schema"))?;
        let output_schema = self
            .output_schema
            .ok_or_else(|| ConfigError::missing(&name, "output schema"))?;

        Ok(ToolDescriptor {
            name,
            description: self.description,
            category,
            version: self.version.trim().to_string(),
            tags: self.tags,
            requires: self.requires,
            status: self.status,
            implementation,
            input_schema,
            output_schema,
        })
    }
}
