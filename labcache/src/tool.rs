use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An external tool that derives artifacts. `command_template` holds a `{params}` placeholder for the expanded tool
/// parameters and an `{input}` placeholder for the resolved input paths, for example `sort {params} {input}`.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct Tool {
  pub name: String,
  pub command_template: String,
}

impl Tool {
  #[inline]
  pub fn new(name: impl Into<String>, command_template: impl Into<String>) -> Self {
    Self { name: name.into(), command_template: command_template.into() }
  }
}


/// Read-only lookup of [`Tool`] definitions by name.
pub trait ToolRegistry {
  /// Returns the tool named `name`, or `None` if no such tool is registered.
  fn tool(&self, name: &str) -> Option<Tool>;
}

impl<R: ToolRegistry + ?Sized> ToolRegistry for &R {
  #[inline]
  fn tool(&self, name: &str) -> Option<Tool> { (**self).tool(name) }
}

/// In-memory [`ToolRegistry`].
#[derive(Default, Clone, Debug)]
pub struct ToolSet {
  tools: HashMap<String, Tool>,
}

impl ToolSet {
  #[inline]
  pub fn new() -> Self { Self::default() }

  /// Registers `tool`, replacing any tool with the same name, and returns `self` for chaining.
  #[inline]
  pub fn with(mut self, tool: Tool) -> Self {
    self.register(tool);
    self
  }
  #[inline]
  pub fn register(&mut self, tool: Tool) -> Option<Tool> {
    self.tools.insert(tool.name.clone(), tool)
  }
}

impl ToolRegistry for ToolSet {
  #[inline]
  fn tool(&self, name: &str) -> Option<Tool> { self.tools.get(name).cloned() }
}

impl FromIterator<Tool> for ToolSet {
  fn from_iter<I: IntoIterator<Item=Tool>>(iter: I) -> Self {
    let mut tool_set = Self::new();
    for tool in iter {
      tool_set.register(tool);
    }
    tool_set
  }
}
