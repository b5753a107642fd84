use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use thiserror::Error;

use deskagent_core::ToolSchema;

use crate::catalog::{groups, ToolCatalog, ToolDefinition};
use crate::executor::ToolHandler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnableOutcome {
    Enabled,
    AlreadyEnabled,
    UnknownGroup,
    /// Another enabled group already registers a tool with this name.
    NameConflict { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableOutcome {
    Disabled,
    CoreGroupImmutable,
    UnknownGroup,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// Runtime view of the catalog: which groups are enabled and which handlers
/// are installed. One registry per worker; nothing here is shared across
/// sessions.
pub struct ToolRegistry {
    catalog: Arc<ToolCatalog>,
    enabled_groups: RwLock<BTreeSet<String>>,
    handlers: DashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// A registry with the core groups enabled and their built-in handlers
    /// installed.
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        let registry = Self {
            catalog,
            enabled_groups: RwLock::new(
                groups::CORE.iter().map(|group| group.to_string()).collect(),
            ),
            handlers: DashMap::new(),
        };
        crate::handlers::install_builtin_handlers(&registry);
        registry
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn enable(&self, group: &str) -> EnableOutcome {
        if !groups::is_known(group) {
            return EnableOutcome::UnknownGroup;
        }

        let Ok(mut enabled) = self.enabled_groups.write() else {
            return EnableOutcome::UnknownGroup;
        };

        if enabled.contains(group) {
            return EnableOutcome::AlreadyEnabled;
        }

        // No two enabled tools may share a name.
        let taken: BTreeSet<&str> = self
            .catalog
            .definitions()
            .iter()
            .filter(|def| enabled.contains(&def.group))
            .map(|def| def.name.as_str())
            .collect();
        for def in self.catalog.group(group) {
            if taken.contains(def.name.as_str()) {
                return EnableOutcome::NameConflict {
                    name: def.name.clone(),
                };
            }
        }

        enabled.insert(group.to_string());
        log::info!("Tool group '{group}' enabled");
        EnableOutcome::Enabled
    }

    pub fn disable(&self, group: &str) -> DisableOutcome {
        if !groups::is_known(group) {
            return DisableOutcome::UnknownGroup;
        }
        if groups::is_core(group) {
            return DisableOutcome::CoreGroupImmutable;
        }

        if let Ok(mut enabled) = self.enabled_groups.write() {
            enabled.remove(group);
        }
        log::info!("Tool group '{group}' disabled");
        DisableOutcome::Disabled
    }

    pub fn is_group_enabled(&self, group: &str) -> bool {
        self.enabled_groups
            .read()
            .map(|enabled| enabled.contains(group))
            .unwrap_or(false)
    }

    /// Group ids enabled beyond the core pair.
    pub fn enabled_optional_groups(&self) -> Vec<String> {
        self.enabled_groups
            .read()
            .map(|enabled| {
                enabled
                    .iter()
                    .filter(|group| !groups::is_core(group))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn enabled_definitions(&self) -> Vec<ToolDefinition> {
        let Ok(enabled) = self.enabled_groups.read() else {
            return Vec::new();
        };
        self.catalog
            .definitions()
            .iter()
            .filter(|def| enabled.contains(&def.group))
            .cloned()
            .collect()
    }

    /// Definition of an enabled tool by name.
    pub fn definition(&self, name: &str) -> Option<ToolDefinition> {
        let def = self.catalog.get(name)?;
        if self.is_group_enabled(&def.group) {
            Some(def.clone())
        } else {
            None
        }
    }

    /// The `tools` array passed to the LLM, sorted by name.
    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .enabled_definitions()
            .iter()
            .map(ToolDefinition::schema)
            .collect();
        schemas.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        schemas
    }

    /// Human-readable digest of the enabled tools, grouped, for the planner
    /// and the system prompt.
    pub fn summary_for_planning(&self) -> String {
        let definitions = self.enabled_definitions();
        let mut by_group: Vec<(String, Vec<&ToolDefinition>)> = Vec::new();

        for def in &definitions {
            match by_group.iter_mut().find(|(group, _)| group == &def.group) {
                Some((_, defs)) => defs.push(def),
                None => by_group.push((def.group.clone(), vec![def])),
            }
        }

        let mut out = String::from("AVAILABLE TOOLS:\n");
        for (group, defs) in by_group {
            out.push_str(&format!("\n[{group}]\n"));
            for def in defs {
                out.push_str(&format!("- {}: {}\n", def.name, def.description));
            }
        }
        out
    }

    /// Install the handler that backs a catalog tool.
    pub fn set_handler(
        &self,
        name: &str,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.catalog.get(name).is_none() {
            return Err(RegistryError::UnknownTool(name.to_string()));
        }
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolRegistry {
        ToolRegistry::new(Arc::new(ToolCatalog::builtin()))
    }

    #[test]
    fn core_groups_are_enabled_by_default() {
        let registry = registry();
        assert!(registry.is_group_enabled(groups::COMMUNICATION));
        assert!(registry.is_group_enabled(groups::TODO));
        assert!(!registry.is_group_enabled(groups::FILE));
    }

    #[test]
    fn enable_reports_each_outcome() {
        let registry = registry();
        assert_eq!(registry.enable(groups::FILE), EnableOutcome::Enabled);
        assert_eq!(registry.enable(groups::FILE), EnableOutcome::AlreadyEnabled);
        assert_eq!(registry.enable("telepathy"), EnableOutcome::UnknownGroup);
    }

    #[test]
    fn core_groups_cannot_be_disabled() {
        let registry = registry();
        assert_eq!(
            registry.disable(groups::COMMUNICATION),
            DisableOutcome::CoreGroupImmutable
        );
        assert_eq!(
            registry.disable(groups::TODO),
            DisableOutcome::CoreGroupImmutable
        );
        assert_eq!(registry.disable("telepathy"), DisableOutcome::UnknownGroup);

        registry.enable(groups::SHELL);
        assert_eq!(registry.disable(groups::SHELL), DisableOutcome::Disabled);
        assert!(!registry.is_group_enabled(groups::SHELL));
    }

    #[test]
    fn list_schemas_only_covers_enabled_groups_sorted() {
        let registry = registry();
        let names: Vec<String> = registry
            .list_schemas()
            .iter()
            .map(|schema| schema.function.name.clone())
            .collect();

        assert!(names.contains(&"final_response".to_string()));
        assert!(!names.contains(&"read_file".to_string()));

        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);

        registry.enable(groups::FILE);
        let names: Vec<String> = registry
            .list_schemas()
            .iter()
            .map(|schema| schema.function.name.clone())
            .collect();
        assert!(names.contains(&"read_file".to_string()));
    }

    #[test]
    fn enabled_optional_groups_excludes_core() {
        let registry = registry();
        assert!(registry.enabled_optional_groups().is_empty());

        registry.enable(groups::VISION);
        registry.enable(groups::FILE);
        assert_eq!(
            registry.enabled_optional_groups(),
            vec!["file".to_string(), "vision".to_string()]
        );
    }

    #[test]
    fn planning_summary_mentions_enabled_tools() {
        let registry = registry();
        registry.enable(groups::SHELL);
        let summary = registry.summary_for_planning();

        assert!(summary.contains("[communication]"));
        assert!(summary.contains("final_response"));
        assert!(summary.contains("run_command"));
        assert!(!summary.contains("browser_navigate"));
    }

    #[test]
    fn definition_hides_disabled_tools() {
        let registry = registry();
        assert!(registry.definition("read_file").is_none());
        registry.enable(groups::FILE);
        assert!(registry.definition("read_file").is_some());
    }

    #[test]
    fn set_handler_rejects_unknown_tools() {
        let registry = registry();
        let result = registry.set_handler(
            "not_a_tool",
            Arc::new(crate::handlers::communication::TellToUser),
        );
        assert!(matches!(result, Err(RegistryError::UnknownTool(_))));
    }
}
