use crate::error::ConfigError;
use crate::model::document::Document;
use crate::validation::rules::{
    AccountEntriesRule, CachedAssetsRule, CommandsRule, DefaultTargetRule, ProjectSectionRule,
    StagesRule, ValidationRule,
};
use tracing::debug;

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    /// Run every rule in order and stop at the first violation
    pub fn validate(&self, document: &Document) -> Result<(), ConfigError> {
        for rule in &self.rules {
            if let Err(e) = rule.validate(document) {
                debug!(rule = rule.name(), error = %e, "Validation failed");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(ProjectSectionRule),
                Box::new(StagesRule),
                Box::new(CachedAssetsRule),
                Box::new(AccountEntriesRule),
                Box::new(CommandsRule),
                Box::new(DefaultTargetRule),
            ],
        }
    }
}
