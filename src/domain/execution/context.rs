use std::collections::HashMap;

/// Reserved variable holding the chain's initial input
pub const ORIGINAL_VARIABLE: &str = "original";
/// Reserved variable holding the latest completed step's output
pub const PREVIOUS_VARIABLE: &str = "previous";

/// Variables produced so far by one chain execution
///
/// Owned by a single execution; never shared between runs.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    variables: HashMap<String, String>,
}

impl ExecutionContext {
    pub fn new(original: impl Into<String>) -> Self {
        let mut variables = HashMap::new();
        variables.insert(ORIGINAL_VARIABLE.to_string(), original.into());
        Self { variables }
    }

    pub fn original(&self) -> &str {
        self.get(ORIGINAL_VARIABLE).unwrap_or_default()
    }

    /// Output of the most recently completed step, if any step has completed
    pub fn previous(&self) -> Option<&str> {
        self.get(PREVIOUS_VARIABLE)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Record a completed step's processed output
    pub fn record(&mut self, output: &str, variable: Option<&str>) {
        self.variables
            .insert(PREVIOUS_VARIABLE.to_string(), output.to_string());
        if let Some(name) = variable {
            self.variables.insert(name.to_string(), output.to_string());
        }
    }

    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_records_previous_and_named_outputs() {
        let mut context = ExecutionContext::new("source");
        assert_eq!(context.original(), "source");
        assert!(context.previous().is_none());

        context.record("summary text", Some("summary"));
        context.record("polished", None);

        assert_eq!(context.previous(), Some("polished"));
        assert_eq!(context.get("summary"), Some("summary text"));
        assert_eq!(context.original(), "source");
        assert_eq!(context.variables().len(), 3);
    }
}
