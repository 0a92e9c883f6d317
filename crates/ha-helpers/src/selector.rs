//! Form field selectors
//!
//! Describe how a config flow form field is rendered.

use serde::{Deserialize, Serialize};

/// A selectable option: the submitted value and its display label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOptionDict {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectSelectorMode {
    List,
    #[default]
    Dropdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectSelectorConfig {
    pub options: Vec<SelectOptionDict>,
    #[serde(default)]
    pub multiple: bool,
    /// Options are shown sorted by label
    #[serde(default)]
    pub sort: bool,
    #[serde(default)]
    pub mode: SelectSelectorMode,
}

impl SelectSelectorConfig {
    /// Single-choice dropdown over `options`
    pub fn new(options: Vec<SelectOptionDict>) -> Self {
        Self {
            options,
            multiple: false,
            sort: false,
            mode: SelectSelectorMode::Dropdown,
        }
    }

    /// Sort the options by label, as the form will display them
    pub fn sorted(mut self) -> Self {
        self.options.sort_by(|a, b| a.label.cmp(&b.label));
        self.sort = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Select(SelectSelectorConfig),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn option(value: &str, label: &str) -> SelectOptionDict {
        SelectOptionDict {
            value: value.to_string(),
            label: label.to_string(),
        }
    }

    #[test]
    fn test_sorted_by_label() {
        let config = SelectSelectorConfig::new(vec![
            option("2", "Wisła (Warszawa)"),
            option("1", "Odra (Wrocław)"),
        ])
        .sorted();

        let values: Vec<_> = config.options.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, ["1", "2"]);
        assert!(config.sort);
        assert!(!config.multiple);
    }

    #[test]
    fn test_serialization() {
        let selector = Selector::Select(SelectSelectorConfig::new(vec![option("1", "A")]));
        assert_eq!(
            serde_json::to_value(&selector).unwrap(),
            json!({"select": {
                "options": [{"value": "1", "label": "A"}],
                "multiple": false,
                "sort": false,
                "mode": "dropdown"
            }})
        );
    }
}
