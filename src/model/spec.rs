//! Static per-profile tables: search parameters, bindings, slices and
//! must-support elements. These describe what to check; the engine decides how.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ConformanceError, Result};
use crate::model::choice::ChoiceType;

/// Matching semantics of a search parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    Token,
    Date,
    Reference,
    String,
    Composite,
}

impl SearchParamType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "token" => Some(Self::Token),
            "date" => Some(Self::Date),
            "reference" => Some(Self::Reference),
            "string" => Some(Self::String),
            "composite" => Some(Self::Composite),
            _ => None,
        }
    }
}

/// One component of a `$`-joined composite parameter; `path` is relative to the
/// composite parameter's own path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeComponent {
    #[serde(rename = "type")]
    pub param_type: SearchParamType,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: SearchParamType,
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<CompositeComponent>,
}

impl SearchParameterSpec {
    pub fn new(name: impl Into<String>, param_type: SearchParamType, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            path: path.into(),
            components: Vec::new(),
        }
    }

    pub fn with_component(mut self, param_type: SearchParamType, path: impl Into<String>) -> Self {
        self.components.push(CompositeComponent {
            param_type,
            path: path.into(),
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    Required,
    Extensible,
}

/// Terminology binding of a coded element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub path: String,
    /// Datatype at `path` (`code`, `Coding`, `CodeableConcept`, `Quantity`).
    #[serde(rename = "type")]
    pub binding_type: String,
    pub strength: BindingStrength,
    #[serde(rename = "valueSet")]
    pub value_set: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_system: Option<String>,
}

impl Binding {
    pub fn required(path: impl Into<String>, binding_type: impl Into<String>, value_set: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            binding_type: binding_type.into(),
            strength: BindingStrength::Required,
            value_set: value_set.into(),
            code_system: None,
        }
    }

    pub fn extensible(path: impl Into<String>, binding_type: impl Into<String>, value_set: impl Into<String>) -> Self {
        Self {
            strength: BindingStrength::Extensible,
            ..Self::required(path, binding_type, value_set)
        }
    }

    pub fn with_code_system(mut self, code_system: impl Into<String>) -> Self {
        self.code_system = Some(code_system.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedValue {
    pub path: String,
    pub value: String,
}

/// Rule distinguishing a slice from its siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Discriminator {
    Pattern {
        path: String,
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        system: Option<String>,
    },
    FixedValues { values: Vec<FixedValue> },
    Datatype { code: ChoiceType },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceDefinition {
    pub name: String,
    pub path: String,
    pub discriminator: Discriminator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MustSupportElement {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_value: Option<String>,
}

impl MustSupportElement {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fixed_value: None,
        }
    }

    pub fn fixed(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fixed_value: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MustSupportSpec {
    #[serde(default)]
    pub elements: Vec<MustSupportElement>,
    #[serde(default)]
    pub slices: Vec<SliceDefinition>,
}

/// Everything the engine needs to know about one implementation-guide profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSpec {
    pub resource_type: String,
    pub profile_url: String,
    #[serde(default)]
    pub search_parameters: Vec<SearchParameterSpec>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default)]
    pub must_support: MustSupportSpec,
    /// Element paths with a minimum cardinality of one.
    #[serde(default)]
    pub mandatory_elements: Vec<String>,
}

impl ProfileSpec {
    pub fn new(resource_type: impl Into<String>, profile_url: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            profile_url: profile_url.into(),
            search_parameters: Vec::new(),
            bindings: Vec::new(),
            must_support: MustSupportSpec::default(),
            mandatory_elements: Vec::new(),
        }
    }

    pub fn with_search_parameter(mut self, spec: SearchParameterSpec) -> Self {
        self.search_parameters.push(spec);
        self
    }

    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn search_parameter(&self, name: &str) -> Option<&SearchParameterSpec> {
        self.search_parameters.iter().find(|p| p.name == name)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.resource_type.is_empty() {
            return Err(ConformanceError::profile("resourceType cannot be empty"));
        }
        for param in &self.search_parameters {
            if param.path.is_empty() && param.param_type != SearchParamType::Composite {
                return Err(ConformanceError::profile(format!(
                    "search parameter '{}' has an empty path",
                    param.name
                )));
            }
            if param.param_type != SearchParamType::Composite && !param.components.is_empty() {
                return Err(ConformanceError::profile(format!(
                    "search parameter '{}' declares components but is not composite",
                    param.name
                )));
            }
        }
        Ok(())
    }
}
