//! Function specifications
//!
//! A [`FunctionSpec`] declares the parameters a function takes and returns,
//! the constraints between input parameters and the application error codes
//! it may produce. The engine uses it to validate calls, the outputter to
//! decide which values are raw XML and the client to tell acceptable error
//! codes from unexpected ones.

use crate::element::{Element, ElementBuilder, ElementError};
use crate::result::Parameters;

/// Type of a parameter value as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Text,
    Boolean,
    Int32,
    Int64,
    Float64,
    /// Well-formed XML, written to results without escaping.
    Xml,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Text => "_text",
            ParamType::Boolean => "_boolean",
            ParamType::Int32 => "_int32",
            ParamType::Int64 => "_int64",
            ParamType::Float64 => "_float64",
            ParamType::Xml => "_xml",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "_text" => Some(ParamType::Text),
            "_boolean" => Some(ParamType::Boolean),
            "_int32" => Some(ParamType::Int32),
            "_int64" => Some(ParamType::Int64),
            "_float64" => Some(ParamType::Float64),
            "_xml" => Some(ParamType::Xml),
            _ => None,
        }
    }

    /// Whether `value` is a valid textual representation of this type.
    pub fn is_valid(&self, value: &str) -> bool {
        match self {
            ParamType::Text => true,
            ParamType::Boolean => value == "true" || value == "false",
            ParamType::Int32 => value.parse::<i32>().is_ok(),
            ParamType::Int64 => value.parse::<i64>().is_ok(),
            ParamType::Float64 => value.parse::<f64>().is_ok_and(f64::is_finite),
            ParamType::Xml => roxmltree::Document::parse(&format!("<x>{}</x>", value)).is_ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: ParamType) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: true,
        }
    }

    pub fn optional(name: &str, param_type: ParamType) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComboKind {
    /// Exactly one of the parameters must be set.
    ExclusiveOr,
    /// At least one of the parameters must be set.
    InclusiveOr,
    /// Either all or none of the parameters must be set.
    AllOrNone,
    /// At least one of the parameters must be left unset.
    NotAll,
}

impl ComboKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComboKind::ExclusiveOr => "exclusive-or",
            ComboKind::InclusiveOr => "inclusive-or",
            ComboKind::AllOrNone => "all-or-none",
            ComboKind::NotAll => "not-all",
        }
    }

    fn is_satisfied(&self, set: usize, total: usize) -> bool {
        match self {
            ComboKind::ExclusiveOr => set == 1,
            ComboKind::InclusiveOr => set >= 1,
            ComboKind::AllOrNone => set == 0 || set == total,
            ComboKind::NotAll => set < total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamCombo {
    pub kind: ComboKind,
    pub params: Vec<String>,
}

impl ParamCombo {
    pub fn new(kind: ComboKind, params: &[&str]) -> Self {
        Self {
            kind,
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Declaration of one function of an API.
///
/// # Examples
///
/// ```
/// use xins_core::function::{FunctionSpec, ParamSpec, ParamType};
///
/// let spec = FunctionSpec::new("GetPet")
///     .input(ParamSpec::required("id", ParamType::Int32))
///     .output(ParamSpec::required("name", ParamType::Text))
///     .error_code("PetNotFound");
/// assert!(spec.accepts_error_code("PetNotFound"));
/// assert!(spec.accepts_error_code("_InvalidRequest"));
/// assert!(!spec.accepts_error_code("Other"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    name: String,
    input: Vec<ParamSpec>,
    output: Vec<ParamSpec>,
    input_combos: Vec<ParamCombo>,
    error_codes: Vec<String>,
}

impl FunctionSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            input: Vec::new(),
            output: Vec::new(),
            input_combos: Vec::new(),
            error_codes: Vec::new(),
        }
    }

    pub fn input(mut self, param: ParamSpec) -> Self {
        self.input.push(param);
        self
    }

    pub fn output(mut self, param: ParamSpec) -> Self {
        self.output.push(param);
        self
    }

    pub fn combo(mut self, combo: ParamCombo) -> Self {
        self.input_combos.push(combo);
        self
    }

    pub fn error_code(mut self, code: &str) -> Self {
        self.error_codes.push(code.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_params(&self) -> &[ParamSpec] {
        &self.input
    }

    pub fn output_params(&self) -> &[ParamSpec] {
        &self.output
    }

    pub fn error_codes(&self) -> &[String] {
        &self.error_codes
    }

    pub fn input_type(&self, name: &str) -> Option<ParamType> {
        self.input
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.param_type)
    }

    pub fn output_type(&self, name: &str) -> Option<ParamType> {
        self.output
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.param_type)
    }

    /// Whether a result with this error code is legitimate for the function.
    ///
    /// Framework error codes are always acceptable.
    pub fn accepts_error_code(&self, code: &str) -> bool {
        crate::result::is_standard_error_code(code) || self.error_codes.iter().any(|c| c == code)
    }

    /// Checks input parameters against the declaration.
    ///
    /// Returns `None` when the input is valid, otherwise a `data` element
    /// listing every violation as `missing-param`, `invalid-value-for-type`
    /// or `param-combo` children.
    pub fn validate_input(&self, params: &Parameters) -> Result<Option<Element>, ElementError> {
        let mut violations = check_params(&self.input, params)?;
        for combo in &self.input_combos {
            let set = combo
                .params
                .iter()
                .filter(|p| params.get(p.as_str()).is_some_and(|v| !v.is_empty()))
                .count();
            if !combo.kind.is_satisfied(set, combo.params.len()) {
                let mut element = ElementBuilder::new("param-combo")?
                    .attribute("type", combo.kind.as_str())
                    .build();
                for name in &combo.params {
                    element.add_child(ElementBuilder::new("param")?.attribute("name", name).build());
                }
                violations.push(element);
            }
        }
        wrap_violations(violations)
    }

    /// Checks the parameters of a successful result against the declaration.
    pub fn validate_output(&self, params: &Parameters) -> Result<Option<Element>, ElementError> {
        let violations = check_params(&self.output, params)?;
        wrap_violations(violations)
    }
}

fn check_params(specs: &[ParamSpec], params: &Parameters) -> Result<Vec<Element>, ElementError> {
    let mut violations = Vec::new();
    for spec in specs {
        match params.get(&spec.name).filter(|v| !v.is_empty()) {
            None if spec.required => {
                violations.push(
                    ElementBuilder::new("missing-param")?
                        .attribute("param", &spec.name)
                        .build(),
                );
            }
            Some(value) if !spec.param_type.is_valid(value) => {
                violations.push(
                    ElementBuilder::new("invalid-value-for-type")?
                        .attribute("param", &spec.name)
                        .attribute("type", spec.param_type.as_str())
                        .attribute("value", value)
                        .build(),
                );
            }
            _ => {}
        }
    }
    Ok(violations)
}

fn wrap_violations(violations: Vec<Element>) -> Result<Option<Element>, ElementError> {
    if violations.is_empty() {
        return Ok(None);
    }
    let mut data = Element::new("data")?;
    for v in violations {
        data.add_child(v);
    }
    Ok(Some(data))
}
