use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of validation return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetCode {
    Success,
    Error,
    NotImplemented,
    InternalUnknown,
    Failure,
    SyntaxError,
    SyntaxMissingField,
    SyntaxInvalidField,
    SyntaxInvalidInputData,
    SyntaxMultipleInstance,
    SyntaxDuplicate,
    SyntaxEnumInvalid,
    SyntaxEnumInvalidName,
    SyntaxEnumWhitespace,
    SyntaxOutOfRange,
    SyntaxMinimumInvalid,
    SyntaxMaximumInvalid,
    SemanticError,
    SemanticDependentDataMissing,
    SemanticMandatoryDataMissing,
    SemanticKeyAlreadyExist,
    SemanticKeyNotExist,
    SemanticKeyDuplicate,
    SemanticKeyInvalid,
}

impl RetCode {
    /// Fixed human-readable text for the code.
    pub fn description(&self) -> &'static str {
        match self {
            RetCode::Success => "Config Validation Success",
            RetCode::Error => "Config Validation Error",
            RetCode::NotImplemented => "Not implemented",
            RetCode::InternalUnknown => "Internal Unknown Error",
            RetCode::Failure => "Generic Failure",
            RetCode::SyntaxError => "Config Validation Syntax Error",
            RetCode::SyntaxMissingField => "Required Field is Missing",
            RetCode::SyntaxInvalidField => "Invalid Field Received",
            RetCode::SyntaxInvalidInputData => "Invalid Input Data Received",
            RetCode::SyntaxMultipleInstance => "Multiple Field Instances Received",
            RetCode::SyntaxDuplicate => "Duplicate Instances Received",
            RetCode::SyntaxEnumInvalid => "Invalid Enum Value Received",
            RetCode::SyntaxEnumInvalidName => "Invalid Enum Value Received",
            RetCode::SyntaxEnumWhitespace => "Enum name with leading/trailing whitespaces Received",
            RetCode::SyntaxOutOfRange => "Value out of range/length/pattern (data)",
            RetCode::SyntaxMinimumInvalid => "min-elements constraint not honored",
            RetCode::SyntaxMaximumInvalid => "max-elements constraint not honored",
            RetCode::SemanticError => "Config Validation Semantic Error",
            RetCode::SemanticDependentDataMissing => "Dependent Data is missing",
            RetCode::SemanticMandatoryDataMissing => "Mandatory Data is missing",
            RetCode::SemanticKeyAlreadyExist => "Key already existing.",
            RetCode::SemanticKeyNotExist => "Key is missing.",
            RetCode::SemanticKeyDuplicate => "Duplicate key received",
            RetCode::SemanticKeyInvalid => "Invalid Key Received",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetCode::Success)
    }

    pub fn is_syntax(&self) -> bool {
        matches!(
            self,
            RetCode::SyntaxError
                | RetCode::SyntaxMissingField
                | RetCode::SyntaxInvalidField
                | RetCode::SyntaxInvalidInputData
                | RetCode::SyntaxMultipleInstance
                | RetCode::SyntaxDuplicate
                | RetCode::SyntaxEnumInvalid
                | RetCode::SyntaxEnumInvalidName
                | RetCode::SyntaxEnumWhitespace
                | RetCode::SyntaxOutOfRange
                | RetCode::SyntaxMinimumInvalid
                | RetCode::SyntaxMaximumInvalid
        )
    }

    pub fn is_semantic(&self) -> bool {
        matches!(
            self,
            RetCode::SemanticError
                | RetCode::SemanticDependentDataMissing
                | RetCode::SemanticMandatoryDataMissing
                | RetCode::SemanticKeyAlreadyExist
                | RetCode::SemanticKeyNotExist
                | RetCode::SemanticKeyDuplicate
                | RetCode::SemanticKeyInvalid
        )
    }
}

impl fmt::Display for RetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Structured validation failure returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: RetCode,
    /// Code-specific details, defaults to the code description.
    pub details: String,
    pub table: String,
    pub keys: Vec<String>,
    pub field: String,
    pub value: String,
    pub msg: String,
    /// Schema-declared error message, when one applies.
    pub constraint_msg: String,
    /// Schema-declared application error tag, when one applies.
    pub app_tag: String,
}

impl ErrorInfo {
    pub fn new(code: RetCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            details: code.description().to_string(),
            table: String::new(),
            keys: Vec::new(),
            field: String::new(),
            value: String::new(),
            msg: msg.into(),
            constraint_msg: String::new(),
            app_tag: String::new(),
        }
    }

    /// Internal failure outside the validation taxonomy (store errors and the like).
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(RetCode::InternalUnknown, msg)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_constraint_msg(mut self, constraint_msg: impl Into<String>) -> Self {
        self.constraint_msg = constraint_msg.into();
        self
    }

    pub fn with_app_tag(mut self, app_tag: impl Into<String>) -> Self {
        self.app_tag = app_tag.into();
        self
    }

    /// User-facing message: the constraint message when present, otherwise a
    /// generic sentence naming the table entry.
    pub fn message(&self) -> String {
        if !self.constraint_msg.is_empty() {
            return self.constraint_msg.clone();
        }
        format!(
            "{} in {} table entry [{}]",
            self.msg,
            self.table,
            self.keys.join(" ")
        )
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message())?;
        if !self.field.is_empty() {
            write!(f, " (field '{}'", self.field)?;
            if !self.value.is_empty() {
                write!(f, " = '{}'", self.value)?;
            }
            f.write_str(")")?;
        }
        if !self.app_tag.is_empty() {
            write!(f, " app-tag={}", self.app_tag)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorInfo {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_prefers_constraint_text() {
        let err = ErrorInfo::new(RetCode::SemanticError, "Must expression validation failed")
            .with_table("VLAN")
            .with_keys(vec!["Vlan11".to_string()]);
        assert_eq!(
            err.message(),
            "Must expression validation failed in VLAN table entry [Vlan11]"
        );

        let err = err.with_constraint_msg("vlanid must be unique");
        assert_eq!(err.message(), "vlanid must be unique");
    }

    #[test]
    fn families_are_disjoint() {
        assert!(RetCode::SyntaxOutOfRange.is_syntax());
        assert!(!RetCode::SyntaxOutOfRange.is_semantic());
        assert!(RetCode::SemanticKeyNotExist.is_semantic());
        assert!(!RetCode::Failure.is_syntax());
        assert_eq!(
            RetCode::SemanticDependentDataMissing.description(),
            "Dependent Data is missing"
        );
    }
}
