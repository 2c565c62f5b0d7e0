//! Client-side checks that gate a submit.

use serde::Serialize;
use std::fmt;

use crate::schema::Schema;
use crate::surface::RenderedSurface;

/// One reason the form cannot be submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field_key: Option<String>,
    pub label: String,
}

impl Violation {
    pub fn new(field_key: Option<String>, label: impl Into<String>) -> Self {
        Self {
            field_key,
            label: label.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Attachment requirement for a submit.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachmentRule<'a> {
    pub required: bool,
    pub attached: usize,
    pub message: &'a str,
}

/// Required controls left blank, controls marked invalid, and a missing
/// required attachment. Each label is reported once, in surface order.
pub fn validate(
    surface: &RenderedSurface,
    schema: &Schema,
    attachments: AttachmentRule<'_>,
) -> Vec<Violation> {
    let mut violations: Vec<Violation> = Vec::new();
    let mut push = |violation: Violation| {
        if !violations.iter().any(|v| v.label == violation.label) {
            violations.push(violation);
        }
    };

    for element in surface.elements() {
        let key = surface.field_key_of(element);
        let model = key.as_deref().and_then(|k| schema.get(k));
        let label = element
            .label
            .clone()
            .or_else(|| model.map(|m| m.descriptor().display_name.clone()))
            .unwrap_or_else(|| element.id.clone());

        if element.required && model.is_some_and(|m| m.get().is_blank()) {
            push(Violation::new(key.clone(), label.clone()));
        }
        if element.invalid {
            push(Violation::new(key, label));
        }
    }

    if schema.enable_attachments && attachments.required && attachments.attached == 0 {
        push(Violation::new(None, attachments.message));
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compile;
    use crate::surface::SurfaceElement;
    use listform_client::{FieldSchema, ListSchema};

    fn schema() -> Schema {
        compile(&ListSchema {
            enable_attachments: true,
            fields: vec![
                FieldSchema::new("Title", "Title", "Text").required(),
                FieldSchema::new("Tags", "Tags", "MultiChoice").required(),
                FieldSchema::new("Email", "Contact Email", "Text"),
            ],
            ..Default::default()
        })
        .unwrap()
    }

    const NO_ATTACHMENT_RULE: AttachmentRule<'static> = AttachmentRule {
        required: false,
        attached: 0,
        message: "",
    };

    #[test]
    fn test_required_blank_fields() {
        let schema = schema();
        let surface = RenderedSurface::generate(&schema);

        let violations = validate(&surface, &schema, NO_ATTACHMENT_RULE);
        let labels: Vec<&str> = violations.iter().map(|v| v.label.as_str()).collect();
        assert_eq!(labels, vec!["Tags", "Title"]);

        schema.get("Title").unwrap().set("Fix door");
        schema.get("Tags").unwrap().set(vec!["A".to_string()]);
        assert!(validate(&surface, &schema, NO_ATTACHMENT_RULE).is_empty());
    }

    #[test]
    fn test_invalid_controls_reported_once() {
        let schema = schema();
        schema.get("Title").unwrap().set("x");
        let surface = RenderedSurface::new(vec![
            SurfaceElement::input("email", "value: ContactEmail").invalid(),
            SurfaceElement::input("email2", "value: ContactEmail")
                .with_label("Contact Email")
                .invalid(),
        ]);

        let violations = validate(&surface, &schema, NO_ATTACHMENT_RULE);
        assert_eq!(violations, vec![Violation::new(Some("ContactEmail".into()), "Contact Email")]);
    }

    #[test]
    fn test_required_attachment() {
        let schema = schema();
        let surface = RenderedSurface::default();
        let rule = AttachmentRule {
            required: true,
            attached: 0,
            message: "An attachment is required.",
        };

        let violations = validate(&surface, &schema, rule);
        assert_eq!(violations, vec![Violation::new(None, "An attachment is required.")]);

        let rule = AttachmentRule { attached: 1, ..rule };
        assert!(validate(&surface, &schema, rule).is_empty());
    }
}
