//! The rendered form surface as seen by the form engine.
//!
//! A [`RenderedSurface`] is the flat list of elements a UI-binding runtime
//! produced for a schema: controls with their binding expressions, sections
//! with group restrictions and visibility markers. The engine never renders;
//! it reads the surface to decide what to hide, what may be written back and
//! what is required.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use crate::error::{FormError, Result};
use crate::field::FieldType;
use crate::schema::Schema;

pub type ElementId = String;

/// Binding target that refers to the enclosing element's binding.
pub const PARENT_BINDING: &str = "parent";

const NON_EDITABLE_INPUT_TYPES: &[&str] = &["button", "submit", "cancel", "reset"];

/// One element of the rendered surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceElement {
    pub id: ElementId,
    /// Lower-case tag name, e.g. `input`, `select`, `section`
    pub tag: String,
    pub input_type: Option<String>,
    /// Binding expression, e.g. `value: Title`
    pub binding: Option<String>,
    pub content_editable: bool,
    pub required: bool,
    /// Marked invalid by a client-side check
    pub invalid: bool,
    pub label: Option<String>,
    /// Group restriction, e.g. `5;#Finance,Legal`
    pub groups: Option<String>,
    pub edit_only: bool,
    pub new_only: bool,
    pub author_only: bool,
    pub non_author_only: bool,
    pub parent: Option<ElementId>,
}

impl SurfaceElement {
    pub fn new(id: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag: tag.into().to_ascii_lowercase(),
            ..Default::default()
        }
    }

    /// An `<input>` bound to `binding`.
    pub fn input(id: impl Into<String>, binding: impl Into<String>) -> Self {
        Self::new(id, "input").bound(binding)
    }

    pub fn select(id: impl Into<String>, binding: impl Into<String>) -> Self {
        Self::new(id, "select").bound(binding)
    }

    pub fn textarea(id: impl Into<String>, binding: impl Into<String>) -> Self {
        Self::new(id, "textarea").bound(binding)
    }

    /// A container for other elements.
    pub fn section(id: impl Into<String>) -> Self {
        Self::new(id, "section")
    }

    pub fn bound(mut self, binding: impl Into<String>) -> Self {
        self.binding = Some(binding.into());
        self
    }

    pub fn with_type(mut self, input_type: impl Into<String>) -> Self {
        self.input_type = Some(input_type.into().to_ascii_lowercase());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_groups(mut self, groups: impl Into<String>) -> Self {
        self.groups = Some(groups.into());
        self
    }

    pub fn within(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn invalid(mut self) -> Self {
        self.invalid = true;
        self
    }

    pub fn content_editable(mut self) -> Self {
        self.content_editable = true;
        self
    }

    pub fn edit_only(mut self) -> Self {
        self.edit_only = true;
        self
    }

    pub fn new_only(mut self) -> Self {
        self.new_only = true;
        self
    }

    pub fn author_only(mut self) -> Self {
        self.author_only = true;
        self
    }

    pub fn non_author_only(mut self) -> Self {
        self.non_author_only = true;
        self
    }

    /// A control whose value a user can change.
    pub fn is_editable_control(&self) -> bool {
        if self.content_editable {
            return true;
        }
        match self.tag.as_str() {
            "input" => !self
                .input_type
                .as_deref()
                .is_some_and(|t| NON_EDITABLE_INPUT_TYPES.contains(&t)),
            "select" | "textarea" => true,
            _ => false,
        }
    }
}

fn binding_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*[\w-]+\s*:\s*(?:\$(?:root|data)\.)?(\$?\w+)").expect("static pattern")
    })
}

/// Field key named by a binding expression.
///
/// `"value: Title"` -> `Title`, `"checked: $root.Tags"` -> `Tags`,
/// `"value: $parent"` -> [`PARENT_BINDING`].
pub fn field_key_from_binding(expr: &str) -> Option<String> {
    let caps = binding_pattern().captures(expr)?;
    let target = caps.get(1)?.as_str();
    Some(target.trim_start_matches('$').to_string())
}

/// The elements a binding runtime produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedSurface {
    elements: Vec<SurfaceElement>,
}

impl RenderedSurface {
    pub fn new(elements: Vec<SurfaceElement>) -> Self {
        Self { elements }
    }

    /// A plain surface with one labelled control per field.
    pub fn generate(schema: &Schema) -> Self {
        let mut elements = Vec::with_capacity(schema.len());
        for (key, model) in schema.iter() {
            let descriptor = model.descriptor();
            let binding = format!("value: {}", key);
            let mut element = if descriptor.read_only {
                SurfaceElement::new(key.clone(), "span").bound(format!("text: {}", key))
            } else {
                match descriptor.field_type {
                    FieldType::Note => SurfaceElement::textarea(key.clone(), binding),
                    FieldType::Choice | FieldType::MultiChoice => {
                        SurfaceElement::select(key.clone(), binding)
                    }
                    FieldType::Boolean => SurfaceElement::input(key.clone(), format!("checked: {}", key))
                        .with_type("checkbox"),
                    FieldType::Number | FieldType::Currency => {
                        SurfaceElement::input(key.clone(), binding).with_type("number")
                    }
                    FieldType::DateTime => SurfaceElement::input(key.clone(), binding).with_type("date"),
                    _ => SurfaceElement::input(key.clone(), binding).with_type("text"),
                }
            };
            element.label = Some(descriptor.display_name.clone());
            element.required = descriptor.required && !descriptor.read_only;
            elements.push(element);
        }
        Self { elements }
    }

    pub fn push(&mut self, element: SurfaceElement) {
        self.elements.push(element);
    }

    pub fn elements(&self) -> &[SurfaceElement] {
        &self.elements
    }

    pub fn get(&self, id: &str) -> Option<&SurfaceElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SurfaceElement> {
        self.elements.iter_mut().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Field key bound by an element, following `$parent` references.
    pub fn field_key_of(&self, element: &SurfaceElement) -> Option<String> {
        let mut current = element;
        let mut seen = HashSet::new();
        loop {
            if !seen.insert(current.id.as_str()) {
                return None;
            }
            let key = current.binding.as_deref().and_then(field_key_from_binding)?;
            if key != PARENT_BINDING {
                return Some(key);
            }
            let parent = current.parent.as_deref()?;
            current = self.get(parent)?;
        }
    }

    /// True when the element or any ancestor is in `ids`.
    fn is_within(&self, element: &SurfaceElement, ids: &HashSet<&str>) -> bool {
        let mut current = Some(element);
        let mut depth = 0;
        while let Some(el) = current {
            if ids.contains(el.id.as_str()) {
                return true;
            }
            depth += 1;
            if depth > self.elements.len() {
                return false;
            }
            current = el.parent.as_deref().and_then(|p| self.get(p));
        }
        false
    }

    /// The surface without the given elements and their descendants.
    pub fn without(&self, ids: &[ElementId]) -> Self {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        Self {
            elements: self
                .elements
                .iter()
                .filter(|e| !self.is_within(e, &ids))
                .cloned()
                .collect(),
        }
    }
}

/// The UI-binding runtime collaborator.
#[async_trait]
pub trait SurfaceRuntime: Send + Sync {
    /// Bind the schema's field models and report what was rendered.
    async fn apply_bindings(&self, schema: &Schema) -> Result<RenderedSurface>;

    /// Remove elements from view.
    async fn hide(&self, ids: &[ElementId]);

    /// Final decorations once values and permissions are in place.
    async fn decorate(&self, surface: &RenderedSurface, schema: &Schema) -> Result<()>;
}

/// A runtime over a fixed element list, or one generated from the schema.
#[derive(Debug, Default)]
pub struct StaticSurface {
    template: Option<RenderedSurface>,
    hidden: Mutex<Vec<ElementId>>,
    decorated: Mutex<u32>,
}

impl StaticSurface {
    pub fn new(surface: RenderedSurface) -> Self {
        Self {
            template: Some(surface),
            ..Default::default()
        }
    }

    /// Generate one control per field at bind time.
    pub fn generated() -> Self {
        Self::default()
    }

    /// Every element hidden so far.
    pub fn hidden(&self) -> Vec<ElementId> {
        self.hidden
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// How many times decorations were applied.
    pub fn decorate_count(&self) -> u32 {
        self.decorated.lock().map(|d| *d).unwrap_or_default()
    }
}

#[async_trait]
impl SurfaceRuntime for StaticSurface {
    async fn apply_bindings(&self, schema: &Schema) -> Result<RenderedSurface> {
        let Some(ref surface) = self.template else {
            return Ok(RenderedSurface::generate(schema));
        };
        for element in surface.elements().iter().filter(|e| e.is_editable_control()) {
            let Some(key) = surface.field_key_of(element) else {
                continue;
            };
            if !key.starts_with(['_', '$']) && schema.get(&key).is_none() {
                return Err(FormError::Surface(format!(
                    "element '{}' is bound to unknown field '{}'",
                    element.id, key
                )));
            }
        }
        Ok(surface.clone())
    }

    async fn hide(&self, ids: &[ElementId]) {
        if let Ok(mut hidden) = self.hidden.lock() {
            hidden.extend(ids.iter().cloned());
        }
    }

    async fn decorate(&self, _surface: &RenderedSurface, _schema: &Schema) -> Result<()> {
        if let Ok(mut count) = self.decorated.lock() {
            *count += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compile;
    use listform_client::{FieldSchema, ListSchema};

    #[test]
    fn test_field_key_from_binding() {
        assert_eq!(field_key_from_binding("value: Title"), Some("Title".into()));
        assert_eq!(field_key_from_binding("value:Amount, valueUpdate: 'input'"), Some("Amount".into()));
        assert_eq!(field_key_from_binding("checked: $root.Tags"), Some("Tags".into()));
        assert_eq!(field_key_from_binding("spPerson: Owner._metadata"), Some("Owner".into()));
        assert_eq!(field_key_from_binding("value: $parent"), Some(PARENT_BINDING.into()));
        assert_eq!(field_key_from_binding("no binding here"), None);
    }

    #[test]
    fn test_editable_controls() {
        assert!(SurfaceElement::input("a", "value: A").is_editable_control());
        assert!(!SurfaceElement::input("b", "click: save").with_type("submit").is_editable_control());
        assert!(SurfaceElement::select("c", "value: C").is_editable_control());
        assert!(!SurfaceElement::new("d", "span").is_editable_control());
        assert!(SurfaceElement::new("e", "div").content_editable().is_editable_control());
    }

    #[test]
    fn test_parent_binding_resolves_to_enclosing_element() {
        let surface = RenderedSurface::new(vec![
            SurfaceElement::new("wrap", "div").bound("with: Comments"),
            SurfaceElement::textarea("inner", "value: $parent").within("wrap"),
            SurfaceElement::textarea("orphan", "value: $parent"),
        ]);
        let inner = surface.get("inner").unwrap();
        assert_eq!(surface.field_key_of(inner), Some("Comments".into()));
        assert_eq!(surface.field_key_of(surface.get("orphan").unwrap()), None);
    }

    #[test]
    fn test_without_removes_descendants() {
        let surface = RenderedSurface::new(vec![
            SurfaceElement::section("finance"),
            SurfaceElement::input("budget", "value: Budget").within("finance"),
            SurfaceElement::input("title", "value: Title"),
        ]);
        let trimmed = surface.without(&["finance".to_string()]);
        assert_eq!(trimmed.len(), 1);
        assert!(trimmed.get("title").is_some());
    }

    #[tokio::test]
    async fn test_template_bound_to_unknown_field_fails() {
        let schema = compile(&ListSchema {
            fields: vec![FieldSchema::new("Title", "Title", "Text")],
            ..Default::default()
        })
        .unwrap();

        let runtime = StaticSurface::new(RenderedSurface::new(vec![
            SurfaceElement::input("title", "value: Title"),
            SurfaceElement::input("save", "click: save").with_type("button"),
        ]));
        assert_eq!(runtime.apply_bindings(&schema).await.unwrap().len(), 2);

        let runtime = StaticSurface::new(RenderedSurface::new(vec![
            SurfaceElement::input("budget", "value: Budget"),
        ]));
        let err = runtime.apply_bindings(&schema).await.unwrap_err();
        assert!(matches!(err, FormError::Surface(msg) if msg.contains("Budget")));
    }

    #[test]
    fn test_generated_surface() {
        let schema = compile(&ListSchema {
            fields: vec![
                FieldSchema::new("Title", "Title", "Text").required(),
                FieldSchema::new("Body", "Body", "Note"),
                FieldSchema::new("Created", "Created", "DateTime").read_only(),
            ],
            ..Default::default()
        })
        .unwrap();

        let surface = RenderedSurface::generate(&schema);
        assert_eq!(surface.len(), 3);
        assert_eq!(surface.get("Body").unwrap().tag, "textarea");
        assert!(surface.get("Title").unwrap().required);
        assert!(!surface.get("Created").unwrap().is_editable_control());
    }
}
