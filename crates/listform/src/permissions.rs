//! Group membership, element visibility and writable field resolution.

use listform_client::{Group, Principal};
use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::codec::MULTI_SEPARATOR;
use crate::schema::Schema;
use crate::surface::{ElementId, RenderedSurface, SurfaceElement};

/// One entry of a group restriction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRef {
    Id(u64),
    Name(String),
    /// `id;#name`
    Pair { id: u64, name: String },
}

impl GroupRef {
    /// Parse one comma-separated entry. Blank entries yield `None`.
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }

        if let Some((id, name)) = entry.split_once(MULTI_SEPARATOR) {
            if let Ok(id) = id.trim().parse() {
                return Some(GroupRef::Pair {
                    id,
                    name: name.trim().to_string(),
                });
            }
        }

        match entry.parse() {
            Ok(id) => Some(GroupRef::Id(id)),
            Err(_) => Some(GroupRef::Name(entry.to_string())),
        }
    }

    pub fn matches(&self, group: &Group) -> bool {
        match self {
            GroupRef::Id(id) => group.id == *id,
            GroupRef::Name(name) => group.name == *name,
            GroupRef::Pair { id, name } => group.id == *id || group.name == *name,
        }
    }
}

/// Parse a comma-separated group restriction.
pub fn parse_group_spec(spec: &str) -> Vec<GroupRef> {
    spec.split(',').filter_map(GroupRef::parse).collect()
}

/// True when the principal belongs to any group named in `spec`.
pub fn is_member(principal: &Principal, spec: &str) -> bool {
    parse_group_spec(spec)
        .iter()
        .any(|r| principal.groups.iter().any(|g| r.matches(g)))
}

/// Why an element was hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Principal is in none of the element's groups
    Group,
    /// Edit-only element on a new form
    EditOnly,
    /// New-only element on an existing item
    NewOnly,
    /// Author-only element, principal is not the author
    AuthorOnly,
    /// Element for non-authors, principal is the author
    NonAuthorOnly,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::Group => "group",
            DenialReason::EditOnly => "edit_only",
            DenialReason::NewOnly => "new_only",
            DenialReason::AuthorOnly => "author_only",
            DenialReason::NonAuthorOnly => "non_author_only",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An element hidden from the principal. Not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionDenial {
    pub element_id: ElementId,
    pub reason: DenialReason,
}

/// Form state that visibility markers depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisibilityContext {
    /// No item has been saved yet
    pub is_new: bool,
    /// The principal created the item
    pub is_author: bool,
}

fn denial_for(
    element: &SurfaceElement,
    principal: &Principal,
    ctx: VisibilityContext,
) -> Option<DenialReason> {
    if let Some(spec) = element.groups.as_deref() {
        if !parse_group_spec(spec).is_empty() && !is_member(principal, spec) {
            return Some(DenialReason::Group);
        }
    }
    if element.edit_only && ctx.is_new {
        return Some(DenialReason::EditOnly);
    }
    if element.new_only && !ctx.is_new {
        return Some(DenialReason::NewOnly);
    }
    // Authorship markers only apply to an existing item.
    if ctx.is_new {
        return None;
    }
    if element.author_only && !ctx.is_author {
        return Some(DenialReason::AuthorOnly);
    }
    if element.non_author_only && ctx.is_author {
        return Some(DenialReason::NonAuthorOnly);
    }
    None
}

/// Elements the principal must not see.
pub fn resolve_visibility(
    surface: &RenderedSurface,
    principal: &Principal,
    ctx: VisibilityContext,
) -> Vec<PermissionDenial> {
    let denials: Vec<PermissionDenial> = surface
        .elements()
        .iter()
        .filter_map(|el| {
            denial_for(el, principal, ctx).map(|reason| PermissionDenial {
                element_id: el.id.clone(),
                reason,
            })
        })
        .collect();

    debug!(
        principal = principal.id,
        hidden = denials.len(),
        "Resolved element visibility"
    );
    denials
}

/// Keys the form may write back: bound on an editable control, present in the
/// schema, not read-only and not internal (`_` or `$` prefix). Sorted.
pub fn editable_field_keys(surface: &RenderedSurface, schema: &Schema) -> Vec<String> {
    let mut keys: Vec<String> = surface
        .elements()
        .iter()
        .filter(|el| el.is_editable_control())
        .filter_map(|el| surface.field_key_of(el))
        .filter(|key| !key.starts_with('_') && !key.starts_with('$'))
        .filter(|key| {
            schema
                .descriptor(key)
                .is_some_and(|descriptor| !descriptor.read_only)
        })
        .collect();

    keys.sort();
    keys.dedup();
    keys
}
