//! Name derivation shared by entity-set URLs and model keys

use regex::Regex;
use std::sync::OnceLock;

static NON_WORD: OnceLock<Regex> = OnceLock::new();

/// Derive a compact identifier from a display name.
///
/// The first possessive `'s` becomes `S`, punctuation is dropped, every
/// letter following whitespace is upper-cased and whitespace is removed.
/// The first character keeps its case.
///
/// `"Computer Name (if applicable)"` -> `"ComputerNameIfApplicable"`
pub fn to_camel_case(name: &str) -> String {
    let non_word =
        NON_WORD.get_or_init(|| Regex::new(r"[^A-Za-z0-9\s]").expect("static pattern"));

    let possessive = name.replacen("'s", "S", 1);
    let stripped = non_word.replace_all(&possessive, "");

    let mut out = String::with_capacity(stripped.len());
    let mut upper_next = false;
    for ch in stripped.chars() {
        if ch.is_whitespace() {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_strips_punctuation() {
        assert_eq!(
            to_camel_case("Computer Name (if applicable)"),
            "ComputerNameIfApplicable"
        );
    }

    #[test]
    fn test_camel_case_possessive() {
        assert_eq!(to_camel_case("Manager's Approval"), "ManagerSApproval");
        assert_eq!(to_camel_case("Owner's Manager's Name"), "OwnerSManagersName");
    }

    #[test]
    fn test_camel_case_keeps_first_char() {
        assert_eq!(to_camel_case("amount due"), "amountDue");
        assert_eq!(to_camel_case("Workflow History"), "WorkflowHistory");
        assert_eq!(to_camel_case(""), "");
    }
}
