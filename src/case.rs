//! Text case helpers: titles for resources and fields, URL slugs.

use regex::Regex;
use std::sync::OnceLock;

/// Title-case each run of letters: first letter upper, rest lower.
/// e.g. "organisations" -> "Organisations", "user_roles" -> "User_Roles"
pub fn to_title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_cased = true;
        } else {
            out.push(c);
            prev_cased = false;
        }
    }
    out
}

/// Singular display title of a table: title-cased with one trailing "s" removed.
/// e.g. "organisations" -> "Organisation"
pub fn singular_title(table: &str) -> String {
    let title = to_title_case(table);
    match title.strip_suffix('s') {
        Some(s) => s.to_string(),
        None => title,
    }
}

fn uri_not_allowed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_\-/.]").expect("static regex"))
}

fn repeated_dash() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-{2,}").expect("static regex"))
}

/// URL-safe slug: spaces become dashes, disallowed characters are dropped.
/// e.g. "Hello  World!" -> "hello-world"
pub fn slugify(title: &str) -> String {
    let name = title.replace(' ', "-").to_lowercase();
    let name = uri_not_allowed().replace_all(&name, "");
    let name = repeated_dash().replace_all(&name, "-");
    name.trim_matches(|c| c == '_' || c == '-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_case_matches_word_boundaries() {
        assert_eq!(to_title_case("organisations"), "Organisations");
        assert_eq!(to_title_case("user_roles"), "User_Roles");
        assert_eq!(to_title_case("hELLO wORLD"), "Hello World");
        assert_eq!(to_title_case("v2beta"), "V2Beta");
    }

    #[test]
    fn singular_title_strips_one_s() {
        assert_eq!(singular_title("organisations"), "Organisation");
        assert_eq!(singular_title("glass"), "Glas");
        assert_eq!(singular_title("data"), "Data");
    }

    #[test]
    fn slugify_cleans_titles() {
        assert_eq!(slugify("Hello  World!"), "hello-world");
        assert_eq!(slugify("-- Apples & Pears --"), "apples-pears");
        assert_eq!(slugify("a/b.c_d"), "a/b.c_d");
    }
}
