//! Delivery address guessing.

use std::sync::LazyLock;

use regex::Regex;

static NAME_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z]+").expect("static regex"));

/// Candidate email addresses for `name` at `domain`.
///
/// Uses the first and last name tokens: `first`, `last`, `firstlast`,
/// `first.last`, `flast`, `f.last`. A single-token name yields only
/// `first@domain`. Middle names and punctuation are ignored.
pub fn email_permutations(name: &str, domain: &str) -> Vec<String> {
    let domain = domain.trim().trim_start_matches('@').to_ascii_lowercase();
    if domain.is_empty() {
        return Vec::new();
    }

    let tokens: Vec<String> = NAME_TOKEN
        .find_iter(name)
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect();

    let locals = match tokens.as_slice() {
        [] => Vec::new(),
        [first] => vec![first.clone()],
        [first, .., last] => {
            let f = &first[..1];
            vec![
                first.clone(),
                last.clone(),
                format!("{first}{last}"),
                format!("{first}.{last}"),
                format!("{f}{last}"),
                format!("{f}.{last}"),
            ]
        }
    };

    let mut addresses: Vec<String> = Vec::with_capacity(locals.len());
    for local in locals {
        let address = format!("{local}@{domain}");
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_token_name() {
        assert_eq!(
            email_permutations("Ada Lovelace", "acme.com"),
            vec![
                "ada@acme.com",
                "lovelace@acme.com",
                "adalovelace@acme.com",
                "ada.lovelace@acme.com",
                "alovelace@acme.com",
                "a.lovelace@acme.com",
            ]
        );
    }

    #[test]
    fn middle_names_are_ignored() {
        let addresses = email_permutations("Grace Brewster Hopper", "Navy.mil");
        assert_eq!(addresses[0], "grace@navy.mil");
        assert_eq!(addresses[3], "grace.hopper@navy.mil");
        assert_eq!(addresses.len(), 6);
    }

    #[test]
    fn single_token_name() {
        assert_eq!(email_permutations("Prince", "acme.com"), vec!["prince@acme.com"]);
    }

    #[test]
    fn empty_inputs() {
        assert!(email_permutations("", "acme.com").is_empty());
        assert!(email_permutations("Ada Lovelace", " ").is_empty());
    }

    #[test]
    fn duplicate_forms_collapse() {
        // first == last gives repeated locals.
        let addresses = email_permutations("Bo Bo", "acme.com");
        assert_eq!(
            addresses,
            vec![
                "bo@acme.com",
                "bobo@acme.com",
                "bo.bo@acme.com",
                "bbo@acme.com",
                "b.bo@acme.com",
            ]
        );
    }
}
