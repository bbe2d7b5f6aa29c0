//! Resolution of a logical service name to a single unit file.
//!
//! Unit files live in two scopes (system-wide and per-user). A name matches a
//! unit when the unit's file name, with its extension stripped and case
//! folded, equals or ends with the name. Resolution then applies a fixed
//! tie-break order so that an operator who forgot `--system`/`--user` still
//! reaches the unit they meant.

use std::fmt;

use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    System,
    User,
}

impl Scope {
    pub fn from_system(system: bool) -> Self {
        if system { Scope::System } else { Scope::User }
    }

    pub fn opposite(self) -> Self {
        match self {
            Scope::System => Scope::User,
            Scope::User => Scope::System,
        }
    }

    pub fn is_system(self) -> bool {
        self == Scope::System
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::System => write!(f, "system"),
            Scope::User => write!(f, "user"),
        }
    }
}

/// A unit file picked out of one of the two scopes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchedUnit {
    pub scope: Scope,
    pub file_name: String,
}

/// Strip a case-insensitive extension from a unit file name.
///
/// Returns `None` when the extension is absent or nothing would remain.
pub fn strip_unit_ext<'a>(file_name: &'a str, ext: &str) -> Option<&'a str> {
    if file_name.len() <= ext.len() {
        return None;
    }
    let split = file_name.len() - ext.len();
    if !file_name.is_char_boundary(split) {
        return None;
    }
    let (stem, suffix) = file_name.split_at(split);
    suffix.eq_ignore_ascii_case(ext).then_some(stem)
}

/// Units whose stem ends with `name`, compared case-insensitively.
pub fn filter_matching(units: &[String], name: &str, ext: &str) -> Vec<String> {
    let wanted = name.to_lowercase();
    units
        .iter()
        .filter(|unit| {
            strip_unit_ext(unit, ext)
                .map(|stem| stem.to_lowercase().ends_with(&wanted))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// The unit whose stem is exactly `name`, compared case-insensitively.
pub fn exact_match(units: &[String], name: &str, ext: &str) -> Option<String> {
    let wanted = name.to_lowercase();
    units
        .iter()
        .find(|unit| {
            strip_unit_ext(unit, ext)
                .map(|stem| stem.to_lowercase() == wanted)
                .unwrap_or(false)
        })
        .cloned()
}

/// Resolve `name` against the unit listings of both scopes.
///
/// Order of precedence:
/// 1. an exact match in the opposite scope, unless the requested scope has
///    an exact match of its own;
/// 2. no match in the requested scope is an absence error naming any
///    opposite-scope candidates;
/// 3. several matches in the requested scope is an ambiguity error;
/// 4. a single match resolves.
pub fn resolve_unit(
    requested: Scope,
    name: &str,
    ext: &str,
    system_units: &[String],
    user_units: &[String],
) -> Result<MatchedUnit, Error> {
    let system_matches = filter_matching(system_units, name, ext);
    let user_matches = filter_matching(user_units, name, ext);
    let (wanted, other) = match requested {
        Scope::System => (system_matches, user_matches),
        Scope::User => (user_matches, system_matches),
    };

    if exact_match(&wanted, name, ext).is_none()
        && let Some(file_name) = exact_match(&other, name, ext)
    {
        return Ok(MatchedUnit {
            scope: requested.opposite(),
            file_name,
        });
    }

    match wanted.len() {
        0 => Err(Error::ServiceNotFound {
            name: name.to_string(),
            scope: requested,
            other_scope: other,
        }),
        1 => Ok(MatchedUnit {
            scope: requested,
            file_name: wanted[0].clone(),
        }),
        _ => Err(Error::AmbiguousService {
            name: name.to_string(),
            candidates: wanted,
        }),
    }
}
