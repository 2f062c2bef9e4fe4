//! Search-string parsing: at most one `category:` or `group:` token up
//! front, the remainder is a case-insensitive substring filter.

use tracing::debug;

use crate::errors::Result;
use crate::storage::models::{ClipEntry, EntryFilter, GroupFilter, Scope, SmartGroup};
use crate::storage::{ClipStorage, GroupStorage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prefix {
    Category(String),
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub prefix: Option<Prefix>,
    pub text: String,
}

const CATEGORY_TAG: &str = "category:";
const GROUP_TAG: &str = "group:";

fn strip_tag<'a>(token: &'a str, tag: &str) -> Option<&'a str> {
    let head = token.get(..tag.len())?;
    head.eq_ignore_ascii_case(tag).then(|| &token[tag.len()..])
}

pub fn parse(input: &str) -> ParsedQuery {
    let trimmed = input.trim();
    let (head, rest) = trimmed
        .split_once(char::is_whitespace)
        .unwrap_or((trimmed, ""));

    let prefix = if let Some(value) = strip_tag(head, CATEGORY_TAG) {
        Some(Prefix::Category(value.to_string()))
    } else {
        strip_tag(head, GROUP_TAG).map(|value| Prefix::Group(value.to_string()))
    };

    match prefix {
        // A bare `group:` filters nothing.
        Some(Prefix::Category(v) | Prefix::Group(v)) if v.is_empty() => ParsedQuery {
            prefix: None,
            text: rest.trim().to_string(),
        },
        Some(prefix) => ParsedQuery {
            prefix: Some(prefix),
            text: rest.trim().to_string(),
        },
        None => ParsedQuery {
            prefix: None,
            text: trimmed.to_string(),
        },
    }
}

/// Turns a parsed query into a store filter. `group:X` prefers a persisted
/// group named X, then a smart group; an unknown name matches nothing.
pub fn resolve<G: GroupStorage + ?Sized>(groups: &G, parsed: ParsedQuery) -> Result<EntryFilter> {
    let scope = match parsed.prefix {
        None => Scope::All,
        Some(Prefix::Category(label)) => Scope::Category {
            smart: SmartGroup::from_name(&label),
            label,
        },
        Some(Prefix::Group(name)) => match groups.find_group(&name)? {
            Some(stored) => Scope::Group(GroupFilter::Persisted(stored)),
            None => match SmartGroup::from_name(&name) {
                Some(smart) => Scope::Group(GroupFilter::Smart(smart)),
                None => Scope::Group(GroupFilter::Persisted(name)),
            },
        },
    };
    Ok(EntryFilter {
        scope,
        text: parsed.text,
    })
}

/// History matching `search`, newest first. `None` or blank returns all.
pub fn search<S>(store: &S, search: Option<&str>) -> Result<Vec<ClipEntry>>
where
    S: ClipStorage + GroupStorage + ?Sized,
{
    let filter = resolve(store, parse(search.unwrap_or_default()))?;
    debug!(?filter, "history query");
    store.find(&filter)
}
