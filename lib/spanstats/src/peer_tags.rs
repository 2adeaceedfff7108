//! Peer tag catalog.
//!
//! Peer tags identify the remote side of an outbound call: the database, queue, or service a span talked to. The
//! default set ships embedded in the binary as an INI file and is parsed the first time it is needed. Operators can
//! supplement it through `apm_config.peer_tags`.

use std::sync::LazyLock;

use nom::{
    branch::alt,
    bytes::complete::{take_till, take_while, take_while1},
    character::complete::{char, one_of, space0},
    combinator::{all_consuming, map, opt, rest, value},
    sequence::{delimited, preceded, terminated},
    IResult, Parser as _,
};
use snafu::Snafu;
use tracing::{debug, error};

use crate::{
    aggregation::{TAG_BASE_SERVICE, TAG_SPAN_KIND},
    config::ConcentratorConfig,
    trace::Span,
};

const PEER_TAGS_INI: &str = include_str!("../resources/peer_tags.ini");
const PEER_TAGS_SECTION: &str = "dd.apm.peer.tags";

static DEFAULT_PEER_TAGS: LazyLock<Vec<String>> = LazyLock::new(|| load_default_peer_tags(PEER_TAGS_INI));

/// Builds the default peer tags from a catalog, falling back to the base service tag alone if it cannot be parsed.
fn load_default_peer_tags(contents: &str) -> Vec<String> {
    let mut tags = vec![TAG_BASE_SERVICE.to_string()];
    match parse_catalog(contents, PEER_TAGS_SECTION) {
        Ok(catalog) => tags.extend(catalog),
        Err(e) => error!(
            error = %e,
            "Failed to parse embedded peer tags catalog. Only the base service tag will be aggregated."
        ),
    }

    let tags = prepare_peer_tags(tags);
    debug!(peer_tags_len = tags.len(), "Loaded default peer tags.");
    tags
}

/// Peer tag catalog error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub(crate) enum CatalogError {
    #[snafu(display("Malformed line {} in peer tags catalog: '{}'", line, content))]
    MalformedLine { line: usize, content: String },

    #[snafu(display("Peer tags catalog has no '[{}]' section.", section))]
    MissingSection { section: String },
}

/// Returns the default peer tag keys.
///
/// Always contains `_dd.base_service`. The list is sorted and free of duplicates.
pub fn default_peer_tags() -> &'static [String] {
    &DEFAULT_PEER_TAGS
}

/// Merges a list of peer tag keys into a sorted, deduplicated list.
pub fn prepare_peer_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut tags: Vec<String> = tags.into_iter().map(Into::into).collect();
    tags.sort_unstable();
    tags.dedup();
    tags
}

/// Resolves the peer tag keys to aggregate on for the given configuration.
///
/// Returns an empty list when peer tags aggregation is disabled.
pub fn resolve_peer_tag_keys(config: &ConcentratorConfig) -> Vec<String> {
    if !config.peer_tags_enabled() {
        return Vec::new();
    }

    prepare_peer_tags(default_peer_tags().iter().chain(config.peer_tags()).cloned())
}

/// Selects which of the resolved peer tag keys apply to a span, based on its kind.
///
/// `keys` must be sorted, as returned by [`resolve_peer_tag_keys`].
pub(crate) fn peer_tag_keys_for_span<'a>(
    keys: &'a [String], span_kind: &str, base_service: Option<&str>,
) -> &'a [String] {
    if keys.is_empty() {
        return &[];
    }

    if (span_kind.is_empty() || span_kind.eq_ignore_ascii_case("internal"))
        && base_service.is_some_and(|s| !s.is_empty())
    {
        return match keys.binary_search_by(|k| k.as_str().cmp(TAG_BASE_SERVICE)) {
            Ok(i) => &keys[i..=i],
            Err(_) => &[],
        };
    }

    if span_kind.eq_ignore_ascii_case("client")
        || span_kind.eq_ignore_ascii_case("producer")
        || span_kind.eq_ignore_ascii_case("consumer")
    {
        return keys;
    }

    &[]
}

/// Returns the `key:value` peer tags present on the span.
pub(crate) fn matching_peer_tags(span: &Span, keys: &[String]) -> Vec<String> {
    let span_kind = span.meta().get(TAG_SPAN_KIND).map(String::as_str).unwrap_or_default();
    let base_service = span.meta().get(TAG_BASE_SERVICE).map(String::as_str);

    peer_tag_keys_for_span(keys, span_kind, base_service)
        .iter()
        .filter_map(|key| match span.meta().get(key) {
            Some(value) if !value.is_empty() => Some(format!("{}:{}", key, value)),
            _ => None,
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
enum Line<'a> {
    Blank,
    Section(&'a str),
    Entry(&'a str, &'a str),
}

pub(crate) fn parse_catalog(contents: &str, section_name: &str) -> Result<Vec<String>, CatalogError> {
    let mut current_section = None;
    let mut found = false;
    let mut tags = Vec::new();

    for (idx, raw) in contents.lines().enumerate() {
        let parsed = all_consuming(line).parse(raw);
        match parsed {
            Ok((_, Line::Blank)) => {}
            Ok((_, Line::Section(name))) => {
                found |= name == section_name;
                current_section = Some(name);
            }
            Ok((_, Line::Entry(_, values))) => {
                if current_section == Some(section_name) {
                    tags.extend(
                        values
                            .split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from),
                    );
                }
            }
            Err(_) => {
                return MalformedLine {
                    line: idx + 1,
                    content: raw,
                }
                .fail()
            }
        }
    }

    if !found {
        return MissingSection { section: section_name }.fail();
    }

    Ok(tags)
}

fn line(input: &str) -> IResult<&str, Line<'_>> {
    preceded(
        space0,
        alt((
            map(section, Line::Section),
            map(entry, |(key, values)| Line::Entry(key, values)),
            value(Line::Blank, opt(comment)),
        )),
    )
    .parse(input)
}

fn comment(input: &str) -> IResult<&str, &str> {
    preceded(one_of(";#"), rest).parse(input)
}

fn trailer(input: &str) -> IResult<&str, ()> {
    value((), (space0, opt(comment))).parse(input)
}

fn section(input: &str) -> IResult<&str, &str> {
    terminated(
        delimited(char('['), map(take_till(|c: char| c == ']'), str::trim), char(']')),
        trailer,
    )
    .parse(input)
}

fn entry(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, key) = map(
        take_while1(|c: char| c != '=' && c != '[' && c != ';' && c != '#'),
        str::trim,
    )
    .parse(input)?;
    let (input, _) = (char('='), space0).parse(input)?;
    let (input, values) = terminated(alt((quoted, bare)), trailer).parse(input)?;
    Ok((input, (key, values)))
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c: char| c != '"'), char('"')).parse(input)
}

fn bare(input: &str) -> IResult<&str, &str> {
    map(take_while(|c: char| c != ';' && c != '#'), str::trim).parse(input)
}
