//! Line scanner for the chat dialect.
//!
//! nom handles the head of the line (tags, prefix, command); parameters are
//! a single hand-rolled forward scan. Every received line passes through
//! here, so the scanner borrows from the input and allocates only the
//! parameter index vector.
//!
//! The scanner reports defects instead of panicking or guessing;
//! [`Message::parse`](super::Message::parse) maps any defect to a minimal
//! `Unknown` message, mirroring how permissive real-world servers treat
//! garbage.

use nom::{
    bytes::complete::{take_until, take_while1},
    character::complete::{char, space0},
    combinator::opt,
    error::{context, VerboseError},
    sequence::preceded,
    IResult,
};

/// Middle parameters allowed per line.
///
/// This is a protocol limit of the dialect, not an implementation
/// convenience: a line with more middle parameters degrades to `Unknown`
/// rather than being silently truncated.
pub const MAX_MIDDLE_PARAMS: usize = 31;

type ScanResult<'a, O> = IResult<&'a str, O, VerboseError<&'a str>>;

/// Borrowed pieces of a scanned line.
#[derive(Debug)]
pub(super) struct RawParts<'a> {
    pub tags: Option<&'a str>,
    pub prefix: Option<&'a str>,
    pub command: &'a str,
    pub params: Vec<&'a str>,
}

/// Why a line could not be scanned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ScanDefect {
    /// Tag section with no closing space. The whole line is dropped; see
    /// the crate docs for why this is preserved behavior.
    MalformedTags,
    /// No command token where one was required.
    MissingCommand,
    /// More middle parameters than [`MAX_MIDDLE_PARAMS`].
    TooManyParams,
}

/// The tag section: everything after `@` up to the first space. Tag values
/// escape embedded spaces as `\s`, so the first space always terminates the
/// section on well-formed input.
fn tag_section(input: &str) -> ScanResult<'_, &str> {
    context(
        "scanning message tags",
        preceded(char('@'), take_until(" ")),
    )(input)
}

/// The prefix: everything after `:` up to the next space.
fn prefix_section(input: &str) -> ScanResult<'_, &str> {
    context(
        "scanning message prefix",
        preceded(char(':'), take_while1(|c| c != ' ')),
    )(input)
}

/// The command token: letters for named commands, digits for replies.
fn command_token(input: &str) -> ScanResult<'_, &str> {
    context(
        "scanning command token",
        take_while1(|c: char| c.is_alphanumeric()),
    )(input)
}

/// Scan one line (without its terminator) into borrowed parts.
pub(super) fn scan(input: &str) -> Result<RawParts<'_>, ScanDefect> {
    let (rest, tags) = if input.starts_with('@') {
        let (rest, tags) = tag_section(input).map_err(|_| ScanDefect::MalformedTags)?;
        (rest, Some(tags))
    } else {
        (input, None)
    };

    let (rest, _) = space0::<_, VerboseError<&str>>(rest).map_err(|_| ScanDefect::MissingCommand)?;
    let (rest, prefix) = opt(prefix_section)(rest).map_err(|_| ScanDefect::MissingCommand)?;
    let (rest, _) = space0::<_, VerboseError<&str>>(rest).map_err(|_| ScanDefect::MissingCommand)?;
    let (rest, command) = command_token(rest).map_err(|_| ScanDefect::MissingCommand)?;

    // Bounded up front: the cap plus one trailing slot, never regrown.
    let mut params = Vec::with_capacity(MAX_MIDDLE_PARAMS + 1);
    let mut middles = 0usize;
    let mut rest = rest;
    while let Some(b' ') = rest.as_bytes().first().copied() {
        rest = &rest[1..];

        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing);
            break;
        }

        let end = rest.find(' ').unwrap_or(rest.len());
        let param = &rest[..end];
        if param.is_empty() {
            break;
        }
        if middles == MAX_MIDDLE_PARAMS {
            return Err(ScanDefect::TooManyParams);
        }
        middles += 1;
        params.push(param);
        rest = &rest[end..];
    }

    Ok(RawParts {
        tags,
        prefix,
        command,
        params,
    })
}
