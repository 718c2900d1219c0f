//! Page selection ("1,3,5-7") and caller-owned ordering of inputs.

use std::collections::BTreeSet;
use std::str::FromStr;

use crate::error::{Error, Result};

/// order of the indices returned by [`parse_page_range`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PageOrder {
    /// for reading, extracting, rotating
    #[default]
    Ascending,
    /// for deleting: removing pages highest first keeps the remaining
    /// indices valid. Selecting every page is refused.
    Descending,
}

/// parse a page range string like "1,3-5,10" into 1-based page numbers
///
/// Pages outside `1..=total_pages` are dropped, duplicates collapse.
pub fn parse_page_range(spec: &str, total_pages: u32, order: PageOrder) -> Result<Vec<u32>> {
    let mut pages = BTreeSet::new();
    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let (start, end) = match token.split_once('-') {
            Some((start, end)) => (page_number(start, token)?, page_number(end, token)?),
            None => {
                let p = page_number(token, token)?;
                (p, p)
            }
        };
        if start > end {
            return Err(Error::ParseError(format!(
                "invalid range: {token} (start is after end)"
            )));
        }
        // clamp before expanding so huge ranges cost nothing
        let (lo, hi) = (start.max(1), end.min(total_pages));
        if lo <= hi {
            pages.extend(lo..=hi);
        }
    }

    if pages.is_empty() {
        return Err(Error::ParseError("no valid pages selected".into()));
    }

    match order {
        PageOrder::Ascending => Ok(pages.into_iter().collect()),
        PageOrder::Descending => {
            if pages.len() == total_pages as usize {
                return Err(Error::InvalidOperation("cannot delete all pages".into()));
            }
            Ok(pages.into_iter().rev().collect())
        }
    }
}

fn page_number(digits: &str, token: &str) -> Result<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::ParseError(format!("invalid token: {token}")));
    }
    // only overflow can fail here, and that is past the end of any document
    Ok(digits.parse().unwrap_or(u32::MAX))
}

/// move the element at `from` to position `to` (both 0-based)
pub fn move_item<T>(mut list: Vec<T>, from: usize, to: usize) -> Result<Vec<T>> {
    let len = list.len();
    for (name, index) in [("from", from), ("to", to)] {
        if index >= len {
            return Err(Error::InvalidInput(format!(
                "{name} position {index} out of bounds (list has {len} items)"
            )));
        }
    }
    let item = list.remove(from);
    list.insert(to, item);
    Ok(list)
}

/// a reorder request written as "FROM:TO" with 1-based positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub from: usize,
    pub to: usize,
}

impl FromStr for Move {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let position = |part: &str| -> Result<usize> {
            match part.trim().parse::<usize>() {
                Ok(n) if n >= 1 => Ok(n - 1),
                _ => Err(Error::InvalidInput(format!(
                    "invalid move {s:?}: positions are 1-based numbers"
                ))),
            }
        };
        let (from, to) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("invalid move {s:?}: expected FROM:TO")))?;
        Ok(Move {
            from: position(from)?,
            to: position(to)?,
        })
    }
}

/// apply reorder requests one after another
pub fn apply_moves<T>(list: Vec<T>, moves: &[Move]) -> Result<Vec<T>> {
    moves
        .iter()
        .try_fold(list, |list, m| move_item(list, m.from, m.to))
}
