//! Expansion of configured path specs into concrete directory sets.
//!
//! A spec is either a literal directory path or a pattern whose `/`-separated
//! segments are regular expressions matched against child directory names,
//! e.g. `/datalake/asset[0-9]+` or `/user/.*`.

use std::collections::BTreeSet;

use regex::Regex;
use thiserror::Error;

use crate::snapshot::{self, SnapshotTree};

#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("invalid pattern segment `{segment}` in path spec `{spec}`: {source}")]
    Pattern {
        spec: String,
        segment: String,
        #[source]
        source: Box<regex::Error>,
    },

    #[error(transparent)]
    Tree(#[from] snapshot::Error),
}

/// Expands every spec and unions the results (set semantics).
///
/// # Errors
///
/// Fails on the first spec that cannot be expanded; callers wanting per-spec
/// error confinement expand specs individually via [`expand_spec`].
pub fn expand_specs<T, I, S>(tree: &T, specs: I) -> Result<BTreeSet<String>, ExpandError>
where
    T: SnapshotTree + ?Sized,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut expanded = BTreeSet::new();
    for spec in specs {
        expanded.extend(expand_spec(tree, spec.as_ref())?);
    }
    Ok(expanded)
}

/// Expands one path spec into the set of matching directories.
///
/// A spec naming an existing directory expands to itself. Otherwise the
/// longest existing literal prefix is resolved segment by segment; each
/// remaining segment is compiled as a regular expression and matched (full
/// match) against the names of the candidate directories' children. Candidates
/// that vanished between listing rounds are skipped with a warning; an overall
/// empty expansion is logged as a configuration warning, not an error.
///
/// # Errors
///
/// - [`ExpandError::Pattern`] for an uncompilable segment.
/// - [`ExpandError::Tree`] for I/O failures other than a missing path.
pub fn expand_spec<T>(tree: &T, spec: &str) -> Result<BTreeSet<String>, ExpandError>
where
    T: SnapshotTree + ?Sized,
{
    if has_directory(tree, spec) {
        return Ok(BTreeSet::from([spec.to_owned()]));
    }

    let segments: Vec<&str> = spec.split('/').filter(|s| !s.is_empty()).collect();

    // Resolve the literal prefix; the first unresolvable segment starts the
    // pattern region.
    let mut base = String::from("/");
    let mut resolved = 0;
    while resolved < segments.len() {
        let candidate = join(&base, segments[resolved]);
        if !has_directory(tree, &candidate) {
            break;
        }
        base = candidate;
        resolved += 1;
    }
    log::debug!("base path for spec `{spec}` is `{base}`");

    let mut candidates = BTreeSet::from([base]);
    for segment in &segments[resolved..] {
        let pattern =
            Regex::new(&format!(r"\A(?:{segment})\z")).map_err(|source| ExpandError::Pattern {
                spec: spec.to_owned(),
                segment: (*segment).to_owned(),
                source: Box::new(source),
            })?;
        let mut matched = BTreeSet::new();
        for path in &candidates {
            match tree.list_matching_children(path, &|name| pattern.is_match(name)) {
                Ok(children) => matched.extend(children),
                Err(snapshot::Error::NotFound { .. }) => {
                    log::warn!(
                        "skipping non-existing path `{path}` while expanding `{spec}`; \
                         check the paths/pathSets configuration"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        candidates = matched;
    }

    if candidates.is_empty() {
        log::warn!(
            "path spec `{spec}` expanded to no existing directory; \
             check the paths/pathSets configuration"
        );
    }
    Ok(candidates)
}

fn join(base: &str, segment: &str) -> String {
    if base == "/" {
        format!("/{segment}")
    } else {
        format!("{base}/{segment}")
    }
}

fn has_directory<T>(tree: &T, path: &str) -> bool
where
    T: SnapshotTree + ?Sized,
{
    path == "/" || tree.exists(path)
}
