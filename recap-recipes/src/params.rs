//! Parameter merging and the public-parameter allowlist.
//!
//! The LLM analyzer tends to surface every templated value as a parameter.
//! Before a recipe is persisted we keep only user-facing parameters; private
//! ones (session ids, nonces, tracking, csrf) are inlined as literals in the
//! URL/body and removed from the declared list.

use std::collections::BTreeMap;

use crate::{placeholder_names, Recipe, RecipeParameter};

/// Parameters a user is expected to supply or tune.
const PUBLIC_PARAM_NAMES: &[&str] = &[
    "q",
    "query",
    "search",
    "term",
    "keyword",
    "keywords",
    "page",
    "per_page",
    "limit",
    "count",
    "offset",
    "id",
    "user",
    "username",
    "date",
    "since",
    "until",
    "sort",
    "order",
    "lang",
    "format",
];

/// Common user terms mapped onto canonical parameter names.
const PARAM_ALIASES: &[(&str, &str)] = &[
    ("query", "q"),
    ("limit", "per_page"),
    ("count", "per_page"),
];

/// Resolve user-supplied parameter names against a recipe's declared list.
///
/// A user key is matched directly first; if no declared parameter has that
/// name, the alias table is consulted (`query` → `q`, `limit` → `per_page`,
/// `count` → `per_page`). Unmatched keys pass through untouched so the
/// runner can report them.
pub fn merge_params(
    recipe: &Recipe,
    user_params: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let declared: Vec<&str> = recipe.parameters.iter().map(|p| p.name.as_str()).collect();

    let mut out: BTreeMap<String, String> = BTreeMap::new();

    // Defaults first, user values override.
    for param in &recipe.parameters {
        if let Some(default) = &param.default {
            out.insert(param.name.clone(), default.clone());
        }
    }

    for (key, value) in user_params {
        if declared.contains(&key.as_str()) {
            out.insert(key.clone(), value.clone());
            continue;
        }
        let aliased = PARAM_ALIASES
            .iter()
            .find(|(from, to)| from == key && declared.contains(to))
            .map(|(_, to)| *to);
        match aliased {
            Some(canonical) => {
                out.insert(canonical.to_string(), value.clone());
            }
            None => {
                out.insert(key.clone(), value.clone());
            }
        }
    }

    out
}

/// Keep user-facing parameters, inline private ones as literals.
///
/// A parameter survives when its name is in the public allowlist. Private
/// parameters with a default are substituted into the URL/body template and
/// dropped from the declared list; private parameters without a default are
/// dropped (their placeholder stays for the validator to flag).
pub fn apply_public_parameter_allowlist(recipe: &mut Recipe) {
    let (public, private): (Vec<RecipeParameter>, Vec<RecipeParameter>) = recipe
        .parameters
        .drain(..)
        .partition(|p| PUBLIC_PARAM_NAMES.contains(&p.name.to_lowercase().as_str()));

    for param in &private {
        let Some(default) = &param.default else {
            continue;
        };
        let placeholder = format!("{{{}}}", param.name);
        recipe.request.url = recipe.request.url.replace(&placeholder, default);
        if let Some(body) = &recipe.request.body_template {
            recipe.request.body_template = Some(body.replace(&placeholder, default));
        }
    }

    recipe.parameters = public;
}

/// Declared-but-unbound placeholders remaining after allowlisting.
pub fn unbound_placeholders(recipe: &Recipe) -> Vec<String> {
    let declared: Vec<&str> = recipe.parameters.iter().map(|p| p.name.as_str()).collect();
    let mut names = placeholder_names(&recipe.request.url);
    if let Some(body) = &recipe.request.body_template {
        names.extend(placeholder_names(body));
    }
    names.retain(|n| !declared.contains(&n.as_str()));
    names.dedup();
    names
}
