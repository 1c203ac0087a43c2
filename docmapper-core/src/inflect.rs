//! Naming conventions for collections, foreign keys and association targets.

use convert_case::{Case, Casing};

/// `BlogPost` -> `blog_post`.
pub fn snake(name: &str) -> String {
    name.to_case(Case::Snake)
}

/// `blog_post` -> `BlogPost`.
pub fn pascal(name: &str) -> String {
    name.to_case(Case::Pascal)
}

/// English plural of the last word, for default collection names.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() || word.ends_with("ies") {
        return word.to_string();
    }

    if let Some(stem) = word.strip_suffix('y')
        && !stem.ends_with(['a', 'e', 'i', 'o', 'u'])
    {
        return format!("{stem}ies");
    }

    if word.ends_with("ss") || word.ends_with(['x', 'z']) || word.ends_with("ch") || word.ends_with("sh") {
        return format!("{word}es");
    }

    if word.ends_with('s') {
        return word.to_string();
    }

    format!("{word}s")
}

/// English singular of the last word, for default association targets.
pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }

    for suffix in ["sses", "xes", "zes", "ches", "shes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }

    match word.strip_suffix('s') {
        Some(stem) if !stem.is_empty() && !stem.ends_with('s') => stem.to_string(),
        _ => word.to_string(),
    }
}

/// Default collection of a model type: `BlogPost` -> `blog_posts`.
pub fn collection_name(model: &str) -> String {
    pluralize(&snake(model))
}

/// Default target of an association: `comments` -> `Comment`.
pub fn class_name(association: &str, plural: bool) -> String {
    if plural {
        pascal(&singularize(association))
    } else {
        pascal(association)
    }
}
