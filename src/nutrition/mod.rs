pub mod projector;
pub mod table;

pub use projector::project_nutrition;
pub use table::NutritionTable;

/// Canonical key for a class label: trimmed, lowercase, words joined by `_`.
pub fn normalize_class(class: &str) -> String {
    class
        .trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
