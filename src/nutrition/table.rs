use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::collaborators::NutritionLookup;
use crate::error::CollaboratorError;
use crate::models::NutritionProfile;

use super::normalize_class;

/// Table-provided nutrition data keyed by normalized class name.
#[derive(Debug, Clone, Default)]
pub struct NutritionTable {
    entries: HashMap<String, NutritionProfile>,
}

impl NutritionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A few staple classes, per gram of cooked food.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        table.insert("rice", profile(1.0, 1.3, 0.027, 0.003, 0.28));
        table.insert("pasta", profile(0.55, 1.58, 0.058, 0.009, 0.31));
        table.insert("mashed_potato", profile(1.05, 0.83, 0.019, 0.03, 0.13));
        table.insert("oatmeal", profile(1.0, 0.71, 0.025, 0.015, 0.12));
        table.insert("green_salad", profile(0.25, 0.17, 0.012, 0.002, 0.033));
        table.insert("chicken_curry", profile(1.02, 1.45, 0.11, 0.08, 0.07));
        table
    }

    /// Load a JSON object mapping class name to profile.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read nutrition table from {}", path.display()))?;
        let raw: HashMap<String, NutritionProfile> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse nutrition table {}", path.display()))?;

        let mut table = Self::new();
        for (class, entry) in raw {
            table.insert(&class, entry);
        }
        Ok(table)
    }

    pub fn insert(&mut self, class: &str, profile: NutritionProfile) {
        self.entries.insert(normalize_class(class), profile);
    }

    pub fn get(&self, class: &str) -> Option<&NutritionProfile> {
        self.entries.get(&normalize_class(class))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl NutritionLookup for NutritionTable {
    async fn lookup(&self, class: &str) -> Result<Option<NutritionProfile>, CollaboratorError> {
        Ok(self.get(class).copied())
    }
}

fn profile(density: f64, calories: f64, protein: f64, fat: f64, carbs: f64) -> NutritionProfile {
    NutritionProfile {
        density_g_per_ml: density,
        calories_per_gram: calories,
        protein_per_gram: protein,
        fat_per_gram: fat,
        carbs_per_gram: carbs,
    }
}
